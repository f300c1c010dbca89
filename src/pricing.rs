use rust_decimal::Decimal;

use crate::engine::EngineError;

/// Total stay price: `base_price_per_night * max(1, nights)`.
///
/// The one-night floor keeps a degenerate night count from pricing a stay at zero;
/// range validation rejects `start >= end` before this is reached. A product that
/// does not fit a `Decimal` is `InvalidArgument`.
pub fn compute_total_price(base_price_per_night: Decimal, nights: i64) -> Result<Decimal, EngineError> {
    base_price_per_night
        .checked_mul(Decimal::from(nights.max(1)))
        .ok_or_else(|| EngineError::InvalidArgument("total price overflows".into()))
}
