pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Upper bound on `base_price_per_night`, in currency units.
pub const MAX_PRICE_PER_NIGHT: i64 = 1_000_000_000;
