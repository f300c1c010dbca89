use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, warn};

use crate::model::*;
use crate::observability;
use crate::pricing::compute_total_price;

use super::{Engine, EngineError};

impl Engine {
    /// Properties that fit `guests` and have no confirmed booking or block overlapping
    /// `[start, end]`, ordered by id, windowed by `pagination`, each priced for the stay.
    ///
    /// Overlaps are fetched in two batched lookups over the whole candidate set.
    /// An empty result is not an error.
    pub async fn search_available(
        &self,
        start: &str,
        end: &str,
        guests: u32,
        pagination: Pagination,
    ) -> Result<Vec<PricedProperty>, EngineError> {
        let started = Instant::now();
        let result = self.search_available_inner(start, end, guests, pagination).await;
        observability::record("search_available", started, &result);
        result
    }

    async fn search_available_inner(
        &self,
        start: &str,
        end: &str,
        guests: u32,
        pagination: Pagination,
    ) -> Result<Vec<PricedProperty>, EngineError> {
        let range = DateRange::parse(start, end)?;
        if guests == 0 {
            return Err(EngineError::InvalidArgument("guests must be a positive integer".into()));
        }

        let candidates = self.properties.find_by_min_capacity(guests).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Id> = candidates.iter().map(|p| p.id).collect();

        let (booked, blocked) = futures::try_join!(
            self.bookings.find_overlapping_confirmed_in(&ids, range),
            self.blocked_dates.find_overlapping_in(&ids, range),
        )?;
        let unavailable: HashSet<Id> = booked
            .iter()
            .map(|b| b.property_id)
            .chain(blocked.iter().map(|b| b.property_id))
            .collect();

        let mut available: Vec<Property> = candidates
            .into_iter()
            .filter(|p| !unavailable.contains(&p.id))
            .collect();
        available.sort_by_key(|p| p.id);

        // A listing whose stay price cannot be computed cannot be booked either.
        let nights = range.nights();
        let priced: Vec<PricedProperty> = available
            .into_iter()
            .filter_map(|property| {
                match compute_total_price(property.base_price_per_night, nights) {
                    Ok(total_price) => Some(PricedProperty { property, total_price }),
                    Err(e) => {
                        warn!(property_id = property.id, error = %e, "search skipped unpriceable property");
                        None
                    }
                }
            })
            .collect();
        let page = pagination.apply(priced);
        debug!(%range, guests, excluded = unavailable.len(), returned = page.len(), "search");
        Ok(page)
    }
}
