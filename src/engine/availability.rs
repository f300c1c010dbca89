use crate::model::*;

use super::{Engine, EngineError};

// ── Availability checker ─────────────────────────────────────────
//
// The single source of truth for conflict detection. Read-only; callers that act
// on the answer must hold the property lock across the check and their write.

impl Engine {
    /// Some CONFIRMED booking on `property_id` overlapping `range`, other than `exclude_id`.
    pub async fn confirmed_overlap(
        &self,
        property_id: Id,
        range: DateRange,
        exclude_id: Option<Id>,
    ) -> Result<Option<Booking>, EngineError> {
        let mut hits = self
            .bookings
            .find_overlapping_confirmed(property_id, range, exclude_id)
            .await?;
        hits.sort_by_key(|b| b.id);
        Ok(hits.into_iter().next())
    }

    /// Some blocked range on `property_id` overlapping `range`.
    pub async fn block_overlap(
        &self,
        property_id: Id,
        range: DateRange,
    ) -> Result<Option<BlockedDate>, EngineError> {
        let mut hits = self.blocked_dates.find_overlapping(property_id, range).await?;
        hits.sort_by_key(|b| b.id);
        Ok(hits.into_iter().next())
    }

    pub async fn has_confirmed_overlap(
        &self,
        property_id: Id,
        range: DateRange,
        exclude_id: Option<Id>,
    ) -> Result<bool, EngineError> {
        Ok(self
            .confirmed_overlap(property_id, range, exclude_id)
            .await?
            .is_some())
    }

    pub async fn has_block_overlap(&self, property_id: Id, range: DateRange) -> Result<bool, EngineError> {
        Ok(self.block_overlap(property_id, range).await?.is_some())
    }
}
