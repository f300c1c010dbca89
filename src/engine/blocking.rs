use std::time::Instant;

use tracing::{debug, info};

use crate::auth::{AuthContext, require_role};
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, Entity};

impl Engine {
    /// Record an owner's blocked range. Rejected if it overlaps a confirmed booking
    /// or another block on the same property.
    pub async fn create_blocked_date(
        &self,
        ctx: &AuthContext,
        property_id: Id,
        start: &str,
        end: &str,
    ) -> Result<BlockedDate, EngineError> {
        let started = Instant::now();
        let result = self.create_blocked_date_inner(ctx, property_id, start, end).await;
        observability::record("create_blocked_date", started, &result);
        result
    }

    async fn create_blocked_date_inner(
        &self,
        ctx: &AuthContext,
        property_id: Id,
        start: &str,
        end: &str,
    ) -> Result<BlockedDate, EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        let range = DateRange::parse(start, end)?;

        let (_guard, property) = self.lock_existing_property(property_id).await?;
        Self::require_owner(&caller, &property)?;

        if let Some(booking) = self.confirmed_overlap(property_id, range, None).await? {
            debug!(property_id, booking_id = booking.id, %range, "block rejected");
            observability::record_conflict("booking");
            return Err(EngineError::OverlapBookings(booking.id));
        }
        if let Some(block) = self.block_overlap(property_id, range).await? {
            debug!(property_id, blocked_date_id = block.id, %range, "block rejected");
            observability::record_conflict("blocked");
            return Err(EngineError::OverlapBlocks(block.id));
        }

        let blocked = self
            .blocked_dates
            .create(NewBlockedDate { property_id, range })
            .await?;
        info!(blocked_date_id = blocked.id, property_id, %range, "dates blocked");
        Ok(blocked)
    }

    pub async fn delete_blocked_date(&self, ctx: &AuthContext, blocked_date_id: Id) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.delete_blocked_date_inner(ctx, blocked_date_id).await;
        observability::record("delete_blocked_date", started, &result);
        result
    }

    async fn delete_blocked_date_inner(&self, ctx: &AuthContext, blocked_date_id: Id) -> Result<(), EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        let missing = || EngineError::not_found(Entity::BlockedDate, blocked_date_id);
        let blocked = self
            .blocked_dates
            .find_by_id(blocked_date_id)
            .await?
            .ok_or_else(missing)?;

        let (_guard, property) = self.lock_existing_property(blocked.property_id).await?;
        Self::require_owner(&caller, &property)?;
        if !self.blocked_dates.delete(blocked_date_id).await? {
            return Err(missing());
        }
        info!(blocked_date_id, property_id = property.id, "blocked dates released");
        Ok(())
    }
}
