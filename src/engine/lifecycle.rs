use std::time::Instant;

use tracing::{debug, info};

use crate::auth::{AuthContext, require_authenticated, require_role};
use crate::model::*;
use crate::observability;
use crate::pricing::compute_total_price;

use super::{ConflictReason, Engine, EngineError, Entity, UnavailableReason};

impl Engine {
    /// Create a PENDING booking for the calling traveler.
    ///
    /// Checks run in a fixed order: role, date range, guest count, property,
    /// capacity, confirmed overlap, blocked overlap. Nothing is persisted on rejection.
    pub async fn create_booking(
        &self,
        ctx: &AuthContext,
        property_id: Id,
        start: &str,
        end: &str,
        guests: u32,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.create_booking_inner(ctx, property_id, start, end, guests).await;
        observability::record("create_booking", started, &result);
        result
    }

    async fn create_booking_inner(
        &self,
        ctx: &AuthContext,
        property_id: Id,
        start: &str,
        end: &str,
        guests: u32,
    ) -> Result<Booking, EngineError> {
        let caller = require_role(ctx, Role::Traveler)?;
        let range = DateRange::parse(start, end)?;
        if guests == 0 {
            return Err(EngineError::InvalidArgument("guests must be a positive integer".into()));
        }

        let (_guard, property) = self.lock_existing_property(property_id).await?;
        if guests > property.max_guests {
            return Err(EngineError::CapacityExceeded {
                requested: guests,
                max: property.max_guests,
            });
        }
        if self.has_confirmed_overlap(property_id, range, None).await? {
            debug!(property_id, %range, "booking rejected: confirmed overlap");
            observability::record_conflict("booking");
            return Err(EngineError::DatesUnavailable(UnavailableReason::Booking));
        }
        if self.has_block_overlap(property_id, range).await? {
            debug!(property_id, %range, "booking rejected: blocked overlap");
            observability::record_conflict("blocked");
            return Err(EngineError::DatesUnavailable(UnavailableReason::Blocked));
        }

        let total_price = compute_total_price(property.base_price_per_night, range.nights())?;
        let booking = self
            .bookings
            .create(NewBooking {
                property_id,
                user_id: caller.user_id,
                range,
                guests,
                total_price,
            })
            .await?;
        info!(
            booking_id = booking.id,
            property_id,
            traveler_id = caller.user_id,
            %range,
            %total_price,
            "booking created"
        );
        Ok(booking)
    }

    /// Move a booking through PENDING → CONFIRMED/CANCELLED, CONFIRMED → CANCELLED.
    ///
    /// Only the owner of the booked property may do this. Requesting the current
    /// status returns the booking untouched. Confirmation re-checks overlaps under
    /// the property lock.
    pub async fn update_booking_status(
        &self,
        ctx: &AuthContext,
        booking_id: Id,
        requested: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.update_booking_status_inner(ctx, booking_id, requested).await;
        observability::record("update_booking_status", started, &result);
        result
    }

    async fn update_booking_status_inner(
        &self,
        ctx: &AuthContext,
        booking_id: Id,
        requested: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let caller = require_role(ctx, Role::Owner)?;
        let property_id = self.load_booking(booking_id).await?.property_id;

        let _guard = self.lock_property(property_id).await;
        let booking = self.load_booking(booking_id).await?;
        let property = self.load_property(property_id).await?;
        Self::require_owner(&caller, &property)?;

        if requested == booking.status {
            return Ok(booking);
        }
        if !booking.status.can_transition_to(requested) {
            return Err(EngineError::InvalidStatusTransition {
                from: booking.status,
                to: requested,
            });
        }

        if requested == BookingStatus::Confirmed {
            if let Some(other) = self
                .confirmed_overlap(property_id, booking.range, Some(booking.id))
                .await?
            {
                debug!(booking_id, conflicting_id = other.id, "confirmation rejected");
                observability::record_conflict("booking");
                return Err(EngineError::Conflict(ConflictReason::ConfirmedBooking(other.id)));
            }
            if let Some(block) = self.block_overlap(property_id, booking.range).await? {
                debug!(booking_id, blocked_date_id = block.id, "confirmation rejected");
                observability::record_conflict("blocked");
                return Err(EngineError::Conflict(ConflictReason::BlockedDate(block.id)));
            }
        }

        let from = booking.status;
        let updated = self
            .bookings
            .save(Booking {
                status: requested,
                ..booking
            })
            .await?;
        info!(booking_id, property_id, %from, to = %updated.status, "booking status changed");
        Ok(updated)
    }

    /// A booking, visible to the traveler who made it and to the property's owner.
    pub async fn get_booking(&self, ctx: &AuthContext, booking_id: Id) -> Result<Booking, EngineError> {
        let caller = require_authenticated(ctx)?;
        let booking = self.load_booking(booking_id).await?;
        let allowed = match caller.role {
            Role::Traveler => booking.user_id == caller.user_id,
            Role::Owner => self
                .properties
                .find_by_id(booking.property_id)
                .await?
                .is_some_and(|p| p.owner_id == caller.user_id),
        };
        if !allowed {
            return Err(EngineError::Forbidden {
                entity: Entity::Booking,
                id: booking_id,
            });
        }
        Ok(booking)
    }

    async fn load_booking(&self, booking_id: Id) -> Result<Booking, EngineError> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(EngineError::not_found(Entity::Booking, booking_id))
    }
}
