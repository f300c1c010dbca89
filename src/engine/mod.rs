mod availability;
mod blocking;
mod error;
mod lifecycle;
mod properties;
mod search;

pub use error::{ConflictReason, Entity, EngineError, ErrorKind, UnavailableReason};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::auth::Caller;
use crate::model::*;
use crate::repo::{BlockedDateRepository, BookingRepository, PropertyRepository};

pub type PropertyLock = Arc<Mutex<()>>;

/// Availability and booking coordination core.
///
/// Repositories are injected; the engine owns only the per-property locks that
/// linearize every check-then-write against a property's bookings and blocks.
pub struct Engine {
    pub(super) properties: Arc<dyn PropertyRepository>,
    pub(super) bookings: Arc<dyn BookingRepository>,
    pub(super) blocked_dates: Arc<dyn BlockedDateRepository>,
    locks: DashMap<Id, PropertyLock>,
}

impl Engine {
    pub fn new(
        properties: Arc<dyn PropertyRepository>,
        bookings: Arc<dyn BookingRepository>,
        blocked_dates: Arc<dyn BlockedDateRepository>,
    ) -> Self {
        Self {
            properties,
            bookings,
            blocked_dates,
            locks: DashMap::new(),
        }
    }

    /// Build an engine over a single backend that serves all three repositories.
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: PropertyRepository + BookingRepository + BlockedDateRepository + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    /// Acquire the write lock for one property. Different properties never contend.
    pub(super) async fn lock_property(&self, property_id: Id) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(property_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub(super) fn forget_lock(&self, property_id: Id) {
        self.locks.remove(&property_id);
    }

    pub(super) async fn load_property(&self, property_id: Id) -> Result<Property, EngineError> {
        self.properties
            .find_by_id(property_id)
            .await?
            .ok_or(EngineError::not_found(Entity::Property, property_id))
    }

    /// Look up the property, lock it, and re-read it under the lock so the caller
    /// acts on the committed record.
    pub(super) async fn lock_existing_property(
        &self,
        property_id: Id,
    ) -> Result<(OwnedMutexGuard<()>, Property), EngineError> {
        self.load_property(property_id).await?;
        let guard = self.lock_property(property_id).await;
        let property = self.load_property(property_id).await?;
        Ok((guard, property))
    }

    pub(super) fn require_owner(caller: &Caller, property: &Property) -> Result<(), EngineError> {
        if property.owner_id != caller.user_id {
            return Err(EngineError::Forbidden {
                entity: Entity::Property,
                id: property.id,
            });
        }
        Ok(())
    }
}
