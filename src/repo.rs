//! Storage seams consumed by the engine.
//!
//! Reads return owned value records; writes take a full record or patch and return the
//! stored record. Every call may fail with [`StorageError`].

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage closed")]
    Closed,
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn find_by_id(&self, id: Id) -> StorageResult<Option<Property>>;

    /// The owner's properties ordered by id ascending.
    async fn find_by_owner_paged(
        &self,
        owner_id: Id,
        pagination: Pagination,
    ) -> StorageResult<Vec<Property>>;

    /// Properties with `max_guests >= guests`, ordered by id ascending.
    async fn find_by_min_capacity(&self, guests: u32) -> StorageResult<Vec<Property>>;

    async fn create(&self, owner_id: Id, new: NewProperty) -> StorageResult<Property>;

    /// Replace the stored record with `property` and return it.
    async fn update(&self, property: Property) -> StorageResult<Property>;

    /// Delete the property with its bookings and blocked dates. Returns false if absent.
    async fn delete(&self, id: Id) -> StorageResult<bool>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// CONFIRMED bookings on `property_id` overlapping `range`, minus `exclude_id`.
    async fn find_overlapping_confirmed(
        &self,
        property_id: Id,
        range: DateRange,
        exclude_id: Option<Id>,
    ) -> StorageResult<Vec<Booking>>;

    /// Batched form of [`find_overlapping_confirmed`](Self::find_overlapping_confirmed)
    /// across many properties.
    async fn find_overlapping_confirmed_in(
        &self,
        property_ids: &[Id],
        range: DateRange,
    ) -> StorageResult<Vec<Booking>>;

    async fn create(&self, new: NewBooking) -> StorageResult<Booking>;

    async fn find_by_id(&self, id: Id) -> StorageResult<Option<Booking>>;

    /// Persist `booking`'s status and return the stored record.
    async fn save(&self, booking: Booking) -> StorageResult<Booking>;
}

#[async_trait]
pub trait BlockedDateRepository: Send + Sync {
    async fn find_overlapping(
        &self,
        property_id: Id,
        range: DateRange,
    ) -> StorageResult<Vec<BlockedDate>>;

    async fn find_overlapping_in(
        &self,
        property_ids: &[Id],
        range: DateRange,
    ) -> StorageResult<Vec<BlockedDate>>;

    async fn create(&self, new: NewBlockedDate) -> StorageResult<BlockedDate>;

    async fn find_by_id(&self, id: Id) -> StorageResult<Option<BlockedDate>>;

    async fn delete(&self, id: Id) -> StorageResult<bool>;
}
