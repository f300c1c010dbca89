use std::fmt;

use thiserror::Error;

use crate::model::{BookingStatus, Id};
use crate::repo::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Property,
    Booking,
    BlockedDate,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Property => "property",
            Entity::Booking => "booking",
            Entity::BlockedDate => "blocked date",
        })
    }
}

/// Why a requested range could not be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// A confirmed booking overlaps.
    Booking,
    /// An owner block overlaps.
    Blocked,
}

/// What stopped a booking from being confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    ConfirmedBooking(Id),
    BlockedDate(Id),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::Booking => f.write_str("overlaps a confirmed booking"),
            UnavailableReason::Blocked => f.write_str("overlaps blocked dates"),
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::ConfirmedBooking(id) => write!(f, "overlaps confirmed booking {id}"),
            ConflictReason::BlockedDate(id) => write!(f, "overlaps blocked date {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("forbidden: caller does not own {entity} {id}")]
    Forbidden { entity: Entity, id: Id },
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Id },
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{requested} guests exceed property capacity of {max}")]
    CapacityExceeded { requested: u32, max: u32 },
    #[error("dates unavailable: {0}")]
    DatesUnavailable(UnavailableReason),
    #[error("conflict: {0}")]
    Conflict(ConflictReason),
    #[error("cannot block range: overlaps confirmed booking {0}")]
    OverlapBookings(Id),
    #[error("cannot block range: overlaps blocked date {0}")]
    OverlapBlocks(Id),
    #[error("booking status cannot change from {from} to {to}")]
    InvalidStatusTransition { from: BookingStatus, to: BookingStatus },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Coarse error category for transport layers to map onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidDateRange,
    InvalidArgument,
    CapacityExceeded,
    DatesUnavailable,
    Conflict,
    InvalidStatusTransition,
    StorageError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidDateRange => "INVALID_DATE_RANGE",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorKind::DatesUnavailable => "DATES_UNAVAILABLE",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorKind::StorageError => "STORAGE_ERROR",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Unauthorized(_) => ErrorKind::Unauthorized,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidDateRange(_) => ErrorKind::InvalidDateRange,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::DatesUnavailable(_) => ErrorKind::DatesUnavailable,
            EngineError::Conflict(_)
            | EngineError::OverlapBookings(_)
            | EngineError::OverlapBlocks(_) => ErrorKind::Conflict,
            EngineError::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
            EngineError::Storage(_) => ErrorKind::StorageError,
        }
    }

    pub(crate) fn not_found(entity: Entity, id: Id) -> Self {
        EngineError::NotFound { entity, id }
    }
}
