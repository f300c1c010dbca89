use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dates::{days_between, parse_date, ranges_overlap};
use crate::engine::EngineError;
use crate::limits::*;

/// Auto-increment row id. Ids are unique per table, not globally.
pub type Id = u64;

/// Closed calendar interval `[start, end]`, `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidDateRange(format!(
                "start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both ends as `YYYY-MM-DD` and validate ordering.
    pub fn parse(start: &str, end: &str) -> Result<Self, EngineError> {
        Self::new(parse_date(start, "start")?, parse_date(end, "end")?)
    }

    pub fn nights(&self) -> i64 {
        days_between(self.start, self.end)
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        ranges_overlap(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Publishes properties and confirms or cancels bookings against them.
    Owner,
    /// Creates bookings.
    Traveler,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Owner => "OWNER",
            Role::Traveler => "TRAVELER",
        })
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OWNER" => Ok(Role::Owner),
            "TRAVELER" => Ok(Role::Traveler),
            other => Err(EngineError::InvalidArgument(format!(
                "role must be OWNER or TRAVELER, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: Id,
    pub owner_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub max_guests: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub base_price_per_night: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Transition table. Same-status requests are handled by the caller as no-ops.
    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!((self, to), (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled))
    }

    pub fn is_terminal(self) -> bool {
        self == BookingStatus::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(EngineError::InvalidArgument(format!(
                "status must be PENDING, CONFIRMED or CANCELLED, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub property_id: Id,
    /// The traveler who made the booking.
    pub user_id: Id,
    pub range: DateRange,
    pub guests: u32,
    /// Fixed at creation.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDate {
    pub id: Id,
    pub property_id: Id,
    pub range: DateRange,
}

// ── Insert / patch records ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProperty {
    pub title: String,
    pub description: Option<String>,
    pub max_guests: u32,
    pub base_price_per_night: Decimal,
}

impl NewProperty {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        validate_title(&self.title)?;
        validate_description(self.description.as_deref())?;
        validate_capacity(self.max_guests)?;
        validate_price(self.base_price_per_night)
    }
}

/// Partial update: `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub max_guests: Option<u32>,
    pub base_price_per_night: Option<Decimal>,
}

impl PropertyPatch {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            validate_description(description.as_deref())?;
        }
        if let Some(max_guests) = self.max_guests {
            validate_capacity(max_guests)?;
        }
        if let Some(price) = self.base_price_per_night {
            validate_price(price)?;
        }
        Ok(())
    }

    /// Produce the patched record; `current` is not modified.
    pub fn apply(&self, current: &Property) -> Property {
        Property {
            id: current.id,
            owner_id: current.owner_id,
            title: self.title.clone().unwrap_or_else(|| current.title.clone()),
            description: match &self.description {
                Some(description) => description.clone(),
                None => current.description.clone(),
            },
            max_guests: self.max_guests.unwrap_or(current.max_guests),
            base_price_per_night: self
                .base_price_per_night
                .unwrap_or(current.base_price_per_night),
        }
    }
}

fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidArgument("title is required".into()));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::InvalidArgument("title too long".into()));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), EngineError> {
    match description {
        Some(d) if d.len() > MAX_DESCRIPTION_LEN => {
            Err(EngineError::InvalidArgument("description too long".into()))
        }
        _ => Ok(()),
    }
}

fn validate_capacity(max_guests: u32) -> Result<(), EngineError> {
    if max_guests == 0 {
        return Err(EngineError::InvalidArgument("max_guests must be a positive integer".into()));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), EngineError> {
    if price <= Decimal::ZERO {
        return Err(EngineError::InvalidArgument(
            "base_price_per_night must be a positive number".into(),
        ));
    }
    if price > Decimal::from(MAX_PRICE_PER_NIGHT) {
        return Err(EngineError::InvalidArgument(format!(
            "base_price_per_night cannot exceed {MAX_PRICE_PER_NIGHT}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub property_id: Id,
    pub user_id: Id,
    pub range: DateRange,
    pub guests: u32,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBlockedDate {
    pub property_id: Id,
    pub range: DateRange,
}

// ── Query types ──────────────────────────────────────────────────

/// `limit`/`offset` window over an id-ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE as usize,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Normalize 1-based `page`/`page_size` arguments into a window.
    pub fn from_page(page: Option<u32>, page_size: Option<u32>) -> Result<Self, EngineError> {
        let page = page.unwrap_or(DEFAULT_PAGE);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(EngineError::InvalidArgument("page must be a positive integer".into()));
        }
        if page_size == 0 {
            return Err(EngineError::InvalidArgument(
                "page_size must be a positive integer".into(),
            ));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(EngineError::InvalidArgument(format!(
                "page_size cannot exceed {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self {
            limit: page_size as usize,
            offset: (page as usize - 1) * page_size as usize,
        })
    }

    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

/// A search hit: the property plus the price of the requested stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedProperty {
    pub property: Property,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
}

// ── Calendar ─────────────────────────────────────────────────────

/// What occupies a calendar slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A CONFIRMED booking. Pending and cancelled bookings never occupy the calendar.
    Booking,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarEntry {
    pub id: Id,
    pub range: DateRange,
    pub kind: EntryKind,
}

/// Occupied ranges of one property, sorted by `range.start`.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    pub entries: Vec<CalendarEntry>,
}

impl Calendar {
    /// Insert entry maintaining sort order by range start.
    pub fn insert(&mut self, entry: CalendarEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.range.start, |e| e.range.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Id, kind: EntryKind) -> Option<CalendarEntry> {
        let pos = self.entries.iter().position(|e| e.id == id && e.kind == kind)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose range overlaps `query` (closed intervals).
    /// Entries starting after `query.end` are skipped by binary search.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &CalendarEntry> {
        let right_bound = self.entries.partition_point(|e| e.range.start <= query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.range.end >= query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Id counters at snapshot time, so ids are never reused after compaction.
    IdsReserved {
        next_property_id: Id,
        next_booking_id: Id,
        next_blocked_date_id: Id,
    },
    PropertyCreated(Property),
    PropertyUpdated(Property),
    PropertyDeleted {
        id: Id,
    },
    BookingCreated(Booking),
    BookingStatusChanged {
        id: Id,
        property_id: Id,
        status: BookingStatus,
    },
    BlockedDateCreated(BlockedDate),
    BlockedDateDeleted {
        id: Id,
        property_id: Id,
    },
}
