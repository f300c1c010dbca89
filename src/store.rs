use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{error, info, warn};

use crate::model::*;
use crate::repo::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    Close {
        response: oneshot::Sender<io::Result<()>>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Appends already queued when the first one arrives share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let cmd = match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut trailing = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            trailing = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                match trailing {
                    Some(other) => other,
                    None => continue,
                }
            }
            other => other,
        };
        if !handle_control(&mut wal, cmd) {
            break;
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Every caller sees the failure, so none of the batch may survive a restart.
    if let Err(e) = &result {
        warn!(error = %e, events = batch.len(), "WAL batch failed, rolling back");
        if let Err(rollback) = wal.rollback() {
            error!(error = %rollback, "WAL rollback failed");
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Returns false once the writer should stop.
fn handle_control(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
            true
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
            true
        }
        WalCommand::Close { response } => {
            let _ = response.send(wal.flush_sync());
            false
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Compact on open when replay saw more than this many entries.
    pub compact_threshold: u64,
    pub channel_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            channel_capacity: 4096,
        }
    }
}

/// WAL-backed storage handle implementing every repository trait.
///
/// All state lives in memory and is rebuilt from the log on open. Each mutation
/// is made durable in the WAL before it becomes visible to reads.
pub struct WalStore {
    path: PathBuf,
    properties: DashMap<Id, Property>,
    bookings: DashMap<Id, Booking>,
    blocked_dates: DashMap<Id, BlockedDate>,
    /// property id → confirmed bookings and blocks.
    calendars: DashMap<Id, Calendar>,
    next_property_id: AtomicU64,
    next_booking_id: AtomicU64,
    next_blocked_date_id: AtomicU64,
    /// Mutations hold it shared across append + apply; compaction holds it exclusively
    /// so its snapshot never misses an appended event.
    commit_gate: RwLock<()>,
    closed: AtomicBool,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the log at `path`, rebuild indexes and start the WAL writer.
    /// Must be called inside a tokio runtime.
    pub async fn open(path: impl AsRef<Path>, options: StoreOptions) -> StorageResult<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let events = Wal::recover(&path)?;
        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(options.channel_capacity.max(1));
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            path,
            properties: DashMap::new(),
            bookings: DashMap::new(),
            blocked_dates: DashMap::new(),
            calendars: DashMap::new(),
            next_property_id: AtomicU64::new(1),
            next_booking_id: AtomicU64::new(1),
            next_blocked_date_id: AtomicU64::new(1),
            commit_gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            wal_tx,
        };
        for event in &events {
            store.apply(event);
        }
        info!(
            path = %store.path.display(),
            events = events.len(),
            properties = store.properties.len(),
            bookings = store.bookings.len(),
            blocked_dates = store.blocked_dates.len(),
            "store opened"
        );

        let store = Arc::new(store);
        if events.len() as u64 > options.compact_threshold {
            store.compact().await?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply an event to the in-memory indexes. Caller has already made it durable.
    fn apply(&self, event: &Event) {
        match event {
            Event::IdsReserved {
                next_property_id,
                next_booking_id,
                next_blocked_date_id,
            } => {
                self.next_property_id.fetch_max(*next_property_id, Ordering::SeqCst);
                self.next_booking_id.fetch_max(*next_booking_id, Ordering::SeqCst);
                self.next_blocked_date_id
                    .fetch_max(*next_blocked_date_id, Ordering::SeqCst);
            }
            Event::PropertyCreated(property) | Event::PropertyUpdated(property) => {
                self.next_property_id.fetch_max(property.id + 1, Ordering::SeqCst);
                self.properties.insert(property.id, property.clone());
            }
            Event::PropertyDeleted { id } => {
                self.properties.remove(id);
                self.calendars.remove(id);
                self.bookings.retain(|_, b| b.property_id != *id);
                self.blocked_dates.retain(|_, b| b.property_id != *id);
            }
            Event::BookingCreated(booking) => {
                self.next_booking_id.fetch_max(booking.id + 1, Ordering::SeqCst);
                if booking.status == BookingStatus::Confirmed {
                    self.occupy(booking.property_id, booking.id, booking.range, EntryKind::Booking);
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingStatusChanged {
                id,
                property_id,
                status,
            } => {
                let previous = match self.bookings.get_mut(id) {
                    Some(mut booking) => {
                        let previous = booking.status;
                        booking.status = *status;
                        Some((previous, booking.range))
                    }
                    None => None,
                };
                if let Some((previous, range)) = previous {
                    let was = previous == BookingStatus::Confirmed;
                    let is = *status == BookingStatus::Confirmed;
                    if !was && is {
                        self.occupy(*property_id, *id, range, EntryKind::Booking);
                    } else if was && !is {
                        self.vacate(*property_id, *id, EntryKind::Booking);
                    }
                }
            }
            Event::BlockedDateCreated(blocked) => {
                self.next_blocked_date_id.fetch_max(blocked.id + 1, Ordering::SeqCst);
                self.occupy(blocked.property_id, blocked.id, blocked.range, EntryKind::Blocked);
                self.blocked_dates.insert(blocked.id, blocked.clone());
            }
            Event::BlockedDateDeleted { id, property_id } => {
                self.blocked_dates.remove(id);
                self.vacate(*property_id, *id, EntryKind::Blocked);
            }
        }
    }

    fn occupy(&self, property_id: Id, id: Id, range: DateRange, kind: EntryKind) {
        self.calendars
            .entry(property_id)
            .or_default()
            .insert(CalendarEntry { id, range, kind });
    }

    fn vacate(&self, property_id: Id, id: Id, kind: EntryKind) {
        if let Some(mut calendar) = self.calendars.get_mut(&property_id) {
            calendar.remove(id, kind);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StorageError::Closed)?;
        rx.await
            .map_err(|_| StorageError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| {
                warn!("WAL append failed: {e}");
                StorageError::Wal(e.to_string())
            })
    }

    /// WAL-append then apply, under the shared commit gate.
    async fn commit(&self, event: Event) -> StorageResult<()> {
        let _gate = self.commit_gate.read().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    /// Ids of calendar entries of `kind` on `property_id` overlapping `range`.
    fn overlapping_ids(&self, property_id: Id, range: &DateRange, kind: EntryKind) -> Vec<Id> {
        self.calendars
            .get(&property_id)
            .map(|calendar| {
                calendar
                    .overlapping(range)
                    .filter(|e| e.kind == kind)
                    .map(|e| e.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sorted_properties(&self, keep: impl Fn(&Property) -> bool) -> Vec<Property> {
        let mut out: Vec<Property> = self
            .properties
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact(&self) -> StorageResult<()> {
        let _gate = self.commit_gate.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        let mut events = vec![Event::IdsReserved {
            next_property_id: self.next_property_id.load(Ordering::SeqCst),
            next_booking_id: self.next_booking_id.load(Ordering::SeqCst),
            next_blocked_date_id: self.next_blocked_date_id.load(Ordering::SeqCst),
        }];
        events.extend(self.sorted_properties(|_| true).into_iter().map(Event::PropertyCreated));

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(Event::BookingCreated));

        let mut blocked: Vec<BlockedDate> =
            self.blocked_dates.iter().map(|e| e.value().clone()).collect();
        blocked.sort_by_key(|b| b.id);
        events.extend(blocked.into_iter().map(Event::BlockedDateCreated));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StorageError::Closed)?;
        rx.await
            .map_err(|_| StorageError::Wal("WAL writer dropped response".into()))??;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(path = %self.path.display(), events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Flush and stop the WAL writer. Later mutations fail with [`StorageError::Closed`].
    pub async fn close(&self) -> StorageResult<()> {
        let _gate = self.commit_gate.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        if self.wal_tx.send(WalCommand::Close { response: tx }).await.is_err() {
            return Ok(());
        }
        rx.await.map_err(|_| StorageError::Closed)??;
        info!(path = %self.path.display(), "store closed");
        Ok(())
    }
}

#[async_trait]
impl PropertyRepository for WalStore {
    async fn find_by_id(&self, id: Id) -> StorageResult<Option<Property>> {
        Ok(self.properties.get(&id).map(|p| p.value().clone()))
    }

    async fn find_by_owner_paged(
        &self,
        owner_id: Id,
        pagination: Pagination,
    ) -> StorageResult<Vec<Property>> {
        Ok(pagination.apply(self.sorted_properties(|p| p.owner_id == owner_id)))
    }

    async fn find_by_min_capacity(&self, guests: u32) -> StorageResult<Vec<Property>> {
        Ok(self.sorted_properties(|p| p.max_guests >= guests))
    }

    async fn create(&self, owner_id: Id, new: NewProperty) -> StorageResult<Property> {
        let property = Property {
            id: self.next_property_id.fetch_add(1, Ordering::SeqCst),
            owner_id,
            title: new.title,
            description: new.description,
            max_guests: new.max_guests,
            base_price_per_night: new.base_price_per_night,
        };
        self.commit(Event::PropertyCreated(property.clone())).await?;
        Ok(property)
    }

    async fn update(&self, property: Property) -> StorageResult<Property> {
        if !self.properties.contains_key(&property.id) {
            return Err(StorageError::Backend(format!("property {} does not exist", property.id)));
        }
        self.commit(Event::PropertyUpdated(property.clone())).await?;
        Ok(property)
    }

    async fn delete(&self, id: Id) -> StorageResult<bool> {
        if !self.properties.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::PropertyDeleted { id }).await?;
        Ok(true)
    }
}

#[async_trait]
impl BookingRepository for WalStore {
    async fn find_overlapping_confirmed(
        &self,
        property_id: Id,
        range: DateRange,
        exclude_id: Option<Id>,
    ) -> StorageResult<Vec<Booking>> {
        Ok(self
            .overlapping_ids(property_id, &range, EntryKind::Booking)
            .into_iter()
            .filter(|id| Some(*id) != exclude_id)
            .filter_map(|id| self.bookings.get(&id).map(|b| b.value().clone()))
            .collect())
    }

    async fn find_overlapping_confirmed_in(
        &self,
        property_ids: &[Id],
        range: DateRange,
    ) -> StorageResult<Vec<Booking>> {
        Ok(property_ids
            .iter()
            .flat_map(|pid| self.overlapping_ids(*pid, &range, EntryKind::Booking))
            .filter_map(|id| self.bookings.get(&id).map(|b| b.value().clone()))
            .collect())
    }

    async fn create(&self, new: NewBooking) -> StorageResult<Booking> {
        let booking = Booking {
            id: self.next_booking_id.fetch_add(1, Ordering::SeqCst),
            property_id: new.property_id,
            user_id: new.user_id,
            range: new.range,
            guests: new.guests,
            total_price: new.total_price,
            status: BookingStatus::Pending,
        };
        self.commit(Event::BookingCreated(booking.clone())).await?;
        Ok(booking)
    }

    async fn find_by_id(&self, id: Id) -> StorageResult<Option<Booking>> {
        Ok(self.bookings.get(&id).map(|b| b.value().clone()))
    }

    async fn save(&self, booking: Booking) -> StorageResult<Booking> {
        let event = Event::BookingStatusChanged {
            id: booking.id,
            property_id: booking.property_id,
            status: booking.status,
        };
        if !self.bookings.contains_key(&booking.id) {
            return Err(StorageError::Backend(format!("booking {} does not exist", booking.id)));
        }
        self.commit(event).await?;
        self.bookings
            .get(&booking.id)
            .map(|b| b.value().clone())
            .ok_or_else(|| StorageError::Backend(format!("booking {} vanished", booking.id)))
    }
}

#[async_trait]
impl BlockedDateRepository for WalStore {
    async fn find_overlapping(
        &self,
        property_id: Id,
        range: DateRange,
    ) -> StorageResult<Vec<BlockedDate>> {
        Ok(self
            .overlapping_ids(property_id, &range, EntryKind::Blocked)
            .into_iter()
            .filter_map(|id| self.blocked_dates.get(&id).map(|b| b.value().clone()))
            .collect())
    }

    async fn find_overlapping_in(
        &self,
        property_ids: &[Id],
        range: DateRange,
    ) -> StorageResult<Vec<BlockedDate>> {
        Ok(property_ids
            .iter()
            .flat_map(|pid| self.overlapping_ids(*pid, &range, EntryKind::Blocked))
            .filter_map(|id| self.blocked_dates.get(&id).map(|b| b.value().clone()))
            .collect())
    }

    async fn create(&self, new: NewBlockedDate) -> StorageResult<BlockedDate> {
        let blocked = BlockedDate {
            id: self.next_blocked_date_id.fetch_add(1, Ordering::SeqCst),
            property_id: new.property_id,
            range: new.range,
        };
        self.commit(Event::BlockedDateCreated(blocked.clone())).await?;
        Ok(blocked)
    }

    async fn find_by_id(&self, id: Id) -> StorageResult<Option<BlockedDate>> {
        Ok(self.blocked_dates.get(&id).map(|b| b.value().clone()))
    }

    async fn delete(&self, id: Id) -> StorageResult<bool> {
        let Some(property_id) = self.blocked_dates.get(&id).map(|b| b.property_id) else {
            return Ok(false);
        };
        self.commit(Event::BlockedDateDeleted { id, property_id }).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::parse(start, end).unwrap()
    }

    fn cabin() -> NewProperty {
        NewProperty {
            title: "Cabin".into(),
            description: None,
            max_guests: 4,
            base_price_per_night: Decimal::from(100),
        }
    }

    async fn open(dir: &tempfile::TempDir) -> Arc<WalStore> {
        WalStore::open(dir.path().join("store.wal"), StoreOptions::default())
            .await
            .unwrap()
    }

    fn new_booking(property_id: Id, start: &str, end: &str) -> NewBooking {
        NewBooking {
            property_id,
            user_id: 50,
            range: range(start, end),
            guests: 2,
            total_price: Decimal::from(200),
        }
    }

    #[tokio::test]
    async fn ids_auto_increment_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let a = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        let b = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        let booking = BookingRepository::create(&*store, new_booking(a.id, "2024-01-01", "2024-01-03"))
            .await
            .unwrap();
        assert_eq!(booking.id, 1);
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn only_confirmed_bookings_are_found_as_overlapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let p = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        let booking = BookingRepository::create(&*store, new_booking(p.id, "2024-01-01", "2024-01-05"))
            .await
            .unwrap();
        let query = range("2024-01-05", "2024-01-07");

        assert!(store.find_overlapping_confirmed(p.id, query, None).await.unwrap().is_empty());

        let confirmed = store
            .save(Booking { status: BookingStatus::Confirmed, ..booking.clone() })
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        let hits = store.find_overlapping_confirmed(p.id, query, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store
            .find_overlapping_confirmed(p.id, query, Some(booking.id))
            .await
            .unwrap()
            .is_empty());

        store
            .save(Booking { status: BookingStatus::Cancelled, ..booking })
            .await
            .unwrap();
        assert!(store.find_overlapping_confirmed(p.id, query, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batched_lookups_cover_many_properties() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let p1 = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        let p2 = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        let p3 = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        BlockedDateRepository::create(
            &*store,
            NewBlockedDate { property_id: p1.id, range: range("2024-02-01", "2024-02-03") },
        )
        .await
        .unwrap();
        BlockedDateRepository::create(
            &*store,
            NewBlockedDate { property_id: p3.id, range: range("2024-02-02", "2024-02-09") },
        )
        .await
        .unwrap();

        let hits = store
            .find_overlapping_in(&[p1.id, p2.id, p3.id], range("2024-02-03", "2024-02-04"))
            .await
            .unwrap();
        let mut pids: Vec<Id> = hits.iter().map(|b| b.property_id).collect();
        pids.sort();
        assert_eq!(pids, vec![p1.id, p3.id]);
    }

    #[tokio::test]
    async fn capacity_and_owner_queries_are_id_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        for (owner, guests) in [(1, 2), (2, 6), (1, 8), (1, 4)] {
            PropertyRepository::create(&*store, owner, NewProperty { max_guests: guests, ..cabin() })
                .await
                .unwrap();
        }
        let roomy: Vec<Id> = store.find_by_min_capacity(4).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(roomy, vec![2, 3, 4]);

        let page: Vec<Id> = store
            .find_by_owner_paged(1, Pagination::new(2, 1))
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(page, vec![3, 4]);
    }

    #[tokio::test]
    async fn delete_property_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let p = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        let booking = BookingRepository::create(&*store, new_booking(p.id, "2024-01-01", "2024-01-05"))
            .await
            .unwrap();
        let blocked = BlockedDateRepository::create(
            &*store,
            NewBlockedDate { property_id: p.id, range: range("2024-03-01", "2024-03-05") },
        )
        .await
        .unwrap();

        assert!(PropertyRepository::delete(&*store, p.id).await.unwrap());
        assert!(!PropertyRepository::delete(&*store, p.id).await.unwrap());
        assert!(BookingRepository::find_by_id(&*store, booking.id).await.unwrap().is_none());
        assert!(BlockedDateRepository::find_by_id(&*store, blocked.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (property, booking, blocked) = {
            let store = open(&dir).await;
            let p = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
            let b = BookingRepository::create(&*store, new_booking(p.id, "2024-01-01", "2024-01-05"))
                .await
                .unwrap();
            let b = store.save(Booking { status: BookingStatus::Confirmed, ..b }).await.unwrap();
            let bd = BlockedDateRepository::create(
                &*store,
                NewBlockedDate { property_id: p.id, range: range("2024-03-01", "2024-03-05") },
            )
            .await
            .unwrap();
            store.close().await.unwrap();
            (p, b, bd)
        };

        let store = open(&dir).await;
        assert_eq!(PropertyRepository::find_by_id(&*store, property.id).await.unwrap(), Some(property.clone()));
        assert_eq!(BookingRepository::find_by_id(&*store, booking.id).await.unwrap(), Some(booking));
        assert_eq!(
            store.find_overlapping(property.id, range("2024-03-05", "2024-03-06")).await.unwrap(),
            vec![blocked]
        );
        assert_eq!(
            store
                .find_overlapping_confirmed(property.id, range("2024-01-04", "2024-01-06"), None)
                .await
                .unwrap()
                .len(),
            1
        );
        // Counters resume after the highest replayed id.
        let next = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        assert_eq!(next.id, property.id + 1);
    }

    #[tokio::test]
    async fn compaction_preserves_state_and_id_counters() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir).await;
            let keep = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
            let gone = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
            for day in 1..=9 {
                let b = BlockedDateRepository::create(
                    &*store,
                    NewBlockedDate {
                        property_id: keep.id,
                        range: range(&format!("2024-05-0{day}"), &format!("2024-06-0{day}")),
                    },
                )
                .await
                .unwrap();
                BlockedDateRepository::delete(&*store, b.id).await.unwrap();
            }
            PropertyRepository::delete(&*store, gone.id).await.unwrap();
            assert!(store.wal_appends_since_compact().await > 0);
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
            store.close().await.unwrap();
        }

        let store = open(&dir).await;
        assert!(PropertyRepository::find_by_id(&*store, 1).await.unwrap().is_some());
        assert!(PropertyRepository::find_by_id(&*store, 2).await.unwrap().is_none());
        // Deleted id 2 is never handed out again.
        let next = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
        assert_eq!(next.id, 3);
        let blocked = BlockedDateRepository::create(
            &*store,
            NewBlockedDate { property_id: 1, range: range("2024-08-01", "2024-08-02") },
        )
        .await
        .unwrap();
        assert_eq!(blocked.id, 10);
    }

    #[tokio::test]
    async fn open_compacts_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.wal");
        {
            let store = WalStore::open(&path, StoreOptions::default()).await.unwrap();
            let p = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
            for _ in 0..5 {
                store.update(p.clone()).await.unwrap();
            }
            store.close().await.unwrap();
        }
        let options = StoreOptions { compact_threshold: 3, ..StoreOptions::default() };
        let store = WalStore::open(&path, options).await.unwrap();
        store.close().await.unwrap();
        // IdsReserved + one PropertyCreated
        assert_eq!(Wal::replay(&path).unwrap().len(), 2);
    }

    fn pending(event: Event) -> (PendingAppend, oneshot::Receiver<io::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        ((event, tx), rx)
    }

    fn listing(id: Id, description: Option<String>) -> Event {
        Event::PropertyCreated(Property {
            id,
            owner_id: 1,
            title: "Cabin".into(),
            description,
            max_guests: 4,
            base_price_per_night: Decimal::from(100),
        })
    }

    #[test]
    fn failed_sync_rolls_back_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.wal");
        let mut wal = Wal::open(&path).unwrap();

        let (first, mut first_rx) = pending(listing(1, None));
        commit_batch(&mut wal, &mut vec![first]);
        assert!(first_rx.try_recv().unwrap().is_ok());

        wal.fail_next_sync();
        let (a, mut a_rx) = pending(listing(2, None));
        let (b, mut b_rx) = pending(listing(3, None));
        commit_batch(&mut wal, &mut vec![a, b]);
        assert!(a_rx.try_recv().unwrap().is_err());
        assert!(b_rx.try_recv().unwrap().is_err());
        assert_eq!(Wal::replay(&path).unwrap(), vec![listing(1, None)]);

        let (later, mut later_rx) = pending(listing(4, None));
        commit_batch(&mut wal, &mut vec![later]);
        assert!(later_rx.try_recv().unwrap().is_ok());
        assert_eq!(Wal::replay(&path).unwrap(), vec![listing(1, None), listing(4, None)]);
    }

    #[test]
    fn rejected_event_fails_the_frames_buffered_before_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.wal");
        let mut wal = Wal::open(&path).unwrap();

        let huge = Some("x".repeat(17 * 1024 * 1024));
        let (small, mut small_rx) = pending(listing(1, None));
        let (big, mut big_rx) = pending(listing(2, huge));
        commit_batch(&mut wal, &mut vec![small, big]);
        assert!(small_rx.try_recv().unwrap().is_err());
        assert!(big_rx.try_recv().unwrap().is_err());
        assert!(Wal::replay(&path).unwrap().is_empty());
        assert_eq!(wal.appends_since_compact(), 0);

        let (next, mut next_rx) = pending(listing(3, None));
        commit_batch(&mut wal, &mut vec![next]);
        assert!(next_rx.try_recv().unwrap().is_ok());
        assert_eq!(Wal::replay(&path).unwrap(), vec![listing(3, None)]);
    }

    #[tokio::test]
    async fn failed_write_is_neither_visible_nor_replayed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir).await;
            let kept = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
            let huge = NewProperty {
                description: Some("x".repeat(17 * 1024 * 1024)),
                ..cabin()
            };
            let err = PropertyRepository::create(&*store, 1, huge).await.unwrap_err();
            assert!(matches!(err, StorageError::Wal(_)));
            let ids: Vec<Id> = store.find_by_min_capacity(1).await.unwrap().iter().map(|p| p.id).collect();
            assert_eq!(ids, vec![kept.id]);

            let later = PropertyRepository::create(&*store, 1, cabin()).await.unwrap();
            assert!(later.id > kept.id);
            store.close().await.unwrap();
        }

        let store = open(&dir).await;
        assert_eq!(store.find_by_min_capacity(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn closed_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.close().await.unwrap();
        let err = PropertyRepository::create(&*store, 1, cabin()).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed));
        // Reads still serve the in-memory snapshot.
        assert!(store.find_by_min_capacity(1).await.unwrap().is_empty());
        // Closing twice is harmless.
        store.close().await.unwrap();
    }
}
