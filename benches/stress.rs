use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;

use staybook::auth::AuthContext;
use staybook::engine::Engine;
use staybook::model::{Booking, BookingStatus, DateRange, Id, NewProperty, Pagination};
use staybook::repo::BookingRepository;
use staybook::store::{StoreOptions, WalStore};

const OWNER: Id = 1;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn day(offset: u64) -> String {
    let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    (base + Days::new(offset)).format("%Y-%m-%d").to_string()
}

async fn setup(engine: &Engine, n: usize) -> Vec<Id> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let property = engine
            .create_property(
                &AuthContext::owner(OWNER),
                NewProperty {
                    title: format!("Listing {i}"),
                    description: None,
                    max_guests: 2 + (i % 6) as u32,
                    base_price_per_night: Decimal::from(80 + 10 * i as i64),
                },
            )
            .await
            .unwrap();
        ids.push(property.id);
    }
    println!("  created {} properties", ids.len());
    ids
}

async fn phase1_sequential(engine: &Engine, property_id: Id) {
    let n = 500;
    let traveler = AuthContext::traveler(10);
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        engine
            .create_booking(&traveler, property_id, &day(i * 3), &day(i * 3 + 1), 1)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

/// Many travelers request overlapping stays; the owner confirms them all at once.
async fn phase2_contended_confirm(engine: Arc<Engine>, properties: &[Id]) {
    let per_property = 40;
    let mut booking_ids = Vec::new();
    for &property_id in properties {
        for j in 0..per_property {
            let start = day(400 + (j % 10));
            let end = day(400 + (j % 10) + 3);
            let booking = engine
                .create_booking(&AuthContext::traveler(1000 + j), property_id, &start, &end, 1)
                .await
                .unwrap();
            booking_ids.push(booking.id);
        }
    }

    let start = Instant::now();
    let handles: Vec<_> = booking_ids
        .into_iter()
        .map(|id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let t = Instant::now();
                let result = engine
                    .update_booking_status(&AuthContext::owner(OWNER), id, BookingStatus::Confirmed)
                    .await;
                (result.is_ok(), t.elapsed())
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (ok, latency) = h.await.unwrap();
        if ok {
            confirmed += 1;
        }
        latencies.push(latency);
    }
    println!(
        "  {} confirmations attempted, {confirmed} confirmed in {:.2}s",
        latencies.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("confirm latency", &mut latencies);
}

async fn phase3_search_under_load(engine: Arc<Engine>, properties: Vec<Id>) {
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..300u64 {
                let property_id = properties[i as usize % properties.len()];
                let _ = engine
                    .create_blocked_date(&AuthContext::owner(OWNER), property_id, &day(800 + i * 2), &day(801 + i * 2))
                    .await;
            }
        })
    };

    let mut latencies = Vec::new();
    for i in 0..200u64 {
        let t = Instant::now();
        engine
            .search_available(&day(800 + i), &day(803 + i), 2, Pagination::default())
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("search latency", &mut latencies);
}

/// No two CONFIRMED bookings on a property may share a day.
async fn audit(store: &WalStore, properties: &[Id]) {
    let full = DateRange::parse("0001-01-01", "9999-12-31").unwrap();
    let mut checked = 0;
    for &property_id in properties {
        let mut confirmed: Vec<Booking> = store
            .find_overlapping_confirmed(property_id, full, None)
            .await
            .unwrap();
        confirmed.sort_by_key(|b| b.range.start);
        for pair in confirmed.windows(2) {
            assert!(
                pair[0].range.end < pair[1].range.start,
                "double booking on property {property_id}: {} and {}",
                pair[0].id,
                pair[1].id
            );
        }
        checked += confirmed.len();
    }
    println!("  audit: {checked} confirmed bookings, no overlaps");
}

#[tokio::main]
async fn main() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.wal");

    println!("=== staybook stress benchmark ===");
    println!("wal: {}\n", path.display());

    let store = WalStore::open(&path, StoreOptions::default()).await.unwrap();
    let engine = Arc::new(Engine::with_store(store.clone()));

    println!("[setup]");
    let properties = setup(&engine, 10).await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&engine, properties[0]).await;

    println!("\n[phase 2] contended confirmations");
    phase2_contended_confirm(engine.clone(), &properties).await;

    println!("\n[phase 3] search latency under block writes");
    phase3_search_under_load(engine.clone(), properties.clone()).await;

    println!("\n[audit]");
    audit(&store, &properties).await;

    store.close().await.unwrap();
    println!("\n=== benchmark complete ===");
}
