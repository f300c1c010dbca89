use std::time::Instant;

use tracing::warn;

use crate::engine::{EngineError, ErrorKind};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "staybook_operations_total";

/// Histogram: engine operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "staybook_operation_duration_seconds";

/// Counter: requests rejected because of an overlapping booking or block. Labels: reason.
pub const CONFLICTS_TOTAL: &str = "staybook_conflicts_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "staybook_wal_compactions_total";

/// Install the fmt subscriber on stderr; stdout is reserved for command output.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
}

/// Record count, latency and outcome of one engine call.
pub(crate) fn record<T>(operation: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => {
            if e.kind() == ErrorKind::StorageError {
                warn!(operation, error = %e, "storage failure");
            }
            e.kind().as_str()
        }
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

pub(crate) fn record_conflict(reason: &'static str) {
    metrics::counter!(CONFLICTS_TOTAL, "reason" => reason).increment(1);
}
