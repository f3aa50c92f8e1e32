use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::console::Command;

// ── Admission ───────────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "washslot_bookings_total";

/// Histogram: end-to-end admission latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "washslot_booking_duration_seconds";

/// Counter: cancellation attempts. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "washslot_cancellations_total";

// ── Slot locks ──────────────────────────────────────────────────

/// Counter: stale locks overwritten by a new booking.
pub const STALE_LOCKS_RECLAIMED_TOTAL: &str = "washslot_stale_locks_reclaimed_total";

/// Counter: orphan locks released by the reaper.
pub const LOCKS_REAPED_TOTAL: &str = "washslot_locks_reaped_total";

/// Counter: lock releases after a delete that could not be logged.
pub const LOCK_RELEASE_FAILURES_TOTAL: &str = "washslot_lock_release_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "washslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "washslot_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "washslot_wal_compactions_total";

// ── Console ─────────────────────────────────────────────────────

/// Counter: console commands. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "washslot_commands_total";

/// Gauge: resources currently being watched from the console.
pub const WATCHES_ACTIVE: &str = "washslot_watches_active";

/// Install the Prometheus exporter on `port`. No-op if `port` is `None`.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a console command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Book { .. } => "book",
        Command::Free { .. } => "free",
        Command::List { .. } => "list",
        Command::Cancel { .. } => "cancel",
        Command::Maintenance { .. } => "maintenance",
        Command::History { .. } => "history",
        Command::Mine { .. } => "mine",
        Command::Search { .. } => "search",
        Command::Stats => "stats",
        Command::Status => "status",
        Command::Resources => "resources",
        Command::Watch { .. } => "watch",
    }
}
