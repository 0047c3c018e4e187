use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations created. Labels: status.
pub const RESERVATIONS_CREATED_TOTAL: &str = "courtside_reservations_created_total";

/// Counter: reservation requests rejected. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "courtside_reservations_rejected_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Counter: holds demoted to expired.
pub const HOLDS_EXPIRED_TOTAL: &str = "courtside_holds_expired_total";

/// Histogram: sweep tick duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "courtside_sweep_duration_seconds";

/// Counter: sweep ticks that failed.
pub const SWEEP_FAILURES_TOTAL: &str = "courtside_sweep_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: resources known to the engine.
pub const RESOURCES_ACTIVE: &str = "courtside_resources_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtside_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtside_wal_flush_batch_size";

/// Counter: WAL flushes that failed and were rolled back.
pub const WAL_WRITE_FAILURES_TOTAL: &str = "courtside_wal_write_failures_total";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "courtside_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
