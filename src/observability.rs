use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "vacancy_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "vacancy_query_duration_seconds";

/// Counter: acquire attempts rejected because the room was held.
pub const LOCK_CONFLICTS_TOTAL: &str = "vacancy_lock_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vacancy_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vacancy_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vacancy_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "vacancy_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vacancy_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vacancy_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterRoom { .. } => "register_room",
        Command::AcquireLock { .. } => "acquire_lock",
        Command::ReleaseLock { .. } => "release_lock",
        Command::ConfirmBooking { .. } => "confirm_booking",
        Command::SelectRooms => "select_rooms",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeWindows { .. } => "select_free_windows",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectLocks { .. } => "select_locks",
    }
}
