use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "frontdesk_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "frontdesk_request_duration_seconds";

/// Counter: committed check-ins.
pub const CHECK_INS_TOTAL: &str = "frontdesk_check_ins_total";

/// Counter: committed check-outs.
pub const CHECK_OUTS_TOTAL: &str = "frontdesk_check_outs_total";

/// Counter: check-ins that found more than one eligible booking and fell
/// back to the deterministic tie-break. A data-entry anomaly worth alerting on.
pub const MULTI_ELIGIBLE_TOTAL: &str = "frontdesk_multi_eligible_total";

/// Counter: check-outs that found more than one occupying booking.
pub const MULTI_OCCUPYING_TOTAL: &str = "frontdesk_multi_occupying_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "frontdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "frontdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "frontdesk_connections_rejected_total";

/// Gauge: number of active hotels (loaded engines).
pub const HOTELS_ACTIVE: &str = "frontdesk_hotels_active";

/// Counter: handshake/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "frontdesk_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "frontdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "frontdesk_wal_flush_batch_size";

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

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::CreateRoom { .. } => "create_room",
        Request::SetRoomStatus { .. } => "set_room_status",
        Request::RegisterBooking { .. } => "register_booking",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::CheckIn { .. } => "check_in",
        Request::CheckOut { .. } => "check_out",
        Request::Rooms => "rooms",
        Request::Room { .. } => "room",
        Request::Bookings { .. } => "bookings",
        Request::Guests { .. } => "guests",
        Request::Watch { .. } => "watch",
        Request::Unwatch { .. } => "unwatch",
    }
}
