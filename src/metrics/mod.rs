//! Prometheus metrics for the chat service.
//!
//! - Connection metrics (active connections, open/close counters, duration)
//! - Broadcast metrics (messages, deliveries, failures, drops)
//! - Inbound event metrics by type
//! - Heartbeat metrics

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of currently registered connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently registered connections"
    ).unwrap();

    /// Total WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket connection lifetime
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Total chat messages broadcast
    pub static ref MESSAGES_BROADCAST_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_broadcast_total", METRIC_PREFIX),
        "Total chat messages broadcast"
    ).unwrap();

    /// Total per-connection deliveries
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully delivered to connections"
    ).unwrap();

    /// Total per-connection delivery failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total message delivery failures"
    ).unwrap();

    /// Messages dropped because the sender was no longer registered
    pub static ref MESSAGES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_dropped_total", METRIC_PREFIX),
        "Messages dropped because the sender was not registered"
    ).unwrap();

    // ============================================================================
    // Inbound Event Metrics
    // ============================================================================

    /// Inbound client events by type
    pub static ref WS_EVENTS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_events_received_total", METRIC_PREFIX),
        "Inbound client events by type",
        &["event"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Duration of a full heartbeat round
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Duration of a heartbeat round in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    /// Heartbeat sends that timed out
    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Heartbeat sends that timed out"
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    /// Record one broadcast fan-out
    pub fn record_broadcast() {
        MESSAGES_BROADCAST_TOTAL.inc();
    }

    /// Record successful deliveries
    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    /// Record failed deliveries
    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }

    /// Record a message dropped for an unregistered sender
    pub fn record_dropped() {
        MESSAGES_DROPPED_TOTAL.inc();
    }
}

/// Helper struct for recording inbound event metrics
pub struct WsEventMetrics;

impl WsEventMetrics {
    pub fn record_identify() {
        WS_EVENTS_RECEIVED.with_label_values(&["identify"]).inc();
    }

    pub fn record_send_message() {
        WS_EVENTS_RECEIVED.with_label_values(&["send-message"]).inc();
    }

    pub fn record_ignored() {
        WS_EVENTS_RECEIVED.with_label_values(&["ignored"]).inc();
    }
}

/// Helper struct for recording heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }

    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }
}
