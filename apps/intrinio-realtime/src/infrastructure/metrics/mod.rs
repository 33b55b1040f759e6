//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound messages by event, quotes routed, frames sent
//! - **Connection**: Connection state transitions, reconnects by reason
//! - **Channels**: Joined channel count
//! - **Errors**: Decode failures and pipeline errors by kind
//!
//! # Integration
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter; the
//! library never installs a recorder on its own.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be set up.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "intrinio_realtime_messages_received_total",
        "Total inbound feed messages by event"
    );
    describe_counter!(
        "intrinio_realtime_quotes_routed_total",
        "Total quotes handed to the router"
    );
    describe_counter!(
        "intrinio_realtime_quotes_lagged_total",
        "Total quotes skipped by slow subscribers"
    );
    describe_counter!(
        "intrinio_realtime_decode_failures_total",
        "Total inbound messages that failed to decode"
    );
    describe_counter!(
        "intrinio_realtime_frames_sent_total",
        "Total outbound WebSocket frames"
    );
    describe_counter!(
        "intrinio_realtime_reconnects_total",
        "Total reconnects by reason"
    );
    describe_counter!(
        "intrinio_realtime_state_transitions_total",
        "Total connection state transitions by target state"
    );
    describe_counter!(
        "intrinio_realtime_errors_total",
        "Total pipeline errors by kind"
    );
    describe_gauge!(
        "intrinio_realtime_connected",
        "1 while the socket is connected, 0 otherwise"
    );
    describe_gauge!(
        "intrinio_realtime_joined_channels",
        "Number of channels in the registry"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound message.
pub fn record_message_received(event: &str) {
    counter!(
        "intrinio_realtime_messages_received_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a quote handed to the router.
pub fn record_quote_routed() {
    counter!("intrinio_realtime_quotes_routed_total").increment(1);
}

/// Record quotes skipped by a lagging subscriber.
pub fn record_quotes_lagged(count: u64) {
    counter!("intrinio_realtime_quotes_lagged_total").increment(count);
}

/// Record an inbound decode failure.
pub fn record_decode_failure() {
    counter!("intrinio_realtime_decode_failures_total").increment(1);
}

/// Record outbound frames written.
pub fn record_frames_sent(count: usize) {
    counter!("intrinio_realtime_frames_sent_total").increment(count as u64);
}

/// Record a reconnect.
pub fn record_reconnect(reason: &'static str) {
    counter!("intrinio_realtime_reconnects_total", "reason" => reason).increment(1);
}

/// Record a connection state transition.
pub fn record_state_transition(state: &'static str) {
    counter!("intrinio_realtime_state_transitions_total", "state" => state).increment(1);
    gauge!("intrinio_realtime_connected").set(if state == "connected" { 1.0 } else { 0.0 });
}

/// Record a pipeline error.
pub fn record_error(kind: &'static str) {
    counter!("intrinio_realtime_errors_total", "kind" => kind).increment(1);
}

/// Update the joined channel count.
#[allow(clippy::cast_precision_loss)]
pub fn set_joined_channels(count: usize) {
    gauge!("intrinio_realtime_joined_channels").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
