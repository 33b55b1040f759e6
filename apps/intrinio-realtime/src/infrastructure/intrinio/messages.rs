//! Phoenix Channel Message Types
//!
//! Wire format types for the feed's Phoenix channels (v1) protocol. Every
//! message, in both directions, is a single JSON envelope.
//!
//! # Wire Format
//!
//! ```json
//! {"topic":"iex:securities:AAPL","event":"phx_join","payload":{},"ref":"1"}
//! ```
//!
//! # Events
//!
//! ## Outbound
//! - `phx_join` / `phx_leave`: channel membership, topic is the channel topic
//! - `heartbeat`: keep-alive on the `phoenix` topic
//!
//! ## Inbound
//! - `quote`: payload is a [`Quote`]
//! - `phx_reply`: reply to a join/leave/heartbeat, carries a status
//! - `phx_error` / `phx_close`: channel-level failures, logged only

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::streaming::Quote;

/// Topic used for socket-level heartbeats.
pub const HEARTBEAT_TOPIC: &str = "phoenix";

// =============================================================================
// Event
// =============================================================================

/// Envelope event name.
///
/// Unknown server events are kept opaque in [`ChannelEvent::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelEvent {
    /// Join a channel (`phx_join`).
    Join,
    /// Leave a channel (`phx_leave`).
    Leave,
    /// Socket keep-alive (`heartbeat`).
    Heartbeat,
    /// Quote event (`quote`).
    Quote,
    /// Reply to a client push (`phx_reply`).
    Reply,
    /// Channel error (`phx_error`).
    Error,
    /// Channel closed by the server (`phx_close`).
    Close,
    /// Any other server event.
    Other(String),
}

impl ChannelEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "phx_join",
            Self::Leave => "phx_leave",
            Self::Heartbeat => "heartbeat",
            Self::Quote => "quote",
            Self::Reply => "phx_reply",
            Self::Error => "phx_error",
            Self::Close => "phx_close",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ChannelEvent {
    fn from(value: String) -> Self {
        match value.as_str() {
            "phx_join" => Self::Join,
            "phx_leave" => Self::Leave,
            "heartbeat" => Self::Heartbeat,
            "quote" => Self::Quote,
            "phx_reply" => Self::Reply,
            "phx_error" => Self::Error,
            "phx_close" => Self::Close,
            _ => Self::Other(value),
        }
    }
}

impl From<ChannelEvent> for String {
    fn from(value: ChannelEvent) -> Self {
        match value {
            ChannelEvent::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Protocol envelope wrapping every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEnvelope<P> {
    /// Channel topic (e.g. `iex:securities:AAPL`).
    pub topic: String,
    /// Event name.
    pub event: ChannelEvent,
    /// Event payload.
    #[serde(default)]
    pub payload: P,
    /// Message reference. Opaque; the server may send a string, number or null.
    #[serde(rename = "ref", default)]
    pub reference: Value,
}

/// Empty object payload (`{}`) used by every outbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// Outbound envelope.
pub type OutboundEnvelope = ProtocolEnvelope<EmptyPayload>;

impl OutboundEnvelope {
    /// Build a `phx_join` for `topic`.
    #[must_use]
    pub fn join(topic: impl Into<String>, reference: String) -> Self {
        Self::outbound(topic.into(), ChannelEvent::Join, reference)
    }

    /// Build a `phx_leave` for `topic`.
    #[must_use]
    pub fn leave(topic: impl Into<String>, reference: String) -> Self {
        Self::outbound(topic.into(), ChannelEvent::Leave, reference)
    }

    /// Build a heartbeat on the `phoenix` topic.
    #[must_use]
    pub fn heartbeat(reference: String) -> Self {
        Self::outbound(HEARTBEAT_TOPIC.to_string(), ChannelEvent::Heartbeat, reference)
    }

    fn outbound(topic: String, event: ChannelEvent, reference: String) -> Self {
        Self {
            topic,
            event,
            payload: EmptyPayload {},
            reference: Value::String(reference),
        }
    }
}

/// Monotonic source of outbound message references.
#[derive(Debug, Default)]
pub struct RefCounter(AtomicU64);

impl RefCounter {
    /// Create a counter starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Next reference, rendered as a string.
    pub fn next_ref(&self) -> String {
        (self.0.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Payload of a `phx_reply`.
///
/// ```json
/// {"status":"error","response":{"reason":"unmatched topic"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    /// `ok` or `error`.
    pub status: String,
    /// Server response body.
    #[serde(default)]
    pub response: Value,
}

impl ReplyPayload {
    /// Whether the server rejected the push.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    /// Rejection reason, if the server supplied one.
    #[must_use]
    pub fn reason(&self) -> String {
        self.response
            .get("reason")
            .and_then(Value::as_str)
            .map_or_else(|| self.response.to_string(), str::to_string)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A quote on `topic`.
    Quote {
        /// Channel topic the quote arrived on.
        topic: String,
        /// Decoded quote.
        quote: Quote,
    },
    /// A reply to one of our pushes.
    Reply {
        /// Topic of the original push.
        topic: String,
        /// Reference of the original push.
        reference: Value,
        /// Reply body.
        payload: ReplyPayload,
    },
    /// Any other event; logged and dropped.
    Other {
        /// Channel topic.
        topic: String,
        /// Event name.
        event: ChannelEvent,
    },
}
