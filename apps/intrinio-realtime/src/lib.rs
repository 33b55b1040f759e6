#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Intrinio Realtime - Self-Healing Quote Feed Client
//!
//! Maintains a single authenticated WebSocket session to the Intrinio
//! realtime feed, speaks the Phoenix channel protocol on top of it, and fans
//! decoded quotes out to any number of in-process subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core feed types
//!   - `streaming`: Quote events
//!   - `channel`: Channel validation, topic mapping, and the channel registry
//!
//! - **Application**: Port definitions
//!   - `ports`: Token provider and WebSocket transport interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `intrinio`: Auth, framing, backoff, heartbeat, and the connection manager
//!   - `broadcast`: Quote fan-out to subscribers
//!   - `config`: Environment-driven configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//!  auth endpoint ──token──┐
//!                         ▼
//!  Intrinio WS ◄──► ConnectionManager ──► QuoteRouter ──► Subscriber 1
//!                    │  ▲                         └────► Subscriber N
//!                    │  └── heartbeat / token renewal timers
//!                    └── self-heal backoff on failure
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no transport dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::channel::{Channel, ChannelError, ChannelRegistry};
pub use domain::streaming::Quote;

// Ports
pub use application::ports::{
    AuthError, FeedTransport, FrameChunk, FrameSink, FrameSource, SocketEvent, Token,
    TokenProvider, TransportError,
};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ClientConfig, ConfigError, Credentials, Endpoint};

// Feed client
pub use infrastructure::intrinio::{
    BackoffSequence, ClientError, ConnectionManager, ConnectionState, HttpTokenProvider,
    MessageFramer, TungsteniteTransport,
};

// Quote fan-out
pub use infrastructure::broadcast::{QuoteFilter, QuoteRouter, QuoteSubscription};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
