//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Intrinio realtime feed adapters (auth, codec, WebSocket, connection).
pub mod intrinio;

/// Quote fan-out to subscribers.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
