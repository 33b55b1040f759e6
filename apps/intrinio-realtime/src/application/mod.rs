//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the feed client
//! interacts with external systems.

/// Port interfaces for external systems (auth endpoint, WebSocket).
pub mod ports;
