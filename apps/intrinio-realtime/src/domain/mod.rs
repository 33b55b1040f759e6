//! Domain Layer - Core feed types and business logic.
//!
//! This layer contains the core domain types for the quote feed with no
//! transport dependencies.

/// Quote event types.
pub mod streaming;

/// Channel validation, topic mapping and the channel registry.
pub mod channel;
