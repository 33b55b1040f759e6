//! Configuration Module
//!
//! Environment-driven configuration for the feed client and the binary.

mod settings;

pub use settings::{AppConfig, ClientConfig, ConfigError, Credentials, Endpoint};
