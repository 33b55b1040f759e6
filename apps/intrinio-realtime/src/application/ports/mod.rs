//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TokenProvider`: Fetches bearer tokens from the auth endpoint
//! - `FeedTransport`: Opens WebSocket connections to the feed, split into a
//!   `FrameSink` (write half) and a `FrameSource` (read half)

mod token;
mod transport;

pub use token::{AuthError, Token, TokenProvider};
pub use transport::{
    CLOSE_NORMAL, FeedTransport, FrameChunk, FrameSink, FrameSource, SocketEvent, TransportError,
};

#[cfg(test)]
pub use token::MockTokenProvider;
