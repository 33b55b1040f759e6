//! Intrinio Realtime Adapters
//!
//! Implements the client for the Intrinio realtime quote feed:
//!
//! - **auth**: HTTP token endpoint (`reqwest`)
//! - **messages** / **codec**: Phoenix channel envelopes, outbound chunking
//! - **transport**: WebSocket adapter (`tokio-tungstenite`)
//! - **reconnect** / **heartbeat**: self-heal backoff and periodic timers
//! - **connection**: the self-healing connection manager

pub mod auth;
pub mod codec;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use auth::HttpTokenProvider;
pub use codec::{CodecError, FrameAssembler, MAX_CHUNK_SIZE, MessageFramer};
pub use connection::{ConnectionManager, ConnectionState, ReconnectReason};
pub use error::ClientError;
pub use heartbeat::{HeartbeatConfig, HeartbeatManager, TimerEvent};
pub use messages::{
    ChannelEvent, EmptyPayload, HEARTBEAT_TOPIC, InboundMessage, OutboundEnvelope,
    ProtocolEnvelope, RefCounter, ReplyPayload,
};
pub use reconnect::{BackoffError, BackoffSequence, DEFAULT_BACKOFF_MS};
pub use transport::{TungsteniteSink, TungsteniteSource, TungsteniteTransport};
