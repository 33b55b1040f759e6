//! Client error type.

use crate::application::ports::{AuthError, TransportError};
use crate::domain::channel::ChannelError;
use crate::infrastructure::intrinio::codec::CodecError;

/// Errors surfaced by the feed client.
///
/// Validation errors are returned directly from `join`/`leave`; everything
/// raised in the background is published on the error stream instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Token acquisition failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A channel name failed validation.
    #[error(transparent)]
    InvalidChannel(#[from] ChannelError),

    /// A message could not be encoded or decoded.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// The socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected a channel join.
    #[error("join rejected for {topic}: {reason}")]
    JoinRejected {
        /// Topic of the rejected join.
        topic: String,
        /// Server-supplied reason.
        reason: String,
    },

    /// The client has been shut down.
    #[error("client is shut down")]
    ShutDown,
}

impl ClientError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::InvalidChannel(_) => "invalid_channel",
            Self::Codec(_) => "codec",
            Self::Transport(_) => "transport",
            Self::JoinRejected { .. } => "join_rejected",
            Self::ShutDown => "shut_down",
        }
    }
}
