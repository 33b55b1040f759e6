//! Feed transport port.
//!
//! The connection manager talks to the socket only through these traits so it
//! can be driven by an in-memory transport in tests.

use async_trait::async_trait;

/// WebSocket close code for a normal, client-initiated shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// One outbound WebSocket frame worth of message bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameChunk {
    /// Frame payload bytes.
    pub data: Vec<u8>,
    /// Whether this is the last frame of the message.
    pub end_of_message: bool,
}

/// Event read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A piece of an inbound text message.
    Fragment {
        /// Fragment bytes.
        data: Vec<u8>,
        /// Whether the message is complete after this fragment.
        end_of_message: bool,
    },
    /// The peer closed the socket, or the stream ended.
    Closed {
        /// Close code from the peer, if one was sent.
        code: Option<u16>,
    },
}

/// Errors raised by transport adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Socket could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The socket is closed or was never opened.
    #[error("socket is closed")]
    Closed,
}

/// Opens feed sockets.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Write half produced by [`FeedTransport::open`].
    type Sink: FrameSink;
    /// Read half produced by [`FeedTransport::open`].
    type Source: FrameSource;

    /// Open a socket to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the handshake fails.
    async fn open(&self, url: &str) -> Result<(Self::Sink, Self::Source), TransportError>;
}

/// Write half of a feed socket.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] if the write fails.
    async fn send_chunk(&mut self, chunk: FrameChunk) -> Result<(), TransportError>;

    /// Send a close frame and shut the write half.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] if the close frame cannot be written.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Read half of a feed socket.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next socket event.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Receive`] on a protocol or I/O failure.
    async fn next_event(&mut self) -> Result<SocketEvent, TransportError>;
}
