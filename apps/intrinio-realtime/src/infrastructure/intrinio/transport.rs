//! WebSocket Transport Adapter
//!
//! Implements the [`FeedTransport`] port on `tokio-tungstenite`.
//!
//! # Framing
//!
//! Outbound chunks are written as raw frames: the first chunk of a message
//! uses the text opcode, later chunks use the continuation opcode, and the
//! chunk flagged end-of-message carries FIN. Inbound messages are reassembled
//! by tungstenite and surface as a single complete fragment.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    FeedTransport, FrameChunk, FrameSink, FrameSource, SocketEvent, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport that opens real WebSocket connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for TungsteniteTransport {
    type Sink = TungsteniteSink;
    type Source = TungsteniteSource;

    async fn open(&self, url: &str) -> Result<(Self::Sink, Self::Source), TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok((
            TungsteniteSink {
                write,
                mid_message: false,
            },
            TungsteniteSource { read },
        ))
    }
}

/// Write half of a tungstenite socket.
pub struct TungsteniteSink {
    write: SplitSink<WsStream, Message>,
    mid_message: bool,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send_chunk(&mut self, chunk: FrameChunk) -> Result<(), TransportError> {
        let opcode = if self.mid_message {
            OpCode::Data(Data::Continue)
        } else {
            OpCode::Data(Data::Text)
        };
        let frame = Frame::message(chunk.data, opcode, chunk.end_of_message);

        self.write
            .send(Message::Frame(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        self.mid_message = !chunk.end_of_message;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };

        self.write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.write
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Read half of a tungstenite socket.
pub struct TungsteniteSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for TungsteniteSource {
    async fn next_event(&mut self) -> Result<SocketEvent, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(SocketEvent::Fragment {
                        data: text.as_bytes().to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(SocketEvent::Fragment {
                        data: data.to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    return Ok(SocketEvent::Closed { code });
                }
                // Pongs are queued by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                None => return Ok(SocketEvent::Closed { code: None }),
            }
        }
    }
}
