//! Message Framing
//!
//! Encodes outbound envelopes into WebSocket-frame-sized chunks and decodes
//! fully reassembled inbound messages.
//!
//! # Outbound Chunking
//!
//! The feed expects outbound messages split into frames of at most
//! [`MAX_CHUNK_SIZE`] bytes. A message of `n` bytes produces `ceil(n / max)`
//! chunks in order; only the last one is flagged as end-of-message.
//!
//! ```text
//! 600-byte message, max 255:  [255][255][90*]    (* = end of message)
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::application::ports::FrameChunk;
use crate::domain::streaming::Quote;
use crate::infrastructure::intrinio::messages::{
    ChannelEvent, InboundMessage, ProtocolEnvelope, ReplyPayload,
};

/// Default maximum outbound frame size, in bytes.
pub const MAX_CHUNK_SIZE: usize = 255;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// Inbound bytes are not a valid envelope.
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    /// Envelope is valid but its payload does not match the event.
    #[error("invalid {event} payload: {source}")]
    InvalidPayload {
        /// Event whose payload failed to decode.
        event: ChannelEvent,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Framer
// =============================================================================

/// Encodes outbound envelopes into chunks and decodes inbound messages.
#[derive(Debug, Clone, Copy)]
pub struct MessageFramer {
    max_chunk_size: usize,
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new(MAX_CHUNK_SIZE)
    }
}

impl MessageFramer {
    /// Create a framer with the given chunk limit. A limit of zero is raised
    /// to one byte.
    #[must_use]
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// The chunk limit in bytes.
    #[must_use]
    pub const fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Serialize an envelope and split it into chunks.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode<P: Serialize>(
        &self,
        envelope: &ProtocolEnvelope<P>,
    ) -> Result<Vec<FrameChunk>, CodecError> {
        let bytes = serde_json::to_vec(envelope).map_err(CodecError::Encode)?;
        Ok(self.chunk(&bytes))
    }

    /// Split raw bytes into chunks of at most `max_chunk_size` bytes.
    ///
    /// Empty input produces no chunks.
    #[must_use]
    pub fn chunk(&self, bytes: &[u8]) -> Vec<FrameChunk> {
        let count = bytes.len().div_ceil(self.max_chunk_size);
        bytes
            .chunks(self.max_chunk_size)
            .enumerate()
            .map(|(i, data)| FrameChunk {
                data: data.to_vec(),
                end_of_message: i + 1 == count,
            })
            .collect()
    }

    /// Decode one complete inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for bytes that are not an envelope and
    /// [`CodecError::InvalidPayload`] when a `quote` or `phx_reply` payload
    /// has the wrong shape.
    pub fn decode(&self, bytes: &[u8]) -> Result<InboundMessage, CodecError> {
        let envelope: ProtocolEnvelope<Value> =
            serde_json::from_slice(bytes).map_err(CodecError::Decode)?;

        let ProtocolEnvelope {
            topic,
            event,
            payload,
            reference,
        } = envelope;

        match event {
            ChannelEvent::Quote => {
                let quote: Quote = serde_json::from_value(payload)
                    .map_err(|source| CodecError::InvalidPayload { event, source })?;
                Ok(InboundMessage::Quote { topic, quote })
            }
            ChannelEvent::Reply => {
                let payload: ReplyPayload = serde_json::from_value(payload)
                    .map_err(|source| CodecError::InvalidPayload { event, source })?;
                Ok(InboundMessage::Reply {
                    topic,
                    reference,
                    payload,
                })
            }
            event => Ok(InboundMessage::Other { topic, event }),
        }
    }
}

// =============================================================================
// Reassembly
// =============================================================================

/// Concatenates inbound fragments until the end-of-message flag.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append a fragment. Returns the complete message when `end_of_message`
    /// is set, leaving the assembler empty.
    pub fn push(&mut self, fragment: &[u8], end_of_message: bool) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(fragment);
        end_of_message.then(|| std::mem::take(&mut self.buffer))
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes buffered for the current partial message.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
