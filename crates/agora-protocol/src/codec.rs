//! Codec for encoding and decoding Agora envelopes.
//!
//! Envelopes travel as JSON text, one envelope per WebSocket message.

use thiserror::Error;

use crate::envelope::{Envelope, InboundEnvelope};

/// Default maximum inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Frame is not valid UTF-8.
    #[error("Frame is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an envelope to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a server envelope.
///
/// # Errors
///
/// Returns an error if the text is not a complete envelope.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a client envelope from a text frame, enforcing `max_size`.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a JSON object of the
/// inbound shape.
pub fn decode_inbound(text: &str, max_size: usize) -> Result<InboundEnvelope, ProtocolError> {
    check_size(text.len(), max_size)?;
    Ok(serde_json::from_str(text)?)
}

/// Decode a client envelope from a binary frame, enforcing `max_size`.
///
/// # Errors
///
/// Returns an error if the frame is too large, not UTF-8, or not an envelope.
pub fn decode_inbound_bytes(
    data: &[u8],
    max_size: usize,
) -> Result<InboundEnvelope, ProtocolError> {
    check_size(data.len(), max_size)?;
    let text = std::str::from_utf8(data)?;
    Ok(serde_json::from_str(text)?)
}

fn check_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(())
}
