//! Transport abstraction traits for Agora.
//!
//! The connection tasks only see a [`FrameStream`] for inbound frames and a
//! [`FrameSink`] for outbound ones, so they run unchanged over a real
//! WebSocket or the in-memory transport.

use agora_core::HubError;
use agora_protocol::{CloseReason, ProtocolError};
use async_trait::async_trait;
use thiserror::Error;

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text payload.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Liveness probe.
    Ping(Vec<u8>),
    /// Liveness probe response.
    Pong(Vec<u8>),
    /// Close handshake, optionally with a code and reason.
    Close(Option<CloseReason>),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An operation exceeded its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// The connection's outbound queue was full.
    #[error("Outbound queue full")]
    QueueFull,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The hub is gone.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

/// Inbound half of a socket.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has gone away.
    async fn next_frame(&mut self) -> Option<Result<WireFrame, TransportError>>;
}

/// Outbound half of a socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a frame.
    async fn send_frame(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Flush and close the sink.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}
