//! # agora-transport
//!
//! Connection handling for the Agora fan-out engine.
//!
//! Each admitted connection runs two tasks:
//!
//! - **Reader** - decodes inbound frames, answers pings and echoes, submits chat
//! - **Writer** - drains the outbound queue to the socket and sends keepalives
//!
//! Both run over the [`FrameStream`] / [`FrameSink`] traits, implemented for
//! axum WebSockets and for an in-memory pair used in tests.
//!
//! ```rust,ignore
//! use agora_transport::{connection, websocket};
//!
//! let (stream, sink) = websocket::split(socket);
//! connection::serve(stream, sink, name, hub, validator, config).await;
//! ```

pub mod connection;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{serve, ConnectionConfig, ConnectionOutcome};
pub use traits::{FrameSink, FrameStream, TransportError, WireFrame};
