//! # agora-protocol
//!
//! Wire protocol definitions for the Agora fan-out hub.
//!
//! Every exchange between a peer and the hub is an [`Envelope`] encoded as a
//! JSON text frame:
//!
//! ```json
//! {"type":"chat","content":"hello","username":"alice","timestamp":"2024-01-01T00:00:00Z","clientId":"client_1"}
//! ```
//!
//! ## Kinds
//!
//! - `chat` - Fanned out to every member
//! - `ping` / `pong` - Application-level liveness
//! - `echo` - Reflected to the sender
//! - `system` / `error` - Server notices
//!
//! ## Example
//!
//! ```rust
//! use agora_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::chat("Hello, world!", "alice", "client_1");
//! let text = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(decoded.content, "Hello, world!");
//! ```

pub mod close;
pub mod codec;
pub mod envelope;

pub use close::{CloseReason, CLOSE_POLICY_VIOLATION};
pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use envelope::{Envelope, InboundEnvelope, MessageKind, SERVER_USERNAME};
