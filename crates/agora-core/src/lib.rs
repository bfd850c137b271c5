//! # agora-core
//!
//! Core types and the hub coordinator for the Agora fan-out engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Single task owning membership, name uniqueness and fan-out
//! - **Member** - Connection identity and outbound queue items
//! - **Validator** - Display name and content sanitization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  admit / depart / broadcast  ┌─────────────┐
//! │  Reader(s)  │─────────────────────────────▶│     Hub     │
//! └─────────────┘                              └─────────────┘
//!                                                     │ try_send
//!                                                     ▼
//!                                              ┌─────────────┐
//!                                              │  Writer(s)  │
//!                                              └─────────────┘
//! ```

pub mod hub;
pub mod member;
pub mod validator;

pub use hub::{
    AdmitOutcome, Admission, Hub, HubConfig, HubError, HubEvent, HubHandle, HubStats, Rejection,
};
pub use member::{outbound_queue, ConnectionId, Outbound, OutboundReceiver, OutboundSender};
pub use validator::{TextValidator, ValidationError, Validator, ValidatorLimits};
