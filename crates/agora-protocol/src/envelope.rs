//! Envelope types for the Agora protocol.
//!
//! An envelope is the unit carried on every internal queue and on the wire.
//! Outbound envelopes are always fully stamped by the server; inbound ones are
//! decoded leniently into [`InboundEnvelope`] and re-stamped before use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Username stamped on envelopes the server answers with directly.
pub const SERVER_USERNAME: &str = "Server";

/// Envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// User chat message, fanned out to every member.
    Chat,
    /// Application-level liveness request.
    Ping,
    /// Reply to [`MessageKind::Ping`].
    Pong,
    /// Content reflected back to its sender.
    Echo,
    /// Server notice (welcome, joined, left).
    System,
    /// Error reported to a single connection.
    Error,
}

impl MessageKind {
    /// Parse a wire `type` value.
    ///
    /// Returns `None` for anything outside the closed set, including
    /// differently-cased spellings.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(Self::Chat),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "echo" => Some(Self::Echo),
            "system" => Some(Self::System),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// The wire spelling of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Echo => "echo",
            Self::System => "system",
            Self::Error => "error",
        }
    }

    /// Liveness control kinds skip content validation.
    #[must_use]
    pub const fn is_liveness(self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-formed envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Text payload.
    #[serde(default)]
    pub content: String,
    /// Display name of the author, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Server-assigned instant.
    pub timestamp: DateTime<Utc>,
    /// Connection that authored the envelope, if any.
    #[serde(
        rename = "clientId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_id: Option<String>,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            username: None,
            timestamp: Utc::now(),
            connection_id: None,
        }
    }

    /// Set the author display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the authoring connection.
    #[must_use]
    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// Create a system notice.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, content)
    }

    /// Create an error without an author.
    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, content)
    }

    /// Create an error answered by the server.
    #[must_use]
    pub fn server_error(content: impl Into<String>) -> Self {
        Self::error(content).with_username(SERVER_USERNAME)
    }

    /// Create the reply to a ping.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, "pong").with_username(SERVER_USERNAME)
    }

    /// Create the reply to an echo request.
    #[must_use]
    pub fn echo(content: &str) -> Self {
        Self::new(MessageKind::Echo, format!("Echo: {content}")).with_username(SERVER_USERNAME)
    }

    /// Create a chat envelope authored by `username` on `connection_id`.
    #[must_use]
    pub fn chat(
        content: impl Into<String>,
        username: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::Chat, content)
            .with_username(username)
            .with_connection_id(connection_id)
    }
}

/// An envelope as sent by a client.
///
/// Every field is optional on the wire. Client-supplied `username`,
/// `timestamp` and `clientId` are accepted but never trusted, so they are not
/// kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundEnvelope {
    /// Raw `type` value; may be outside the known set.
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub kind: String,
    /// Raw content, not yet sanitized.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

/// An explicit `null` reads the same as an absent field.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl InboundEnvelope {
    /// Create an inbound envelope.
    #[must_use]
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }

    /// The parsed kind, if known.
    #[must_use]
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.kind)
    }

    /// Whether this envelope is a liveness control message.
    #[must_use]
    pub fn is_liveness(&self) -> bool {
        self.message_kind().is_some_and(MessageKind::is_liveness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(MessageKind::parse("chat"), Some(MessageKind::Chat));
        assert_eq!(MessageKind::parse("pong"), Some(MessageKind::Pong));
        assert_eq!(MessageKind::parse("CHAT"), None);
        assert_eq!(MessageKind::parse(""), None);
        assert_eq!(MessageKind::Echo.to_string(), "echo");
    }

    #[test]
    fn test_liveness_kinds() {
        assert!(MessageKind::Ping.is_liveness());
        assert!(MessageKind::Pong.is_liveness());
        assert!(!MessageKind::Chat.is_liveness());
        assert!(InboundEnvelope::new("ping", "").is_liveness());
        assert!(!InboundEnvelope::new("bogus", "").is_liveness());
    }

    #[test]
    fn test_control_replies() {
        let pong = Envelope::pong();
        assert_eq!(pong.kind, MessageKind::Pong);
        assert_eq!(pong.content, "pong");
        assert_eq!(pong.username.as_deref(), Some(SERVER_USERNAME));

        let echo = Envelope::echo("hi");
        assert_eq!(echo.content, "Echo: hi");
    }

    #[test]
    fn test_chat_is_stamped() {
        let chat = Envelope::chat("hello", "alice", "client_1");
        assert_eq!(chat.username.as_deref(), Some("alice"));
        assert_eq!(chat.connection_id.as_deref(), Some("client_1"));
        assert!(Envelope::system("x").username.is_none());
    }
}
