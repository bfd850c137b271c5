//! WebSocket close codes and reasons used by Agora.

use serde::{Deserialize, Serialize};

/// Policy violation; used for rejected display names.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close reasons must fit in a control frame payload (125 bytes minus the code).
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// Reason sent when the requested display name is already in use.
pub const NAME_TAKEN_REASON: &str =
    "A user with this name is already connected, please choose another name";

/// A close code plus human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    /// Close code.
    pub code: u16,
    /// Human-readable reason, at most [`MAX_CLOSE_REASON_LEN`] bytes.
    pub reason: String,
}

impl CloseReason {
    /// Create a close reason, truncating the text on a char boundary if needed.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON_LEN {
            let mut end = MAX_CLOSE_REASON_LEN;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Self { code, reason }
    }

    /// Policy-violation close.
    #[must_use]
    pub fn policy(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_POLICY_VIOLATION, reason)
    }

    /// Close sent on duplicate-name rejection.
    #[must_use]
    pub fn name_taken() -> Self {
        Self::policy(NAME_TAKEN_REASON)
    }
}
