use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error kind used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Connect/channel failure; recoverable, the whole flow may retry.
    TransportUnavailable,
    /// Peer is no longer reachable; terminal for this conversation.
    ConversationInvalid,
    /// Unparseable timestamp or payload; the event is dropped and
    /// logged, the timeline is never crashed.
    MalformedMessage,
    /// A single send failed; the message stays in the outbox, retryable.
    SendFailed,
    /// Engine invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}:{code}: {message}")]
pub struct EngineError {
    /// High-level error kind.
    pub kind: EngineErrorKind,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl EngineError {
    /// Construct a new engine error.
    pub fn new(
        kind: EngineErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Recoverable connect/channel failure.
    pub fn transport_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::TransportUnavailable, code, message)
    }

    /// Terminal conversation failure; the caller must close.
    pub fn conversation_invalid(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::ConversationInvalid, code, message)
    }

    /// Data error raised while normalizing a raw transport event.
    pub fn malformed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::MalformedMessage, code, message)
    }

    /// Per-message transmission failure.
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::SendFailed, "send_failed", message)
    }

    /// Whether retrying the triggering operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            EngineErrorKind::TransportUnavailable | EngineErrorKind::SendFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_send_failed_code_stable() {
        let err = EngineError::send_failed("boom");
        assert_eq!(err.code, "send_failed");
        assert_eq!(err.kind, EngineErrorKind::SendFailed);
    }

    #[test]
    fn recoverable_kinds_are_limited_to_transport_and_send() {
        let transport = EngineError::transport_unavailable("connect_failed", "offline");
        let send = EngineError::send_failed("timeout");
        let invalid = EngineError::conversation_invalid("peer_left_channel", "gone");
        let malformed = EngineError::malformed("bad_timestamp", "unparseable");

        assert!(transport.is_recoverable());
        assert!(send.is_recoverable());
        assert!(!invalid.is_recoverable());
        assert!(!malformed.is_recoverable());
    }
}
