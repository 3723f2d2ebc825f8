//! Synchronization error types with severity mapping.
//!
//! [`SyncError`] is the central error type for the crate. Each variant
//! maps to a [`Severity`] that tells the caller how to recover: retry
//! silently, inform the user, or rebuild the controller from a fresh
//! server snapshot.

use serde::Serialize;

/// How the caller should react to a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recovered automatically (reconnect loop, resend buffer). No user
    /// feedback until a grace window elapses.
    Transient,
    /// Non-fatal, but the user should be informed (toast).
    UserVisible,
    /// Fatal to the current controller instance. Recovery requires a
    /// full reload from a fresh snapshot, or leaving the context.
    Fatal,
}

/// Central error enum for the session and round layers.
///
/// # Taxonomy
///
/// | Variant            | Severity    | Recovery                         |
/// |--------------------|-------------|----------------------------------|
/// | `Unauthorized`     | Fatal       | leave the game context           |
/// | `Unreachable`      | Transient   | reconnect loop, warn after grace |
/// | `MalformedEvent`   | Fatal       | full reload                      |
/// | `NonContiguousPly` | Fatal       | full reload                      |
/// | `SessionClosed`    | Transient   | create a new session             |
/// | `Api`              | UserVisible | inform, retry on demand          |
/// | `Storage`          | UserVisible | inform, continue without cache   |
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The diagnostic probe came back 401: the session is not allowed to
    /// see this game.
    #[error("unauthorized for this game context")]
    Unauthorized,

    /// The server cannot be reached. Reconnection is automatic; callers
    /// surface nothing until the proxy-failure grace window elapses.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// An inbound event could not be decoded or is missing a required
    /// field.
    #[error("malformed server event: {0}")]
    MalformedEvent(String),

    /// A timeline append would break the contiguous-ply invariant.
    #[error("non-contiguous ply: expected {expected}, got {got}")]
    NonContiguousPly {
        /// The ply the timeline expected next.
        expected: u32,
        /// The ply the event carried.
        got: u32,
    },

    /// A command was issued against a session whose worker has gone away.
    #[error("session closed")]
    SessionClosed,

    /// A one-shot REST call failed for a reason other than authorization.
    #[error("api error: {0}")]
    Api(String),

    /// The collaborator key-value store rejected a read or write.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Returns the recovery severity for this variant.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Unauthorized | Self::MalformedEvent(_) | Self::NonContiguousPly { .. } => {
                Severity::Fatal
            }
            Self::Unreachable(_) | Self::SessionClosed => Severity::Transient,
            Self::Api(_) | Self::Storage(_) => Severity::UserVisible,
        }
    }

    /// `true` if recovery requires rebuilding from a fresh snapshot or
    /// leaving the context.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn ply_violation_is_fatal() {
        let err = SyncError::NonContiguousPly {
            expected: 11,
            got: 13,
        };
        assert_eq!(err.severity(), Severity::Fatal);
        assert!(err.is_fatal());
    }

    #[test]
    fn unreachable_is_transient() {
        let err = SyncError::Unreachable("connection refused".to_string());
        assert_eq!(err.severity(), Severity::Transient);
        assert!(!err.is_fatal());
    }

    #[test]
    fn display_includes_ply_numbers() {
        let err = SyncError::NonContiguousPly {
            expected: 4,
            got: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains('4'));
        assert!(msg.contains('9'));
    }
}
