// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the session engine

/// Result type alias using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced synchronously to whoever drives a session.
///
/// Late or dropped events are never reported through this type: they are
/// logged and discarded. Transport loss is not an error either, it ends the
/// event and outgoing streams through a forced exit.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `start` was called on a session that already started
    #[error("Session already started")]
    AlreadyStarted,

    /// The trial ended before the session could start
    #[error("Trial already ended")]
    TrialEnded,

    /// The operation requires a started session
    #[error("Session not started - call start() first")]
    NotStarted,

    /// A required field is missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the current session state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A bounded queue has no room left; the caller decides how to back off
    #[error("{0} queue is full")]
    QueueFull(&'static str),

    /// The user implementation returned an error
    #[error("Implementation failed: {0}")]
    Implementation(#[source] anyhow::Error),

    /// The user implementation panicked
    #[error("Implementation panicked: {0}")]
    ImplementationPanicked(String),
}

impl SessionError {
    /// Check if the error is a protocol violation by the caller (as opposed to
    /// backpressure or a failure of the user implementation).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SessionError::AlreadyStarted
                | SessionError::TrialEnded
                | SessionError::NotStarted
                | SessionError::InvalidArgument(_)
                | SessionError::InvalidOperation(_)
        )
    }

    /// Check if retrying later may succeed (bounded queue drained by its consumer)
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::QueueFull(_))
    }
}
