//! Error types for motion engine operations.
//!
//! Only caller mistakes are errors. Out-of-range joint values are clamped,
//! a closed power gate is a reported no-op, and cancellation is a normal
//! terminal state of a motion session.

use thiserror::Error;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A sequence, gesture reference or recording failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A joint name that does not name one of the eight joints.
    #[error("unknown joint: {0}")]
    UnknownJoint(String),

    /// A sequence references a gesture the catalog does not know.
    #[error("unknown gesture id: {0}")]
    UnknownGesture(String),
}

impl EngineError {
    /// Create a Validation error with a message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
