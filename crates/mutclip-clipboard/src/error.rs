//! Error types for the clip layer.

use mutclip_protocol::ClipId;
use mutclip_router::RouterError;

/// Errors that can occur during clip operations.
#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    /// No live clip has this id.
    #[error("clip {0} not found")]
    NotFound(ClipId),

    /// `start` was called twice for the same clip.
    #[error("clip {0} already started")]
    AlreadyStarted(ClipId),

    /// A client broke the transfer protocol (chunk out of order, wrong
    /// message in the middle of an exchange, bad header).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("internal error: {0}")]
    Internal(String),
}
