//! Unified error type for mutclip.

use mutclip_clipboard::ClipError;
use mutclip_protocol::ProtocolError;
use mutclip_router::RouterError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MutclipError {
    /// Binding or serving the listener failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Router(#[from] RouterError),

    /// A clip-level error (not found, already started, protocol violation).
    #[error(transparent)]
    Clip(#[from] ClipError),

    /// The WebSocket itself failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// An environment variable held something unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutclip_protocol::{ClipId, ConnectionId};

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let mutclip_err: MutclipError = err.into();
        assert!(matches!(mutclip_err, MutclipError::Protocol(_)));
    }

    #[test]
    fn test_from_clip_error() {
        let err = ClipError::NotFound(ClipId::from("ab-cd-ef"));
        let mutclip_err: MutclipError = err.into();
        assert!(matches!(mutclip_err, MutclipError::Clip(_)));
        assert!(mutclip_err.to_string().contains("ab-cd-ef"));
    }

    #[test]
    fn test_from_router_error() {
        let err = RouterError::NotFound(ConnectionId::new(3));
        let mutclip_err: MutclipError = err.into();
        assert!(matches!(mutclip_err, MutclipError::Router(_)));
        assert!(mutclip_err.to_string().contains("conn-3"));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let mutclip_err: MutclipError = err.into();
        assert!(matches!(mutclip_err, MutclipError::Io(_)));
    }
}
