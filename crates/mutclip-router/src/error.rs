//! Error types for the router layer.

use mutclip_protocol::ConnectionId;

/// Errors that can occur while routing frames.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No connection with this id is registered (never was, or it has
    /// already been removed after its grace delay).
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// The connection already has a tunnel open. Two multi-step exchanges
    /// can't share one connection.
    #[error("connection {0} already has an open tunnel")]
    DuplicateTunnel(ConnectionId),

    /// The connection (or its tunnel) has been cancelled.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The peer didn't answer within the exchange deadline.
    #[error("timed out waiting for connection {0}")]
    Timeout(ConnectionId),

    /// The router's drain queue is gone: the clip is shutting down.
    #[error("router shut down")]
    Shutdown,
}
