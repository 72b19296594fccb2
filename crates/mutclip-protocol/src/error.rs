//! Error types for the protocol layer.
//!
//! Each crate in mutclip defines its own error enum. When you see a
//! `ProtocolError`, the problem is in turning frames into messages (or
//! back), not in routing or clip state.

/// Boxed source error produced by whichever codec is in use.
pub type CodecSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into frame bytes).
    ///
    /// The source is the codec's own error; callers deal with
    /// `ProtocolError` uniformly regardless of the codec.
    #[error("encode failed: {0}")]
    Encode(#[source] CodecSource),

    /// Deserialization failed (turning frame bytes into a message).
    ///
    /// Common causes: a truncated frame, an unknown variant tag, or a
    /// client speaking a different codec.
    #[error("decode failed: {0}")]
    Decode(#[source] CodecSource),

    /// The frame is not something the protocol carries, e.g. a text
    /// frame on a binary connection.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
