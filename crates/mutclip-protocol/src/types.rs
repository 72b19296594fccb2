//! Core protocol types for mutclip's wire format.
//!
//! Every WebSocket frame carries exactly one [`Message`]. The identifiers
//! ([`ClipId`], [`ConnectionId`]) never travel inside messages, but they
//! are shared by every layer above this one, so they live here too.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a clip (a room holding one shared content value).
///
/// Generated by the registry as three dash-separated pairs of lowercase
/// alphanumerics, e.g. `k3-9a-zq`, so that people can type it. The
/// protocol layer doesn't validate the shape: any string a client puts in
/// a URL is a `ClipId`, it just may not name a live clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClipId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque identifier for one client connection to a clip.
///
/// Minted by the router; unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message: the wire union
// ---------------------------------------------------------------------------

/// One frame on a clip's WebSocket, in either direction.
///
/// Serde's default "externally tagged" representation is used on purpose:
/// binary codecs such as bincode encode the variant as a small integer tag
/// followed by the fields, and they cannot decode the internally tagged
/// form. In JSON the same value reads `{"Text":{"data":"hi"}}`, and unit
/// variants are bare strings (`"NextChunk"`).
///
/// Which side sends what:
///
/// | variant      | client → server          | server → client               |
/// |--------------|--------------------------|-------------------------------|
/// | `Text`       | replace the clip's text  | the clip's current text       |
/// | `FileHeader` | start an upload          | start a download              |
/// | `Chunk`      | one upload chunk         | one download chunk            |
/// | `NextChunk`  | "send me the next chunk" | "send me the next chunk"      |
/// | `Ack`        | -                        | your change reached everyone  |
/// | `Error`      | -                        | something went wrong          |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// A complete text value.
    Text { data: String },

    /// Metadata announcing a chunked file transfer.
    FileHeader {
        filename: String,
        #[serde(rename = "contentType")]
        content_type: String,
        #[serde(rename = "numChunks")]
        num_chunks: i32,
    },

    /// One chunk of a file transfer. Indices start at 0 and must arrive
    /// in order.
    Chunk { index: i32, data: Vec<u8> },

    /// Flow control: the receiver is ready for exactly one more chunk.
    NextChunk,

    /// The sender's change has been applied and synchronized.
    Ack,

    /// A failure report. `fatal` errors are followed by the server closing
    /// the socket; non-fatal ones only abort the current exchange.
    Error { desc: String, fatal: bool },
}

impl Message {
    /// Builds a non-fatal [`Message::Error`].
    pub fn error(desc: impl Into<String>) -> Self {
        Self::Error {
            desc: desc.into(),
            fatal: false,
        }
    }

    /// Builds a fatal [`Message::Error`].
    pub fn fatal(desc: impl Into<String>) -> Self {
        Self::Error {
            desc: desc.into(),
            fatal: true,
        }
    }

    /// Short variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "Text",
            Self::FileHeader { .. } => "FileHeader",
            Self::Chunk { .. } => "Chunk",
            Self::NextChunk => "NextChunk",
            Self::Ack => "Ack",
            Self::Error { .. } => "Error",
        }
    }

    /// Returns `true` for messages that ask to replace the clip's content.
    pub fn is_content_change(&self) -> bool {
        matches!(self, Self::Text { .. } | Self::FileHeader { .. })
    }
}

// =========================================================================
// Tests
// =========================================================================
