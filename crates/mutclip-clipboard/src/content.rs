//! The value a clip holds.

use std::sync::Arc;

use mutclip_protocol::Message;

use crate::ClipError;

/// A clip's committed content. Exactly one variant is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Plain text. The empty string means "nothing shared yet".
    Text(String),

    /// A fully received file. Shared behind an `Arc` because every member
    /// download reads the same chunks.
    File(Arc<FileTransfer>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Content {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::File(_) => "file",
        }
    }
}

/// Outcome of accepting one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More chunks are expected.
    More,
    /// The last chunk has arrived.
    Complete,
}

/// A chunked file, either being assembled from an upload or complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    filename: String,
    content_type: String,
    total_chunks: i32,
    chunks: Vec<Vec<u8>>,
}

impl FileTransfer {
    /// Starts an empty transfer. `total_chunks` is validated by the
    /// engine before it gets here.
    pub fn new(filename: String, content_type: String, total_chunks: i32) -> Self {
        Self {
            filename,
            content_type,
            total_chunks,
            chunks: Vec::with_capacity(usize::try_from(total_chunks).unwrap_or(0)),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn total_chunks(&self) -> i32 {
        self.total_chunks
    }

    /// Index of the chunk expected next.
    pub fn next_index(&self) -> i32 {
        // Bounded by total_chunks, which is an i32.
        self.chunks.len() as i32
    }

    /// `true` once every announced chunk has been received.
    pub fn is_ready(&self) -> bool {
        self.next_index() >= self.total_chunks
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// Total payload size in bytes.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends the next chunk.
    ///
    /// # Errors
    /// `ClipError::ProtocolViolation` if `index` isn't the expected one or
    /// the transfer is already complete.
    pub fn push_chunk(&mut self, index: i32, data: Vec<u8>) -> Result<Progress, ClipError> {
        if self.is_ready() {
            return Err(ClipError::ProtocolViolation(format!(
                "chunk {index} after the last one"
            )));
        }
        let expected = self.next_index();
        if index != expected {
            return Err(ClipError::ProtocolViolation(format!(
                "chunk {index} out of order, expected {expected}"
            )));
        }
        self.chunks.push(data);
        Ok(if self.is_ready() {
            Progress::Complete
        } else {
            Progress::More
        })
    }

    /// The header announcing this file to a receiver.
    pub fn header(&self) -> Message {
        Message::FileHeader {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            num_chunks: self.total_chunks,
        }
    }

    /// Chunk `index` as a wire message, if it exists.
    pub fn chunk_message(&self, index: usize) -> Option<Message> {
        let data = self.chunks.get(index)?.clone();
        Some(Message::Chunk {
            index: i32::try_from(index).ok()?,
            data,
        })
    }
}
