//! Clips: the rooms of mutclip.
//!
//! A clip holds one shared content value (text or a file) and a set of
//! connected members. Every clip runs two tasks:
//!
//! - the **engine**, sole owner of the content, which processes inbound
//!   frames strictly one at a time and drives uploads;
//! - the **sync worker**, which pushes committed content and replies to
//!   members in commit order through one delivery lane per member, so a
//!   slow client stalls neither the engine nor anyone else.
//!
//! # Key types
//!
//! - [`ClipRegistry`]: creates clips, starts them, admits connections
//! - [`ClipConnection`]: what a transport adapter gets back from `connect`
//! - [`Content`] / [`FileTransfer`]: the shared value
//! - [`ClipConfig`]: timeouts and limits

mod config;
mod content;
mod engine;
mod error;
mod registry;
mod sync;

pub use config::ClipConfig;
pub use content::{Content, FileTransfer, Progress};
pub use error::ClipError;
pub use registry::{Clip, ClipConnection, ClipRegistry, ClipStore};
