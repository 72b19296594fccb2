//! # mutclip
//!
//! A real-time shared clipboard. Anyone who opens the same clip sees the
//! same text or file, and every change is pushed to everyone else.
//!
//! The workspace is layered:
//!
//! - [`mutclip_protocol`]: wire messages and codecs
//! - [`mutclip_router`]: per-clip connection routing and tunnels
//! - [`mutclip_clipboard`]: clips, the protocol engine, the sync worker
//! - this crate: the HTTP/WebSocket server that exposes it all
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mutclip::prelude::*;
//!
//! # async fn run() -> Result<(), MutclipError> {
//! let server = MutclipServer::builder()
//!     .config(ServerConfig::from_env()?)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::MutclipError;
pub use server::{MutclipServer, MutclipServerBuilder};

pub use mutclip_clipboard;
pub use mutclip_protocol;
pub use mutclip_router;

/// Everything needed to embed a server.
pub mod prelude {
    pub use crate::{MutclipError, MutclipServer, MutclipServerBuilder, ServerConfig};
    pub use mutclip_clipboard::{ClipConfig, ClipError, ClipRegistry};
    pub use mutclip_protocol::{BincodeCodec, ClipId, Codec, JsonCodec, Message};
}
