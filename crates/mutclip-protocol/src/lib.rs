//! Wire protocol for mutclip.
//!
//! This crate defines the "language" that browser clients and the server
//! speak over a clip's WebSocket:
//!
//! - **Types** ([`Message`], [`ClipId`], [`ConnectionId`]): the values
//!   that travel on the wire and the identifiers the server hands out.
//! - **Codec** ([`Codec`] trait, [`BincodeCodec`], [`JsonCodec`]): how
//!   messages are converted to/from the bytes of one binary frame.
//! - **Errors** ([`ProtocolError`]): what can go wrong while encoding or
//!   decoding.
//!
//! # Architecture
//!
//! The protocol layer sits below the router and the clipboard engine. It
//! doesn't know about rooms, tunnels or sockets: it only knows how to
//! describe a message and turn it into bytes.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Router (connection) → Clipboard (content)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "bincode")]
pub use codec::BincodeCodec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{ClipId, ConnectionId, Message};
