//! Connection routing for a single clip.
//!
//! Every clip owns one [`Router`]. The router knows every connection's
//! outbound sink and decides where each inbound frame goes:
//!
//! ```text
//!                 ┌──────────────┐   tunnel open for conn?
//! Ingress::push ─▶│    Router    │── yes ─▶ Tunnel (exclusive exchange)
//!                 └──────────────┘── no ──▶ Drain (clip engine)
//! ```
//!
//! A [`Tunnel`] is how a multi-message exchange (a chunked file upload or
//! download) gets a private conversation with one connection without
//! fighting the engine for its frames.
//!
//! # Key types
//!
//! - [`Router`]: registry of sinks, `send`/`broadcast`, tunnel factory
//! - [`Ingress`]: the transport adapter's handle for inbound frames
//! - [`Tunnel`]: exclusive bidirectional sub-queues for one connection
//! - [`ConnectionTable`]: the concurrent `id → sink` map, injectable
//! - [`RouterConfig`]: queue sizes and the removal grace delay

mod config;
mod error;
mod router;
mod tunnel;

pub use config::RouterConfig;
pub use error::RouterError;
pub use router::{ConnectionTable, Drain, Inbound, Ingress, Router, Sink};
pub use tunnel::Tunnel;
