//! Clip configuration.

use std::time::Duration;

use mutclip_router::RouterConfig;

/// Timing and sizing knobs shared by every clip of a registry.
#[derive(Debug, Clone)]
pub struct ClipConfig {
    /// A clip with no traffic for this long is cancelled. A clip whose
    /// engine is never started is cancelled after the same delay.
    pub idle_timeout: Duration,

    /// Delay between a clip (or connection) ending and its removal from
    /// the tables.
    pub grace_period: Duration,

    /// How long either side of a chunked transfer may take to produce the
    /// next frame before the exchange is aborted.
    pub exchange_timeout: Duration,

    /// Capacity of the router's drain queue and of each tunnel queue.
    pub queue_capacity: usize,

    /// Largest `numChunks` a `FileHeader` may announce.
    pub max_chunks: i32,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            grace_period: Duration::from_secs(1),
            exchange_timeout: Duration::from_secs(30),
            queue_capacity: 15,
            max_chunks: 1024,
        }
    }
}

impl ClipConfig {
    pub(crate) fn router_config(&self) -> RouterConfig {
        RouterConfig {
            queue_capacity: self.queue_capacity,
            grace: self.grace_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_follows_clip_config() {
        let config = ClipConfig {
            queue_capacity: 4,
            grace_period: Duration::from_millis(250),
            ..ClipConfig::default()
        };
        let router = config.router_config();
        assert_eq!(router.queue_capacity, 4);
        assert_eq!(router.grace, Duration::from_millis(250));
    }
}
