//! Router configuration.

use std::time::Duration;

/// Sizing and timing knobs for a [`Router`](crate::Router).
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Capacity of the drain queue and of each tunnel's sub-queues.
    pub queue_capacity: usize,

    /// How long a cancelled connection stays in the table before it is
    /// removed. Absorbs sends that were already in flight when it ended.
    pub grace: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 15,
            grace: Duration::from_secs(1),
        }
    }
}
