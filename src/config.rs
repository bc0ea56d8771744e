//! Runtime settings for the outcome pipeline.

use crate::domain::queue::LOG_QUEUE;
use std::time::Duration;

/// Total persist attempts for one outcome event before it is dropped.
pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub queue: String,
    /// Upper bound for a single publish; expiry counts as a failed publish.
    pub op_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue: LOG_QUEUE.to_string(),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub tick_interval: Duration,
    pub max_attempts: u32,
    /// Upper bound for each poll/publish/ack/nack.
    pub op_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: LOG_QUEUE.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_attempts: MAX_ATTEMPTS,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

impl ConsumerConfig {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            queue: self.queue.clone(),
            op_timeout: self.op_timeout,
        }
    }
}
