//! Message model shared by every queue adapter.
//!
//! Headers are restricted to integers; the only one this core reads or writes
//! is the delivery-attempt counter.

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Queue carrying movement outcome events to the log consumer.
pub const LOG_QUEUE: &str = "log.pubsub";

/// Header holding the number of failed persist attempts so far.
pub const ATTEMPTS_HEADER: &str = "attempts";

pub type Headers = BTreeMap<String, i64>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue connection error: {0}")]
    Connection(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Poll failed: {0}")]
    Poll(String),
    #[error("Ack/nack failed: {0}")]
    Settle(String),
    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),
    #[error("Queue operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub persistent: bool,
    pub headers: Headers,
}

impl PublishOptions {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            headers: Headers::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.headers
            .insert(ATTEMPTS_HEADER.to_string(), i64::from(attempts));
        self
    }
}

/// A message handed out by `poll`, awaiting `ack` or `nack`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl Delivery {
    /// Attempt counter from the headers; missing or negative reads as 0.
    pub fn attempts(&self) -> u32 {
        self.headers
            .get(ATTEMPTS_HEADER)
            .and_then(|value| u32::try_from(*value).ok())
            .unwrap_or(0)
    }
}

/// Runs a queue operation under a deadline, mapping expiry to `QueueError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, op: F) -> Result<T, QueueError>
where
    F: std::future::Future<Output = Result<T, QueueError>>,
{
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| QueueError::Timeout(limit))?
}
