use crate::domain::ports::MessageQueue;
use crate::domain::queue::{Delivery, Headers, PublishOptions, QueueError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub persistent: bool,
}

#[derive(Default)]
struct QueueState {
    ready: HashMap<String, VecDeque<QueuedMessage>>,
    unacked: HashMap<u64, (String, QueuedMessage)>,
    rejected: Vec<Delivery>,
    next_tag: u64,
    closed: bool,
}

/// Broker stand-in with per-queue FIFO, delivery tags and ack tracking.
///
/// Polled messages stay unacknowledged until `ack` or `nack`; a `nack` with
/// requeue puts the message back at the head of its queue, without requeue it
/// is kept aside in `rejected` (where a broker would dead-letter it).
/// Clones share the same broker.
#[derive(Default, Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the broker: every later operation fails.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Messages waiting in `queue`, head first.
    pub async fn ready(&self, queue: &str) -> Vec<QueuedMessage> {
        let state = self.state.lock().await;
        state
            .ready
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn rejected(&self) -> Vec<Delivery> {
        self.state.lock().await.rejected.clone()
    }
}

fn ensure_open(state: &QueueState) -> Result<(), QueueError> {
    if state.closed {
        Err(QueueError::Connection("queue is closed".to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        state
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(QueuedMessage {
                payload,
                headers: options.headers,
                persistent: options.persistent,
            });
        Ok(())
    }

    async fn poll(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        let Some(message) = state.ready.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery {
            tag,
            queue: queue.to_string(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
        };
        state.unacked.insert(tag, (queue.to_string(), message));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        state
            .unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        let (queue, message) = state
            .unacked
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
        if requeue {
            state.ready.entry(queue).or_default().push_front(message);
        } else {
            state.rejected.push(delivery.clone());
        }
        Ok(())
    }
}
