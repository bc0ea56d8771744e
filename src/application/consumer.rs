//! Audit-log side of the outcome pipeline.
//!
//! `LogConsumer::run_cycle` does at most one poll-and-process pass: decode the
//! outcome event, skip it if a ledger log already exists for the movement,
//! otherwise insert one. Persist failures are retried by re-publishing the
//! message with an incremented `attempts` header and acknowledging the
//! original; once `max_attempts` is reached the message is rejected without
//! requeue. Delivery is at-least-once, so every step must stay idempotent.

use crate::config::ConsumerConfig;
use crate::domain::ledger_log::OutcomeEvent;
use crate::domain::movement::MovementId;
use crate::domain::ports::{LedgerLogRepositoryBox, MessageQueueRef};
use crate::domain::queue::{Delivery, PublishOptions, QueueError, with_timeout};
use crate::error::LedgerError;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Queue was empty.
    Idle,
    /// Another cycle was still running.
    Skipped,
    Persisted(MovementId),
    /// A ledger log already existed; the message was discarded.
    Duplicate(MovementId),
    /// Persist failed; the message was re-published with `attempts`.
    Retried {
        movement_id: MovementId,
        attempts: u32,
    },
    /// Persist failed `attempts` times; the message was rejected for good.
    Dropped {
        movement_id: MovementId,
        attempts: u32,
    },
    /// Payload was not an outcome event; rejected without requeue.
    Rejected,
    /// A queue operation failed; any polled delivery was released for redelivery.
    Aborted(String),
}

pub struct LogConsumer {
    queue: MessageQueueRef,
    store: LedgerLogRepositoryBox,
    config: ConsumerConfig,
    in_flight: Mutex<()>,
}

impl LogConsumer {
    pub fn new(
        queue: MessageQueueRef,
        store: LedgerLogRepositoryBox,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Runs one poll-and-process cycle. Never overlaps with another cycle on
    /// the same consumer and never returns an error.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_cycle) = self.in_flight.try_lock() else {
            debug!(queue = %self.config.queue, "Previous cycle still running, skipping tick");
            return CycleOutcome::Skipped;
        };

        let poll = self.queue.poll(&self.config.queue);
        let delivery = match with_timeout(self.config.op_timeout, poll).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return CycleOutcome::Idle,
            Err(e) => {
                warn!(queue = %self.config.queue, error = %e, "Failed to poll log queue");
                return CycleOutcome::Aborted(e.to_string());
            }
        };

        match self.handle(&delivery).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    delivery_tag = delivery.tag,
                    error = %e,
                    "Log cycle failed, releasing delivery"
                );
                self.release(&delivery).await;
                CycleOutcome::Aborted(e.to_string())
            }
        }
    }

    /// Runs cycles until the queue is empty or a cycle cannot make progress.
    pub async fn drain(&self) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.run_cycle().await;
            let done = matches!(
                outcome,
                CycleOutcome::Idle | CycleOutcome::Skipped | CycleOutcome::Aborted(_)
            );
            outcomes.push(outcome);
            if done {
                return outcomes;
            }
        }
    }

    /// Spawns the tick loop. One cycle per tick; a tick that fires while a
    /// cycle is running is skipped rather than queued.
    pub fn spawn(self: Arc<Self>) -> ConsumerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            info!(
                queue = %self.config.queue,
                tick_ms = self.config.tick_interval.as_millis() as u64,
                max_attempts = self.config.max_attempts,
                "Log consumer started"
            );
            let mut ticker = interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let outcome = self.run_cycle().await;
                        if outcome != CycleOutcome::Idle {
                            debug!(?outcome, "Log cycle finished");
                        }
                    }
                }
            }
            info!(queue = %self.config.queue, "Log consumer stopped");
        });

        ConsumerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn handle(&self, delivery: &Delivery) -> Result<CycleOutcome, QueueError> {
        let event: OutcomeEvent = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    delivery_tag = delivery.tag,
                    error = %e,
                    "Undecodable outcome event, rejecting"
                );
                with_timeout(self.config.op_timeout, self.queue.nack(delivery, false)).await?;
                return Ok(CycleOutcome::Rejected);
            }
        };
        let movement_id = event.movement_id;

        match self.persist(&event).await {
            Ok(true) => {
                with_timeout(self.config.op_timeout, self.queue.ack(delivery)).await?;
                info!(movement_id, status = %event.status, "Ledger log saved");
                Ok(CycleOutcome::Persisted(movement_id))
            }
            Ok(false) => {
                with_timeout(self.config.op_timeout, self.queue.ack(delivery)).await?;
                warn!(movement_id, "Ledger log already exists, discarding message");
                Ok(CycleOutcome::Duplicate(movement_id))
            }
            Err(e) => {
                let attempts = delivery.attempts().saturating_add(1);
                error!(
                    movement_id,
                    attempts,
                    max_attempts = self.config.max_attempts,
                    error = %e,
                    "Failed to save ledger log"
                );
                if attempts < self.config.max_attempts {
                    self.retry(delivery, attempts).await?;
                    info!(movement_id, attempts, "Outcome event re-published for retry");
                    Ok(CycleOutcome::Retried {
                        movement_id,
                        attempts,
                    })
                } else {
                    with_timeout(self.config.op_timeout, self.queue.nack(delivery, false)).await?;
                    error!(movement_id, attempts, "Giving up on ledger log, message dropped");
                    Ok(CycleOutcome::Dropped {
                        movement_id,
                        attempts,
                    })
                }
            }
        }
    }

    /// `Ok(true)` when a row was written, `Ok(false)` when one already existed.
    async fn persist(&self, event: &OutcomeEvent) -> Result<bool, LedgerError> {
        if self.store.find_ledger_log(event.movement_id).await?.is_some() {
            return Ok(false);
        }
        match self.store.insert_ledger_log(event.clone().into()).await {
            Ok(()) => Ok(true),
            Err(LedgerError::DuplicateLedgerLog(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn retry(&self, delivery: &Delivery, attempts: u32) -> Result<(), QueueError> {
        let options = PublishOptions::persistent().with_attempts(attempts);
        with_timeout(
            self.config.op_timeout,
            self.queue
                .publish(&self.config.queue, delivery.payload.clone(), options),
        )
        .await?;
        with_timeout(self.config.op_timeout, self.queue.ack(delivery)).await
    }

    async fn release(&self, delivery: &Delivery) {
        let released = with_timeout(self.config.op_timeout, self.queue.nack(delivery, true)).await;
        if let Err(e) = released {
            error!(delivery_tag = delivery.tag, error = %e, "Failed to release delivery");
        }
    }
}

/// Handle to stop a spawned consumer.
pub struct ConsumerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Requests shutdown and waits for the running cycle, if any, to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            error!(error = %e, "Log consumer task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger_log::LedgerLog;
    use crate::domain::ports::{LedgerLogRepository, MessageQueue};
    use crate::domain::queue::LOG_QUEUE;
    use crate::error::Result;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use crate::infrastructure::in_memory_queue::InMemoryQueue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` inserts, optionally sleeping on each call.
    struct FlakyLogStore {
        inner: InMemoryLedgerStore,
        failures: AtomicU32,
        delay: Duration,
    }

    impl FlakyLogStore {
        fn new(inner: InMemoryLedgerStore, failures: u32) -> Self {
            Self {
                inner,
                failures: AtomicU32::new(failures),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl LedgerLogRepository for FlakyLogStore {
        async fn find_ledger_log(&self, movement_id: MovementId) -> Result<Option<LedgerLog>> {
            self.inner.find_ledger_log(movement_id).await
        }

        async fn insert_ledger_log(&self, log: LedgerLog) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(LedgerError::internal("store unavailable"));
            }
            self.inner.insert_ledger_log(log).await
        }
    }

    fn consumer(queue: &InMemoryQueue, store: impl LedgerLogRepository + 'static) -> LogConsumer {
        LogConsumer::new(Arc::new(queue.clone()), Box::new(store), ConsumerConfig::default())
    }

    async fn enqueue(queue: &InMemoryQueue, event: &OutcomeEvent) {
        queue
            .publish(
                LOG_QUEUE,
                serde_json::to_vec(event).unwrap(),
                PublishOptions::persistent(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let queue = InMemoryQueue::new();
        let consumer = consumer(&queue, InMemoryLedgerStore::new());
        assert_eq!(consumer.run_cycle().await, CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_persists_and_acks() {
        let queue = InMemoryQueue::new();
        let store = InMemoryLedgerStore::new();
        let consumer = consumer(&queue, store.clone());
        enqueue(&queue, &OutcomeEvent::blocked(5)).await;

        assert_eq!(consumer.run_cycle().await, CycleOutcome::Persisted(5));
        assert_eq!(queue.unacked_count().await, 0);

        let log = store.find_ledger_log(5).await.unwrap().unwrap();
        assert_eq!(log.fail_reason.as_deref(), Some("insufficient limit"));
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let queue = InMemoryQueue::new();
        let store = InMemoryLedgerStore::new();
        let consumer = consumer(&queue, store.clone());
        enqueue(&queue, &OutcomeEvent::processed(8)).await;
        enqueue(&queue, &OutcomeEvent::processed(8)).await;

        assert_eq!(consumer.run_cycle().await, CycleOutcome::Persisted(8));
        assert_eq!(consumer.run_cycle().await, CycleOutcome::Duplicate(8));
        assert_eq!(store.all_ledger_logs().await.len(), 1);
        assert_eq!(queue.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let queue = InMemoryQueue::new();
        let store = InMemoryLedgerStore::new();
        let consumer = consumer(&queue, FlakyLogStore::new(store.clone(), 2));
        enqueue(&queue, &OutcomeEvent::processed(1)).await;

        assert_eq!(
            consumer.run_cycle().await,
            CycleOutcome::Retried {
                movement_id: 1,
                attempts: 1,
            }
        );
        assert_eq!(
            consumer.run_cycle().await,
            CycleOutcome::Retried {
                movement_id: 1,
                attempts: 2,
            }
        );
        assert_eq!(queue.ready(LOG_QUEUE).await[0].headers.get("attempts"), Some(&2));
        assert_eq!(consumer.run_cycle().await, CycleOutcome::Persisted(1));

        assert_eq!(store.all_ledger_logs().await.len(), 1);
        assert_eq!(queue.unacked_count().await, 0);
        assert!(queue.rejected().await.is_empty());
    }

    #[tokio::test]
    async fn test_drops_after_max_attempts() {
        let queue = InMemoryQueue::new();
        let store = InMemoryLedgerStore::new();
        let consumer = consumer(&queue, FlakyLogStore::new(store.clone(), u32::MAX));
        enqueue(&queue, &OutcomeEvent::failed(2)).await;

        let outcomes = consumer.drain().await;
        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Retried {
                    movement_id: 2,
                    attempts: 1,
                },
                CycleOutcome::Retried {
                    movement_id: 2,
                    attempts: 2,
                },
                CycleOutcome::Dropped {
                    movement_id: 2,
                    attempts: 3,
                },
                CycleOutcome::Idle,
            ]
        );
        assert!(store.all_ledger_logs().await.is_empty());
        assert!(queue.ready(LOG_QUEUE).await.is_empty());
        assert_eq!(queue.rejected().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let queue = InMemoryQueue::new();
        let consumer = consumer(&queue, InMemoryLedgerStore::new());
        queue
            .publish(LOG_QUEUE, b"not json".to_vec(), PublishOptions::persistent())
            .await
            .unwrap();

        assert_eq!(consumer.run_cycle().await, CycleOutcome::Rejected);
        assert_eq!(queue.rejected().await.len(), 1);
    }

    /// Queue whose publishes always fail; everything else hits the inner queue.
    struct NoPublishQueue(InMemoryQueue);

    #[async_trait]
    impl MessageQueue for NoPublishQueue {
        async fn publish(
            &self,
            _queue: &str,
            _payload: Vec<u8>,
            _options: PublishOptions,
        ) -> std::result::Result<(), QueueError> {
            Err(QueueError::Publish("broker refused message".to_string()))
        }

        async fn poll(&self, queue: &str) -> std::result::Result<Option<Delivery>, QueueError> {
            self.0.poll(queue).await
        }

        async fn ack(&self, delivery: &Delivery) -> std::result::Result<(), QueueError> {
            self.0.ack(delivery).await
        }

        async fn nack(
            &self,
            delivery: &Delivery,
            requeue: bool,
        ) -> std::result::Result<(), QueueError> {
            self.0.nack(delivery, requeue).await
        }
    }

    #[tokio::test]
    async fn test_failed_retry_publish_releases_delivery() {
        let queue = InMemoryQueue::new();
        let consumer = LogConsumer::new(
            Arc::new(NoPublishQueue(queue.clone())),
            Box::new(FlakyLogStore::new(InMemoryLedgerStore::new(), u32::MAX)),
            ConsumerConfig::default(),
        );
        enqueue(&queue, &OutcomeEvent::processed(6)).await;

        assert!(matches!(consumer.run_cycle().await, CycleOutcome::Aborted(_)));

        let ready = queue.ready(LOG_QUEUE).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].headers.get("attempts"), None);
        assert_eq!(queue.unacked_count().await, 0);
        assert!(queue.rejected().await.is_empty());
    }

    #[tokio::test]
    async fn test_saturated_attempts_header_is_dropped() {
        let queue = InMemoryQueue::new();
        let consumer = consumer(&queue, FlakyLogStore::new(InMemoryLedgerStore::new(), u32::MAX));
        queue
            .publish(
                LOG_QUEUE,
                serde_json::to_vec(&OutcomeEvent::processed(1)).unwrap(),
                PublishOptions::persistent().with_attempts(u32::MAX),
            )
            .await
            .unwrap();

        assert_eq!(
            consumer.run_cycle().await,
            CycleOutcome::Dropped {
                movement_id: 1,
                attempts: u32::MAX,
            }
        );
        assert_eq!(queue.rejected().await.len(), 1);
        assert_eq!(queue.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_queue_aborts_cycle() {
        let queue = InMemoryQueue::new();
        let consumer = consumer(&queue, InMemoryLedgerStore::new());
        queue.close().await;

        assert!(matches!(consumer.run_cycle().await, CycleOutcome::Aborted(_)));
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let queue = InMemoryQueue::new();
        let mut slow = FlakyLogStore::new(InMemoryLedgerStore::new(), 0);
        slow.delay = Duration::from_millis(100);
        let consumer = consumer(&queue, slow);
        enqueue(&queue, &OutcomeEvent::processed(3)).await;
        enqueue(&queue, &OutcomeEvent::processed(4)).await;

        let (first, second) = tokio::join!(consumer.run_cycle(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            consumer.run_cycle().await
        });

        assert_eq!(first, CycleOutcome::Persisted(3));
        assert_eq!(second, CycleOutcome::Skipped);
        assert_eq!(queue.ready(LOG_QUEUE).await.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_consumer_processes_on_tick() {
        let queue = InMemoryQueue::new();
        let store = InMemoryLedgerStore::new();
        let config = ConsumerConfig::default().with_tick_interval(Duration::from_millis(10));
        let consumer = Arc::new(LogConsumer::new(
            Arc::new(queue.clone()),
            Box::new(store.clone()),
            config,
        ));
        enqueue(&queue, &OutcomeEvent::processed(1)).await;
        enqueue(&queue, &OutcomeEvent::blocked(2)).await;

        let handle = consumer.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        assert_eq!(store.all_ledger_logs().await.len(), 2);
    }
}
