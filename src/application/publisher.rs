use crate::config::PublisherConfig;
use crate::domain::ledger_log::OutcomeEvent;
use crate::domain::ports::MessageQueueRef;
use crate::domain::queue::{PublishOptions, QueueError, with_timeout};
use tracing::{debug, warn};

/// Fire-and-forget emission of movement outcome events.
///
/// `publish` never fails towards the caller: a lost event costs an audit row,
/// never a movement. Retries only start once a message is on the queue, and
/// those belong to the log consumer.
#[derive(Clone)]
pub struct OutcomePublisher {
    queue: MessageQueueRef,
    config: PublisherConfig,
}

impl OutcomePublisher {
    pub fn new(queue: MessageQueueRef, config: PublisherConfig) -> Self {
        Self { queue, config }
    }

    pub async fn publish(&self, event: &OutcomeEvent) {
        if let Err(e) = self.try_publish(event).await {
            warn!(
                movement_id = event.movement_id,
                status = %event.status,
                queue = %self.config.queue,
                error = %e,
                "Failed to publish outcome event"
            );
        }
    }

    async fn try_publish(&self, event: &OutcomeEvent) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| QueueError::Publish(e.to_string()))?;
        with_timeout(
            self.config.op_timeout,
            self.queue
                .publish(&self.config.queue, payload, PublishOptions::persistent()),
        )
        .await?;
        debug!(
            movement_id = event.movement_id,
            status = %event.status,
            "Published outcome event"
        );
        Ok(())
    }
}
