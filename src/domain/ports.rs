use super::account::{Account, AccountId};
use super::ledger_log::LedgerLog;
use super::movement::{Movement, MovementId, MovementTransaction, NewMovement, TransactionOutcome};
use super::queue::{Delivery, PublishOptions, QueueError};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Store for accounts and movements, owned by the ledger engine.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>>;
    async fn insert_account(&self, account: Account) -> Result<()>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;
    /// Single non-transactional write, used for BLOCKED and FAILED records.
    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement>;
    async fn movements_for_account(&self, id: &AccountId) -> Result<Vec<Movement>>;
    /// Applies the movement insert and balance update atomically.
    ///
    /// Implementations hold the account's write lock for the whole
    /// read-check-write, so concurrent debits on one account serialize while
    /// other accounts proceed.
    async fn run_transaction(&self, tx: MovementTransaction) -> Result<TransactionOutcome>;
}

/// Store for audit rows, owned by the log consumer.
#[async_trait]
pub trait LedgerLogRepository: Send + Sync {
    async fn find_ledger_log(&self, movement_id: MovementId) -> Result<Option<LedgerLog>>;
    /// Fails with `LedgerError::DuplicateLedgerLog` if a row already exists.
    async fn insert_ledger_log(&self, log: LedgerLog) -> Result<()>;
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> std::result::Result<(), QueueError>;
    /// Non-blocking fetch of a single message.
    async fn poll(&self, queue: &str) -> std::result::Result<Option<Delivery>, QueueError>;
    async fn ack(&self, delivery: &Delivery) -> std::result::Result<(), QueueError>;
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> std::result::Result<(), QueueError>;
}

pub type LedgerRepositoryBox = Box<dyn LedgerRepository>;
pub type LedgerLogRepositoryBox = Box<dyn LedgerLogRepository>;
pub type MessageQueueRef = Arc<dyn MessageQueue>;
