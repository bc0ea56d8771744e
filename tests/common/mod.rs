#![allow(dead_code)]

use async_trait::async_trait;
use ledgerflow::application::consumer::LogConsumer;
use ledgerflow::application::engine::LedgerEngine;
use ledgerflow::application::publisher::OutcomePublisher;
use ledgerflow::application::service::{CreateMovement, MovementService};
use ledgerflow::config::ConsumerConfig;
use ledgerflow::domain::account::{Account, AccountId, Balance};
use ledgerflow::domain::ledger_log::LedgerLog;
use ledgerflow::domain::movement::{
    Movement, MovementId, MovementTransaction, MovementType, NewMovement, TransactionOutcome,
};
use ledgerflow::domain::ports::{LedgerLogRepository, LedgerRepository};
use ledgerflow::error::{LedgerError, Result};
use ledgerflow::infrastructure::in_memory::InMemoryLedgerStore;
use ledgerflow::infrastructure::in_memory_queue::InMemoryQueue;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Repository that delegates to an in-memory store but can be told to fail
/// `run_transaction`, as a database would on a dropped connection mid-commit.
#[derive(Clone)]
pub struct FaultyLedger {
    pub inner: InMemoryLedgerStore,
    fail_transactions: Arc<AtomicBool>,
}

impl FaultyLedger {
    pub fn new(inner: InMemoryLedgerStore) -> Self {
        Self {
            inner,
            fail_transactions: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerRepository for FaultyLedger {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn insert_account(&self, account: Account) -> Result<()> {
        self.inner.insert_account(account).await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.inner.all_accounts().await
    }

    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement> {
        self.inner.insert_movement(movement).await
    }

    async fn movements_for_account(&self, id: &AccountId) -> Result<Vec<Movement>> {
        self.inner.movements_for_account(id).await
    }

    async fn run_transaction(&self, tx: MovementTransaction) -> Result<TransactionOutcome> {
        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(LedgerError::internal("connection reset during commit"));
        }
        self.inner.run_transaction(tx).await
    }
}

/// Log store whose first `failures` inserts fail.
pub struct FlakyLogStore {
    pub inner: InMemoryLedgerStore,
    failures: AtomicU32,
    pub calls: Arc<AtomicU32>,
}

impl FlakyLogStore {
    pub fn new(inner: InMemoryLedgerStore, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Counts insert calls into `calls` instead of a private counter.
    pub fn with_calls(mut self, calls: Arc<AtomicU32>) -> Self {
        self.calls = calls;
        self
    }
}

#[async_trait]
impl LedgerLogRepository for FlakyLogStore {
    async fn find_ledger_log(&self, movement_id: MovementId) -> Result<Option<LedgerLog>> {
        self.inner.find_ledger_log(movement_id).await
    }

    async fn insert_ledger_log(&self, log: LedgerLog) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::internal("audit store unavailable"));
        }
        self.inner.insert_ledger_log(log).await
    }
}

/// Service, consumer and the shared state behind them.
pub struct Pipeline {
    pub service: MovementService,
    pub consumer: Arc<LogConsumer>,
    pub ledger: FaultyLedger,
    pub queue: InMemoryQueue,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_log_store(|store| Box::new(store))
    }

    pub fn with_log_store<F>(log_store: F) -> Self
    where
        F: FnOnce(InMemoryLedgerStore) -> Box<dyn LedgerLogRepository>,
    {
        let store = InMemoryLedgerStore::new();
        let ledger = FaultyLedger::new(store.clone());
        let queue = InMemoryQueue::new();
        let config = ConsumerConfig::default();

        let publisher = OutcomePublisher::new(Arc::new(queue.clone()), config.publisher());
        let service = MovementService::new(LedgerEngine::new(Box::new(ledger.clone()), publisher));
        let consumer = Arc::new(LogConsumer::new(
            Arc::new(queue.clone()),
            log_store(store),
            config,
        ));

        Self {
            service,
            consumer,
            ledger,
            queue,
        }
    }

    pub fn store(&self) -> &InMemoryLedgerStore {
        &self.ledger.inner
    }

    pub async fn open_account(&self, id: &str, balance: Decimal, credit_limit: Decimal) {
        let account = Account::new(
            AccountId::new(id).unwrap(),
            format!("Holder of {id}"),
            Balance::new(balance),
            Balance::new(credit_limit),
        )
        .unwrap();
        self.ledger.insert_account(account).await.unwrap();
    }

    pub async fn balance(&self, id: &str) -> Balance {
        self.service.get_balance(id).await.unwrap().balance
    }
}

pub fn debit(account_id: &str, amount: Decimal) -> CreateMovement {
    movement(account_id, MovementType::Debit, amount)
}

pub fn credit(account_id: &str, amount: Decimal) -> CreateMovement {
    movement(account_id, MovementType::Credit, amount)
}

pub fn movement(account_id: &str, r#type: MovementType, amount: Decimal) -> CreateMovement {
    CreateMovement {
        account_id: account_id.to_string(),
        amount,
        r#type,
        description: None,
    }
}

pub fn write_csv(path: &Path, header: &[&str], rows: &[&[&str]]) -> std::io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(*row)?;
    }
    wtr.flush()?;
    Ok(())
}
