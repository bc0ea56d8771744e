use super::locks::AccountLocks;
use crate::domain::account::{Account, AccountId};
use crate::domain::ledger_log::LedgerLog;
use crate::domain::movement::{
    Movement, MovementId, MovementTransaction, NewMovement, TransactionOutcome,
};
use crate::domain::ports::{LedgerLogRepository, LedgerRepository};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// A thread-safe in-memory ledger store.
///
/// Holds accounts, movements and ledger logs behind `Arc<RwLock<..>>` so that
/// clones share state: hand one clone to the engine and another to the log
/// consumer. Balance updates go through the per-account lock table, which
/// gives the row-level write lock a relational store would.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
    movements: Arc<RwLock<BTreeMap<MovementId, Movement>>>,
    logs: Arc<RwLock<HashMap<MovementId, LedgerLog>>>,
    next_movement_id: Arc<AtomicU64>,
    locks: Arc<AccountLocks>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> MovementId {
        self.next_movement_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// All ledger logs, ordered by movement id.
    pub async fn all_ledger_logs(&self) -> Vec<LedgerLog> {
        let logs = self.logs.read().await;
        let mut all: Vec<LedgerLog> = logs.values().cloned().collect();
        all.sort_by_key(|log| log.movement_id);
        all
    }

    /// All movements, ordered by id.
    pub async fn all_movements(&self) -> Vec<Movement> {
        self.movements.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerStore {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(id).cloned())
    }

    async fn insert_account(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            return Err(LedgerError::Conflict(format!(
                "Account {} already exists",
                account.id
            )));
        }
        accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<Account> = accounts.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement> {
        let movement = movement.into_movement(self.next_id(), Utc::now());
        let mut movements = self.movements.write().await;
        movements.insert(movement.id, movement.clone());
        Ok(movement)
    }

    async fn movements_for_account(&self, id: &AccountId) -> Result<Vec<Movement>> {
        let movements = self.movements.read().await;
        Ok(movements
            .values()
            .filter(|m| &m.account_id == id)
            .cloned()
            .collect())
    }

    async fn run_transaction(&self, tx: MovementTransaction) -> Result<TransactionOutcome> {
        let account_id = tx.movement.account_id.clone();
        let _guard = self.locks.lock(&account_id).await;

        let account = self
            .get_account(&account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;

        let Some(new_balance) = tx.balance_after(&account) else {
            return Ok(TransactionOutcome::LimitExceeded {
                available: account.available(),
            });
        };

        // Both maps are locked together so readers never see one write without the other.
        let mut movements = self.movements.write().await;
        let mut accounts = self.accounts.write().await;
        let stored = accounts
            .get_mut(&account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;

        let movement = tx.movement.into_movement(self.next_id(), Utc::now());
        movements.insert(movement.id, movement.clone());
        stored.balance = new_balance;

        Ok(TransactionOutcome::Committed {
            movement,
            new_balance,
        })
    }
}

#[async_trait]
impl LedgerLogRepository for InMemoryLedgerStore {
    async fn find_ledger_log(&self, movement_id: MovementId) -> Result<Option<LedgerLog>> {
        let logs = self.logs.read().await;
        Ok(logs.get(&movement_id).cloned())
    }

    async fn insert_ledger_log(&self, log: LedgerLog) -> Result<()> {
        let mut logs = self.logs.write().await;
        if logs.contains_key(&log.movement_id) {
            return Err(LedgerError::DuplicateLedgerLog(log.movement_id));
        }
        logs.insert(log.movement_id, log);
        Ok(())
    }
}
