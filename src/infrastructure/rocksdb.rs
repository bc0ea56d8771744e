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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Column Family for storing accounts, keyed by account id.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for storing movements, keyed by big-endian movement id.
pub const CF_MOVEMENTS: &str = "movements";
/// Column Family for storing ledger logs, keyed by big-endian movement id.
pub const CF_LEDGER_LOGS: &str = "ledger_logs";

/// A persistent store implementation using RocksDB.
///
/// Accounts, movements and ledger logs live in separate Column Families. A
/// movement transaction is a single `WriteBatch` (movement + account), which
/// RocksDB applies atomically.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    next_movement_id: Arc<AtomicU64>,
    locks: Arc<AccountLocks>,
    log_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures the column families exist and resumes movement ids after the
    /// highest one already stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ACCOUNTS, CF_MOVEMENTS, CF_LEDGER_LOGS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        let last_id = Self::last_movement_id(&db)?;

        Ok(Self {
            db: Arc::new(db),
            next_movement_id: Arc::new(AtomicU64::new(last_id)),
            locks: Arc::new(AccountLocks::new()),
            log_guard: Arc::new(Mutex::new(())),
        })
    }

    fn last_movement_id(db: &DB) -> Result<MovementId> {
        let cf = db
            .cf_handle(CF_MOVEMENTS)
            .ok_or_else(|| LedgerError::internal("Movements column family not found"))?;
        match db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(decode_id(&key)?)
            }
            None => Ok(0),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::internal(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn next_id(&self) -> MovementId {
        self.next_movement_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn decode_id(key: &[u8]) -> Result<MovementId> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| LedgerError::internal("Malformed movement key"))?;
    Ok(MovementId::from_be_bytes(bytes))
}

#[async_trait]
impl LedgerRepository for RocksDBStore {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.read(CF_ACCOUNTS, id.as_str().as_bytes())
    }

    async fn insert_account(&self, account: Account) -> Result<()> {
        let _guard = self.locks.lock(&account.id).await;
        if self.get_account(&account.id).await?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "Account {} already exists",
                account.id
            )));
        }
        self.write(CF_ACCOUNTS, account.id.as_str().as_bytes(), &account)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS)
    }

    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement> {
        let movement = movement.into_movement(self.next_id(), Utc::now());
        self.write(CF_MOVEMENTS, &movement.id.to_be_bytes(), &movement)?;
        Ok(movement)
    }

    async fn movements_for_account(&self, id: &AccountId) -> Result<Vec<Movement>> {
        let movements: Vec<Movement> = self.scan(CF_MOVEMENTS)?;
        Ok(movements
            .into_iter()
            .filter(|m| &m.account_id == id)
            .collect())
    }

    async fn run_transaction(&self, tx: MovementTransaction) -> Result<TransactionOutcome> {
        let account_id = tx.movement.account_id.clone();
        let _guard = self.locks.lock(&account_id).await;

        let mut account = self
            .get_account(&account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;

        let Some(new_balance) = tx.balance_after(&account) else {
            return Ok(TransactionOutcome::LimitExceeded {
                available: account.available(),
            });
        };

        let movement = tx.movement.into_movement(self.next_id(), Utc::now());
        account.balance = new_balance;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_MOVEMENTS)?,
            movement.id.to_be_bytes(),
            serde_json::to_vec(&movement)?,
        );
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            account_id.as_str().as_bytes(),
            serde_json::to_vec(&account)?,
        );
        self.db.write(batch)?;

        Ok(TransactionOutcome::Committed {
            movement,
            new_balance,
        })
    }
}

#[async_trait]
impl LedgerLogRepository for RocksDBStore {
    async fn find_ledger_log(&self, movement_id: MovementId) -> Result<Option<LedgerLog>> {
        self.read(CF_LEDGER_LOGS, &movement_id.to_be_bytes())
    }

    async fn insert_ledger_log(&self, log: LedgerLog) -> Result<()> {
        let _guard = self.log_guard.lock().await;
        let key = log.movement_id.to_be_bytes();
        let cf = self.cf(CF_LEDGER_LOGS)?;
        if self.db.get_pinned_cf(cf, key)?.is_some() {
            return Err(LedgerError::DuplicateLedgerLog(log.movement_id));
        }
        self.write(CF_LEDGER_LOGS, &key, &log)
    }
}
