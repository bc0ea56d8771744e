use crate::domain::account::AccountId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-account write locks.
///
/// Movements on the same account serialize on that account's lock; movements
/// on different accounts never contend beyond the brief table lookup.
#[derive(Default)]
pub struct AccountLocks {
    table: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the write lock of `id`. Released on drop.
    pub async fn lock(&self, id: &AccountId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_account_serializes() {
        let locks = Arc::new(AccountLocks::new());
        let id = AccountId::new("a").unwrap();
        let guard = locks.lock(&id).await;

        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_contend() {
        let locks = AccountLocks::new();
        let _a = locks.lock(&AccountId::new("a").unwrap()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&AccountId::new("b").unwrap()),
        )
        .await;
        assert!(b.is_ok());
    }
}
