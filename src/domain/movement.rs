use super::account::{Account, AccountId, Amount, Balance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic movement key, assigned by the repository on insert.
pub type MovementId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    Credit,
    Debit,
}

impl MovementType {
    /// Signed effect of `amount` on a balance.
    pub fn delta(&self, amount: Amount) -> Balance {
        match self {
            MovementType::Credit => Balance::from(amount),
            MovementType::Debit => -Balance::from(amount),
        }
    }
}

/// Terminal ledger-side status of a movement attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementStatus {
    Approved,
    Blocked,
    Failed,
}

impl fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MovementStatus::Approved => "APPROVED",
            MovementStatus::Blocked => "BLOCKED",
            MovementStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// An immutable record of one credit or debit attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Movement {
    pub id: MovementId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub r#type: MovementType,
    pub status: MovementStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A movement about to be inserted; the repository assigns id and timestamp.
#[derive(Debug, PartialEq, Clone)]
pub struct NewMovement {
    pub account_id: AccountId,
    pub amount: Amount,
    pub r#type: MovementType,
    pub status: MovementStatus,
    pub description: Option<String>,
}

impl NewMovement {
    pub fn into_movement(self, id: MovementId, created_at: DateTime<Utc>) -> Movement {
        Movement {
            id,
            account_id: self.account_id,
            amount: self.amount,
            r#type: self.r#type,
            status: self.status,
            description: self.description,
            created_at,
        }
    }
}

/// A validated request to move money on an account.
#[derive(Debug, PartialEq, Clone)]
pub struct MovementRequest {
    pub account_id: AccountId,
    pub amount: Amount,
    pub r#type: MovementType,
    pub description: Option<String>,
}

impl MovementRequest {
    /// The record to persist for this request with the given terminal status.
    pub fn record(&self, status: MovementStatus) -> NewMovement {
        NewMovement {
            account_id: self.account_id.clone(),
            amount: self.amount,
            r#type: self.r#type,
            status,
            description: self.description.clone(),
        }
    }
}

/// The atomic unit handed to `LedgerRepository::run_transaction`.
///
/// Inserting the APPROVED movement and applying `delta` to the account balance
/// commit together or not at all. When `enforce_limit` is set the repository
/// re-checks `balance + delta >= -credit_limit` under the account lock.
#[derive(Debug, PartialEq, Clone)]
pub struct MovementTransaction {
    pub movement: NewMovement,
    pub delta: Balance,
    pub enforce_limit: bool,
}

impl MovementTransaction {
    pub fn approve(request: &MovementRequest) -> Self {
        Self {
            movement: request.record(MovementStatus::Approved),
            delta: request.r#type.delta(request.amount),
            enforce_limit: request.r#type == MovementType::Debit,
        }
    }

    /// Balance after applying `delta` to `account`, or `None` when the result
    /// would breach the credit limit and the limit is enforced.
    pub fn balance_after(&self, account: &Account) -> Option<Balance> {
        let new_balance = account.balance + self.delta;
        if self.enforce_limit && new_balance < -account.credit_limit {
            None
        } else {
            Some(new_balance)
        }
    }
}

/// Result of a transaction that ran to completion.
#[derive(Debug, PartialEq, Clone)]
pub enum TransactionOutcome {
    Committed {
        movement: Movement,
        new_balance: Balance,
    },
    /// The in-transaction limit check failed; nothing was written.
    LimitExceeded { available: Balance },
}
