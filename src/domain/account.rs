use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Smallest amount a movement may carry.
pub const MIN_AMOUNT: Decimal = dec!(0.01);

/// Opaque account key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "Account id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed monetary value. Balances may go negative down to the credit limit.
///
/// Wraps `rust_decimal::Decimal` so ledger arithmetic cannot be mixed up with
/// raw decimals coming off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// Strictly positive movement amount.
///
/// Construction enforces `amount >= MIN_AMOUNT`, so an `Amount` reaching the
/// engine is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value >= MIN_AMOUNT {
            Ok(Self(value))
        } else {
            Err(LedgerError::ValidationError(format!(
                "Amount must be at least {MIN_AMOUNT}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Balance {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// An account as the ledger sees it.
///
/// Invariant: `balance >= -credit_limit` after every committed movement.
/// Only the ledger engine mutates `balance`, and only inside a repository
/// transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub balance: Balance,
    pub credit_limit: Balance,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        name: impl Into<String>,
        balance: Balance,
        credit_limit: Balance,
    ) -> Result<Self> {
        if credit_limit < Balance::ZERO {
            return Err(LedgerError::ValidationError(
                "Credit limit must not be negative".to_string(),
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            balance,
            credit_limit,
            created_at: Utc::now(),
        })
    }

    /// Headroom for debits: `balance + credit_limit`.
    pub fn available(&self) -> Balance {
        self.balance + self.credit_limit
    }

    /// Whether a debit of `amount` stays within the credit limit.
    pub fn can_debit(&self, amount: Amount) -> bool {
        Balance::from(amount) <= self.available()
    }
}

/// Balance and credit limit of one account, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub balance: Balance,
    pub credit_limit: Balance,
}

impl From<&Account> for BalanceSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            balance: account.balance,
            credit_limit: account.credit_limit,
        }
    }
}
