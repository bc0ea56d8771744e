use super::engine::{LedgerEngine, MovementOutcome};
use crate::domain::account::{AccountId, Amount, Balance, BalanceSnapshot};
use crate::domain::movement::{Movement, MovementRequest, MovementType};
use crate::domain::ports::LedgerRepository;
use crate::error::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw create-movement input, as it arrives from the outer layer.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CreateMovement {
    pub account_id: String,
    pub amount: Decimal,
    pub r#type: MovementType,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateMovement {
    pub fn validate(self) -> Result<MovementRequest, LedgerError> {
        Ok(MovementRequest {
            account_id: AccountId::new(self.account_id)?,
            amount: Amount::new(self.amount)?,
            r#type: self.r#type,
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        })
    }
}

#[derive(Error, Debug)]
pub enum MovementError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("Movement {} blocked: insufficient limit (available {available})", .movement.id)]
    LimitExceeded {
        movement: Box<Movement>,
        available: Balance,
    },
    /// `movement` is `None` when the failure happened before any record could
    /// be attempted (account lookup, or the FAILED record itself).
    #[error("Movement processing failed: {reason}")]
    ProcessingFailed {
        movement: Option<Box<Movement>>,
        reason: String,
    },
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<LedgerError> for MovementError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::AccountNotFound(id) => MovementError::AccountNotFound(id),
            LedgerError::ValidationError(msg) => MovementError::ValidationError(msg),
            other => MovementError::ProcessingFailed {
                movement: None,
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct AccountMovements {
    pub account_id: AccountId,
    pub name: String,
    /// Newest first.
    pub movements: Vec<Movement>,
}

/// Operations exposed to the outer request layer.
pub struct MovementService {
    engine: LedgerEngine,
}

impl MovementService {
    pub fn new(engine: LedgerEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub async fn create_movement(&self, input: CreateMovement) -> Result<Movement, MovementError> {
        let request = input.validate()?;
        match self.engine.process(request).await? {
            MovementOutcome::Approved(movement) => Ok(movement),
            MovementOutcome::Blocked {
                movement,
                available,
            } => Err(MovementError::LimitExceeded {
                movement: Box::new(movement),
                available,
            }),
            MovementOutcome::Failed { movement, cause } => Err(MovementError::ProcessingFailed {
                movement: Some(Box::new(movement)),
                reason: cause.to_string(),
            }),
        }
    }

    pub async fn list_movements_for_account(
        &self,
        account_id: &str,
    ) -> Result<AccountMovements, MovementError> {
        let id = AccountId::new(account_id)?;
        let repository = self.engine.repository();
        let account = repository
            .get_account(&id)
            .await?
            .ok_or_else(|| MovementError::AccountNotFound(id.clone()))?;

        let mut movements = repository.movements_for_account(&id).await?;
        movements.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(AccountMovements {
            account_id: account.id,
            name: account.name,
            movements,
        })
    }

    pub async fn get_balance(&self, account_id: &str) -> Result<BalanceSnapshot, MovementError> {
        let id = AccountId::new(account_id)?;
        self.engine
            .repository()
            .get_account(&id)
            .await?
            .map(|account| BalanceSnapshot::from(&account))
            .ok_or(MovementError::AccountNotFound(id))
    }
}
