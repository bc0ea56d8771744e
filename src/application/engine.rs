use super::publisher::OutcomePublisher;
use crate::domain::account::Balance;
use crate::domain::ledger_log::OutcomeEvent;
use crate::domain::movement::{
    Movement, MovementRequest, MovementStatus, MovementTransaction, MovementType,
    TransactionOutcome,
};
use crate::domain::ports::{LedgerRepository, LedgerRepositoryBox};
use crate::error::{LedgerError, Result};
use tracing::{error, info, warn};

/// How a movement attempt ended. Every variant carries the persisted record.
#[derive(Debug)]
pub enum MovementOutcome {
    Approved(Movement),
    /// The debit exceeded `balance + credit_limit`; the balance is untouched.
    Blocked {
        movement: Movement,
        available: Balance,
    },
    /// The balance transaction aborted; `movement` is the separate FAILED record.
    Failed {
        movement: Movement,
        cause: LedgerError,
    },
}

impl MovementOutcome {
    pub fn movement(&self) -> &Movement {
        match self {
            MovementOutcome::Approved(movement) => movement,
            MovementOutcome::Blocked { movement, .. } => movement,
            MovementOutcome::Failed { movement, .. } => movement,
        }
    }

    pub fn status(&self) -> MovementStatus {
        self.movement().status
    }
}

/// The transactional core: validates limits, mutates balances and records
/// one movement per attempt.
///
/// Attempts are never retried here; a retry is a new call and a new movement.
pub struct LedgerEngine {
    repository: LedgerRepositoryBox,
    publisher: OutcomePublisher,
}

impl LedgerEngine {
    /// Creates a new `LedgerEngine`.
    ///
    /// # Arguments
    ///
    /// * `repository` - The store for accounts and movements.
    /// * `publisher` - Where outcome events go once a movement is recorded.
    pub fn new(repository: LedgerRepositoryBox, publisher: OutcomePublisher) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    pub fn repository(&self) -> &dyn LedgerRepository {
        self.repository.as_ref()
    }

    /// Processes one movement attempt.
    ///
    /// Returns `Err` only when the account does not exist or when the
    /// BLOCKED/FAILED bookkeeping record itself cannot be written; every other
    /// outcome is reported through `MovementOutcome`.
    pub async fn process(&self, request: MovementRequest) -> Result<MovementOutcome> {
        info!(
            account_id = %request.account_id,
            amount = %request.amount.value(),
            kind = ?request.r#type,
            "Processing movement"
        );

        let account = self
            .repository
            .get_account(&request.account_id)
            .await?
            .ok_or_else(|| {
                warn!(account_id = %request.account_id, "Account not found");
                LedgerError::AccountNotFound(request.account_id.clone())
            })?;

        // Doomed debits are rejected before any lock is taken.
        if request.r#type == MovementType::Debit && !account.can_debit(request.amount) {
            return self.block(&request, account.available()).await;
        }

        match self
            .repository
            .run_transaction(MovementTransaction::approve(&request))
            .await
        {
            Ok(TransactionOutcome::Committed {
                movement,
                new_balance,
            }) => {
                info!(
                    movement_id = movement.id,
                    account_id = %movement.account_id,
                    new_balance = %new_balance,
                    "Movement approved"
                );
                self.publisher
                    .publish(&OutcomeEvent::processed(movement.id))
                    .await;
                Ok(MovementOutcome::Approved(movement))
            }
            // A concurrent debit consumed the headroom between the read and the lock.
            Ok(TransactionOutcome::LimitExceeded { available }) => {
                self.block(&request, available).await
            }
            Err(cause) => self.fail(&request, cause).await,
        }
    }

    async fn block(
        &self,
        request: &MovementRequest,
        available: Balance,
    ) -> Result<MovementOutcome> {
        let movement = self
            .repository
            .insert_movement(request.record(MovementStatus::Blocked))
            .await?;
        warn!(
            movement_id = movement.id,
            account_id = %movement.account_id,
            amount = %movement.amount.value(),
            available = %available,
            "Movement blocked: insufficient limit"
        );
        self.publisher
            .publish(&OutcomeEvent::blocked(movement.id))
            .await;
        Ok(MovementOutcome::Blocked {
            movement,
            available,
        })
    }

    async fn fail(&self, request: &MovementRequest, cause: LedgerError) -> Result<MovementOutcome> {
        error!(
            account_id = %request.account_id,
            error = %cause,
            "Movement transaction failed"
        );
        let movement = self
            .repository
            .insert_movement(request.record(MovementStatus::Failed))
            .await?;
        self.publisher
            .publish(&OutcomeEvent::failed(movement.id))
            .await;
        Ok(MovementOutcome::Failed { movement, cause })
    }
}
