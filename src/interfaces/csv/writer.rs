use crate::domain::account::Account;
use crate::domain::ledger_log::{LedgerLog, LogStatus};
use crate::domain::movement::{Movement, MovementStatus, MovementType};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow<'a> {
    id: &'a str,
    name: &'a str,
    balance: String,
    credit_limit: String,
}

#[derive(Serialize)]
struct MovementRow<'a> {
    id: u64,
    account_id: &'a str,
    r#type: MovementType,
    amount: String,
    status: MovementStatus,
    description: &'a str,
    created_at: String,
}

#[derive(Serialize)]
struct LogRow<'a> {
    movement_id: u64,
    status: LogStatus,
    fail_reason: &'a str,
    created_at: String,
}

/// Writes ledger state as CSV. Decimals are normalized (`300`, not `300.00`).
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts<'a>(
        &mut self,
        accounts: impl IntoIterator<Item = &'a Account>,
    ) -> Result<()> {
        for account in accounts {
            self.writer.serialize(AccountRow {
                id: account.id.as_str(),
                name: &account.name,
                balance: account.balance.to_string(),
                credit_limit: account.credit_limit.to_string(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_movements<'a>(
        &mut self,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Result<()> {
        for movement in movements {
            self.writer.serialize(MovementRow {
                id: movement.id,
                account_id: movement.account_id.as_str(),
                r#type: movement.r#type,
                amount: movement.amount.value().normalize().to_string(),
                status: movement.status,
                description: movement.description.as_deref().unwrap_or_default(),
                created_at: movement.created_at.to_rfc3339(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_logs<'a>(&mut self, logs: impl IntoIterator<Item = &'a LedgerLog>) -> Result<()> {
        for log in logs {
            self.writer.serialize(LogRow {
                movement_id: log.movement_id,
                status: log.status,
                fail_reason: log.fail_reason.as_deref().unwrap_or_default(),
                created_at: log.created_at.to_rfc3339(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
