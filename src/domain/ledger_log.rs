use super::movement::{MovementId, MovementStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const INSUFFICIENT_LIMIT: &str = "insufficient limit";
pub const INTERNAL_ERROR: &str = "internal error";

/// Audit-side status. Mirrors the movement outcome, except that a committed
/// movement is recorded as `PROCESSED`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Processed,
    Blocked,
    Failed,
}

impl From<MovementStatus> for LogStatus {
    fn from(status: MovementStatus) -> Self {
        match status {
            MovementStatus::Approved => LogStatus::Processed,
            MovementStatus::Blocked => LogStatus::Blocked,
            MovementStatus::Failed => LogStatus::Failed,
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogStatus::Processed => "PROCESSED",
            LogStatus::Blocked => "BLOCKED",
            LogStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Queue payload describing a movement's result.
///
/// JSON shape: `{"movement_id": 1, "status": "BLOCKED", "fail_reason": "..."}`;
/// `fail_reason` is omitted when absent.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct OutcomeEvent {
    pub movement_id: MovementId,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

impl OutcomeEvent {
    pub fn processed(movement_id: MovementId) -> Self {
        Self {
            movement_id,
            status: LogStatus::Processed,
            fail_reason: None,
        }
    }

    pub fn blocked(movement_id: MovementId) -> Self {
        Self {
            movement_id,
            status: LogStatus::Blocked,
            fail_reason: Some(INSUFFICIENT_LIMIT.to_string()),
        }
    }

    pub fn failed(movement_id: MovementId) -> Self {
        Self {
            movement_id,
            status: LogStatus::Failed,
            fail_reason: Some(INTERNAL_ERROR.to_string()),
        }
    }
}

/// One audit row per movement. `movement_id` is unique.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerLog {
    pub movement_id: MovementId,
    pub status: LogStatus,
    pub fail_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<OutcomeEvent> for LedgerLog {
    fn from(event: OutcomeEvent) -> Self {
        Self {
            movement_id: event.movement_id,
            status: event.status,
            fail_reason: event.fail_reason,
            created_at: Utc::now(),
        }
    }
}
