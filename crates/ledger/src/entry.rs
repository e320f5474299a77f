use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditscribe_core::{AccountId, DomainError, EntryId, JobId};

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

impl core::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Direction::Debit),
            "credit" => Ok(Direction::Credit),
            other => Err(DomainError::validation(format!("unknown ledger direction: {other}"))),
        }
    }
}

/// One immutable balance change.
///
/// `amount` is the requested amount (always positive). For debits that exceed
/// the pre-op balance, `balance_after` is floored at zero, so the effective
/// change is `balance_before - balance_after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub job_id: Option<JobId>,
    pub direction: Direction,
    /// Credit-minutes.
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed balance delta actually applied by this entry.
    pub fn applied_delta(&self) -> i64 {
        self.balance_after - self.balance_before
    }

    /// Debit that was partly absorbed by the zero floor.
    pub fn was_floored(&self) -> bool {
        self.direction == Direction::Debit && self.balance_before < self.amount
    }
}
