use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditscribe_core::{AccountId, Aggregate, AggregateRoot, DomainError, DomainResult, EntryId, JobId};

use crate::entry::{Direction, LedgerEntry};

/// Plan tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }
}

impl core::str::FromStr for Plan {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(DomainError::validation(format!("unknown plan: {other}"))),
        }
    }
}

/// Aggregate root: a billing account and its credit balance.
///
/// The balance is only ever changed by applying a [`LedgerEntry`], so it always
/// equals the running sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    email: String,
    plan: Plan,
    balance: i64,
    version: u64,
    created_at: DateTime<Utc>,
}

impl Account {
    /// A freshly opened account with an empty ledger.
    pub fn open(id: AccountId, email: impl Into<String>, plan: Plan, at: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            plan,
            balance: 0,
            version: 0,
            created_at: at,
        }
    }

    /// Rebuild from persisted state (balance + number of applied entries).
    pub fn restore(
        id: AccountId,
        email: String,
        plan: Plan,
        balance: i64,
        version: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            plan,
            balance,
            version,
            created_at,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_sufficient_balance(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Decide + apply one ledger command, returning the appended entry.
    pub fn post(&mut self, command: &LedgerCommand) -> DomainResult<LedgerEntry> {
        let mut events = self.handle(command)?;
        let entry = events
            .pop()
            .ok_or_else(|| DomainError::invariant("ledger command produced no entry"))?;
        self.apply(&entry);
        Ok(entry)
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Payload shared by credit and debit commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub entry_id: EntryId,
    pub job_id: Option<JobId>,
    pub amount: i64,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    Credit(PostEntry),
    Debit(PostEntry),
}

impl LedgerCommand {
    pub fn credit(amount: i64, job_id: Option<JobId>, description: impl Into<String>) -> Self {
        Self::Credit(PostEntry {
            entry_id: EntryId::new(),
            job_id,
            amount,
            description: description.into(),
            occurred_at: Utc::now(),
        })
    }

    pub fn debit(amount: i64, job_id: Option<JobId>, description: impl Into<String>) -> Self {
        Self::Debit(PostEntry {
            entry_id: EntryId::new(),
            job_id,
            amount,
            description: description.into(),
            occurred_at: Utc::now(),
        })
    }

    pub fn direction(&self) -> Direction {
        match self {
            LedgerCommand::Credit(_) => Direction::Credit,
            LedgerCommand::Debit(_) => Direction::Debit,
        }
    }

    pub fn payload(&self) -> &PostEntry {
        match self {
            LedgerCommand::Credit(p) | LedgerCommand::Debit(p) => p,
        }
    }

    pub fn amount(&self) -> i64 {
        self.payload().amount
    }
}

impl Aggregate for Account {
    type Command = LedgerCommand;
    type Event = LedgerEntry;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.balance = event.balance_after;
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let post = command.payload();
        if post.amount <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }

        let before = self.balance;
        let after = match command {
            LedgerCommand::Credit(_) => before
                .checked_add(post.amount)
                .ok_or_else(|| DomainError::invariant("balance overflow"))?,
            // Usage has already been consumed provider-side; the excess is absorbed.
            LedgerCommand::Debit(_) => before.saturating_sub(post.amount).max(0),
        };

        Ok(vec![LedgerEntry {
            id: post.entry_id,
            account_id: self.id,
            job_id: post.job_id,
            direction: command.direction(),
            amount: post.amount,
            balance_before: before,
            balance_after: after,
            description: post.description.clone(),
            created_at: post.occurred_at,
        }])
    }
}

/// Re-derive the balance from an account's entries (oldest first).
///
/// Fails on the first entry whose `balance_before` does not continue the chain
/// or whose `balance_after` does not follow from its direction and amount.
pub fn audit_history(entries: &[LedgerEntry]) -> DomainResult<i64> {
    let mut running: i64 = 0;
    for entry in entries {
        if entry.balance_before != running {
            return Err(DomainError::invariant(format!(
                "entry {} starts at {} but running balance is {}",
                entry.id, entry.balance_before, running
            )));
        }
        let expected_after = match entry.direction {
            Direction::Credit => running + entry.amount,
            Direction::Debit => (running - entry.amount).max(0),
        };
        if entry.balance_after != expected_after {
            return Err(DomainError::invariant(format!(
                "entry {} ends at {} but should end at {}",
                entry.id, entry.balance_after, expected_after
            )));
        }
        running = expected_after;
    }
    Ok(running)
}
