//! Persistence contracts.
//!
//! Each trait is implemented by [`InMemoryStore`] (tests/dev) and [`PgStore`].
//! Balance mutations and payment resolution are atomic per call: the account
//! row (or payment row) is read, decided on and written back under one lock or
//! one transaction.

use async_trait::async_trait;

use creditscribe_core::{AccountId, JobId, PaymentId};
use creditscribe_ledger::{Account, LedgerCommand, LedgerEntry};
use creditscribe_payments::{Payment, PaymentResolution};
use creditscribe_transcription::TranscriptionJob;

use crate::error::StoreError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

pub const SIGNUP_CREDITS_DESCRIPTION: &str = "Signup credits";

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a new account, posting `opening_credits` (if positive) as its
    /// first ledger entry.
    async fn open_account(&self, account: Account, opening_credits: i64) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Decide and apply one ledger command against the current balance.
    async fn append(&self, account: AccountId, command: LedgerCommand) -> Result<LedgerEntry, StoreError>;

    /// Entries of one account, oldest first.
    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn has_debit_for_job(&self, job: JobId) -> Result<bool, StoreError>;
}

/// One page of an account's jobs, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: TranscriptionJob) -> Result<(), StoreError>;

    async fn get_job(&self, id: JobId) -> Result<TranscriptionJob, StoreError>;

    async fn update_job(&self, job: &TranscriptionJob) -> Result<(), StoreError>;

    /// Compare-and-set `pending → processing` for a job owned by `account`.
    async fn claim_job(&self, id: JobId, account: AccountId) -> Result<TranscriptionJob, StoreError>;

    /// Returns the page and the account's total job count.
    async fn list_jobs(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<(Vec<TranscriptionJob>, usize), StoreError>;

    async fn all_jobs(&self, account: AccountId) -> Result<Vec<TranscriptionJob>, StoreError>;
}

/// A payment resolution that went through.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPayment {
    pub payment: Payment,
    /// Present for approvals.
    pub credit: Option<LedgerEntry>,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, StoreError>;

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    /// Payments of one account, newest first.
    async fn list_payments(&self, account: AccountId) -> Result<Vec<Payment>, StoreError>;

    /// Resolve a still-pending payment and, for approvals, credit its account
    /// in the same atomic step. Fails with [`StoreError::AlreadyResolved`]
    /// when the payment has left `pending`.
    async fn resolve_payment(
        &self,
        id: PaymentId,
        resolution: PaymentResolution,
    ) -> Result<ResolvedPayment, StoreError>;
}
