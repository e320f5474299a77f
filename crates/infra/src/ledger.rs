//! Ledger service: the only path through which balances change.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use creditscribe_core::{AccountId, JobId};
use creditscribe_ledger::{audit_history, Account, LedgerCommand, LedgerEntry, Plan};

use crate::error::ServiceError;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn open_account(
        &self,
        email: &str,
        plan: Plan,
        opening_credits: i64,
    ) -> Result<Account, ServiceError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(ServiceError::Validation("email must not be empty".to_string()));
        }
        let account = Account::open(AccountId::new(), email, plan, Utc::now());
        let account = self.store.open_account(account, opening_credits).await?;
        info!(account_id = %account.id_typed(), opening_credits, "account opened");
        Ok(account)
    }

    pub async fn account(&self, id: AccountId) -> Result<Account, ServiceError> {
        Ok(self.store.get_account(id).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, ServiceError> {
        Ok(self.store.find_account_by_email(&email.trim().to_lowercase()).await?)
    }

    pub async fn balance(&self, id: AccountId) -> Result<i64, ServiceError> {
        Ok(self.account(id).await?.balance())
    }

    /// Unconditional credit. `amount` must be positive.
    pub async fn credit(
        &self,
        account: AccountId,
        amount: i64,
        job: Option<JobId>,
        description: impl Into<String>,
    ) -> Result<LedgerEntry, ServiceError> {
        let entry = self
            .store
            .append(account, LedgerCommand::credit(amount, job, description))
            .await?;
        info!(
            account_id = %account,
            amount,
            balance_after = entry.balance_after,
            "credit posted"
        );
        Ok(entry)
    }

    /// Debit floored at zero. Sufficiency is the caller's check.
    pub async fn debit(
        &self,
        account: AccountId,
        amount: i64,
        job: Option<JobId>,
        description: impl Into<String>,
    ) -> Result<LedgerEntry, ServiceError> {
        let entry = self
            .store
            .append(account, LedgerCommand::debit(amount, job, description))
            .await?;
        if entry.was_floored() {
            info!(account_id = %account, amount, balance_before = entry.balance_before, "debit floored at zero");
        }
        info!(
            account_id = %account,
            amount,
            balance_after = entry.balance_after,
            "debit posted"
        );
        Ok(entry)
    }

    pub async fn has_sufficient_balance(&self, account: AccountId, amount: i64) -> Result<bool, ServiceError> {
        Ok(self.account(account).await?.has_sufficient_balance(amount))
    }

    /// Entries oldest first.
    pub async fn history(&self, account: AccountId) -> Result<Vec<LedgerEntry>, ServiceError> {
        Ok(self.store.entries(account).await?)
    }

    pub async fn has_debit_for_job(&self, job: JobId) -> Result<bool, ServiceError> {
        Ok(self.store.has_debit_for_job(job).await?)
    }

    /// Re-derive the balance from history and compare it with the stored one.
    pub async fn audit(&self, account: AccountId) -> Result<i64, ServiceError> {
        let entries = self.history(account).await?;
        let stored = self.balance(account).await?;
        let derived = audit_history(&entries).map_err(|err| {
            error!(account_id = %account, anomaly = "ledger_chain_broken", error = %err, "ledger audit failed");
            ServiceError::from(err)
        })?;
        if derived != stored {
            error!(account_id = %account, anomaly = "balance_mismatch", derived, stored, "ledger audit failed");
            return Err(ServiceError::Persistence(format!(
                "balance {stored} does not match ledger total {derived}"
            )));
        }
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    async fn ledger_with(opening: i64) -> (Ledger, AccountId) {
        let ledger = Ledger::new(Arc::new(InMemoryStore::new()));
        let account = ledger.open_account("User@Example.com ", Plan::Free, opening).await.unwrap();
        (ledger, account.id_typed())
    }

    #[tokio::test]
    async fn open_account_normalizes_email() {
        let (ledger, id) = ledger_with(300).await;
        let found = ledger.find_by_email("user@example.com").await.unwrap().unwrap();
        assert_eq!(found.id_typed(), id);
        assert_eq!(found.balance(), 300);
    }

    #[tokio::test]
    async fn credit_then_overdrawing_debit() {
        let (ledger, id) = ledger_with(10).await;
        let job = JobId::new();

        ledger.credit(id, 5, None, "top up").await.unwrap();
        assert!(ledger.has_sufficient_balance(id, 15).await.unwrap());
        assert!(!ledger.has_sufficient_balance(id, 16).await.unwrap());

        let entry = ledger.debit(id, 40, Some(job), "Transcription: long.mp3").await.unwrap();
        assert_eq!(entry.balance_after, 0);
        assert_eq!(ledger.balance(id).await.unwrap(), 0);
        assert!(ledger.has_debit_for_job(job).await.unwrap());
        assert_eq!(ledger.audit(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_positive_amounts_are_validation_errors() {
        let (ledger, id) = ledger_with(10).await;
        assert!(matches!(
            ledger.debit(id, 0, None, "nothing").await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(ledger.history(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let (ledger, _) = ledger_with(0).await;
        assert!(matches!(
            ledger.credit(AccountId::new(), 1, None, "x").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_debits_and_credits_conserve_balance() {
        let (ledger, id) = ledger_with(1_000).await;
        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger.debit(id, 7, None, "usage").await
                } else {
                    ledger.credit(id, 3, None, "refill").await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 25 debits of 7 and 25 credits of 3 never reach the zero floor from 1000.
        assert_eq!(ledger.balance(id).await.unwrap(), 1_000 - 25 * 7 + 25 * 3);
        assert_eq!(ledger.audit(id).await.unwrap(), 900);
    }
}
