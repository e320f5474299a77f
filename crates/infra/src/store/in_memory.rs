use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use creditscribe_core::{AccountId, Entity, JobId, PaymentId};
use creditscribe_ledger::{Account, Direction, LedgerCommand, LedgerEntry};
use creditscribe_payments::{Payment, PaymentResolution, PaymentStatus};
use creditscribe_transcription::TranscriptionJob;

use super::{
    JobStore, LedgerStore, PageRequest, PaymentStore, ResolvedPayment, SIGNUP_CREDITS_DESCRIPTION,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    /// Append order is creation order.
    entries: Vec<LedgerEntry>,
    jobs: HashMap<JobId, TranscriptionJob>,
    payments: HashMap<PaymentId, Payment>,
}

impl State {
    fn post(&mut self, account: AccountId, command: &LedgerCommand) -> Result<LedgerEntry, StoreError> {
        let acc = self
            .accounts
            .get_mut(&account)
            .ok_or_else(|| StoreError::not_found(format!("account {account}")))?;
        let entry = acc.post(command)?;
        self.entries.push(entry.clone());
        Ok(entry)
    }
}

fn insert_new<E: Entity>(map: &mut HashMap<E::Id, E>, entity: E) -> Result<(), StoreError> {
    if map.contains_key(entity.id()) {
        return Err(StoreError::AlreadyExists(entity.label()));
    }
    map.insert(entity.id().clone(), entity);
    Ok(())
}

fn replace<E: Entity + Clone>(map: &mut HashMap<E::Id, E>, entity: &E) -> Result<(), StoreError> {
    let slot = map
        .get_mut(entity.id())
        .ok_or_else(|| StoreError::not_found(entity.label()))?;
    *slot = entity.clone();
    Ok(())
}

/// In-memory implementation of every store trait.
///
/// One mutex guards all state, so each trait call is atomic with respect to
/// every other. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn open_account(&self, account: Account, opening_credits: i64) -> Result<Account, StoreError> {
        let mut state = self.lock()?;
        let id = account.id_typed();
        if state.accounts.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("account {id}")));
        }
        if state.accounts.values().any(|a| a.email() == account.email()) {
            return Err(StoreError::AlreadyExists(format!("account {}", account.email())));
        }
        state.accounts.insert(id, account);
        if opening_credits > 0 {
            state.post(id, &LedgerCommand::credit(opening_credits, None, SIGNUP_CREDITS_DESCRIPTION))?;
        }
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("account {id}")))
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.lock()?
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("account {id}")))
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.email() == email)
            .cloned())
    }

    async fn append(&self, account: AccountId, command: LedgerCommand) -> Result<LedgerEntry, StoreError> {
        self.lock()?.post(account, &command)
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|e| e.account_id == account)
            .cloned()
            .collect())
    }

    async fn has_debit_for_job(&self, job: JobId) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .any(|e| e.job_id == Some(job) && e.direction == Direction::Debit))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, job: TranscriptionJob) -> Result<(), StoreError> {
        insert_new(&mut self.lock()?.jobs, job)
    }

    async fn get_job(&self, id: JobId) -> Result<TranscriptionJob, StoreError> {
        self.lock()?
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("transcription {id}")))
    }

    async fn update_job(&self, job: &TranscriptionJob) -> Result<(), StoreError> {
        replace(&mut self.lock()?.jobs, job)
    }

    async fn claim_job(&self, id: JobId, account: AccountId) -> Result<TranscriptionJob, StoreError> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&id)
            .filter(|j| j.account_id == account)
            .ok_or_else(|| StoreError::not_found(format!("transcription {id}")))?;
        job.mark_processing()?;
        Ok(job.clone())
    }

    async fn list_jobs(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<(Vec<TranscriptionJob>, usize), StoreError> {
        let state = self.lock()?;
        let mut jobs: Vec<_> = state.jobs.values().filter(|j| j.account_id == account).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = jobs.len();
        let items = jobs
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn all_jobs(&self, account: AccountId) -> Result<Vec<TranscriptionJob>, StoreError> {
        let (items, _) = self
            .list_jobs(account, PageRequest { offset: 0, limit: usize::MAX })
            .await?;
        Ok(items)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: Payment) -> Result<(), StoreError> {
        insert_new(&mut self.lock()?.payments, payment)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Payment, StoreError> {
        self.lock()?
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("payment {id}")))
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        replace(&mut self.lock()?.payments, payment)
    }

    async fn list_payments(&self, account: AccountId) -> Result<Vec<Payment>, StoreError> {
        let state = self.lock()?;
        let mut payments: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.account_id == account)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(payments)
    }

    async fn resolve_payment(
        &self,
        id: PaymentId,
        resolution: PaymentResolution,
    ) -> Result<ResolvedPayment, StoreError> {
        let mut state = self.lock()?;
        let mut payment = state
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("payment {id}")))?;
        if payment.status.is_terminal() {
            return Err(StoreError::AlreadyResolved(id));
        }

        payment.resolve(resolution)?;
        let credit = if payment.status == PaymentStatus::Approved {
            let command = LedgerCommand::credit(payment.credits, None, payment.credit_description());
            Some(state.post(payment.account_id, &command)?)
        } else {
            None
        };
        state.payments.insert(id, payment.clone());

        Ok(ResolvedPayment { payment, credit })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use creditscribe_core::DomainError;
    use creditscribe_ledger::Plan;
    use creditscribe_payments::find_package;
    use creditscribe_transcription::{JobStatus, NewTranscription};

    async fn store_with_account(opening: i64) -> (InMemoryStore, AccountId) {
        let store = InMemoryStore::new();
        let account = Account::open(AccountId::new(), "user@example.com", Plan::Free, Utc::now());
        let id = account.id_typed();
        store.open_account(account, opening).await.unwrap();
        (store, id)
    }

    fn upload(name: &str) -> NewTranscription {
        NewTranscription {
            file_name: name.to_string(),
            file_url: format!("https://files.example.com/{name}"),
            file_size: 10,
            language: Some("en".to_string()),
        }
    }

    #[tokio::test]
    async fn opening_grant_is_the_first_entry() {
        let (store, id) = store_with_account(300).await;

        let account = store.get_account(id).await.unwrap();
        let entries = store.entries(id).await.unwrap();
        assert_eq!(account.balance(), 300);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description, SIGNUP_CREDITS_DESCRIPTION);
        assert_eq!(entries[0].balance_before, 0);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (store, _) = store_with_account(0).await;
        let twin = Account::open(AccountId::new(), "user@example.com", Plan::Free, Utc::now());
        assert!(matches!(
            store.open_account(twin, 0).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn claim_is_compare_and_set() {
        let (store, account) = store_with_account(0).await;
        let job = TranscriptionJob::register(account, upload("a.mp3")).unwrap();
        let id = job.id;
        store.insert_job(job).await.unwrap();

        let claimed = store.claim_job(id, account).await.unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);

        let err = store.claim_job(id, account).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));

        let err = store.claim_job(id, AccountId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_jobs_is_newest_first_and_paged() {
        let (store, account) = store_with_account(0).await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut job = TranscriptionJob::register(account, upload(&format!("{i}.mp3"))).unwrap();
            job.created_at += chrono::Duration::seconds(i);
            ids.push(job.id);
            store.insert_job(job).await.unwrap();
        }

        let (page, total) = store
            .list_jobs(account, PageRequest { offset: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn resolving_twice_credits_once() {
        let (store, account) = store_with_account(0).await;
        let payment = Payment::pending(account, find_package("basic").unwrap());
        let id = payment.id;
        store.insert_payment(payment).await.unwrap();

        let approve = PaymentResolution {
            status: PaymentStatus::Approved,
            provider_payment_id: Some("mp-1".to_string()),
            preference_id: None,
            payment_method: None,
            details: None,
        };
        let first = store.resolve_payment(id, approve.clone()).await.unwrap();
        assert_eq!(first.credit.map(|e| e.amount), Some(120));

        let second = store.resolve_payment(id, approve).await;
        assert_eq!(second, Err(StoreError::AlreadyResolved(id)));
        assert_eq!(store.get_account(account).await.unwrap().balance(), 120);
        assert_eq!(store.entries(account).await.unwrap().len(), 1);
    }
}
