//! Job runner scenarios over in-memory stores and the scripted provider.
//!
//! Tests run on a paused clock: poll intervals and the overall budget elapse
//! instantly once every task is idle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use creditscribe_core::{AccountId, JobId};
use creditscribe_infra::providers::{ProviderError, ScriptedTranscriptionProvider};
use creditscribe_infra::runner::{CANCELLED, INSUFFICIENT_CREDITS};
use creditscribe_infra::store::{InMemoryStore, JobStore, LedgerStore, PageRequest};
use creditscribe_infra::{JobRunner, Ledger, RunnerConfig, ServiceError, StoreError};
use creditscribe_ledger::{Account, Direction, LedgerCommand, LedgerEntry, Plan};
use creditscribe_transcription::{
    CompletedTranscript, ExportFormat, JobStatus, NewTranscription, PollResult, TranscriptionJob,
};

struct Harness {
    store: Arc<InMemoryStore>,
    ledger: Ledger,
    runner: JobRunner,
    provider: Arc<ScriptedTranscriptionProvider>,
    account: AccountId,
}

async fn harness(balance: i64, provider: ScriptedTranscriptionProvider) -> Harness {
    harness_with(balance, provider, RunnerConfig::default()).await
}

async fn harness_with(balance: i64, provider: ScriptedTranscriptionProvider, config: RunnerConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Ledger::new(store.clone());
    let provider = Arc::new(provider);
    let runner = JobRunner::new(store.clone(), ledger.clone(), provider.clone(), config);
    let account = ledger
        .open_account("listener@example.com", Plan::Free, balance)
        .await
        .unwrap()
        .id_typed();
    Harness {
        store,
        ledger,
        runner,
        provider,
        account,
    }
}

fn upload(name: &str) -> NewTranscription {
    NewTranscription {
        file_name: name.to_string(),
        file_url: format!("https://files.example.com/{name}"),
        file_size: 2_048,
        language: None,
    }
}

async fn run_to_end(h: &Harness, name: &str) -> TranscriptionJob {
    let job = h.runner.register(h.account, upload(name)).await.unwrap();
    let (started, handle) = h.runner.start(h.account, job.id).await.unwrap();
    assert_eq!(started.status, JobStatus::Processing);
    handle.await.unwrap();
    h.runner.get(h.account, job.id).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn completed_job_is_billed_whole_minutes() {
    let provider = ScriptedTranscriptionProvider::completing_after(2, "hola mundo", 125_000);
    provider.set_export(ExportFormat::Srt, "1\n00:00:00,000 --> 00:00:02,000\nhola mundo\n");
    let h = harness(300, provider).await;

    let job = run_to_end(&h, "talk.mp3").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.credits_charged, Some(2));
    assert_eq!(job.duration_secs, Some(125));
    assert_eq!(job.transcript_text.as_deref(), Some("hola mundo"));
    assert!(job.srt_content.is_some());
    assert!(job.vtt_content.is_none());
    assert!(job.completed_at.is_some());
    assert_eq!(job.provider_job_id.as_deref(), Some("scripted-1"));

    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 298);
    let entries = h.ledger.history(h.account).await.unwrap();
    assert_eq!(entries.len(), 2);
    let debit = &entries[1];
    assert_eq!(debit.direction, Direction::Debit);
    assert_eq!(debit.amount, 2);
    assert_eq!(debit.job_id, Some(job.id));
    assert_eq!(debit.description, "Transcription: talk.mp3");

    assert_eq!(
        h.provider.submissions(),
        vec![("https://files.example.com/talk.mp3".to_string(), "es".to_string())]
    );
    assert_eq!(h.provider.poll_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn insufficient_credits_fail_the_job_without_debit() {
    let h = harness(10, ScriptedTranscriptionProvider::completing_after(0, "long", 1_800_000)).await;

    let job = run_to_end(&h, "lecture.mp3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(INSUFFICIENT_CREDITS));
    assert!(job.transcript_text.is_none());
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 10);
    assert_eq!(h.ledger.history(h.account).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sub_minute_audio_bills_one_minute() {
    let h = harness(5, ScriptedTranscriptionProvider::completing_after(1, "hi", 30_000)).await;

    let job = run_to_end(&h, "short.mp3").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.credits_charged, Some(1));
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 4);
}

#[tokio::test(start_paused = true)]
async fn exact_balance_is_sufficient() {
    let h = harness(2, ScriptedTranscriptionProvider::completing_after(0, "ok", 120_000)).await;

    let job = run_to_end(&h, "exact.mp3").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn starting_a_non_pending_job_is_a_conflict() {
    let h = harness(300, ScriptedTranscriptionProvider::completing_after(0, "x", 60_000)).await;
    let job = run_to_end(&h, "once.mp3").await;
    let polls = h.provider.poll_count();

    let err = h.runner.start(h.account, job.id).await.unwrap_err();

    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(h.provider.submissions().len(), 1);
    assert_eq!(h.provider.poll_count(), polls);
    assert_eq!(h.ledger.history(h.account).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_balance_run_ends_failed_without_debit() {
    let h = harness(0, ScriptedTranscriptionProvider::completing_after(0, "x", 60_000)).await;

    let job = run_to_end(&h, "broke.mp3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(INSUFFICIENT_CREDITS));
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 0);
    assert!(h.ledger.history(h.account).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restarting_on_an_empty_balance_reports_state_not_credits() {
    let h = harness(1, ScriptedTranscriptionProvider::completing_after(0, "x", 60_000)).await;
    let job = run_to_end(&h, "last.mp3").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 0);

    assert!(matches!(
        h.runner.start(h.account, job.id).await,
        Err(ServiceError::Conflict(_))
    ));
    assert!(matches!(
        h.runner.start(h.account, JobId::new()).await,
        Err(ServiceError::NotFound(_))
    ));
    assert_eq!(h.provider.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn other_accounts_cannot_start_or_read_a_job() {
    let h = harness(300, ScriptedTranscriptionProvider::new()).await;
    let job = h.runner.register(h.account, upload("mine.mp3")).await.unwrap();
    let stranger = AccountId::new();

    assert!(matches!(
        h.runner.start(stranger, job.id).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        h.runner.get(stranger, job.id).await,
        Err(ServiceError::NotFound(_))
    ));
    assert_eq!(h.store.get_job(job.id).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn submission_failure_is_recorded() {
    let provider = ScriptedTranscriptionProvider::new();
    provider.fail_submissions(ProviderError::Status {
        status: 401,
        body: "invalid api key".to_string(),
    });
    let h = harness(300, provider).await;

    let job = run_to_end(&h, "nokey.mp3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.provider_job_id.is_none());
    assert!(job.error_message.unwrap().starts_with("submission failed"));
    assert_eq!(h.provider.poll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn provider_error_fails_the_job() {
    let provider = ScriptedTranscriptionProvider::new();
    provider.push_poll(Ok(PollResult::in_progress(creditscribe_transcription::ProviderStatus::Queued)));
    provider.settle_with(PollResult::failed("audio file is corrupt"));
    let h = harness(300, provider).await;

    let job = run_to_end(&h, "broken.mp3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("transcription failed: audio file is corrupt"));
    assert_eq!(job.provider_job_id.as_deref(), Some("scripted-1"));
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 300);
}

#[tokio::test(start_paused = true)]
async fn poll_error_fails_the_job() {
    let provider = ScriptedTranscriptionProvider::new();
    provider.push_poll(Err(ProviderError::Http("connection reset".to_string())));
    let h = harness(300, provider).await;

    let job = run_to_end(&h, "flaky.mp3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("polling failed"));
}

#[tokio::test(start_paused = true)]
async fn overall_budget_times_the_job_out() {
    let config = RunnerConfig::default()
        .with_poll_interval(Duration::from_secs(3))
        .with_max_wait(Duration::from_secs(60));
    let h = harness_with(300, ScriptedTranscriptionProvider::new(), config).await;

    let job = run_to_end(&h, "forever.mp3").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("transcription timed out after 60s"));
    // One poll every 3s; the deadline is checked first when both are ready.
    assert!((19..=20).contains(&h.provider.poll_count()));
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 300);
}

#[tokio::test(start_paused = true)]
async fn failed_export_leaves_the_field_empty() {
    let config = RunnerConfig::default().with_export_formats(vec![ExportFormat::Srt, ExportFormat::Vtt]);
    let provider = ScriptedTranscriptionProvider::completing_after(0, "texto", 90_000);
    provider.set_export(ExportFormat::Vtt, "WEBVTT\n");
    let h = harness_with(300, provider, config).await;

    let job = run_to_end(&h, "subs.mp3").await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.srt_content.is_none());
    assert_eq!(job.vtt_content.as_deref(), Some("WEBVTT\n"));
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_live_run() {
    let h = harness(300, ScriptedTranscriptionProvider::new()).await;
    let job = h.runner.register(h.account, upload("stop.mp3")).await.unwrap();
    let (_, handle) = h.runner.start(h.account, job.id).await.unwrap();
    assert!(h.runner.is_running(job.id));

    h.runner.cancel(h.account, job.id).await.unwrap();
    handle.await.unwrap();

    let job = h.runner.get(h.account, job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED));
    assert!(!h.runner.is_running(job.id));
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 300);
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_poll() {
    let h = harness(300, ScriptedTranscriptionProvider::new()).await;
    let job = h.runner.register(h.account, upload("long.mp3")).await.unwrap();
    let (_, handle) = h.runner.start(h.account, job.id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.provider.poll_count() >= 3);
    h.runner.cancel(h.account, job.id).await.unwrap();
    handle.await.unwrap();

    let job = h.runner.get(h.account, job.id).await.unwrap();
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED));
    assert_eq!(job.provider_job_id.as_deref(), Some("scripted-1"));
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_orphaned_processing_job() {
    let h = harness(300, ScriptedTranscriptionProvider::new()).await;
    let job = h.runner.register(h.account, upload("orphan.mp3")).await.unwrap();
    h.store.claim_job(job.id, h.account).await.unwrap();

    let cancelled = h.runner.cancel(h.account, job.id).await.unwrap();

    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(h.store.get_job(job.id).await.unwrap().error_message.as_deref(), Some(CANCELLED));
}

#[tokio::test(start_paused = true)]
async fn only_processing_jobs_can_be_cancelled() {
    let h = harness(300, ScriptedTranscriptionProvider::new()).await;
    let job = h.runner.register(h.account, upload("idle.mp3")).await.unwrap();

    assert!(matches!(
        h.runner.cancel(h.account, job.id).await,
        Err(ServiceError::Conflict(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn settle_unbilled_posts_missing_debits_once() {
    let h = harness(300, ScriptedTranscriptionProvider::new()).await;
    let mut job = TranscriptionJob::register(h.account, upload("crashed.mp3")).unwrap();
    job.mark_processing().unwrap();
    job.mark_completed(CompletedTranscript {
        text: "survived".to_string(),
        exports: Default::default(),
        duration_secs: 200,
        billed_minutes: 3,
    })
    .unwrap();
    let job_id = job.id;
    h.store.insert_job(job).await.unwrap();

    let posted = h.runner.settle_unbilled(h.account).await.unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].job_id, Some(job_id));
    assert_eq!(posted[0].amount, 3);
    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 297);

    assert!(h.runner.settle_unbilled(h.account).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn listing_editing_and_stats() {
    let h = harness(300, ScriptedTranscriptionProvider::completing_after(0, "draft", 61_000)).await;
    let done = run_to_end(&h, "first.mp3").await;
    h.runner.register(h.account, upload("second.mp3")).await.unwrap();

    let page = h.runner.list(h.account, 1, 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].file_name, "second.mp3");

    let edited = h
        .runner
        .update_transcript(h.account, done.id, "final".to_string())
        .await
        .unwrap();
    assert_eq!(edited.transcript_text.as_deref(), Some("final"));

    let txt = h.runner.download(h.account, done.id, "txt").await.unwrap();
    assert_eq!(txt.content, "final");

    let stats = h.runner.stats(h.account).await.unwrap();
    assert_eq!(stats.total_transcriptions, 2);
    assert_eq!(stats.completed_count, 1);
    assert_eq!(stats.processing_count, 1);
    assert_eq!(stats.total_minutes_used, 1);
    assert_eq!(stats.credits_remaining, 299);
}

#[tokio::test(start_paused = true)]
async fn concurrent_jobs_on_one_account_conserve_the_ledger() {
    let h = harness(100, ScriptedTranscriptionProvider::completing_after(1, "x", 600_000)).await;
    let mut handles = Vec::new();
    for i in 0..5 {
        let job = h.runner.register(h.account, upload(&format!("{i}.mp3"))).await.unwrap();
        handles.push(h.runner.start(h.account, job.id).await.unwrap().1);
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.ledger.balance(h.account).await.unwrap(), 50);
    assert_eq!(h.ledger.audit(h.account).await.unwrap(), 50);
}

/// In-memory store with injectable failures on account reads and job writes.
struct FaultyStore {
    inner: InMemoryStore,
    account_reads_to_fail: AtomicUsize,
    job_writes: AtomicUsize,
    /// 1-based index of the job write that fails; 0 never fails.
    failing_job_write: AtomicUsize,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            account_reads_to_fail: AtomicUsize::new(0),
            job_writes: AtomicUsize::new(0),
            failing_job_write: AtomicUsize::new(0),
        }
    }

    fn trip(counter: &AtomicUsize) -> Result<(), StoreError> {
        if counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Storage("connection lost".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn open_account(&self, account: Account, opening_credits: i64) -> Result<Account, StoreError> {
        self.inner.open_account(account, opening_credits).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        Self::trip(&self.account_reads_to_fail)?;
        self.inner.get_account(id).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.inner.find_account_by_email(email).await
    }

    async fn append(&self, account: AccountId, command: LedgerCommand) -> Result<LedgerEntry, StoreError> {
        self.inner.append(account, command).await
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.entries(account).await
    }

    async fn has_debit_for_job(&self, job: JobId) -> Result<bool, StoreError> {
        self.inner.has_debit_for_job(job).await
    }
}

#[async_trait]
impl JobStore for FaultyStore {
    async fn insert_job(&self, job: TranscriptionJob) -> Result<(), StoreError> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: JobId) -> Result<TranscriptionJob, StoreError> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, job: &TranscriptionJob) -> Result<(), StoreError> {
        let nth = self.job_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if nth == self.failing_job_write.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("connection lost".to_string()));
        }
        self.inner.update_job(job).await
    }

    async fn claim_job(&self, id: JobId, account: AccountId) -> Result<TranscriptionJob, StoreError> {
        self.inner.claim_job(id, account).await
    }

    async fn list_jobs(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<(Vec<TranscriptionJob>, usize), StoreError> {
        self.inner.list_jobs(account, page).await
    }

    async fn all_jobs(&self, account: AccountId) -> Result<Vec<TranscriptionJob>, StoreError> {
        self.inner.all_jobs(account).await
    }
}

async fn run_on_faulty_store(
    store: Arc<FaultyStore>,
    provider: Arc<ScriptedTranscriptionProvider>,
    arm: impl FnOnce(&FaultyStore),
) -> (Ledger, AccountId, TranscriptionJob) {
    let ledger = Ledger::new(store.clone());
    let runner = JobRunner::new(store.clone(), ledger.clone(), provider, RunnerConfig::default());
    let account = ledger
        .open_account("faulty@example.com", Plan::Free, 300)
        .await
        .unwrap()
        .id_typed();
    let job = runner.register(account, upload("glitch.mp3")).await.unwrap();

    arm(&store);
    let (_, handle) = runner.start(account, job.id).await.unwrap();
    handle.await.unwrap();

    assert!(!runner.is_running(job.id));
    let job = runner.get(account, job.id).await.unwrap();
    (ledger, account, job)
}

#[tokio::test(start_paused = true)]
async fn store_error_during_balance_check_fails_the_job() {
    let store = Arc::new(FaultyStore::new());
    let provider = Arc::new(ScriptedTranscriptionProvider::completing_after(1, "hola", 90_000));

    let (ledger, account, job) = run_on_faulty_store(store, provider, |s| {
        s.account_reads_to_fail.store(1, Ordering::SeqCst);
    })
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    let reason = job.error_message.unwrap();
    assert!(reason.starts_with("balance check failed"), "{reason}");
    assert!(reason.contains("connection lost"), "{reason}");
    assert!(job.transcript_text.is_none());
    assert_eq!(ledger.balance(account).await.unwrap(), 300);
    assert_eq!(ledger.history(account).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn store_error_recording_submission_fails_the_job() {
    let store = Arc::new(FaultyStore::new());
    let provider = Arc::new(ScriptedTranscriptionProvider::completing_after(0, "hola", 90_000));

    let (ledger, account, job) = run_on_faulty_store(store, provider.clone(), |s| {
        s.failing_job_write.store(1, Ordering::SeqCst);
    })
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("recording submission failed"));
    assert_eq!(provider.poll_count(), 0);
    assert_eq!(ledger.balance(account).await.unwrap(), 300);
}

#[tokio::test(start_paused = true)]
async fn store_error_saving_transcript_fails_the_job_without_debit() {
    let store = Arc::new(FaultyStore::new());
    let provider = Arc::new(ScriptedTranscriptionProvider::completing_after(0, "hola", 90_000));

    // Write 1 records the submission, write 2 is the completion.
    let (ledger, account, job) = run_on_faulty_store(store, provider, |s| {
        s.failing_job_write.store(2, Ordering::SeqCst);
    })
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("saving transcript failed"));
    assert!(job.transcript_text.is_none());
    assert!(job.credits_charged.is_none());
    assert_eq!(ledger.balance(account).await.unwrap(), 300);
    assert!(!ledger.has_debit_for_job(job.id).await.unwrap());
}
