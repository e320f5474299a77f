//! Job runner: drives a transcription job from submission to a terminal state.
//!
//! ## Flow
//!
//! 1. `start` flips the job `pending → processing` (compare-and-set in the
//!    store) and spawns a detached task; the caller returns immediately.
//! 2. The task submits to the provider and persists the provider job id.
//! 3. It polls on a fixed interval until the provider reports a terminal
//!    status, the overall budget elapses, or the job is cancelled.
//! 4. On success it bills whole minutes (minimum one), checks the balance,
//!    fetches exports best-effort, persists `completed`, and only then posts
//!    the debit.
//!
//! Every failure before the completion write, store errors included, ends the
//! job `failed` with a readable reason. A crash or debit error after that write
//! leaves a completed-but-unbilled job, which [`JobRunner::settle_unbilled`]
//! repairs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use creditscribe_core::{AccountId, JobId};
use creditscribe_ledger::LedgerEntry;
use creditscribe_transcription::{
    billing, billed_minutes, CompletedTranscript, Download, ExportFormat, JobStats, JobStatus,
    NewTranscription, PollResult, ProviderStatus, TranscriptionJob,
};

use crate::config::RunnerConfig;
use crate::error::ServiceError;
use crate::ledger::Ledger;
use crate::providers::TranscriptionProvider;
use crate::store::{JobStore, PageRequest};

pub const INSUFFICIENT_CREDITS: &str = "insufficient credits";
pub const CANCELLED: &str = "cancelled";

const MAX_PAGE_SIZE: usize = 100;

/// One page of jobs, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<TranscriptionJob>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    ledger: Ledger,
    provider: Arc<dyn TranscriptionProvider>,
    config: RunnerConfig,
    /// Cancellation handles of runs alive in this process.
    running: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Ledger,
        provider: Arc<dyn TranscriptionProvider>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            jobs,
            ledger,
            provider,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record an uploaded file as a `pending` job.
    pub async fn register(
        &self,
        account: AccountId,
        upload: NewTranscription,
    ) -> Result<TranscriptionJob, ServiceError> {
        let job = TranscriptionJob::register(account, upload)?;
        self.jobs.insert_job(job.clone()).await?;
        info!(job_id = %job.id, account_id = %account, file_name = %job.file_name, "transcription registered");
        Ok(job)
    }

    /// Start a pending job. Returns the `processing` job and the handle of
    /// the detached run.
    pub async fn start(
        &self,
        account: AccountId,
        job_id: JobId,
    ) -> Result<(TranscriptionJob, JoinHandle<()>), ServiceError> {
        // Tracked before the claim so a concurrent cancel never sees a
        // processing job without its token.
        let token = CancellationToken::new();
        if !self.track(job_id, token.clone()) {
            return Err(ServiceError::Conflict("transcription already processing".to_string()));
        }
        let job = match self.jobs.claim_job(job_id, account).await {
            Ok(job) => job,
            Err(err) => {
                self.untrack(job_id);
                return Err(err.into());
            }
        };

        let span = info_span!("transcription_job", job_id = %job_id, account_id = %account);
        let runner = self.clone();
        let run = job.clone();
        let handle = tokio::spawn(
            async move {
                runner.drive(run, token).await;
                runner.untrack(job_id);
            }
            .instrument(span),
        );

        info!(job_id = %job_id, account_id = %account, "transcription started");
        Ok((job, handle))
    }

    /// Cancel a `processing` job.
    ///
    /// With a live run, trips its token and returns the job as currently
    /// stored; the run records the failure. Without one (e.g. after a
    /// restart) the job is failed directly.
    pub async fn cancel(&self, account: AccountId, job_id: JobId) -> Result<TranscriptionJob, ServiceError> {
        self.get(account, job_id).await?;

        if let Some(token) = self.token(job_id) {
            token.cancel();
            info!(job_id = %job_id, "cancellation requested");
            return self.get(account, job_id).await;
        }

        // A run untracks only after its final write, so this read is current.
        let mut job = self.get(account, job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(ServiceError::Conflict(format!("transcription is {}", job.status)));
        }
        job.mark_failed(CANCELLED)?;
        self.jobs.update_job(&job).await?;
        warn!(job_id = %job_id, "processing job had no live run; failed directly");
        Ok(job)
    }

    pub async fn get(&self, account: AccountId, job_id: JobId) -> Result<TranscriptionJob, ServiceError> {
        let job = self.jobs.get_job(job_id).await?;
        job.ensure_owner(account)
            .map_err(|_| ServiceError::NotFound(format!("transcription {job_id}")))?;
        Ok(job)
    }

    /// `page` is 1-based; `per_page` is clamped to `1..=100`.
    pub async fn list(&self, account: AccountId, page: usize, per_page: usize) -> Result<JobPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let request = PageRequest {
            offset: (page - 1).saturating_mul(per_page),
            limit: per_page,
        };
        let (items, total) = self.jobs.list_jobs(account, request).await?;
        Ok(JobPage {
            items,
            total,
            page,
            per_page,
        })
    }

    pub async fn update_transcript(
        &self,
        account: AccountId,
        job_id: JobId,
        text: String,
    ) -> Result<TranscriptionJob, ServiceError> {
        let mut job = self.get(account, job_id).await?;
        job.edit_transcript(text)?;
        self.jobs.update_job(&job).await?;
        Ok(job)
    }

    pub async fn download(&self, account: AccountId, job_id: JobId, format: &str) -> Result<Download, ServiceError> {
        Ok(self.get(account, job_id).await?.download(format)?)
    }

    pub async fn stats(&self, account: AccountId) -> Result<JobStats, ServiceError> {
        let jobs = self.jobs.all_jobs(account).await?;
        let balance = self.ledger.balance(account).await?;
        Ok(JobStats::summarize(&jobs, balance))
    }

    /// Post the missing debit for completed jobs that were never billed.
    ///
    /// Jobs with a live run are skipped: they may be between the completion
    /// write and their own debit.
    pub async fn settle_unbilled(&self, account: AccountId) -> Result<Vec<LedgerEntry>, ServiceError> {
        let mut posted = Vec::new();
        for job in self.jobs.all_jobs(account).await? {
            if job.status != JobStatus::Completed || self.token(job.id).is_some() {
                continue;
            }
            let Some(minutes) = job.credits_charged else {
                continue;
            };
            if self.ledger.has_debit_for_job(job.id).await? {
                continue;
            }
            warn!(job_id = %job.id, account_id = %account, minutes, anomaly = "completed_unbilled", "settling unbilled job");
            posted.push(self.ledger.debit(account, minutes, Some(job.id), debit_description(&job)).await?);
        }
        Ok(posted)
    }

    /// Whether a run for `job_id` is alive in this process.
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.token(job_id).is_some()
    }

    /// False when a run is already tracked for `job_id`.
    fn track(&self, job_id: JobId, token: CancellationToken) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.contains_key(&job_id) {
            return false;
        }
        running.insert(job_id, token);
        true
    }

    fn untrack(&self, job_id: JobId) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&job_id);
        }
    }

    fn token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.running.lock().ok()?.get(&job_id).cloned()
    }

    async fn drive(&self, job: TranscriptionJob, cancel: CancellationToken) {
        let job_id = job.id;
        match self.run(job, &cancel).await {
            Ok(status) => info!(job_id = %job_id, status = %status, "transcription run finished"),
            Err(err) => error!(job_id = %job_id, error = %err, "transcription run aborted"),
        }
    }

    async fn run(&self, mut job: TranscriptionJob, cancel: &CancellationToken) -> Result<JobStatus, ServiceError> {
        if cancel.is_cancelled() {
            return self.fail(&mut job, CANCELLED.to_string()).await;
        }
        let provider_job_id = match self.provider.submit(&job.file_url, &job.language).await {
            Ok(id) => id,
            Err(err) => return self.fail(&mut job, format!("submission failed: {err}")).await,
        };
        if let Err(err) = self.record_submission(&mut job, &provider_job_id).await {
            return self.fail(&mut job, format!("recording submission failed: {err}")).await;
        }
        info!(provider_job_id = %provider_job_id, "submitted to provider");

        let result = match self.await_completion(&provider_job_id, cancel).await {
            Ok(result) => result,
            Err(reason) => return self.fail(&mut job, reason).await,
        };

        let duration_ms = result.duration_ms.unwrap_or_default();
        let minutes = billed_minutes(duration_ms);
        match self.ledger.has_sufficient_balance(job.account_id, minutes).await {
            Ok(true) => {}
            Ok(false) => {
                info!(minutes, "not enough credits to release transcript");
                return self.fail(&mut job, INSUFFICIENT_CREDITS.to_string()).await;
            }
            Err(err) => return self.fail(&mut job, format!("balance check failed: {err}")).await,
        }

        let exports = self.fetch_exports(&provider_job_id).await;
        let mut completed = job.clone();
        completed.mark_completed(CompletedTranscript {
            text: result.text.unwrap_or_default(),
            exports,
            duration_secs: billing::duration_secs(duration_ms),
            billed_minutes: minutes,
        })?;
        if let Err(err) = self.jobs.update_job(&completed).await {
            return self.fail(&mut job, format!("saving transcript failed: {err}")).await;
        }
        let job = completed;

        if let Err(err) = self
            .ledger
            .debit(job.account_id, minutes, Some(job.id), debit_description(&job))
            .await
        {
            error!(
                job_id = %job.id,
                minutes,
                anomaly = "completed_unbilled",
                error = %err,
                "debit failed after completion"
            );
            return Err(err);
        }
        Ok(job.status)
    }

    /// Wait for a terminal provider status. `Err` carries the failure reason.
    async fn await_completion(&self, provider_job_id: &str, cancel: &CancellationToken) -> Result<PollResult, String> {
        let deadline = sleep(self.config.max_wait);
        tokio::pin!(deadline);
        let mut ticker = interval_at(Instant::now() + self.config.poll_interval, self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CANCELLED.to_string()),
                _ = &mut deadline => {
                    return Err(format!(
                        "transcription timed out after {}s",
                        self.config.max_wait.as_secs()
                    ));
                }
                _ = ticker.tick() => {
                    let poll = self
                        .provider
                        .poll(provider_job_id)
                        .await
                        .map_err(|err| format!("polling failed: {err}"))?;
                    match poll.status {
                        ProviderStatus::Completed => return Ok(poll),
                        ProviderStatus::Error => {
                            let detail = poll.error_detail.as_deref().unwrap_or("unknown error");
                            return Err(format!("transcription failed: {detail}"));
                        }
                        ProviderStatus::Queued | ProviderStatus::Processing => {
                            debug!(status = ?poll.status, "still running");
                        }
                    }
                }
            }
        }
    }

    async fn fetch_exports(&self, provider_job_id: &str) -> BTreeMap<ExportFormat, String> {
        let mut exports = BTreeMap::new();
        for format in &self.config.export_formats {
            match self.provider.fetch_export(provider_job_id, *format).await {
                Ok(content) => {
                    exports.insert(*format, content);
                }
                Err(err) => warn!(format = format.as_str(), error = %err, "export fetch failed, leaving it empty"),
            }
        }
        exports
    }

    async fn record_submission(&self, job: &mut TranscriptionJob, provider_job_id: &str) -> Result<(), ServiceError> {
        job.record_submission(provider_job_id)?;
        Ok(self.jobs.update_job(job).await?)
    }

    /// Best-effort terminal write; an error here is left to `drive` to log.
    async fn fail(&self, job: &mut TranscriptionJob, reason: String) -> Result<JobStatus, ServiceError> {
        warn!(job_id = %job.id, reason = %reason, "transcription failed");
        job.mark_failed(reason)?;
        self.jobs.update_job(job).await?;
        Ok(job.status)
    }
}

fn debit_description(job: &TranscriptionJob) -> String {
    format!("Transcription: {}", job.file_name)
}
