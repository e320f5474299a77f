//! In-process providers for development and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use creditscribe_core::PaymentId;
use creditscribe_payments::{CreditPackage, ProviderPayment};
use creditscribe_transcription::{ExportFormat, PollResult, ProviderStatus};

use super::{Checkout, PaymentProvider, ProviderError, TranscriptionProvider};

fn poisoned() -> ProviderError {
    ProviderError::Http("lock poisoned".to_string())
}

#[derive(Debug)]
struct Script {
    submit_error: Option<ProviderError>,
    polls: VecDeque<Result<PollResult, ProviderError>>,
    /// Answer once `polls` is exhausted.
    settled: PollResult,
    exports: HashMap<ExportFormat, String>,
    submissions: Vec<(String, String)>,
    poll_count: usize,
    next_id: usize,
}

/// Transcription provider that replays a scripted sequence of poll results.
#[derive(Debug)]
pub struct ScriptedTranscriptionProvider {
    script: Mutex<Script>,
}

impl Default for ScriptedTranscriptionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTranscriptionProvider {
    /// Never finishes: every poll reports `processing`.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                submit_error: None,
                polls: VecDeque::new(),
                settled: PollResult::in_progress(ProviderStatus::Processing),
                exports: HashMap::new(),
                submissions: Vec::new(),
                poll_count: 0,
                next_id: 0,
            }),
        }
    }

    /// Reports `processing` for `ticks` polls, then completes.
    pub fn completing_after(ticks: usize, text: &str, duration_ms: i64) -> Self {
        let provider = Self::new();
        for _ in 0..ticks {
            provider.push_poll(Ok(PollResult::in_progress(ProviderStatus::Processing)));
        }
        provider.settle_with(PollResult::completed(text, duration_ms));
        provider
    }

    pub fn push_poll(&self, result: Result<PollResult, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.polls.push_back(result);
        }
    }

    pub fn settle_with(&self, result: PollResult) {
        if let Ok(mut script) = self.script.lock() {
            script.settled = result;
        }
    }

    pub fn set_export(&self, format: ExportFormat, content: &str) {
        if let Ok(mut script) = self.script.lock() {
            script.exports.insert(format, content.to_string());
        }
    }

    pub fn fail_submissions(&self, err: ProviderError) {
        if let Ok(mut script) = self.script.lock() {
            script.submit_error = Some(err);
        }
    }

    /// `(file_url, language)` of every accepted submission.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.script.lock().map(|s| s.submissions.clone()).unwrap_or_default()
    }

    pub fn poll_count(&self) -> usize {
        self.script.lock().map(|s| s.poll_count).unwrap_or_default()
    }
}

#[async_trait]
impl TranscriptionProvider for ScriptedTranscriptionProvider {
    async fn submit(&self, file_url: &str, language: &str) -> Result<String, ProviderError> {
        let mut script = self.script.lock().map_err(|_| poisoned())?;
        if let Some(err) = script.submit_error.clone() {
            return Err(err);
        }
        script.next_id += 1;
        script.submissions.push((file_url.to_string(), language.to_string()));
        Ok(format!("scripted-{}", script.next_id))
    }

    async fn poll(&self, _provider_job_id: &str) -> Result<PollResult, ProviderError> {
        let mut script = self.script.lock().map_err(|_| poisoned())?;
        script.poll_count += 1;
        match script.polls.pop_front() {
            Some(result) => result,
            None => Ok(script.settled.clone()),
        }
    }

    async fn fetch_export(&self, provider_job_id: &str, format: ExportFormat) -> Result<String, ProviderError> {
        let script = self.script.lock().map_err(|_| poisoned())?;
        script.exports.get(&format).cloned().ok_or_else(|| ProviderError::Status {
            status: 404,
            body: format!("no {} export for {provider_job_id}", format.as_str()),
        })
    }
}

/// Payment provider that hands out local checkout links and serves payment
/// details recorded by the caller.
#[derive(Debug)]
pub struct DevPaymentProvider {
    checkout_base: String,
    payments: Mutex<HashMap<String, ProviderPayment>>,
    fail_checkouts: AtomicBool,
}

impl DevPaymentProvider {
    pub fn new(checkout_base: impl Into<String>) -> Self {
        Self {
            checkout_base: checkout_base.into(),
            payments: Mutex::new(HashMap::new()),
            fail_checkouts: AtomicBool::new(false),
        }
    }

    /// Make `payment` visible to `fetch_payment`, as if the payer completed checkout.
    pub fn record_payment(&self, payment: ProviderPayment) {
        if let Ok(mut payments) = self.payments.lock() {
            payments.insert(payment.id.clone(), payment);
        }
    }

    pub fn fail_checkouts(&self, fail: bool) {
        self.fail_checkouts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProvider for DevPaymentProvider {
    async fn create_checkout(
        &self,
        package: &CreditPackage,
        _payer_email: &str,
        payment_id: PaymentId,
    ) -> Result<Checkout, ProviderError> {
        if self.fail_checkouts.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                status: 503,
                body: "checkout unavailable".to_string(),
            });
        }
        Ok(Checkout {
            checkout_url: format!(
                "{}/credits/dev-checkout?payment_id={payment_id}&package={}",
                self.checkout_base, package.id
            ),
            preference_id: format!("dev-pref-{payment_id}"),
        })
    }

    async fn fetch_payment(&self, provider_payment_id: &str) -> Result<ProviderPayment, ProviderError> {
        let payments = self.payments.lock().map_err(|_| poisoned())?;
        payments
            .get(provider_payment_id)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                status: 404,
                body: format!("payment {provider_payment_id} not found"),
            })
    }
}
