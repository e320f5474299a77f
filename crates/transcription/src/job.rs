//! Job record and state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditscribe_core::{AccountId, DomainError, DomainResult, Entity, JobId};

use crate::provider::ExportFormat;

pub const DEFAULT_LANGUAGE: &str = "es";

/// Job execution status.
///
/// `pending → processing → {completed | failed}`; no transition leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Registered by the upload path, not yet started
    Pending,
    /// A detached run owns the job
    Processing,
    /// Transcript available and billed
    Completed,
    /// Terminal failure, see `error_message`
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Input from the upload collaborator: a file already stored somewhere the
/// provider can fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTranscription {
    pub file_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub language: Option<String>,
}

/// Everything a successful run persists in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTranscript {
    pub text: String,
    pub exports: BTreeMap<ExportFormat, String>,
    pub duration_secs: i64,
    pub billed_minutes: i64,
}

/// A transcription job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub id: JobId,
    pub account_id: AccountId,
    pub file_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub language: String,
    pub status: JobStatus,
    /// Provider-side id, set as soon as submission succeeds
    pub provider_job_id: Option<String>,
    pub transcript_text: Option<String>,
    pub srt_content: Option<String>,
    pub vtt_content: Option<String>,
    pub duration_secs: Option<i64>,
    pub credits_charged: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Entity for TranscriptionJob {
    const KIND: &'static str = "transcription";

    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TranscriptionJob {
    /// Register a new pending job.
    pub fn register(account_id: AccountId, upload: NewTranscription) -> DomainResult<Self> {
        if upload.file_name.trim().is_empty() {
            return Err(DomainError::validation("file_name must not be empty"));
        }
        if upload.file_url.trim().is_empty() {
            return Err(DomainError::validation("file_url must not be empty"));
        }
        if upload.file_size < 0 {
            return Err(DomainError::validation("file_size must not be negative"));
        }
        let language = upload
            .language
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let now = Utc::now();
        Ok(Self {
            id: JobId::new(),
            account_id,
            file_name: upload.file_name,
            file_url: upload.file_url,
            file_size: upload.file_size,
            language,
            status: JobStatus::Pending,
            provider_job_id: None,
            transcript_text: None,
            srt_content: None,
            vtt_content: None,
            duration_secs: None,
            credits_charged: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn ensure_owner(&self, account_id: AccountId) -> DomainResult<()> {
        if self.account_id != account_id {
            return Err(DomainError::NotFound(Self::KIND));
        }
        Ok(())
    }

    /// `pending → processing`. Any other source state is a conflict.
    pub fn mark_processing(&mut self) -> DomainResult<()> {
        if self.status != JobStatus::Pending {
            return Err(DomainError::conflict(format!("transcription already {}", self.status)));
        }
        self.status = JobStatus::Processing;
        self.touch();
        Ok(())
    }

    pub fn record_submission(&mut self, provider_job_id: impl Into<String>) -> DomainResult<()> {
        self.ensure_processing()?;
        self.provider_job_id = Some(provider_job_id.into());
        self.touch();
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        self.ensure_processing()?;
        self.status = JobStatus::Failed;
        self.error_message = Some(reason.into());
        self.touch();
        Ok(())
    }

    pub fn mark_completed(&mut self, result: CompletedTranscript) -> DomainResult<()> {
        self.ensure_processing()?;
        let now = Utc::now();
        let CompletedTranscript {
            text,
            mut exports,
            duration_secs,
            billed_minutes,
        } = result;

        self.status = JobStatus::Completed;
        self.transcript_text = Some(text);
        self.srt_content = exports.remove(&ExportFormat::Srt);
        self.vtt_content = exports.remove(&ExportFormat::Vtt);
        self.duration_secs = Some(duration_secs);
        self.credits_charged = Some(billed_minutes);
        self.error_message = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Replace the transcript text of a completed job (user edits).
    pub fn edit_transcript(&mut self, text: impl Into<String>) -> DomainResult<()> {
        if self.status != JobStatus::Completed {
            return Err(DomainError::conflict("transcription not completed"));
        }
        self.transcript_text = Some(text.into());
        self.touch();
        Ok(())
    }

    /// Stored payload for an export format, if the best-effort fetch got one.
    pub fn export(&self, format: ExportFormat) -> Option<&str> {
        match format {
            ExportFormat::Srt => self.srt_content.as_deref(),
            ExportFormat::Vtt => self.vtt_content.as_deref(),
        }
    }

    fn ensure_processing(&self) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(DomainError::conflict(format!(
                "transcription is {}, expected processing",
                self.status
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pending_job() -> TranscriptionJob {
        TranscriptionJob::register(
            AccountId::new(),
            NewTranscription {
                file_name: "interview.mp3".to_string(),
                file_url: "https://storage.example.com/interview.mp3".to_string(),
                file_size: 1_024,
                language: None,
            },
        )
        .unwrap()
    }

    fn done(billed_minutes: i64) -> CompletedTranscript {
        let mut exports = BTreeMap::new();
        exports.insert(ExportFormat::Srt, "1\n00:00:00,000 --> 00:00:01,000\nhola\n".to_string());
        CompletedTranscript {
            text: "hola".to_string(),
            exports,
            duration_secs: 125,
            billed_minutes,
        }
    }

    #[test]
    fn register_defaults_language_and_starts_pending() {
        let job = pending_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.language, DEFAULT_LANGUAGE);
        assert!(job.provider_job_id.is_none());
    }

    #[test]
    fn register_rejects_missing_file_reference() {
        let err = TranscriptionJob::register(
            AccountId::new(),
            NewTranscription {
                file_name: "a.mp3".to_string(),
                file_url: "  ".to_string(),
                file_size: 1,
                language: Some("en".to_string()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn lifecycle_to_completed() {
        let mut job = pending_job();
        job.mark_processing().unwrap();
        job.record_submission("prov-1").unwrap();
        job.mark_completed(done(2)).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.provider_job_id.as_deref(), Some("prov-1"));
        assert_eq!(job.credits_charged, Some(2));
        assert!(job.srt_content.is_some());
        assert!(job.vtt_content.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn starting_twice_is_a_conflict() {
        let mut job = pending_job();
        job.mark_processing().unwrap();
        let before = job.clone();

        let err = job.mark_processing().unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(job, before);
    }

    #[test]
    fn terminal_states_do_not_transition() {
        let mut job = pending_job();
        job.mark_processing().unwrap();
        job.mark_failed("insufficient credits").unwrap();

        assert!(job.status.is_terminal());
        assert!(job.mark_completed(done(1)).is_err());
        assert!(job.mark_failed("again").is_err());
        assert!(job.mark_processing().is_err());
        assert_eq!(job.error_message.as_deref(), Some("insufficient credits"));
    }

    #[test]
    fn only_completed_transcripts_are_editable() {
        let mut job = pending_job();
        assert!(job.edit_transcript("x").is_err());

        job.mark_processing().unwrap();
        job.mark_completed(done(1)).unwrap();
        job.edit_transcript("corrected").unwrap();
        assert_eq!(job.transcript_text.as_deref(), Some("corrected"));
    }

    #[test]
    fn ownership_mismatch_reads_as_not_found() {
        let job = pending_job();
        assert_eq!(job.ensure_owner(AccountId::new()), Err(DomainError::NotFound("transcription")));
        assert!(job.ensure_owner(job.account_id).is_ok());
    }
}
