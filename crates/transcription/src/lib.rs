//! Transcription job lifecycle.
//!
//! Pure domain logic: the job record and its state machine, the billing rule,
//! and the vocabulary shared with the external transcription provider.

pub mod billing;
pub mod download;
pub mod job;
pub mod provider;
pub mod stats;

pub use billing::billed_minutes;
pub use download::Download;
pub use job::{CompletedTranscript, JobStatus, NewTranscription, TranscriptionJob, DEFAULT_LANGUAGE};
pub use provider::{ExportFormat, PollResult, ProviderStatus};
pub use stats::JobStats;
