//! Vocabulary shared with the external transcription provider.

use serde::{Deserialize, Serialize};

use creditscribe_core::DomainError;

/// Provider-reported job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl ProviderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderStatus::Completed | ProviderStatus::Error)
    }
}

/// One poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResult {
    pub status: ProviderStatus,
    pub text: Option<String>,
    pub duration_ms: Option<i64>,
    pub error_detail: Option<String>,
}

impl PollResult {
    pub fn in_progress(status: ProviderStatus) -> Self {
        Self {
            status,
            text: None,
            duration_ms: None,
            error_detail: None,
        }
    }

    pub fn completed(text: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            status: ProviderStatus::Completed,
            text: Some(text.into()),
            duration_ms: Some(duration_ms),
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: ProviderStatus::Error,
            text: None,
            duration_ms: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// Subtitle export formats fetched after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Srt,
    Vtt,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Srt => "srt",
            ExportFormat::Vtt => "vtt",
        }
    }
}

impl core::str::FromStr for ExportFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "srt" => Ok(ExportFormat::Srt),
            "vtt" => Ok(ExportFormat::Vtt),
            other => Err(DomainError::validation(format!("unknown export format: {other}"))),
        }
    }
}
