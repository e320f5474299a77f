use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use creditscribe_transcription::{ExportFormat, PollResult, ProviderStatus};

use super::{check_status, ProviderError, TranscriptionProvider};
use crate::config::AssemblyAiConfig;

/// REST client for the AssemblyAI v2 transcript API.
#[derive(Debug, Clone)]
pub struct AssemblyAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    /// Seconds.
    #[serde(default)]
    audio_duration: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

impl AssemblyAiClient {
    pub fn new(config: &AssemblyAiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &AssemblyAiConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/transcript{}", self.base_url, path)
    }
}

fn parse_status(raw: &str) -> Result<ProviderStatus, ProviderError> {
    match raw {
        "queued" => Ok(ProviderStatus::Queued),
        "processing" => Ok(ProviderStatus::Processing),
        "completed" => Ok(ProviderStatus::Completed),
        "error" => Ok(ProviderStatus::Error),
        other => Err(ProviderError::Decode(format!("unknown transcript status: {other}"))),
    }
}

fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1_000.0).round() as i64
}

#[async_trait]
impl TranscriptionProvider for AssemblyAiClient {
    async fn submit(&self, file_url: &str, language: &str) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(self.url(""))
            .header("authorization", &self.api_key)
            .json(&json!({
                "audio_url": file_url,
                "language_code": language,
            }))
            .send()
            .await?;
        let transcript: TranscriptResponse = check_status(response).await?.json().await?;
        tracing::debug!(provider_job_id = %transcript.id, status = %transcript.status, "transcript submitted");
        Ok(transcript.id)
    }

    async fn poll(&self, provider_job_id: &str) -> Result<PollResult, ProviderError> {
        let response = self
            .http
            .get(self.url(&format!("/{provider_job_id}")))
            .header("authorization", &self.api_key)
            .send()
            .await?;
        let transcript: TranscriptResponse = check_status(response).await?.json().await?;

        Ok(PollResult {
            status: parse_status(&transcript.status)?,
            text: transcript.text,
            duration_ms: transcript.audio_duration.map(seconds_to_ms),
            error_detail: transcript.error,
        })
    }

    async fn fetch_export(&self, provider_job_id: &str, format: ExportFormat) -> Result<String, ProviderError> {
        let response = self
            .http
            .get(self.url(&format!("/{provider_job_id}/{}", format.as_str())))
            .header("authorization", &self.api_key)
            .send()
            .await?;
        Ok(check_status(response).await?.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_duration_is_reported_in_milliseconds() {
        assert_eq!(seconds_to_ms(125.0), 125_000);
        assert_eq!(seconds_to_ms(1.2345), 1_235);
    }

    #[test]
    fn status_strings_map_onto_provider_status() {
        assert_eq!(parse_status("queued"), Ok(ProviderStatus::Queued));
        assert_eq!(parse_status("error"), Ok(ProviderStatus::Error));
        assert!(parse_status("exploded").is_err());
    }

    #[test]
    fn transcript_response_tolerates_missing_fields() {
        let parsed: TranscriptResponse =
            serde_json::from_str(r#"{"id":"abc","status":"queued"}"#).unwrap();
        assert_eq!(parsed.id, "abc");
        assert!(parsed.audio_duration.is_none());
    }
}
