//! External provider contracts and their implementations.
//!
//! Clients are constructed once at startup and shared behind `Arc<dyn _>`.

use async_trait::async_trait;

use creditscribe_core::PaymentId;
use creditscribe_payments::{CreditPackage, ProviderPayment};
use creditscribe_transcription::{ExportFormat, PollResult};

pub mod assemblyai;
pub mod fake;
pub mod mercadopago;

pub use assemblyai::AssemblyAiClient;
pub use fake::{DevPaymentProvider, ScriptedTranscriptionProvider};
pub use mercadopago::MercadoPagoClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// Turn a non-2xx response into [`ProviderError::Status`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Submit a file reference; returns the provider's job id.
    async fn submit(&self, file_url: &str, language: &str) -> Result<String, ProviderError>;

    async fn poll(&self, provider_job_id: &str) -> Result<PollResult, ProviderError>;

    async fn fetch_export(&self, provider_job_id: &str, format: ExportFormat) -> Result<String, ProviderError>;
}

/// Provider-hosted checkout for one payment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Checkout {
    pub checkout_url: String,
    pub preference_id: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout(
        &self,
        package: &CreditPackage,
        payer_email: &str,
        payment_id: PaymentId,
    ) -> Result<Checkout, ProviderError>;

    async fn fetch_payment(&self, provider_payment_id: &str) -> Result<ProviderPayment, ProviderError>;
}
