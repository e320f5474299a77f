use serde::Deserialize;

use creditscribe_infra::JobPage;
use creditscribe_ledger::{Account, LedgerEntry};
use creditscribe_payments::CreditPackage;
use creditscribe_transcription::NewTranscription;

pub const DEFAULT_PAGE_SIZE: usize = 10;

// -------------------------
// Request DTOs
// -------------------------

/// File reference handed over by the upload collaborator.
#[derive(Debug, Deserialize)]
pub struct RegisterTranscriptionRequest {
    pub file_name: String,
    pub file_url: String,
    #[serde(default)]
    pub file_size: i64,
    pub language: Option<String>,
}

impl From<RegisterTranscriptionRequest> for NewTranscription {
    fn from(body: RegisterTranscriptionRequest) -> Self {
        NewTranscription {
            file_name: body.file_name,
            file_url: body.file_url,
            file_size: body.file_size,
            language: body.language,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTranscriptRequest {
    pub transcript_text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub package_id: String,
}

/// Query string of a provider notification (`?type=payment&data.id=123`).
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn account_to_json(account: &Account) -> serde_json::Value {
    serde_json::json!({
        "id": account.id_typed().to_string(),
        "email": account.email(),
        "plan": account.plan(),
        "credits_remaining": account.balance(),
        "created_at": account.created_at(),
    })
}

pub fn job_page_to_json(page: JobPage) -> serde_json::Value {
    let total_pages = page.total.div_ceil(page.per_page);
    serde_json::json!({
        "transcriptions": page.items,
        "pagination": {
            "page": page.page,
            "limit": page.per_page,
            "total": page.total,
            "total_pages": total_pages,
        },
    })
}

pub fn package_to_json(package: &CreditPackage) -> serde_json::Value {
    serde_json::json!({
        "id": package.id,
        "name": package.name,
        "description": package.description,
        "credits": package.credits,
        "price_cents": package.price_cents,
        "price": package.unit_price(),
        "currency": package.currency,
        "popular": package.popular,
        "discount": package.discount,
    })
}

pub fn entry_to_json(entry: &LedgerEntry) -> serde_json::Value {
    serde_json::json!({
        "id": entry.id.to_string(),
        "type": entry.direction.as_str(),
        "amount": entry.amount,
        "balance_before": entry.balance_before,
        "balance_after": entry.balance_after,
        "description": entry.description,
        "transcription_id": entry.job_id.map(|id| id.to_string()),
        "created_at": entry.created_at,
    })
}
