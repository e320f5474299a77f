//! Payment provider vocabulary this crate depends on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payment::PaymentStatus;

/// What a provider-reported status string means locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Resolve(PaymentStatus),
    /// Still in flight on the provider side: leave the payment untouched.
    StillPending,
    Unrecognized(String),
}

impl Outcome {
    pub fn from_provider_status(status: &str) -> Self {
        match status.trim() {
            "approved" => Outcome::Resolve(PaymentStatus::Approved),
            "rejected" => Outcome::Resolve(PaymentStatus::Rejected),
            "cancelled" => Outcome::Resolve(PaymentStatus::Cancelled),
            "pending" | "in_process" | "in_mediation" | "authorized" => Outcome::StillPending,
            other => Outcome::Unrecognized(other.to_string()),
        }
    }
}

/// Payment details fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
    /// Our payment id, echoed back.
    pub external_reference: Option<String>,
    pub payment_method_id: Option<String>,
    pub payment_type_id: Option<String>,
    pub transaction_amount: Option<f64>,
}

impl ProviderPayment {
    /// Audit blob stored on the payment record.
    pub fn detail_blob(&self, processed_at: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "provider_payment_id": self.id,
            "status": self.status,
            "status_detail": self.status_detail,
            "payment_type": self.payment_type_id,
            "payment_method": self.payment_method_id,
            "transaction_amount": self.transaction_amount,
            "processed_at": processed_at.to_rfc3339(),
        })
    }
}

/// Inbound webhook body. Only `type == "payment"` is acted upon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookNotification {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookData {
    /// Sent as a string or a number depending on the notification version.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

impl WebhookNotification {
    pub fn is_payment(&self) -> bool {
        self.kind == "payment"
    }

    pub fn data_id(&self) -> Option<String> {
        match self.data.id.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_map_onto_outcomes() {
        assert_eq!(
            Outcome::from_provider_status("approved"),
            Outcome::Resolve(PaymentStatus::Approved)
        );
        assert_eq!(
            Outcome::from_provider_status("cancelled"),
            Outcome::Resolve(PaymentStatus::Cancelled)
        );
        assert_eq!(Outcome::from_provider_status("in_process"), Outcome::StillPending);
        assert_eq!(
            Outcome::from_provider_status("charged_back"),
            Outcome::Unrecognized("charged_back".to_string())
        );
    }

    #[test]
    fn webhook_data_id_accepts_numbers_and_strings() {
        let numeric: WebhookNotification =
            serde_json::from_str(r#"{"type":"payment","action":"payment.updated","data":{"id":123456}}"#)
                .unwrap();
        assert!(numeric.is_payment());
        assert_eq!(numeric.data_id().as_deref(), Some("123456"));

        let text: WebhookNotification =
            serde_json::from_str(r#"{"type":"merchant_order","data":{"id":"99"}}"#).unwrap();
        assert!(!text.is_payment());
        assert_eq!(text.data_id().as_deref(), Some("99"));

        let empty: WebhookNotification = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.data_id(), None);
    }
}
