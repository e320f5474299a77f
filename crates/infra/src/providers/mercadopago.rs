use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use creditscribe_core::PaymentId;
use creditscribe_payments::{CreditPackage, ProviderPayment};

use super::{check_status, Checkout, PaymentProvider, ProviderError};
use crate::config::MercadoPagoConfig;

const STATEMENT_DESCRIPTOR: &str = "CREDITSCRIBE CREDITS";

/// Checkout Pro preferences plus payment lookups.
#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
    frontend_url: String,
    webhook_url: String,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    payment_method_id: Option<String>,
    #[serde(default)]
    payment_type_id: Option<String>,
    #[serde(default)]
    transaction_amount: Option<f64>,
}

impl PaymentResponse {
    fn into_provider_payment(self) -> Result<ProviderPayment, ProviderError> {
        let id = match self.id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s,
            other => return Err(ProviderError::Decode(format!("unexpected payment id: {other}"))),
        };
        Ok(ProviderPayment {
            id,
            status: self.status,
            status_detail: self.status_detail,
            external_reference: self.external_reference.filter(|r| !r.is_empty()),
            payment_method_id: self.payment_method_id.filter(|m| !m.is_empty()),
            payment_type_id: self.payment_type_id,
            transaction_amount: self.transaction_amount,
        })
    }
}

impl MercadoPagoClient {
    pub fn new(config: &MercadoPagoConfig, frontend_url: &str, webhook_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: config.access_token.clone(),
            base_url: config.base_url.clone(),
            frontend_url: frontend_url.to_string(),
            webhook_url: webhook_url.to_string(),
        }
    }

    fn preference_body(&self, package: &CreditPackage, payer_email: &str, payment_id: PaymentId) -> serde_json::Value {
        let back = format!("{}/credits", self.frontend_url);
        json!({
            "items": [{
                "id": package.id,
                "title": format!("{} - {}", package.name, package.description),
                "description": package.description,
                "quantity": 1,
                "unit_price": package.unit_price(),
                "currency_id": package.currency,
            }],
            "payer": { "email": payer_email },
            "back_urls": {
                "success": format!("{back}?payment_status=success"),
                "failure": format!("{back}?payment_status=failure"),
                "pending": format!("{back}?payment_status=pending"),
            },
            "binary_mode": true,
            "external_reference": payment_id.to_string(),
            "notification_url": format!("{}/payments/webhook", self.webhook_url),
            "statement_descriptor": STATEMENT_DESCRIPTOR,
        })
    }
}

#[async_trait]
impl PaymentProvider for MercadoPagoClient {
    async fn create_checkout(
        &self,
        package: &CreditPackage,
        payer_email: &str,
        payment_id: PaymentId,
    ) -> Result<Checkout, ProviderError> {
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&self.preference_body(package, payer_email, payment_id))
            .send()
            .await?;
        let preference: PreferenceResponse = check_status(response).await?.json().await?;
        tracing::info!(%payment_id, preference_id = %preference.id, "checkout preference created");

        Ok(Checkout {
            checkout_url: preference.init_point,
            preference_id: preference.id,
        })
    }

    async fn fetch_payment(&self, provider_payment_id: &str) -> Result<ProviderPayment, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{provider_payment_id}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let payment: PaymentResponse = check_status(response).await?.json().await?;
        payment.into_provider_payment()
    }
}
