//! Payment creation and reconciliation.
//!
//! The webhook and the return-from-checkout callback both converge on
//! [`PaymentReconciler::reconcile`]. Idempotency hangs off the payment's own
//! status: once it leaves `pending`, later resolutions are acknowledged and
//! ignored, whichever path delivers them and in whatever order.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use creditscribe_core::{AccountId, PaymentId};
use creditscribe_ledger::LedgerEntry;
use creditscribe_payments::{
    find_package, signature, Outcome, Payment, PaymentResolution, PaymentStatus, WebhookNotification,
};

use crate::error::{ServiceError, StoreError};
use crate::ledger::Ledger;
use crate::providers::{Checkout, PaymentProvider};
use crate::store::PaymentStore;

/// A provider-reported resolution for one of our payments.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionReport {
    pub payment_id: PaymentId,
    pub provider_status: String,
    pub provider_payment_id: Option<String>,
    pub preference_id: Option<String>,
    pub payment_method: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The payment left `pending` in this call.
    Applied {
        payment: Payment,
        credit: Option<LedgerEntry>,
    },
    /// Already terminal; nothing reapplied.
    AlreadyResolved { payment: Payment },
    /// Provider still processing, or a status we do not act on.
    Unchanged { payment: Payment },
}

impl ReconcileOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            ReconcileOutcome::Applied { payment, .. }
            | ReconcileOutcome::AlreadyResolved { payment }
            | ReconcileOutcome::Unchanged { payment } => payment,
        }
    }
}

/// Headers carried by a webhook delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookHeaders {
    /// `x-signature`
    pub signature: Option<String>,
    /// `x-request-id`
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Acknowledged without any state change.
    Ignored { reason: String },
    Reconciled(ReconcileOutcome),
}

/// Query parameters of the return-from-checkout redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ReturnCallback {
    /// Our payment id, echoed by the provider.
    #[serde(default)]
    pub external_reference: String,
    #[serde(default)]
    pub status: String,
    /// Provider payment id.
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub preference_id: Option<String>,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    payments: Arc<dyn PaymentStore>,
    ledger: Ledger,
    provider: Arc<dyn PaymentProvider>,
    webhook_secret: Option<String>,
}

impl PaymentReconciler {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        ledger: Ledger,
        provider: Arc<dyn PaymentProvider>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            payments,
            ledger,
            provider,
            webhook_secret,
        }
    }

    /// Create a `pending` payment for a catalog package and obtain a checkout.
    ///
    /// If the provider fails, the payment stays `pending` for follow-up and
    /// the error is surfaced.
    pub async fn create_payment(
        &self,
        account: AccountId,
        package_id: &str,
    ) -> Result<(Payment, Checkout), ServiceError> {
        let package = find_package(package_id)
            .ok_or_else(|| ServiceError::Validation(format!("invalid package id: {package_id}")))?;
        let owner = self.ledger.account(account).await?;

        let mut payment = Payment::pending(account, package);
        self.payments.insert_payment(payment.clone()).await?;

        let checkout = self
            .provider
            .create_checkout(package, owner.email(), payment.id)
            .await
            .map_err(|err| {
                warn!(payment_id = %payment.id, error = %err, "checkout creation failed; payment left pending");
                ServiceError::from(err)
            })?;

        payment.attach_checkout(checkout.preference_id.clone());
        if let Err(err) = self.payments.update_payment(&payment).await {
            warn!(payment_id = %payment.id, error = %err, "failed to store preference id");
        }
        info!(payment_id = %payment.id, account_id = %account, package = package.id, "payment created");
        Ok((payment, checkout))
    }

    pub async fn list(&self, account: AccountId) -> Result<Vec<Payment>, ServiceError> {
        Ok(self.payments.list_payments(account).await?)
    }

    pub async fn get(&self, account: AccountId, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        let payment = self.payments.get_payment(payment_id).await?;
        payment
            .ensure_owner(account)
            .map_err(|_| ServiceError::NotFound(format!("payment {payment_id}")))?;
        Ok(payment)
    }

    /// Apply a provider resolution at most once.
    pub async fn reconcile(&self, report: ResolutionReport) -> Result<ReconcileOutcome, ServiceError> {
        let payment = self.payments.get_payment(report.payment_id).await?;
        if payment.status.is_terminal() {
            info!(payment_id = %payment.id, status = %payment.status, "payment already resolved");
            return Ok(ReconcileOutcome::AlreadyResolved { payment });
        }

        let status = match Outcome::from_provider_status(&report.provider_status) {
            Outcome::Resolve(status) => status,
            Outcome::StillPending => {
                info!(payment_id = %payment.id, provider_status = %report.provider_status, "payment still pending");
                return Ok(ReconcileOutcome::Unchanged { payment });
            }
            Outcome::Unrecognized(other) => {
                warn!(payment_id = %payment.id, provider_status = %other, "unrecognized provider status");
                return Ok(ReconcileOutcome::Unchanged { payment });
            }
        };

        let resolution = PaymentResolution {
            status,
            provider_payment_id: report.provider_payment_id,
            preference_id: report.preference_id,
            payment_method: report.payment_method,
            details: report.details,
        };
        match self.payments.resolve_payment(report.payment_id, resolution).await {
            Ok(resolved) => {
                info!(
                    payment_id = %resolved.payment.id,
                    account_id = %resolved.payment.account_id,
                    status = %resolved.payment.status,
                    credits = resolved.credit.as_ref().map(|e| e.amount).unwrap_or_default(),
                    "payment resolved"
                );
                Ok(ReconcileOutcome::Applied {
                    payment: resolved.payment,
                    credit: resolved.credit,
                })
            }
            Err(StoreError::AlreadyResolved(id)) => {
                let payment = self.payments.get_payment(id).await?;
                info!(payment_id = %id, status = %payment.status, "payment resolved concurrently");
                Ok(ReconcileOutcome::AlreadyResolved { payment })
            }
            Err(err) => {
                error!(payment_id = %report.payment_id, error = %err, "payment resolution failed");
                Err(err.into())
            }
        }
    }

    /// Verify, fetch and reconcile one webhook delivery.
    ///
    /// `query_data_id` is the `data.id` query parameter when present; the body
    /// field is the fallback.
    pub async fn handle_webhook(
        &self,
        headers: &WebhookHeaders,
        query_data_id: Option<&str>,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, ServiceError> {
        let data_id = query_data_id
            .map(str::to_string)
            .filter(|id| !id.is_empty())
            .or_else(|| notification.data_id());

        self.verify_authenticity(headers, data_id.as_deref())?;

        if !notification.is_payment() {
            info!(kind = %notification.kind, "ignoring non-payment notification");
            return Ok(WebhookOutcome::Ignored {
                reason: format!("notification type {}", notification.kind),
            });
        }
        let data_id = data_id.ok_or_else(|| ServiceError::Validation("missing payment id".to_string()))?;

        let provider_payment = self.provider.fetch_payment(&data_id).await?;
        let Some(payment_id) = provider_payment
            .external_reference
            .as_deref()
            .and_then(|r| r.parse::<PaymentId>().ok())
        else {
            warn!(provider_payment_id = %data_id, "provider payment has no usable external reference");
            return Ok(WebhookOutcome::Ignored {
                reason: "missing external reference".to_string(),
            });
        };

        let report = ResolutionReport {
            payment_id,
            provider_status: provider_payment.status.clone(),
            provider_payment_id: Some(provider_payment.id.clone()),
            preference_id: None,
            payment_method: provider_payment.payment_method_id.clone(),
            details: Some(provider_payment.detail_blob(Utc::now())),
        };
        Ok(WebhookOutcome::Reconciled(self.reconcile(report).await?))
    }

    /// Client return from checkout: same idempotent path, scoped to the caller.
    pub async fn handle_return(
        &self,
        account: AccountId,
        callback: ReturnCallback,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let payment_id: PaymentId = callback.external_reference.parse()?;
        self.get(account, payment_id).await?;

        // The status is reported by the client, not confirmed with the provider.
        if matches!(
            Outcome::from_provider_status(&callback.status),
            Outcome::Resolve(PaymentStatus::Approved)
        ) {
            warn!(
                target: "security",
                payment_id = %payment_id,
                account_id = %account,
                provider_payment_id = callback.payment_id.as_deref().unwrap_or_default(),
                "approving payment from unverified return callback"
            );
        }

        let provider_payment_id = callback.payment_id.filter(|id| !id.is_empty());
        let details = provider_payment_id.as_ref().map(|id| {
            serde_json::json!({
                "provider_payment_id": id,
                "status": callback.status,
                "preference_id": callback.preference_id,
            })
        });

        self.reconcile(ResolutionReport {
            payment_id,
            provider_status: callback.status,
            provider_payment_id,
            preference_id: callback.preference_id.filter(|id| !id.is_empty()),
            payment_method: None,
            details,
        })
        .await
    }

    fn verify_authenticity(&self, headers: &WebhookHeaders, data_id: Option<&str>) -> Result<(), ServiceError> {
        let Some(secret) = self.webhook_secret.as_deref() else {
            warn!(target: "security", "webhook secret not configured; skipping signature verification");
            return Ok(());
        };

        signature::verify(
            secret,
            headers.signature.as_deref(),
            headers.request_id.as_deref().unwrap_or_default(),
            data_id,
        )
        .map_err(|err| {
            warn!(
                target: "security",
                request_id = headers.request_id.as_deref().unwrap_or_default(),
                data_id = data_id.unwrap_or_default(),
                error = %err,
                "webhook signature rejected"
            );
            ServiceError::from(err)
        })
    }
}
