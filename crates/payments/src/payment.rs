use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditscribe_core::{AccountId, DomainError, DomainResult, Entity, PaymentId};

use crate::package::CreditPackage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "approved" => Ok(PaymentStatus::Approved),
            "rejected" => Ok(PaymentStatus::Rejected),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown payment status: {other}"))),
        }
    }
}

/// A terminal resolution to apply to a pending payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResolution {
    pub status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub preference_id: Option<String>,
    pub payment_method: Option<String>,
    /// Opaque provider response, kept for audits and disputes.
    pub details: Option<serde_json::Value>,
}

/// One purchase attempt against the package catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub account_id: AccountId,
    pub provider_payment_id: Option<String>,
    pub preference_id: Option<String>,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub credits: i64,
    pub package_id: String,
    pub package_name: String,
    pub payment_method: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Entity for Payment {
    const KIND: &'static str = "payment";

    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Payment {
    pub fn pending(account_id: AccountId, package: &CreditPackage) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            account_id,
            provider_payment_id: None,
            preference_id: None,
            status: PaymentStatus::Pending,
            amount_cents: package.price_cents,
            currency: package.currency.to_string(),
            credits: package.credits,
            package_id: package.id.to_string(),
            package_name: package.name.to_string(),
            payment_method: None,
            details: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn ensure_owner(&self, account_id: AccountId) -> DomainResult<()> {
        if self.account_id != account_id {
            return Err(DomainError::NotFound(Self::KIND));
        }
        Ok(())
    }

    pub fn attach_checkout(&mut self, preference_id: impl Into<String>) {
        self.preference_id = Some(preference_id.into());
        self.updated_at = Utc::now();
    }

    /// Move `pending` to a terminal status. Happens at most once per payment.
    pub fn resolve(&mut self, resolution: PaymentResolution) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!("payment already {}", self.status)));
        }
        if !resolution.status.is_terminal() {
            return Err(DomainError::validation("resolution must be terminal"));
        }

        let now = Utc::now();
        self.status = resolution.status;
        if resolution.provider_payment_id.is_some() {
            self.provider_payment_id = resolution.provider_payment_id;
        }
        if resolution.preference_id.is_some() {
            self.preference_id = resolution.preference_id;
        }
        if resolution.payment_method.is_some() {
            self.payment_method = resolution.payment_method;
        }
        if resolution.details.is_some() {
            self.details = resolution.details;
        }
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Ledger description for the credit granted on approval.
    pub fn credit_description(&self) -> String {
        format!("Package purchase: {}", self.package_name)
    }
}
