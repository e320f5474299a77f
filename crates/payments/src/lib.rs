//! Credit purchases: payment records, the package catalog, provider status
//! mapping and webhook signature verification.

pub mod package;
pub mod payment;
pub mod provider;
pub mod signature;

pub use package::{catalog, find_package, CreditPackage};
pub use payment::{Payment, PaymentResolution, PaymentStatus};
pub use provider::{Outcome, ProviderPayment, WebhookNotification};
pub use signature::{SignatureError, SignatureHeader};
