//! Infrastructure layer: persistence, provider clients, and the services that
//! drive jobs and reconcile payments on top of them.

pub mod config;
pub mod error;
pub mod ledger;
pub mod providers;
pub mod reconciler;
pub mod runner;
pub mod store;

pub use config::{AppConfig, RunnerConfig};
pub use error::{ServiceError, StoreError};
pub use ledger::Ledger;
pub use reconciler::{
    PaymentReconciler, ReconcileOutcome, ResolutionReport, ReturnCallback, WebhookHeaders,
    WebhookOutcome,
};
pub use runner::{JobPage, JobRunner};
