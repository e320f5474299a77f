use axum::{
    routing::{get, post},
    Router,
};

pub mod credits;
pub mod payments;
pub mod system;
pub mod transcriptions;

/// Router for all authenticated (account-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/me", get(system::me))
        .route("/dashboard", get(system::dashboard))
        .nest("/transcriptions", transcriptions::router())
        .route("/credits/balance", get(credits::balance))
        .route("/credits/history", get(credits::history))
        .route("/payments", post(payments::create_payment).get(payments::list_payments))
        .route("/payments/success", post(payments::payment_success))
}

/// Endpoints reachable without a token.
pub fn public_router() -> Router {
    Router::new()
        .route("/credits/packages", get(credits::packages))
        .route("/payments/webhook", post(payments::webhook))
}
