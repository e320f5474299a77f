use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use creditscribe_payments::catalog;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::AccountContext;

pub async fn packages() -> impl IntoResponse {
    let items = catalog().iter().map(dto::package_to_json).collect::<Vec<_>>();
    Json(serde_json::json!({ "packages": items }))
}

pub async fn balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
) -> axum::response::Response {
    match services.ledger.balance(ctx.account_id()).await {
        Ok(credits) => (StatusCode::OK, Json(serde_json::json!({ "credits_remaining": credits }))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Ledger entries, newest first.
pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
) -> axum::response::Response {
    let entries = match services.ledger.history(ctx.account_id()).await {
        Ok(entries) => entries,
        Err(e) => return errors::service_error_to_response(e),
    };
    let items = entries.iter().rev().map(dto::entry_to_json).collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
