use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::AccountContext;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
) -> axum::response::Response {
    match services.ledger.account(ctx.account_id()).await {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Account, usage stats and the most recent jobs in one call.
pub async fn dashboard(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
) -> axum::response::Response {
    let account_id = ctx.account_id();
    let account = match services.ledger.account(account_id).await {
        Ok(a) => a,
        Err(e) => return errors::service_error_to_response(e),
    };
    let stats = match services.runner.stats(account_id).await {
        Ok(s) => s,
        Err(e) => return errors::service_error_to_response(e),
    };
    let recent = match services.runner.list(account_id, 1, dto::DEFAULT_PAGE_SIZE).await {
        Ok(p) => p,
        Err(e) => return errors::service_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "account": dto::account_to_json(&account),
            "stats": stats,
            "transcriptions": recent.items,
        })),
    )
        .into_response()
}
