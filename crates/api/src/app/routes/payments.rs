use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use creditscribe_infra::{ReturnCallback, WebhookHeaders};
use creditscribe_payments::WebhookNotification;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::AccountContext;

pub async fn create_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Json(body): Json<dto::CreatePaymentRequest>,
) -> axum::response::Response {
    match services.reconciler.create_payment(ctx.account_id(), &body.package_id).await {
        Ok((payment, checkout)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "payment": payment,
                "checkout_url": checkout.checkout_url,
                "preference_id": checkout.preference_id,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
) -> axum::response::Response {
    match services.reconciler.list(ctx.account_id()).await {
        Ok(payments) => (StatusCode::OK, Json(serde_json::json!({ "payments": payments }))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Return from checkout: `?external_reference=..&status=..&payment_id=..&preference_id=..`.
pub async fn payment_success(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Query(callback): Query<ReturnCallback>,
) -> axum::response::Response {
    if callback.external_reference.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "missing external reference");
    }
    match services.reconciler.handle_return(ctx.account_id(), callback).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Provider notification. Always answers 2xx once the delivery is authentic
/// and understood, so the provider stops retrying.
pub async fn webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let mut notification = if body.is_empty() {
        WebhookNotification::default()
    } else {
        match serde_json::from_slice::<WebhookNotification>(&body) {
            Ok(n) => n,
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()),
        }
    };
    if notification.kind.is_empty() {
        if let Some(kind) = query.kind {
            notification.kind = kind;
        }
    }

    let delivery = WebhookHeaders {
        signature: header_value(&headers, "x-signature"),
        request_id: header_value(&headers, "x-request-id"),
    };
    match services
        .reconciler
        .handle_webhook(&delivery, query.data_id.as_deref(), &notification)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
