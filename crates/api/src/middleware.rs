use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::app::errors;
use crate::directory::AccountDirectory;

#[derive(Clone)]
pub struct AuthState {
    pub directory: Arc<dyn AccountDirectory>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing bearer token");
    };

    let account = match state.directory.resolve(token).await {
        Ok(Some(account)) => account,
        Ok(None) => return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unknown token"),
        Err(e) => return errors::service_error_to_response(e),
    };

    req.extensions_mut().insert(account);
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
