use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use creditscribe_core::JobId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::AccountContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_transcription).get(list_transcriptions))
        .route("/:id", get(get_transcription).put(update_transcription))
        .route("/:id/process", post(process_transcription))
        .route("/:id/cancel", post(cancel_transcription))
        .route("/:id/download", get(download_transcription))
}

pub async fn register_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Json(body): Json<dto::RegisterTranscriptionRequest>,
) -> axum::response::Response {
    match services.runner.register(ctx.account_id(), body.into()).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_transcriptions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(dto::DEFAULT_PAGE_SIZE);
    match services.runner.list(ctx.account_id(), page, limit).await {
        Ok(page) => (StatusCode::OK, Json(dto::job_page_to_json(page))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&id, "transcription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.runner.get(ctx.account_id(), job_id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateTranscriptRequest>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&id, "transcription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services
        .runner
        .update_transcript(ctx.account_id(), job_id, body.transcript_text)
        .await
    {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Start the job and return at once; the run continues in the background.
pub async fn process_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&id, "transcription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.runner.start(ctx.account_id(), job_id).await {
        Ok((job, _run)) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "message": "transcription started",
                "transcription": job,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn cancel_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&id, "transcription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.runner.cancel(ctx.account_id(), job_id).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn download_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AccountContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::DownloadQuery>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&id, "transcription") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let format = query.format.unwrap_or_else(|| "txt".to_string());
    let download = match services.runner.download(ctx.account_id(), job_id, &format).await {
        Ok(d) => d,
        Err(e) => return errors::service_error_to_response(e),
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.filename.replace('"', "")),
            ),
        ],
        download.content,
    )
        .into_response()
}
