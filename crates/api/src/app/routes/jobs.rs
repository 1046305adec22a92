use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use uuid::Uuid;

use workhub_infra::jobs::JobId;

use crate::app::dto::ListQuery;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(job_stats))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/:id/retry", post(retry_dead_letter))
}

pub async fn job_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.job_store().stats(tenant.tenant_id()) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    match services.job_store().list_dead_letters(tenant.tenant_id(), query.limit()) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}

pub async fn retry_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match Uuid::parse_str(id.trim()) {
        Ok(u) => JobId::from_uuid(u),
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", format!("JobId: {e}")),
    };

    match services.job_store().retry_dead_letter(tenant.tenant_id(), job_id) {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => errors::job_error_to_response(e),
    }
}
