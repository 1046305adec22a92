use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use workhub_reports::DeliveryLogId;

use crate::app::dto::DeliveryListQuery;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_deliveries))
        .route("/:id", get(get_delivery))
        .route("/:id/retry", post(retry_delivery))
}

pub async fn list_deliveries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<DeliveryListQuery>,
) -> axum::response::Response {
    let status = match query.status() {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services
        .delivery
        .deliveries_by_status(tenant.tenant_id(), status, query.limit())
        .await
    {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

pub async fn get_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let log_id: DeliveryLogId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.delivery.get_delivery(tenant.tenant_id(), log_id).await {
        Ok(log) => Json(log).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

/// Operator retry: re-opens a failed delivery with a fresh attempt budget.
pub async fn retry_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let log_id: DeliveryLogId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.delivery.manual_retry(tenant.tenant_id(), log_id).await {
        Ok(log) => (StatusCode::ACCEPTED, Json(log)).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}
