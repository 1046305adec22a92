use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use workhub_reports::ReportId;

use crate::app::dto::{self, DeliverReportRequest, DeliverySummaryResponse, ListQuery, RegisterReportRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_report).get(list_reports))
        .route("/:id", get(get_report))
        .route("/:id/deliveries", post(deliver_report).get(list_report_deliveries))
        .route("/:id/delivery-summary", get(delivery_summary))
}

pub async fn register_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<RegisterReportRequest>,
) -> axum::response::Response {
    let report = match dto::report_from_request(tenant.tenant_id(), body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.delivery.register_report(report).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

pub async fn list_reports(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    match services.delivery.list_reports(tenant.tenant_id(), query.limit()).await {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

pub async fn get_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let report_id: ReportId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.delivery.get_report(tenant.tenant_id(), report_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

pub async fn deliver_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<DeliverReportRequest>,
) -> axum::response::Response {
    let report_id: ReportId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let recipients = match dto::recipients_from_request(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.delivery.deliver(tenant.tenant_id(), report_id, recipients).await {
        Ok(logs) => (StatusCode::ACCEPTED, Json(logs)).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

pub async fn list_report_deliveries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let report_id: ReportId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.delivery.deliveries_for_report(tenant.tenant_id(), report_id).await {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}

pub async fn delivery_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let report_id: ReportId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.delivery.summary(tenant.tenant_id(), report_id).await {
        Ok(summary) => Json(DeliverySummaryResponse::new(report_id, summary)).into_response(),
        Err(e) => errors::delivery_error_to_response(e),
    }
}
