use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::dto::ListQuery;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let mut items = services.notifications.list(tenant.tenant_id());
    items.truncate(query.limit());
    Json(items).into_response()
}
