use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use workhub_core::DomainError;
use workhub_infra::delivery::DeliveryError;
use workhub_infra::jobs::JobStoreError;
use workhub_infra::stores::StoreError;

pub fn delivery_error_to_response(err: DeliveryError) -> axum::response::Response {
    match err {
        DeliveryError::ReportNotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "report_not_found", format!("report not found: {id}"))
        }
        DeliveryError::DeliveryNotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "delivery_not_found",
            format!("delivery not found: {id}"),
        ),
        DeliveryError::NoRecipients => json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "at least one recipient is required",
        ),
        DeliveryError::Domain(e) => domain_error_to_response(e),
        DeliveryError::Store(e) => store_error_to_response(e),
        DeliveryError::Jobs(e) => job_error_to_response(e),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DomainError::InvalidTransition(msg) => json_error(StatusCode::CONFLICT, "invalid_transition", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::TenantIsolation => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound | StoreError::TenantIsolation => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        StoreError::AlreadyExists => json_error(StatusCode::CONFLICT, "already_exists", "record already exists"),
        e @ StoreError::Conflict { .. } => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        StoreError::Database(msg) => {
            tracing::error!(error = %msg, "store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn job_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job not found: {id}")),
        JobStoreError::TenantIsolation => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        JobStoreError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "already_exists", format!("job already exists: {id}"))
        }
        JobStoreError::NotQueued(id) => json_error(StatusCode::CONFLICT, "not_queued", format!("job {id} is no longer queued")),
        JobStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "job store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "job_store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 with a consistent body when malformed.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(domain_error_to_response)
}
