use axum::{Router, routing::get};

pub mod deliveries;
pub mod jobs;
pub mod reports;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/notifications", get(system::notifications))
        .nest("/reports", reports::router())
        .nest("/deliveries", deliveries::router())
        .nest("/jobs", jobs::router())
}
