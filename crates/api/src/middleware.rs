use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use workhub_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

/// Header carrying the caller's tenant. Authentication sits in front of this
/// service and is trusted to have set it.
pub const TENANT_HEADER: &str = "x-tenant-id";

pub async fn tenant_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let tenant_id = match extract_tenant(req.headers()) {
        Ok(t) => t,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, "missing_tenant", message),
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    next.run(req).await
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, String> {
    let header = headers
        .get(TENANT_HEADER)
        .ok_or_else(|| "X-Tenant-Id header is required".to_string())?;

    let header = header
        .to_str()
        .map_err(|_| "X-Tenant-Id header must be ASCII".to_string())?;

    header.parse::<TenantId>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_tenant_from_header() {
        let tenant = TenantId::new();
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_str(&tenant.to_string()).unwrap());
        assert_eq!(extract_tenant(&headers).unwrap(), tenant);
    }

    #[test]
    fn rejects_missing_or_malformed_tenant() {
        assert!(extract_tenant(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("acme"));
        assert!(extract_tenant(&headers).is_err());
    }
}
