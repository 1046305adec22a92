use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};

use workhub_api::app::services::{AppServices, BackgroundWorkers, Backends};
use workhub_core::TenantId;
use workhub_infra::artifacts::InMemoryArtifactSource;
use workhub_infra::delivery::DeliveryConfig;
use workhub_infra::jobs::RetryPolicy;
use workhub_infra::mail::{MailError, RecordingMailer};

struct TestServer {
    base_url: String,
    mailer: Arc<RecordingMailer>,
    artifacts: Arc<InMemoryArtifactSource>,
    handle: tokio::task::JoinHandle<()>,
    _workers: BackgroundWorkers,
}

impl TestServer {
    async fn spawn() -> Self {
        let mailer = Arc::new(RecordingMailer::new());
        let artifacts = Arc::new(InMemoryArtifactSource::new());

        let backends = Backends {
            mailer: mailer.clone(),
            artifacts: artifacts.clone(),
            ..Backends::in_memory()
        };

        // Retries are due immediately so failure paths settle quickly.
        let config = DeliveryConfig {
            max_attempts: 3,
            backoff: RetryPolicy::fixed(3, Duration::ZERO),
            sweep_batch: 100,
        };
        let services = Arc::new(AppServices::new(backends, config));
        let workers = services.start_workers(Duration::from_millis(5), Duration::from_millis(50));

        // Build app (same router as prod), but bind to an ephemeral port.
        let app = workhub_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            mailer,
            artifacts,
            handle,
            _workers: workers,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn register_report(client: &reqwest::Client, srv: &TestServer, tenant: TenantId) -> String {
    srv.artifacts.put(tenant, "2024/06/sales.pdf", b"%PDF-1.7".to_vec());

    let res = client
        .post(srv.url("/reports"))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&json!({
            "owner_id": workhub_core::UserId::new().to_string(),
            "kind": "sales",
            "title": "June sales",
            "period_start": "2024-06-01",
            "period_end": "2024-06-30",
            "artifact_key": "2024/06/sales.pdf",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["kind"], "sales");
    body["id"].as_str().unwrap().to_string()
}

async fn deliver(
    client: &reqwest::Client,
    srv: &TestServer,
    tenant: TenantId,
    report_id: &str,
    emails: &[&str],
) -> Vec<Value> {
    let recipients: Vec<Value> = emails.iter().map(|e| json!({ "email": e })).collect();
    let res = client
        .post(srv.url(&format!("/reports/{report_id}/deliveries")))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&json!({ "recipients": recipients }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    res.json().await.unwrap()
}

/// Poll the delivery summary until it reaches `state`.
async fn summary_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    tenant: TenantId,
    report_id: &str,
    state: &str,
) -> Value {
    // Delivery runs on background workers; poll briefly until it settles.
    let mut last = Value::Null;
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/reports/{report_id}/delivery-summary")))
            .header("X-Tenant-Id", tenant.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        last = res.json().await.unwrap();
        if last["state"] == state {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("report did not reach state {state} in time; last summary: {last}");
}

/// Poll the tenant's notifications until one matches.
async fn notification_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    tenant: TenantId,
    matches: impl Fn(&Value) -> bool,
) -> Vec<Value> {
    let mut notes = Vec::new();
    for _ in 0..100 {
        let res = client
            .get(srv.url("/notifications"))
            .header("X-Tenant-Id", tenant.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        notes = res.json().await.unwrap();
        if notes.iter().any(&matches) {
            return notes;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("no matching notification; got: {notes:?}");
}

#[tokio::test]
async fn health_is_public_but_tenant_routes_need_the_header() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/reports")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_tenant");

    let res = client
        .get(srv.url("/reports"))
        .header("X-Tenant-Id", "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn report_is_delivered_to_every_recipient() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();

    let report_id = register_report(&client, &srv, tenant).await;
    let logs = deliver(&client, &srv, tenant, &report_id, &["ceo@example.com", "cfo@example.com"]).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l["status"] == "pending"));

    let summary = summary_eventually(&client, &srv, tenant, &report_id, "delivered").await;
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["delivered"], 2);
    assert_eq!(srv.mailer.sent().len(), 2);
    assert_eq!(srv.mailer.sent_to("ceo@example.com")[0].subject, "June sales (2024-06-01 to 2024-06-30)");

    let res = client
        .get(srv.url(&format!("/reports/{report_id}/deliveries")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let logs: Vec<Value> = res.json().await.unwrap();
    assert!(logs.iter().all(|l| l["status"] == "delivered" && l["attempts"] == 1));

    let notes = notification_eventually(&client, &srv, tenant, |n| n["kind"] == "report_delivered").await;
    assert!(notes.iter().all(|n| n["kind"] == "report_delivered"));
}

#[tokio::test]
async fn failing_recipient_is_given_up_then_manually_retried() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    srv.mailer
        .fail_address("bounce@example.com", MailError::Transient("421 busy".to_string()));

    let report_id = register_report(&client, &srv, tenant).await;
    deliver(&client, &srv, tenant, &report_id, &["ok@example.com", "bounce@example.com"]).await;

    let summary = summary_eventually(&client, &srv, tenant, &report_id, "partially_delivered").await;
    assert_eq!(summary["exhausted"], 1);

    let res = client
        .get(srv.url("/deliveries?status=failed"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let failed: Vec<Value> = res.json().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["recipient"]["email"], "bounce@example.com");
    assert_eq!(failed[0]["attempts"], 3);
    assert_eq!(failed[0]["exhausted"], true);
    let failed_id = failed[0]["id"].as_str().unwrap().to_string();

    notification_eventually(&client, &srv, tenant, |n| {
        n["kind"] == "report_delivery_failed" && n["delivery_log_id"] == failed_id.as_str()
    })
    .await;

    srv.mailer.clear_failures();
    let res = client
        .post(srv.url(&format!("/deliveries/{failed_id}/retry")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let reopened: Value = res.json().await.unwrap();
    assert_eq!(reopened["attempts"], 0);

    summary_eventually(&client, &srv, tenant, &report_id, "delivered").await;

    // Delivered logs cannot be retried again.
    let res = client
        .post(srv.url(&format!("/deliveries/{failed_id}/retry")))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn requests_are_validated() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let report_id = register_report(&client, &srv, tenant).await;

    let res = client
        .post(srv.url(&format!("/reports/{report_id}/deliveries")))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&json!({ "recipients": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url(&format!("/reports/{report_id}/deliveries")))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&json!({ "recipients": [{ "email": "not-an-address" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/reports/not-a-uuid"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/deliveries?status=bounced"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/reports"))
        .header("X-Tenant-Id", tenant.to_string())
        .json(&json!({
            "owner_id": workhub_core::UserId::new().to_string(),
            "kind": "sales",
            "title": "Backwards",
            "period_start": "2024-06-30",
            "period_end": "2024-06-01",
            "artifact_key": "x.pdf",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenant_isolation_blocks_cross_tenant_reads_and_retries() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant1 = TenantId::new();
    let tenant2 = TenantId::new();

    let report_id = register_report(&client, &srv, tenant1).await;
    let logs = deliver(&client, &srv, tenant1, &report_id, &["a@example.com"]).await;
    let log_id = logs[0]["id"].as_str().unwrap();

    let res = client
        .get(srv.url(&format!("/reports/{report_id}")))
        .header("X-Tenant-Id", tenant2.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url(&format!("/reports/{report_id}/deliveries")))
        .header("X-Tenant-Id", tenant2.to_string())
        .json(&json!({ "recipients": [{ "email": "spy@example.com" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url(&format!("/deliveries/{log_id}/retry")))
        .header("X-Tenant-Id", tenant2.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/reports"))
        .header("X-Tenant-Id", tenant2.to_string())
        .send()
        .await
        .unwrap();
    let reports: Vec<Value> = res.json().await.unwrap();
    assert!(reports.is_empty());
}

#[tokio::test]
async fn job_stats_reflect_processed_deliveries() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();

    let report_id = register_report(&client, &srv, tenant).await;
    deliver(&client, &srv, tenant, &report_id, &["a@example.com"]).await;
    summary_eventually(&client, &srv, tenant, &report_id, "delivered").await;

    // The executor persists job completion right after the handler returns.
    let mut stats = Value::Null;
    for _ in 0..100 {
        let res = client
            .get(srv.url("/jobs/stats"))
            .header("X-Tenant-Id", tenant.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        stats = res.json().await.unwrap();
        if stats["completed"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["dead_lettered"], 0);

    let res = client
        .get(srv.url("/jobs/dead-letters"))
        .header("X-Tenant-Id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let entries: Vec<Value> = res.json().await.unwrap();
    assert!(entries.is_empty());
}
