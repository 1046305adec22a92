//! Queue payloads for report delivery and the handler that runs them.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use workhub_core::TenantId;
use workhub_reports::DeliveryLogId;

use super::service::ReportDeliveryService;
use super::DeliveryError;
use crate::jobs::{Job, JobHandler, JobKind, JobResult};

/// Send the email for one pending delivery log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReportEmailJob {
    pub delivery_log_id: DeliveryLogId,
}

impl SendReportEmailJob {
    pub fn new(delivery_log_id: DeliveryLogId) -> Self {
        Self { delivery_log_id }
    }

    pub fn into_job(self, tenant_id: TenantId) -> Job {
        Job::new(
            tenant_id,
            JobKind::SendReportEmail,
            serde_json::json!({ "delivery_log_id": self.delivery_log_id }),
        )
    }

    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        job.payload_as()
    }
}

/// Re-open a failed delivery log once its retry is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryFailedReportDeliveryJob {
    pub delivery_log_id: DeliveryLogId,
}

impl RetryFailedReportDeliveryJob {
    pub fn new(delivery_log_id: DeliveryLogId) -> Self {
        Self { delivery_log_id }
    }

    pub fn into_job(self, tenant_id: TenantId) -> Job {
        Job::new(
            tenant_id,
            JobKind::RetryFailedReportDelivery,
            serde_json::json!({ "delivery_log_id": self.delivery_log_id }),
        )
    }

    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        job.payload_as()
    }
}

/// Runs both report delivery jobs against the delivery service.
///
/// Mail failures never fail the job: the service records them on the log and
/// schedules its own retries. Only infrastructure errors that may clear up
/// (storage) are handed back to the job queue for a retry.
pub struct ReportDeliveryJobHandler {
    service: Arc<ReportDeliveryService>,
}

impl ReportDeliveryJobHandler {
    pub fn new(service: Arc<ReportDeliveryService>) -> Self {
        Self { service }
    }

    fn settle<T>(job: &Job, result: Result<T, DeliveryError>) -> JobResult {
        match result {
            Ok(_) => JobResult::Success,
            Err(e) if e.is_transient() => JobResult::Failure(e.to_string()),
            Err(e) => {
                warn!(job_id = %job.id, tenant_id = %job.tenant_id, error = %e, "report job dropped");
                JobResult::Success
            }
        }
    }
}

#[async_trait]
impl JobHandler for ReportDeliveryJobHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        match &job.kind {
            JobKind::SendReportEmail => match SendReportEmailJob::from_job(job) {
                Ok(payload) => Self::settle(job, self.service.send(job.tenant_id, payload.delivery_log_id).await),
                Err(e) => JobResult::Failure(format!("invalid payload: {e}")),
            },
            JobKind::RetryFailedReportDelivery => match RetryFailedReportDeliveryJob::from_job(job) {
                Ok(payload) => Self::settle(job, self.service.retry(job.tenant_id, payload.delivery_log_id).await),
                Err(e) => JobResult::Failure(format!("invalid payload: {e}")),
            },
            other => JobResult::Failure(format!("not a report job: {}", other.type_name())),
        }
    }
}
