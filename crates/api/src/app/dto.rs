use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use workhub_core::{DepartmentId, TenantId, UserId};
use workhub_reports::{
    DeliveryStatus, DeliverySummary, EmailAddress, Recipient, Report, ReportDeliveryState, ReportId, ReportKind,
    ReportPeriod,
};

use crate::app::errors;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterReportRequest {
    pub owner_id: String,
    pub department_id: Option<String>,
    pub kind: String,
    pub title: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub artifact_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RecipientRequest {
    pub email: String,
    pub name: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeliverReportRequest {
    pub recipients: Vec<RecipientRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl DeliveryListQuery {
    pub fn status(&self) -> Result<Option<DeliveryStatus>, axum::response::Response> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(errors::domain_error_to_response),
        }
    }

    pub fn limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// -------------------------
// Mapping
// -------------------------

pub fn report_from_request(
    tenant_id: TenantId,
    body: RegisterReportRequest,
) -> Result<Report, axum::response::Response> {
    let owner_id: UserId = errors::parse_id(&body.owner_id)?;
    let period = ReportPeriod::new(body.period_start, body.period_end).map_err(errors::domain_error_to_response)?;
    let report = Report::new(
        tenant_id,
        owner_id,
        ReportKind::from(body.kind.trim().to_lowercase()),
        body.title,
        period,
        body.artifact_key,
    )
    .map_err(errors::domain_error_to_response)?;

    match body.department_id {
        Some(raw) => {
            let department: DepartmentId = errors::parse_id(&raw)?;
            Ok(report.for_department(department))
        }
        None => Ok(report),
    }
}

pub fn recipients_from_request(body: DeliverReportRequest) -> Result<Vec<Recipient>, axum::response::Response> {
    body.recipients
        .into_iter()
        .map(|r| -> Result<Recipient, axum::response::Response> {
            let email = EmailAddress::parse(&r.email).map_err(errors::domain_error_to_response)?;
            let mut recipient = Recipient::new(email);
            if let Some(name) = r.name {
                recipient = recipient.named(name);
            }
            if let Some(raw) = r.user_id {
                recipient = recipient.user(errors::parse_id(&raw)?);
            }
            Ok(recipient)
        })
        .collect()
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct DeliverySummaryResponse {
    pub report_id: ReportId,
    pub state: ReportDeliveryState,
    #[serde(flatten)]
    pub counts: DeliverySummary,
}

impl DeliverySummaryResponse {
    pub fn new(report_id: ReportId, summary: DeliverySummary) -> Self {
        Self {
            report_id,
            state: summary.state(),
            counts: summary,
        }
    }
}
