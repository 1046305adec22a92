//! Report delivery orchestration.
//!
//! Fans a report out to its recipients (one delivery log and one send job per
//! recipient), records each send outcome on the log, and decides whether a
//! failure is retried later or given up on. Delivery is at-least-once: a log is
//! only marked delivered after the mailer accepted the message.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use workhub_core::TenantId;
use workhub_reports::{
    DeliveryLogId, DeliveryStatus, DeliverySummary, Recipient, Report, ReportDeliveryLog, ReportDeliveryState,
    ReportId,
};

use super::config::DeliveryConfig;
use super::error::DeliveryError;
use super::jobs::{RetryFailedReportDeliveryJob, SendReportEmailJob};
use crate::artifacts::{ArtifactSource, ReportArtifact};
use crate::jobs::JobStore;
use crate::mail::{Attachment, Mailer, OutgoingEmail};
use crate::notifications::{Notification, NotificationKind, NotificationSink};
use crate::stores::{DeliveryLogStore, PendingCursor, ReportStore, StoreError};

/// What a send attempt did to its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The log was not pending (already delivered, or failed and awaiting retry).
    Skipped(DeliveryStatus),
    /// Failed; another attempt is scheduled.
    RetryScheduled { at: DateTime<Utc> },
    /// Failed; automatic delivery was given up and the owner notified.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The log was re-opened and a send job enqueued.
    Requeued,
    /// Not eligible any more (delivered, exhausted, already re-opened, or raced).
    NotEligible,
}

/// Everything the delivery service talks to.
#[derive(Clone)]
pub struct DeliveryCollaborators {
    pub reports: Arc<dyn ReportStore>,
    pub logs: Arc<dyn DeliveryLogStore>,
    pub mailer: Arc<dyn Mailer>,
    pub artifacts: Arc<dyn ArtifactSource>,
    pub notifications: Arc<dyn NotificationSink>,
    pub jobs: Arc<dyn JobStore>,
}

pub struct ReportDeliveryService {
    reports: Arc<dyn ReportStore>,
    logs: Arc<dyn DeliveryLogStore>,
    mailer: Arc<dyn Mailer>,
    artifacts: Arc<dyn ArtifactSource>,
    notifications: Arc<dyn NotificationSink>,
    jobs: Arc<dyn JobStore>,
    config: DeliveryConfig,
}

impl ReportDeliveryService {
    pub fn new(collaborators: DeliveryCollaborators, config: DeliveryConfig) -> Self {
        Self {
            reports: collaborators.reports,
            logs: collaborators.logs,
            mailer: collaborators.mailer,
            artifacts: collaborators.artifacts,
            notifications: collaborators.notifications,
            jobs: collaborators.jobs,
            config,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Record a freshly generated report so it can be delivered.
    #[instrument(skip(self, report), fields(tenant_id = %report.tenant_id, report_id = %report.id), err)]
    pub async fn register_report(&self, report: Report) -> Result<Report, DeliveryError> {
        self.reports.insert(&report).await?;
        info!(kind = %report.kind, artifact_key = %report.artifact_key, "report registered");
        Ok(report)
    }

    pub async fn get_report(&self, tenant_id: TenantId, report_id: ReportId) -> Result<Report, DeliveryError> {
        match self.reports.get(tenant_id, report_id).await {
            Ok(Some(report)) => Ok(report),
            Ok(None) | Err(StoreError::TenantIsolation) => Err(DeliveryError::ReportNotFound(report_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_reports(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Report>, DeliveryError> {
        Ok(self.reports.list(tenant_id, limit).await?)
    }

    pub async fn get_delivery(
        &self,
        tenant_id: TenantId,
        log_id: DeliveryLogId,
    ) -> Result<ReportDeliveryLog, DeliveryError> {
        match self.logs.get(tenant_id, log_id).await {
            Ok(Some(log)) => Ok(log),
            Ok(None) | Err(StoreError::TenantIsolation) => Err(DeliveryError::DeliveryNotFound(log_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn deliveries_for_report(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
    ) -> Result<Vec<ReportDeliveryLog>, DeliveryError> {
        self.get_report(tenant_id, report_id).await?;
        Ok(self.logs.list_for_report(tenant_id, report_id).await?)
    }

    pub async fn deliveries_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, DeliveryError> {
        Ok(self.logs.list_by_status(tenant_id, status, limit).await?)
    }

    pub async fn summary(&self, tenant_id: TenantId, report_id: ReportId) -> Result<DeliverySummary, DeliveryError> {
        let logs = self.deliveries_for_report(tenant_id, report_id).await?;
        Ok(DeliverySummary::from_logs(&logs))
    }

    /// Fan a report out to `recipients`.
    ///
    /// Duplicate addresses collapse onto their first occurrence. A recipient
    /// that already has a pending or delivered log for this report keeps it; a
    /// failed log is reopened with a fresh attempt budget and sent again.
    /// Returns one log per distinct recipient.
    #[instrument(skip(self, recipients), fields(tenant_id = %tenant_id, report_id = %report_id), err)]
    pub async fn deliver(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
        recipients: Vec<Recipient>,
    ) -> Result<Vec<ReportDeliveryLog>, DeliveryError> {
        let report = self.get_report(tenant_id, report_id).await?;
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let existing = self.logs.list_for_report(tenant_id, report_id).await?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let now = Utc::now();

        for recipient in recipients {
            if !seen.insert(recipient.email.clone()) {
                continue;
            }
            if let Some(log) = existing.iter().find(|l| l.recipient.email == recipient.email) {
                if log.status != DeliveryStatus::Failed {
                    debug!(delivery_log_id = %log.id, status = %log.status, "recipient already has a delivery log");
                    out.push(log.clone());
                    continue;
                }

                let mut log = log.clone();
                let expected = log.version;
                log.manual_retry(now)?;
                self.logs.update(&log, expected).await?;
                self.jobs
                    .enqueue(SendReportEmailJob::new(log.id).into_job(tenant_id))?;
                info!(delivery_log_id = %log.id, to = %log.recipient.email, "failed delivery reopened");
                out.push(log);
                continue;
            }

            let log = ReportDeliveryLog::pending(tenant_id, report.id, recipient, self.config.max_attempts, now);
            self.logs.insert(&log).await?;
            self.jobs
                .enqueue(SendReportEmailJob::new(log.id).into_job(tenant_id))?;
            out.push(log);
        }

        info!(recipients = out.len(), "report delivery fanned out");
        Ok(out)
    }

    /// Attempt to email one pending log. Called by the send job.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, delivery_log_id = %log_id), err)]
    pub async fn send(&self, tenant_id: TenantId, log_id: DeliveryLogId) -> Result<SendOutcome, DeliveryError> {
        let log = self.get_delivery(tenant_id, log_id).await?;
        if !log.is_pending() {
            debug!(status = %log.status, "delivery not pending; skipping send");
            return Ok(SendOutcome::Skipped(log.status));
        }
        let report = self.get_report(tenant_id, log.report_id).await?;

        let artifact = match self.artifacts.fetch(tenant_id, &report.artifact_key).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let retryable = e.is_transient();
                return self.record_failure(&report, log, e.to_string(), retryable).await;
            }
        };

        let email = compose_email(&report, &log.recipient, artifact);
        match self.mailer.send(&email).await {
            Ok(()) => self.record_success(&report, log).await,
            Err(e) => {
                let retryable = e.is_retryable();
                self.record_failure(&report, log, e.to_string(), retryable).await
            }
        }
    }

    async fn record_success(&self, report: &Report, mut log: ReportDeliveryLog) -> Result<SendOutcome, DeliveryError> {
        let now = Utc::now();
        let expected = log.version;
        log.mark_delivered(now)?;
        self.logs.update(&log, expected).await?;
        info!(
            report_id = %report.id,
            delivery_log_id = %log.id,
            attempt = log.attempts,
            to = %log.recipient.email,
            "report delivered"
        );

        let logs = self.logs.list_for_report(report.tenant_id, report.id).await?;
        if DeliverySummary::from_logs(&logs).state() == ReportDeliveryState::Delivered {
            self.notifications.notify(Notification::new(
                report.tenant_id,
                report.owner_id,
                NotificationKind::ReportDelivered,
                report.id,
                format!("\"{}\" was delivered to all {} recipients.", report.title, logs.len()),
            ));
        }
        Ok(SendOutcome::Delivered)
    }

    /// Record a failed attempt and decide what happens next.
    ///
    /// Retryable failures with attempts left schedule a retry job; anything
    /// else gives up and notifies the report owner.
    #[instrument(
        skip(self, report, log, error),
        fields(tenant_id = %log.tenant_id, report_id = %report.id, delivery_log_id = %log.id),
        err
    )]
    pub async fn record_failure(
        &self,
        report: &Report,
        mut log: ReportDeliveryLog,
        error: String,
        retryable: bool,
    ) -> Result<SendOutcome, DeliveryError> {
        let now = Utc::now();
        let expected = log.version;
        let attempts_left = log.mark_failed(error.clone(), now)?;

        if retryable && attempts_left {
            let at = now
                .checked_add_signed(self.config.retry_delay(log.attempts))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            log.schedule_retry(at, now)?;
            self.logs.update(&log, expected).await?;
            warn!(
                attempt = log.attempts,
                max_attempts = log.max_attempts,
                retry_at = %at,
                error = %error,
                "report delivery failed; retry scheduled"
            );

            // A lost retry job is picked up again by the retry sweep.
            let job = RetryFailedReportDeliveryJob::new(log.id).into_job(log.tenant_id).scheduled_at(at);
            if let Err(e) = self.jobs.enqueue(job) {
                warn!(error = %e, "failed to enqueue retry job; leaving it to the retry sweep");
            }
            return Ok(SendOutcome::RetryScheduled { at });
        }

        log.give_up(now)?;
        self.logs.update(&log, expected).await?;
        warn!(
            attempt = log.attempts,
            retryable,
            error = %error,
            "report delivery given up"
        );

        self.notifications.notify(
            Notification::new(
                report.tenant_id,
                report.owner_id,
                NotificationKind::ReportDeliveryFailed,
                report.id,
                format!(
                    "\"{}\" could not be delivered to {} after {} attempt(s): {}",
                    report.title,
                    log.recipient.email,
                    log.attempts,
                    error
                ),
            )
            .for_delivery(log.id),
        );
        Ok(SendOutcome::GaveUp)
    }

    /// Re-open a failed log whose scheduled retry is due and enqueue a send job.
    /// Called by the retry job.
    pub async fn retry(&self, tenant_id: TenantId, log_id: DeliveryLogId) -> Result<RetryOutcome, DeliveryError> {
        self.retry_at(tenant_id, log_id, Utc::now()).await
    }

    /// A retry job left over from an earlier failure finds `next_retry_at`
    /// pushed past `now` and does nothing, so it cannot skip the backoff.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, delivery_log_id = %log_id), err)]
    async fn retry_at(
        &self,
        tenant_id: TenantId,
        log_id: DeliveryLogId,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, DeliveryError> {
        let mut log = self.get_delivery(tenant_id, log_id).await?;
        if !log.retry_due(now) {
            debug!(
                status = %log.status,
                exhausted = log.exhausted,
                next_retry_at = ?log.next_retry_at,
                "delivery not due for retry"
            );
            return Ok(RetryOutcome::NotEligible);
        }

        let expected = log.version;
        log.reset_for_retry(Utc::now())?;
        match self.logs.update(&log, expected).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                debug!("delivery changed concurrently; retry skipped");
                return Ok(RetryOutcome::NotEligible);
            }
            Err(e) => return Err(e.into()),
        }

        self.jobs
            .enqueue(SendReportEmailJob::new(log.id).into_job(tenant_id))?;
        info!(attempt = log.attempts + 1, "report delivery requeued");
        Ok(RetryOutcome::Requeued)
    }

    /// Requeue every failed log whose scheduled retry is due at `now`.
    /// Returns how many were requeued.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> Result<usize, DeliveryError> {
        let due = self.logs.due_for_retry(now, self.config.sweep_batch).await?;
        let mut requeued = 0;
        for log in due {
            match self.retry_at(log.tenant_id, log.id, now).await {
                Ok(RetryOutcome::Requeued) => requeued += 1,
                Ok(RetryOutcome::NotEligible) => {}
                Err(e) => warn!(delivery_log_id = %log.id, error = %e, "retry sweep failed for delivery"),
            }
        }
        if requeued > 0 {
            info!(requeued, "retry sweep requeued deliveries");
        }
        Ok(requeued)
    }

    /// Queue a send job for every pending log.
    ///
    /// Meant for process start: the job queue does not survive restarts, so any
    /// log still pending at that point has lost its send job.
    pub async fn resume_pending(&self) -> Result<usize, DeliveryError> {
        let batch = self.config.sweep_batch.max(1);
        let mut cursor = None;
        let mut resumed = 0;
        loop {
            let page = self.logs.pending(cursor, batch).await?;
            let full = page.len() == batch;
            for log in &page {
                self.jobs
                    .enqueue(SendReportEmailJob::new(log.id).into_job(log.tenant_id))?;
            }
            resumed += page.len();
            cursor = page.last().map(PendingCursor::of);
            if !full {
                break;
            }
        }
        if resumed > 0 {
            info!(resumed, "pending deliveries resumed");
        }
        Ok(resumed)
    }

    /// Operator action: re-open any failed log with a fresh attempt budget.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, delivery_log_id = %log_id), err)]
    pub async fn manual_retry(
        &self,
        tenant_id: TenantId,
        log_id: DeliveryLogId,
    ) -> Result<ReportDeliveryLog, DeliveryError> {
        let mut log = self.get_delivery(tenant_id, log_id).await?;
        let expected = log.version;
        log.manual_retry(Utc::now())?;
        self.logs.update(&log, expected).await?;
        self.jobs
            .enqueue(SendReportEmailJob::new(log.id).into_job(tenant_id))?;
        info!(to = %log.recipient.email, "manual delivery retry requested");
        Ok(log)
    }
}

fn compose_email(report: &Report, recipient: &Recipient, artifact: ReportArtifact) -> OutgoingEmail {
    let text_body = format!(
        "Hello {name},\n\n\
         Please find attached the {kind} report \"{title}\" covering {period}.\n\n\
         This message was sent automatically by WorkHub.\n",
        name = recipient.display_name(),
        kind = report.kind,
        title = report.title,
        period = report.period,
    );

    OutgoingEmail {
        to: recipient.email.clone(),
        to_name: recipient.name.clone(),
        subject: report.email_subject(),
        text_body,
        attachments: vec![Attachment {
            filename: artifact.filename,
            content_type: artifact.content_type,
            bytes: artifact.bytes,
        }],
    }
}
