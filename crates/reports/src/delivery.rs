//! Per-recipient delivery log and its state machine.
//!
//! ```text
//! pending ──mark_delivered──▶ delivered (terminal)
//!    │
//!    └──mark_failed──▶ failed ──reset_for_retry──▶ pending   (while can_retry)
//!                         │
//!                         └──give_up──▶ failed + exhausted  ──manual_retry──▶ pending
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use workhub_core::{DomainError, DomainResult, TenantId};

use crate::recipient::Recipient;
use crate::report::ReportId;

aggregate_newtype!(
    /// Identifier of one (report, recipient) delivery record.
    DeliveryLogId
);

/// Delivery status of a single log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown delivery status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of delivering one report to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDeliveryLog {
    pub id: DeliveryLogId,
    pub tenant_id: TenantId,
    pub report_id: ReportId,
    pub recipient: Recipient,
    pub status: DeliveryStatus,
    /// Send attempts made so far (successful or not).
    pub attempts: u32,
    /// Upper bound on automatic attempts.
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the scheduled automatic retry is due, if one is scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set once automatic retries have been given up on.
    pub exhausted: bool,
    /// Bumped on every state change; stores use it for optimistic concurrency.
    pub version: u64,
}

impl ReportDeliveryLog {
    /// New pending log. `max_attempts` is clamped to at least one attempt.
    pub fn pending(
        tenant_id: TenantId,
        report_id: ReportId,
        recipient: Recipient,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryLogId::new(),
            tenant_id,
            report_id,
            recipient,
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
            delivered_at: None,
            next_retry_at: None,
            exhausted: false,
            version: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    /// Whether an automatic retry is still allowed.
    pub fn can_retry(&self) -> bool {
        self.status == DeliveryStatus::Failed && !self.exhausted && self.attempts < self.max_attempts
    }

    /// Whether the retry is scheduled and due at `now`.
    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        self.can_retry() && self.next_retry_at.is_some_and(|at| at <= now)
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require_pending("deliver")?;
        self.attempts += 1;
        self.status = DeliveryStatus::Delivered;
        self.last_error = None;
        self.next_retry_at = None;
        self.last_attempt_at = Some(now);
        self.delivered_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Record a failed attempt. Returns whether attempts remain for an
    /// automatic retry.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<bool> {
        self.require_pending("fail")?;
        self.attempts += 1;
        self.status = DeliveryStatus::Failed;
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        self.last_attempt_at = Some(now);
        self.touch(now);
        Ok(self.can_retry())
    }

    pub fn schedule_retry(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.can_retry() {
            return Err(self.transition_error("schedule a retry for"));
        }
        self.next_retry_at = Some(at);
        self.touch(now);
        Ok(())
    }

    /// Stop retrying automatically. The log stays `failed`.
    pub fn give_up(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DeliveryStatus::Failed {
            return Err(self.transition_error("give up on"));
        }
        self.exhausted = true;
        self.next_retry_at = None;
        self.touch(now);
        Ok(())
    }

    /// Re-open an eligible failed log for the next automatic attempt.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.can_retry() {
            return Err(self.transition_error("retry"));
        }
        self.status = DeliveryStatus::Pending;
        self.next_retry_at = None;
        self.touch(now);
        Ok(())
    }

    /// Operator-initiated retry: re-opens any failed log with a fresh attempt budget.
    pub fn manual_retry(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DeliveryStatus::Failed {
            return Err(self.transition_error("manually retry"));
        }
        self.status = DeliveryStatus::Pending;
        self.attempts = 0;
        self.exhausted = false;
        self.next_retry_at = None;
        self.touch(now);
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    fn require_pending(&self, action: &str) -> DomainResult<()> {
        if self.status == DeliveryStatus::Pending {
            Ok(())
        } else {
            Err(self.transition_error(action))
        }
    }

    fn transition_error(&self, action: &str) -> DomainError {
        DomainError::transition(format!(
            "cannot {action} delivery {} in status {} (attempts {}/{}, exhausted: {})",
            self.id, self.status, self.attempts, self.max_attempts, self.exhausted
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::EmailAddress;
    use chrono::Duration;

    fn log(max_attempts: u32) -> ReportDeliveryLog {
        let recipient = Recipient::new(EmailAddress::parse("ops@example.com").unwrap());
        ReportDeliveryLog::pending(TenantId::new(), ReportId::new(), recipient, max_attempts, Utc::now())
    }

    #[test]
    fn delivered_is_terminal() {
        let mut l = log(3);
        let now = Utc::now();
        l.mark_delivered(now).unwrap();

        assert_eq!(l.status, DeliveryStatus::Delivered);
        assert_eq!(l.attempts, 1);
        assert_eq!(l.delivered_at, Some(now));
        assert_eq!(l.version, 1);
        assert!(l.mark_delivered(now).is_err());
        assert!(l.mark_failed("late", now).is_err());
        assert!(l.manual_retry(now).is_err());
        assert!(l.give_up(now).is_err());
    }

    #[test]
    fn failure_then_retry_until_budget_is_spent() {
        let mut l = log(2);
        let now = Utc::now();

        assert!(l.mark_failed("smtp timeout", now).unwrap());
        assert!(l.can_retry());
        l.schedule_retry(now + Duration::seconds(60), now).unwrap();
        assert!(!l.retry_due(now));
        assert!(l.retry_due(now + Duration::seconds(60)));

        l.reset_for_retry(now).unwrap();
        assert!(l.is_pending());
        assert_eq!(l.next_retry_at, None);

        assert!(!l.mark_failed("smtp timeout", now).unwrap());
        assert_eq!(l.attempts, 2);
        assert!(!l.can_retry());
        assert!(l.schedule_retry(now, now).is_err());
        assert!(l.reset_for_retry(now).is_err());

        l.give_up(now).unwrap();
        assert!(l.exhausted);
        assert_eq!(l.status, DeliveryStatus::Failed);
    }

    #[test]
    fn give_up_blocks_automatic_retry_even_with_budget_left() {
        let mut l = log(5);
        let now = Utc::now();
        l.mark_failed("mailbox does not exist", now).unwrap();
        l.give_up(now).unwrap();
        assert!(!l.can_retry());
        assert!(l.reset_for_retry(now).is_err());
    }

    #[test]
    fn manual_retry_resets_budget() {
        let mut l = log(1);
        let now = Utc::now();
        l.mark_failed("boom", now).unwrap();
        l.give_up(now).unwrap();

        l.manual_retry(now).unwrap();
        assert!(l.is_pending());
        assert_eq!(l.attempts, 0);
        assert!(!l.exhausted);
        assert_eq!(l.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn pending_cannot_be_manually_retried() {
        let mut l = log(3);
        assert!(l.manual_retry(Utc::now()).is_err());
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        assert_eq!(log(0).max_attempts, 1);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("FAILED".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Failed);
        assert!("bounced".parse::<DeliveryStatus>().is_err());
    }
}
