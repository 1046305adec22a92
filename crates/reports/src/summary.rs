use serde::{Deserialize, Serialize};

use crate::delivery::{DeliveryStatus, ReportDeliveryLog};

/// Overall delivery state of a report across all of its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportDeliveryState {
    NotSent,
    InProgress,
    Delivered,
    PartiallyDelivered,
    Failed,
}

/// Per-status counts over a report's delivery logs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub total: usize,
    pub pending: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failed logs that will not be retried automatically.
    pub exhausted: usize,
}

impl DeliverySummary {
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a ReportDeliveryLog>) -> Self {
        let mut summary = Self::default();
        for log in logs {
            summary.total += 1;
            match log.status {
                DeliveryStatus::Pending => summary.pending += 1,
                DeliveryStatus::Delivered => summary.delivered += 1,
                DeliveryStatus::Failed => {
                    summary.failed += 1;
                    if !log.can_retry() {
                        summary.exhausted += 1;
                    }
                }
            }
        }
        summary
    }

    pub fn state(&self) -> ReportDeliveryState {
        if self.total == 0 {
            return ReportDeliveryState::NotSent;
        }
        // Failed-but-retryable logs are still in flight.
        if self.pending > 0 || self.failed > self.exhausted {
            return ReportDeliveryState::InProgress;
        }
        if self.delivered == self.total {
            ReportDeliveryState::Delivered
        } else if self.delivered == 0 {
            ReportDeliveryState::Failed
        } else {
            ReportDeliveryState::PartiallyDelivered
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use workhub_core::TenantId;

    use super::*;
    use crate::{EmailAddress, Recipient, ReportId};

    fn logs(n: usize) -> Vec<ReportDeliveryLog> {
        let tenant = TenantId::new();
        let report = ReportId::new();
        (0..n)
            .map(|i| {
                let email = EmailAddress::parse(&format!("r{i}@example.com")).unwrap();
                ReportDeliveryLog::pending(tenant, report, Recipient::new(email), 2, Utc::now())
            })
            .collect()
    }

    #[test]
    fn empty_report_was_never_sent() {
        assert_eq!(DeliverySummary::from_logs(&Vec::<ReportDeliveryLog>::new()).state(), ReportDeliveryState::NotSent);
    }

    #[test]
    fn states_follow_log_outcomes() {
        let now = Utc::now();
        let mut l = logs(3);
        let s = DeliverySummary::from_logs(&l);
        assert_eq!(s.pending, 3);
        assert_eq!(s.state(), ReportDeliveryState::InProgress);

        l[0].mark_delivered(now).unwrap();
        l[1].mark_delivered(now).unwrap();
        l[2].mark_failed("x", now).unwrap();
        let s = DeliverySummary::from_logs(&l);
        assert_eq!((s.delivered, s.failed, s.exhausted), (2, 1, 0));
        assert_eq!(s.state(), ReportDeliveryState::InProgress);

        l[2].give_up(now).unwrap();
        let s = DeliverySummary::from_logs(&l);
        assert_eq!(s.exhausted, 1);
        assert_eq!(s.state(), ReportDeliveryState::PartiallyDelivered);
    }

    #[test]
    fn all_exhausted_is_failed_and_all_delivered_is_delivered() {
        let now = Utc::now();
        let mut l = logs(2);
        for log in &mut l {
            log.mark_failed("x", now).unwrap();
            log.give_up(now).unwrap();
        }
        assert_eq!(DeliverySummary::from_logs(&l).state(), ReportDeliveryState::Failed);

        let mut l = logs(2);
        for log in &mut l {
            log.mark_delivered(now).unwrap();
        }
        assert_eq!(DeliverySummary::from_logs(&l).state(), ReportDeliveryState::Delivered);
    }
}
