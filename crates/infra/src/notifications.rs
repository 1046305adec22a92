//! In-app notifications raised by the delivery pipeline.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use workhub_core::{TenantId, UserId};
use workhub_reports::{DeliveryLogId, ReportId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Automatic delivery to one recipient was given up.
    ReportDeliveryFailed,
    /// Every recipient of a report has received it.
    ReportDelivered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub report_id: ReportId,
    pub delivery_log_id: Option<DeliveryLogId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        tenant_id: TenantId,
        user_id: UserId,
        kind: NotificationKind,
        report_id: ReportId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            user_id,
            kind,
            report_id,
            delivery_log_id: None,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn for_delivery(mut self, log_id: DeliveryLogId) -> Self {
        self.delivery_log_id = Some(log_id);
        self
    }
}

/// Notification dispatch. Delivery is best-effort and never fails the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    items: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<Notification> {
        let Ok(items) = self.items.read() else {
            return Vec::new();
        };
        items
            .iter()
            .rev()
            .filter(|n| n.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            tenant_id = %notification.tenant_id,
            user_id = %notification.user_id,
            report_id = %notification.report_id,
            kind = ?notification.kind,
            "notification raised"
        );
        match self.items.write() {
            Ok(mut items) => items.push(notification),
            Err(_) => tracing::warn!("notification sink lock poisoned; notification dropped"),
        }
    }
}
