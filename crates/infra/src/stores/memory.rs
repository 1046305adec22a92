//! In-memory stores for tests and single-process dev runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use workhub_core::TenantId;
use workhub_reports::{DeliveryLogId, DeliveryStatus, Report, ReportDeliveryLog, ReportId};

use super::{DeliveryLogStore, PendingCursor, ReportStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Database("in-memory store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: RwLock<HashMap<ReportId, Report>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn insert(&self, report: &Report) -> Result<(), StoreError> {
        let mut reports = self.reports.write().map_err(|_| poisoned())?;
        if reports.contains_key(&report.id) {
            return Err(StoreError::AlreadyExists);
        }
        reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, report_id: ReportId) -> Result<Option<Report>, StoreError> {
        let reports = self.reports.read().map_err(|_| poisoned())?;
        match reports.get(&report_id) {
            Some(r) if r.tenant_id == tenant_id => Ok(Some(r.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Report>, StoreError> {
        let reports = self.reports.read().map_err(|_| poisoned())?;
        let mut out: Vec<Report> = reports
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeliveryLogStore {
    logs: RwLock<HashMap<DeliveryLogId, ReportDeliveryLog>>,
}

impl InMemoryDeliveryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryDeliveryLogStore {
    async fn insert(&self, log: &ReportDeliveryLog) -> Result<(), StoreError> {
        let mut logs = self.logs.write().map_err(|_| poisoned())?;
        if logs.contains_key(&log.id) {
            return Err(StoreError::AlreadyExists);
        }
        logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        log_id: DeliveryLogId,
    ) -> Result<Option<ReportDeliveryLog>, StoreError> {
        let logs = self.logs.read().map_err(|_| poisoned())?;
        match logs.get(&log_id) {
            Some(l) if l.tenant_id == tenant_id => Ok(Some(l.clone())),
            Some(_) => Err(StoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    async fn update(&self, log: &ReportDeliveryLog, expected_version: u64) -> Result<(), StoreError> {
        let mut logs = self.logs.write().map_err(|_| poisoned())?;
        let stored = logs.get_mut(&log.id).ok_or(StoreError::NotFound)?;
        if stored.tenant_id != log.tenant_id {
            return Err(StoreError::TenantIsolation);
        }
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: stored.version,
            });
        }
        *stored = log.clone();
        Ok(())
    }

    async fn list_for_report(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let logs = self.logs.read().map_err(|_| poisoned())?;
        let mut out: Vec<ReportDeliveryLog> = logs
            .values()
            .filter(|l| l.tenant_id == tenant_id && l.report_id == report_id)
            .cloned()
            .collect();
        out.sort_by_key(|l| (l.created_at, *l.id.as_uuid()));
        Ok(out)
    }

    async fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let logs = self.logs.read().map_err(|_| poisoned())?;
        let mut out: Vec<ReportDeliveryLog> = logs
            .values()
            .filter(|l| l.tenant_id == tenant_id && status.is_none_or(|s| l.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let logs = self.logs.read().map_err(|_| poisoned())?;
        let mut out: Vec<ReportDeliveryLog> = logs.values().filter(|l| l.retry_due(now)).cloned().collect();
        out.sort_by_key(|l| l.next_retry_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn pending(
        &self,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let logs = self.logs.read().map_err(|_| poisoned())?;
        let mut out: Vec<ReportDeliveryLog> = logs
            .values()
            .filter(|l| l.is_pending() && after.is_none_or(|c| PendingCursor::of(l) > c))
            .cloned()
            .collect();
        out.sort_by_key(PendingCursor::of);
        out.truncate(limit);
        Ok(out)
    }
}
