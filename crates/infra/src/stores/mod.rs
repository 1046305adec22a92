//! Persistence for reports and delivery logs.
//!
//! Every operation is tenant-scoped. Reading or writing a record through the
//! wrong tenant yields [`StoreError::TenantIsolation`], never the record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use uuid::Uuid;
use workhub_core::TenantId;
use workhub_reports::{DeliveryLogId, DeliveryStatus, Report, ReportDeliveryLog, ReportId};

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryDeliveryLogStore, InMemoryReportStore};
pub use postgres::{PostgresDeliveryLogStore, PostgresReportStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("record already exists")]
    AlreadyExists,
    /// Optimistic concurrency check failed.
    #[error("version conflict (expected {expected}, found {actual})")]
    Conflict { expected: u64, actual: u64 },
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Keyset position in the pending scan: `(created_at, id)` of the last log seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PendingCursor {
    pub fn of(log: &ReportDeliveryLog) -> Self {
        Self {
            created_at: log.created_at,
            id: *log.id.as_uuid(),
        }
    }
}

/// Report metadata, as registered by the report generator.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert(&self, report: &Report) -> Result<(), StoreError>;

    async fn get(&self, tenant_id: TenantId, report_id: ReportId) -> Result<Option<Report>, StoreError>;

    /// Most recently generated first.
    async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Report>, StoreError>;
}

/// Delivery log persistence.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn insert(&self, log: &ReportDeliveryLog) -> Result<(), StoreError>;

    async fn get(
        &self,
        tenant_id: TenantId,
        log_id: DeliveryLogId,
    ) -> Result<Option<ReportDeliveryLog>, StoreError>;

    /// Replace a log, provided the stored version is still `expected_version`.
    async fn update(&self, log: &ReportDeliveryLog, expected_version: u64) -> Result<(), StoreError>;

    /// Oldest first.
    async fn list_for_report(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError>;

    /// Most recently updated first.
    async fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError>;

    /// Failed, retryable logs whose scheduled retry is due, across all tenants.
    async fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReportDeliveryLog>, StoreError>;

    /// Pending logs across all tenants, oldest first, starting strictly after
    /// the `after` cursor when one is given.
    async fn pending(
        &self,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError>;
}
