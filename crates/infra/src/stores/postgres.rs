//! Postgres-backed report and delivery log stores.
//!
//! Every query carries `tenant_id` in its WHERE clause, except the retry
//! sweep which is deliberately cross-tenant. Delivery log updates are
//! conditional on the stored `version`, so two workers racing on the same log
//! cannot both win.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use workhub_core::{DepartmentId, TenantId, UserId};
use workhub_reports::{
    DeliveryLogId, DeliveryStatus, EmailAddress, Recipient, Report, ReportDeliveryLog, ReportId, ReportKind,
    ReportPeriod,
};

use super::{DeliveryLogStore, PendingCursor, ReportStore, StoreError};

/// Schema migrations for the report delivery tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Database(format!("corrupt {what} row: {err}"))
}

fn to_i64(v: u64) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Database(format!("value out of range: {v}")))
}

fn to_i32(v: u32) -> Result<i32, StoreError> {
    i32::try_from(v).map_err(|_| StoreError::Database(format!("value out of range: {v}")))
}

#[derive(Debug, Clone)]
pub struct PostgresReportStore {
    pool: Arc<PgPool>,
}

impl PostgresReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn report_from_row(row: &PgRow) -> Result<Report, StoreError> {
    let start: NaiveDate = row.try_get("period_start")?;
    let end: NaiveDate = row.try_get("period_end")?;
    let period = ReportPeriod::new(start, end).map_err(|e| corrupt("report", e))?;

    Ok(Report {
        id: ReportId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        department_id: row
            .try_get::<Option<Uuid>, _>("department_id")?
            .map(DepartmentId::from_uuid),
        kind: ReportKind::from(row.try_get::<String, _>("kind")?),
        title: row.try_get("title")?,
        period,
        artifact_key: row.try_get("artifact_key")?,
        generated_at: row.try_get("generated_at")?,
    })
}

#[async_trait]
impl ReportStore for PostgresReportStore {
    #[instrument(skip(self, report), fields(tenant_id = %report.tenant_id, report_id = %report.id), err)]
    async fn insert(&self, report: &Report) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reports (
                id, tenant_id, owner_id, department_id, kind, title,
                period_start, period_end, artifact_key, generated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(report.id.as_uuid())
        .bind(report.tenant_id.as_uuid())
        .bind(report.owner_id.as_uuid())
        .bind(report.department_id.map(|d| *d.as_uuid()))
        .bind(report.kind.as_str())
        .bind(&report.title)
        .bind(report.period.start)
        .bind(report.period.end)
        .bind(&report.artifact_key)
        .bind(report.generated_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, report_id = %report_id), err)]
    async fn get(&self, tenant_id: TenantId, report_id: ReportId) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = $1")
            .bind(report_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let report = report_from_row(&row)?;
                if report.tenant_id != tenant_id {
                    return Err(StoreError::TenantIsolation);
                }
                Ok(Some(report))
            }
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<Report>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reports
            WHERE tenant_id = $1
            ORDER BY generated_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(to_i64(limit as u64)?)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(report_from_row).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresDeliveryLogStore {
    pool: Arc<PgPool>,
}

impl PostgresDeliveryLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn log_from_row(row: &PgRow) -> Result<ReportDeliveryLog, StoreError> {
    let email: String = row.try_get("recipient_email")?;
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;
    let max_attempts: i32 = row.try_get("max_attempts")?;
    let version: i64 = row.try_get("version")?;

    Ok(ReportDeliveryLog {
        id: DeliveryLogId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        report_id: ReportId::from_uuid(row.try_get("report_id")?),
        recipient: Recipient {
            email: EmailAddress::parse(&email).map_err(|e| corrupt("delivery log", e))?,
            name: row.try_get("recipient_name")?,
            user_id: row
                .try_get::<Option<Uuid>, _>("recipient_user")?
                .map(UserId::from_uuid),
        },
        status: status.parse::<DeliveryStatus>().map_err(|e| corrupt("delivery log", e))?,
        attempts: u32::try_from(attempts).map_err(|e| corrupt("delivery log", e))?,
        max_attempts: u32::try_from(max_attempts).map_err(|e| corrupt("delivery log", e))?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        delivered_at: row.try_get("delivered_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
        exhausted: row.try_get("exhausted")?,
        version: u64::try_from(version).map_err(|e| corrupt("delivery log", e))?,
    })
}

#[async_trait]
impl DeliveryLogStore for PostgresDeliveryLogStore {
    #[instrument(skip(self, log), fields(tenant_id = %log.tenant_id, delivery_id = %log.id), err)]
    async fn insert(&self, log: &ReportDeliveryLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO report_delivery_logs (
                id, tenant_id, report_id, recipient_email, recipient_name, recipient_user,
                status, attempts, max_attempts, last_error, created_at, updated_at,
                last_attempt_at, delivered_at, next_retry_at, exhausted, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.tenant_id.as_uuid())
        .bind(log.report_id.as_uuid())
        .bind(log.recipient.email.as_str())
        .bind(log.recipient.name.as_deref())
        .bind(log.recipient.user_id.map(|u| *u.as_uuid()))
        .bind(log.status.as_str())
        .bind(to_i32(log.attempts)?)
        .bind(to_i32(log.max_attempts)?)
        .bind(log.last_error.as_deref())
        .bind(log.created_at)
        .bind(log.updated_at)
        .bind(log.last_attempt_at)
        .bind(log.delivered_at)
        .bind(log.next_retry_at)
        .bind(log.exhausted)
        .bind(to_i64(log.version)?)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, delivery_id = %log_id), err)]
    async fn get(
        &self,
        tenant_id: TenantId,
        log_id: DeliveryLogId,
    ) -> Result<Option<ReportDeliveryLog>, StoreError> {
        let row = sqlx::query("SELECT * FROM report_delivery_logs WHERE id = $1")
            .bind(log_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let log = log_from_row(&row)?;
                if log.tenant_id != tenant_id {
                    return Err(StoreError::TenantIsolation);
                }
                Ok(Some(log))
            }
        }
    }

    #[instrument(
        skip(self, log),
        fields(tenant_id = %log.tenant_id, delivery_id = %log.id, new_version = log.version),
        err
    )]
    async fn update(&self, log: &ReportDeliveryLog, expected_version: u64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE report_delivery_logs SET
                status = $4,
                attempts = $5,
                max_attempts = $6,
                last_error = $7,
                updated_at = $8,
                last_attempt_at = $9,
                delivered_at = $10,
                next_retry_at = $11,
                exhausted = $12,
                version = $13
            WHERE id = $1 AND tenant_id = $2 AND version = $3
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.tenant_id.as_uuid())
        .bind(to_i64(expected_version)?)
        .bind(log.status.as_str())
        .bind(to_i32(log.attempts)?)
        .bind(to_i32(log.max_attempts)?)
        .bind(log.last_error.as_deref())
        .bind(log.updated_at)
        .bind(log.last_attempt_at)
        .bind(log.delivered_at)
        .bind(log.next_retry_at)
        .bind(log.exhausted)
        .bind(to_i64(log.version)?)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing matched: work out why.
        let row = sqlx::query("SELECT tenant_id, version FROM report_delivery_logs WHERE id = $1")
            .bind(log.id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        let tenant: Uuid = row.try_get("tenant_id")?;
        if tenant != *log.tenant_id.as_uuid() {
            return Err(StoreError::TenantIsolation);
        }
        let actual: i64 = row.try_get("version")?;
        Err(StoreError::Conflict {
            expected: expected_version,
            actual: u64::try_from(actual).map_err(|e| corrupt("delivery log", e))?,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, report_id = %report_id), err)]
    async fn list_for_report(
        &self,
        tenant_id: TenantId,
        report_id: ReportId,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM report_delivery_logs
            WHERE tenant_id = $1 AND report_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(report_id.as_uuid())
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, status = ?status), err)]
    async fn list_by_status(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM report_delivery_logs
            WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY updated_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .bind(to_i64(limit as u64)?)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM report_delivery_logs
            WHERE status = 'failed'
              AND exhausted = FALSE
              AND attempts < max_attempts
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(to_i64(limit as u64)?)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn pending(
        &self,
        after: Option<PendingCursor>,
        limit: usize,
    ) -> Result<Vec<ReportDeliveryLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM report_delivery_logs
            WHERE status = 'pending'
              AND ($1::timestamptz IS NULL OR (created_at, id) > ($1, $2))
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| c.id))
        .bind(to_i64(limit as u64)?)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }
}
