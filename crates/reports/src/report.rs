use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use workhub_core::{DepartmentId, DomainError, DomainResult, TenantId, UserId};

aggregate_newtype!(
    /// Report identifier (tenant-scoped via `Report::tenant_id`).
    ReportId
);

/// Business area a report covers.
///
/// Stored and serialized as its lowercase name; unknown names round-trip
/// through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ReportKind {
    Sales,
    Marketing,
    WorkLog,
    Department,
    Custom(String),
}

impl ReportKind {
    pub fn as_str(&self) -> &str {
        match self {
            ReportKind::Sales => "sales",
            ReportKind::Marketing => "marketing",
            ReportKind::WorkLog => "work_log",
            ReportKind::Department => "department",
            ReportKind::Custom(name) => name,
        }
    }
}

impl From<String> for ReportKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "sales" => ReportKind::Sales,
            "marketing" => ReportKind::Marketing,
            "work_log" => ReportKind::WorkLog,
            "department" => ReportKind::Department,
            _ => ReportKind::Custom(value),
        }
    }
}

impl From<ReportKind> for String {
    fn from(value: ReportKind) -> Self {
        match value {
            ReportKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl core::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive date range a report covers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> DomainResult<Self> {
        if start > end {
            return Err(DomainError::validation(format!(
                "report period starts after it ends ({start} > {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl core::fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// A generated business-metrics report.
///
/// The rendered document itself is owned by the export subsystem and is
/// referenced through `artifact_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub tenant_id: TenantId,
    pub owner_id: UserId,
    pub department_id: Option<DepartmentId>,
    pub kind: ReportKind,
    pub title: String,
    pub period: ReportPeriod,
    pub artifact_key: String,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(
        tenant_id: TenantId,
        owner_id: UserId,
        kind: ReportKind,
        title: impl Into<String>,
        period: ReportPeriod,
        artifact_key: impl Into<String>,
    ) -> DomainResult<Self> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(DomainError::validation("report title must not be empty"));
        }

        let artifact_key = artifact_key.into().trim().to_string();
        if artifact_key.is_empty() {
            return Err(DomainError::validation("report artifact key must not be empty"));
        }

        Ok(Self {
            id: ReportId::new(),
            tenant_id,
            owner_id,
            department_id: None,
            kind,
            title,
            period,
            artifact_key,
            generated_at: Utc::now(),
        })
    }

    pub fn for_department(mut self, department_id: DepartmentId) -> Self {
        self.department_id = Some(department_id);
        self
    }

    /// Subject line used when the report is emailed.
    pub fn email_subject(&self) -> String {
        format!("{} ({})", self.title, self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_rejects_inverted_range() {
        assert!(ReportPeriod::new(date(2024, 2, 1), date(2024, 1, 1)).is_err());
        let p = ReportPeriod::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        assert_eq!(p.days(), 31);
    }

    #[test]
    fn report_requires_title_and_artifact() {
        let period = ReportPeriod::new(date(2024, 1, 1), date(2024, 1, 7)).unwrap();
        let tenant = TenantId::new();
        let owner = UserId::new();

        assert!(Report::new(tenant, owner, ReportKind::Sales, "  ", period, "a.pdf").is_err());
        assert!(Report::new(tenant, owner, ReportKind::Sales, "Weekly", period, "").is_err());

        let report =
            Report::new(tenant, owner, ReportKind::Sales, " Weekly sales ", period, "a.pdf")
                .unwrap();
        assert_eq!(report.title, "Weekly sales");
        assert_eq!(
            report.email_subject(),
            "Weekly sales (2024-01-01 to 2024-01-07)"
        );
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            ReportKind::Sales,
            ReportKind::Marketing,
            ReportKind::WorkLog,
            ReportKind::Department,
            ReportKind::Custom("finance".to_string()),
        ] {
            let s: String = kind.clone().into();
            assert_eq!(ReportKind::from(s), kind);
        }
    }
}
