//! Job records, routing kinds and backoff policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use workhub_core::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What a job does. Handlers are looked up by [`JobKind::type_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Send one report delivery log's email.
    SendReportEmail,
    /// Re-open a failed delivery log and queue another send.
    RetryFailedReportDelivery,
    Custom { kind: String },
}

impl JobKind {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    /// Report jobs share the `report.` prefix so one `report.*` handler
    /// serves both.
    pub fn type_name(&self) -> &str {
        match self {
            JobKind::SendReportEmail => "report.send_email",
            JobKind::RetryFailedReportDelivery => "report.retry_failed_delivery",
            JobKind::Custom { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Last run failed; runs again once `scheduled_at` passes.
    Retrying { error: String, attempt: u32 },
    DeadLettered { error: String, attempts: u32 },
    Cancelled,
}

impl JobStatus {
    /// Whether the job may be claimed (subject to its schedule).
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    #[default]
    Exponential,
}

/// How many times something is attempted and how long to wait in between.
///
/// Shared by the job queue and by report delivery retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Spread applied around the nominal delay, as a fraction (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(500), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Wait after the `attempt`-th failure (1-indexed). Zero for attempt 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let nominal = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            }
        };

        // Deterministic spread: same attempt, same delay.
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return nominal;
        }
        let offset = ((attempt * 37) % 101) as f64 / 50.0 - 1.0;
        Duration::try_from_secs_f64(nominal.as_secs_f64() * (1.0 + spread * offset)).unwrap_or(nominal)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A queued unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Runs started so far.
    pub attempt: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(tenant_id: TenantId, kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            kind,
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_runnable() && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Claim order: earliest runnable instant first.
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.scheduled_at.unwrap_or(self.created_at)
    }

    pub fn mark_running(&mut self) {
        self.attempt += 1;
        self.status = JobStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Schedule another run with backoff, or dead-letter once the policy is spent.
    pub fn mark_failed(&mut self, error: String) {
        let now = Utc::now();
        self.updated_at = now;
        self.last_error = Some(error.clone());

        if !self.retry_policy.should_retry(self.attempt) {
            self.status = JobStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
            return;
        }

        let delay = chrono::Duration::from_std(self.retry_policy.delay_for_attempt(self.attempt))
            .unwrap_or(chrono::Duration::MAX);
        self.scheduled_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        self.status = JobStatus::Retrying {
            error,
            attempt: self.attempt,
        };
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    /// Back to a fresh pending job (used when replaying a dead letter).
    pub fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.attempt = 0;
        self.last_error = None;
        self.scheduled_at = None;
        self.updated_at = Utc::now();
    }
}

/// Outcome reported by a job handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Retried according to the job's retry policy.
    Failure(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy { jitter: 0.0, ..policy }
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let policy = no_jitter(RetryPolicy::exponential(
            5,
            Duration::from_secs(60),
            Duration::from_secs(300),
        ));

        let delays: Vec<u64> = (0..=4).map(|a| policy.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![0, 60, 120, 240, 300]);
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(300));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(9), Duration::from_millis(500));
    }

    #[test]
    fn jitter_is_bounded_and_repeatable() {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(10), Duration::from_secs(60));
        for attempt in 1..=5u32 {
            let nominal = no_jitter(policy.clone()).delay_for_attempt(attempt).as_secs_f64();
            let actual = policy.delay_for_attempt(attempt).as_secs_f64();
            assert!((actual - nominal).abs() <= nominal * 0.1 + 0.001);
            assert_eq!(policy.delay_for_attempt(attempt), policy.delay_for_attempt(attempt));
        }
    }

    #[test]
    fn failed_job_is_rescheduled_then_dead_lettered() {
        let mut job = Job::new(TenantId::new(), JobKind::SendReportEmail, serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(5)));

        job.mark_running();
        job.mark_failed("smtp down".to_string());
        assert!(matches!(job.status, JobStatus::Retrying { attempt: 1, .. }));
        assert!(!job.is_ready_at(Utc::now()));
        assert!(job.is_ready_at(Utc::now() + chrono::Duration::seconds(6)));

        job.mark_running();
        job.mark_failed("smtp down".to_string());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 2, .. }));
        assert!(!job.is_ready_at(Utc::now() + chrono::Duration::days(1)));

        job.reset();
        assert!(job.is_ready_at(Utc::now()));
        assert_eq!(job.attempt, 0);
    }

    #[test]
    fn payload_decodes_typed() {
        #[derive(Deserialize)]
        struct P {
            n: u32,
        }
        let job = Job::new(TenantId::new(), JobKind::custom("t"), serde_json::json!({"n": 7}));
        assert_eq!(job.payload_as::<P>().unwrap().n, 7);
        assert_eq!(JobKind::RetryFailedReportDelivery.type_name(), "report.retry_failed_delivery");
    }
}
