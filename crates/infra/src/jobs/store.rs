//! Job queue storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;

use workhub_core::TenantId;

use super::types::{DeadLetterEntry, Job, JobId, JobKind, JobStatus};

/// Tenant-scoped job queue with a dead-letter side table.
pub trait JobStore: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Persist a job's new state (after a run). Completed jobs leave the
    /// queue and only show up in [`JobStats`] from then on.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Take the earliest ready job, marking it running.
    fn claim_next(&self, tenant_id: Option<TenantId>) -> Result<Option<Job>, JobStoreError>;

    fn list_by_kind(&self, tenant_id: TenantId, kind: &JobKind, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Stop a queued job from ever running. The job leaves the queue.
    fn cancel(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Move a job from the queue into the dead-letter table.
    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError>;

    fn list_dead_letters(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Requeue a dead letter with a fresh attempt budget.
    fn retry_dead_letter(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError>;

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is no longer queued")]
    NotQueued(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-tenant job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub dead_lettered: usize,
}

/// Jobs that finished and were dropped from the queue.
#[derive(Debug, Default, Clone, Copy)]
struct Retired {
    completed: usize,
    cancelled: usize,
}

#[derive(Debug, Default)]
struct Queue {
    jobs: HashMap<JobId, Job>,
    dead_letters: HashMap<JobId, DeadLetterEntry>,
    retired: HashMap<TenantId, Retired>,
}

impl Queue {
    /// Drop a completed or cancelled job, keeping only its count.
    fn retire(&mut self, job: &Job) {
        if !matches!(job.status, JobStatus::Completed | JobStatus::Cancelled) {
            return;
        }
        let counts = self.retired.entry(job.tenant_id).or_default();
        if job.status == JobStatus::Completed {
            counts.completed += 1;
        } else {
            counts.cancelled += 1;
        }
        self.jobs.remove(&job.id);
    }

    fn owned_job(&mut self, tenant_id: TenantId, job_id: JobId) -> Result<&mut Job, JobStoreError> {
        match self.jobs.get_mut(&job_id) {
            Some(job) if job.tenant_id == tenant_id => Ok(job),
            Some(_) => Err(JobStoreError::TenantIsolation),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }
}

/// Single-process job queue.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    queue: Mutex<Queue>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Queue>, JobStoreError> {
        self.queue
            .lock()
            .map_err(|_| JobStoreError::Storage("job queue lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut q = self.lock()?;
        if q.jobs.contains_key(&job.id) || q.dead_letters.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        q.jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut q = self.lock()?;
        match q.owned_job(tenant_id, job_id) {
            Ok(job) => Ok(Some(job.clone())),
            Err(JobStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut q = self.lock()?;
        let slot = q.owned_job(job.tenant_id, job.id)?;
        *slot = job.clone();
        q.retire(job);
        Ok(())
    }

    fn claim_next(&self, tenant_id: Option<TenantId>) -> Result<Option<Job>, JobStoreError> {
        let mut q = self.lock()?;
        let now = Utc::now();

        let Some(id) = q
            .jobs
            .values()
            .filter(|j| j.is_ready_at(now) && tenant_id.is_none_or(|t| j.tenant_id == t))
            .min_by_key(|j| (j.ready_at(), j.created_at, j.id.0))
            .map(|j| j.id)
        else {
            return Ok(None);
        };

        Ok(q.jobs.get_mut(&id).map(|job| {
            job.mark_running();
            job.clone()
        }))
    }

    fn list_by_kind(&self, tenant_id: TenantId, kind: &JobKind, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let q = self.lock()?;
        let mut jobs: Vec<Job> = q
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && &j.kind == kind)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    fn cancel(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut q = self.lock()?;
        let job = q.owned_job(tenant_id, job_id)?;
        if !job.status.is_runnable() {
            return Err(JobStoreError::NotQueued(job_id));
        }
        job.mark_cancelled();
        let job = job.clone();
        q.retire(&job);
        Ok(job)
    }

    fn dead_letter(&self, mut job: Job, reason: String) -> Result<(), JobStoreError> {
        let mut q = self.lock()?;
        q.jobs.remove(&job.id);

        if !matches!(job.status, JobStatus::DeadLettered { .. }) {
            job.status = JobStatus::DeadLettered {
                error: reason.clone(),
                attempts: job.attempt,
            };
        }
        job.updated_at = Utc::now();

        q.dead_letters.insert(
            job.id,
            DeadLetterEntry {
                dead_lettered_at: job.updated_at,
                job,
                reason,
            },
        );
        Ok(())
    }

    fn list_dead_letters(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let q = self.lock()?;
        let mut entries: Vec<DeadLetterEntry> = q
            .dead_letters
            .values()
            .filter(|e| e.job.tenant_id == tenant_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.dead_lettered_at);
        entries.truncate(limit);
        Ok(entries)
    }

    fn retry_dead_letter(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut q = self.lock()?;
        match q.dead_letters.get(&job_id) {
            None => return Err(JobStoreError::NotFound(job_id)),
            Some(e) if e.job.tenant_id != tenant_id => return Err(JobStoreError::TenantIsolation),
            Some(_) => {}
        }

        let Some(DeadLetterEntry { mut job, .. }) = q.dead_letters.remove(&job_id) else {
            return Err(JobStoreError::NotFound(job_id));
        };
        job.reset();
        q.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError> {
        let q = self.lock()?;
        let retired = q.retired.get(&tenant_id).copied().unwrap_or_default();
        let mut stats = JobStats {
            completed: retired.completed,
            cancelled: retired.cancelled,
            dead_lettered: q.dead_letters.values().filter(|e| e.job.tenant_id == tenant_id).count(),
            ..JobStats::default()
        };

        for job in q.jobs.values().filter(|j| j.tenant_id == tenant_id) {
            let counter = match job.status {
                JobStatus::Pending => &mut stats.pending,
                JobStatus::Running => &mut stats.running,
                JobStatus::Retrying { .. } => &mut stats.retrying,
                JobStatus::Completed => &mut stats.completed,
                JobStatus::Cancelled => &mut stats.cancelled,
                JobStatus::DeadLettered { .. } => &mut stats.dead_lettered,
            };
            *counter += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::types::RetryPolicy;

    fn send_job(tenant: TenantId) -> Job {
        Job::new(tenant, JobKind::SendReportEmail, serde_json::json!({}))
    }

    #[test]
    fn claims_ready_jobs_once_in_order() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let later = store
            .enqueue(send_job(tenant).scheduled_at(Utc::now() + chrono::Duration::hours(1)))
            .unwrap();
        let first = store.enqueue(send_job(tenant)).unwrap();
        let second = store.enqueue(send_job(tenant)).unwrap();

        let claimed = store.claim_next(None).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempt, 1);

        let next = store.claim_next(None).unwrap().unwrap();
        let mut ids = vec![claimed.id, next.id];
        ids.sort_by_key(|id| id.0);
        let mut expected = vec![first, second];
        expected.sort_by_key(|id| id.0);
        assert_eq!(ids, expected);
        assert!(store.claim_next(None).unwrap().is_none());
        assert_eq!(store.get(tenant, later).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn jobs_are_tenant_scoped() {
        let store = InMemoryJobStore::new();
        let tenant1 = TenantId::new();
        let tenant2 = TenantId::new();

        let job_id = store.enqueue(send_job(tenant1)).unwrap();

        assert!(matches!(store.get(tenant2, job_id), Err(JobStoreError::TenantIsolation)));
        assert!(matches!(store.cancel(tenant2, job_id), Err(JobStoreError::TenantIsolation)));
        assert!(store.claim_next(Some(tenant2)).unwrap().is_none());
        assert_eq!(store.stats(tenant2).unwrap(), JobStats::default());
    }

    #[test]
    fn cancelled_jobs_are_never_claimed() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        let job_id = store.enqueue(send_job(tenant)).unwrap();

        let running = store
            .enqueue(send_job(tenant).scheduled_at(Utc::now() - chrono::Duration::hours(1)))
            .unwrap();
        assert_eq!(store.claim_next(None).unwrap().unwrap().id, running);
        assert!(matches!(store.cancel(tenant, running), Err(JobStoreError::NotQueued(_))));

        store.cancel(tenant, job_id).unwrap();
        assert!(store.claim_next(None).unwrap().is_none());
        assert!(store.get(tenant, job_id).unwrap().is_none());
        assert!(matches!(store.cancel(tenant, job_id), Err(JobStoreError::NotFound(_))));
        assert_eq!(store.stats(tenant).unwrap().cancelled, 1);
    }

    #[test]
    fn dead_letters_can_be_replayed() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let job = send_job(tenant).with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO));
        let job_id = store.enqueue(job).unwrap();

        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        claimed.mark_failed("smtp down".to_string());
        store.dead_letter(claimed, "smtp down".to_string()).unwrap();

        assert!(store.get(tenant, job_id).unwrap().is_none());
        let entries = store.list_dead_letters(tenant, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job.id, job_id);
        assert_eq!(store.stats(tenant).unwrap().dead_lettered, 1);

        assert!(matches!(
            store.retry_dead_letter(TenantId::new(), job_id),
            Err(JobStoreError::TenantIsolation)
        ));

        let replayed = store.retry_dead_letter(tenant, job_id).unwrap();
        assert_eq!(replayed.status, JobStatus::Pending);
        assert_eq!(replayed.attempt, 0);
        assert!(store.list_dead_letters(tenant, 10).unwrap().is_empty());
        assert_eq!(store.claim_next(Some(tenant)).unwrap().unwrap().id, job_id);
    }

    #[test]
    fn stats_count_by_status() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        for _ in 0..5 {
            store.enqueue(send_job(tenant)).unwrap();
        }
        let mut done = store.claim_next(Some(tenant)).unwrap().unwrap();
        done.mark_completed();
        store.update(&done).unwrap();
        store.claim_next(Some(tenant)).unwrap();

        let stats = store.stats(tenant).unwrap();
        assert_eq!((stats.pending, stats.running, stats.completed), (3, 1, 1));
        assert_eq!(store.list_by_kind(tenant, &JobKind::SendReportEmail, 10).unwrap().len(), 4);
        assert_eq!(store.list_by_kind(tenant, &JobKind::SendReportEmail, 2).unwrap().len(), 2);
    }

    #[test]
    fn finished_jobs_leave_the_queue() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        for _ in 0..50 {
            store.enqueue(send_job(tenant)).unwrap();
        }
        while let Some(mut job) = store.claim_next(Some(tenant)).unwrap() {
            job.mark_completed();
            store.update(&job).unwrap();
        }

        assert!(store.lock().unwrap().jobs.is_empty());
        assert!(store.list_by_kind(tenant, &JobKind::SendReportEmail, 100).unwrap().is_empty());
        let stats = store.stats(tenant).unwrap();
        assert_eq!(stats.completed, 50);
        assert_eq!(stats.pending + stats.running, 0);
        assert_eq!(store.stats(TenantId::new()).unwrap().completed, 0);
    }
}
