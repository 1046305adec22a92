//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use workhub_core::TenantId;

use super::store::JobStore;
use super::types::{Job, JobKind, JobResult, JobStatus};

/// Something that can run a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Adapter for synchronous closures.
struct FnHandler<F>(F);

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> JobResult + Send + Sync,
{
    async fn handle(&self, job: &Job) -> JobResult {
        (self.0)(job)
    }
}

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    pub poll_interval: Duration,
    /// Maximum number of jobs running at once
    pub max_concurrent: usize,
    /// Name for logging
    pub name: String,
    /// Only claim jobs of this tenant
    pub tenant_id: Option<TenantId>,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_concurrent: 4,
            name: "job-executor".to_string(),
            tenant_id: None,
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Clamped to at least [`MIN_POLL_INTERVAL`] so an idle executor never spins.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Stop claiming new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "job executor task panicked");
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Background job executor.
///
/// Polls a job store, runs claimed jobs with the registered handlers, and
/// records retries and dead letters.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a routing pattern: an exact type name,
    /// a `prefix.*` category or `*`.
    pub fn register_handler(&mut self, pattern: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(pattern.into(), handler);
    }

    pub fn register_fn<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.register_handler(pattern, Arc::new(FnHandler(handler)));
    }

    fn get_handler(&self, kind: &JobKind) -> Option<Arc<dyn JobHandler>> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h.clone());
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler.clone());
                }
            }
        }

        self.handlers.get("*").cloned()
    }

    /// Spawn the polling loop on the tokio runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let join = tokio::spawn(executor_loop(Arc::new(self), config, shutdown_rx, stats.clone()));

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    /// Claim and run at most one ready job. Returns `false` when the queue had
    /// nothing ready.
    pub async fn run_next(&self, tenant_id: Option<TenantId>) -> Result<bool, String> {
        match self.store.claim_next(tenant_id).map_err(|e| e.to_string())? {
            Some(mut job) => {
                let _ = self.execute(&mut job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run claimed jobs until nothing is ready. Returns the number run.
    pub async fn drain(&self, tenant_id: Option<TenantId>) -> Result<usize, String> {
        let mut ran = 0;
        while self.run_next(tenant_id).await? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Run a claimed job through its handler and persist the outcome.
    pub async fn execute(&self, job: &mut Job) -> Result<(), String> {
        let result = match self.get_handler(&job.kind) {
            Some(handler) => handler.handle(job).await,
            None => {
                warn!(job_id = %job.id, kind = job.kind.type_name(), "no handler for job");
                JobResult::Failure(format!("no handler for job kind: {}", job.kind.type_name()))
            }
        };

        let JobResult::Failure(error) = result else {
            job.mark_completed();
            self.store.update(job).map_err(|e| e.to_string())?;
            debug!(job_id = %job.id, attempt = job.attempt, "job completed");
            return Ok(());
        };

        job.mark_failed(error.clone());
        if matches!(job.status, JobStatus::DeadLettered { .. }) {
            warn!(job_id = %job.id, tenant_id = %job.tenant_id, error = %error, "job dead-lettered");
            self.store
                .dead_letter(job.clone(), error.clone())
                .map_err(|e| e.to_string())?;
        } else {
            self.store.update(job).map_err(|e| e.to_string())?;
        }
        Err(error)
    }
}

async fn executor_loop(
    executor: Arc<JobExecutor>,
    config: JobExecutorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, max_concurrent = config.max_concurrent, "job executor started");
    let start_time = Instant::now();
    let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown_rx.changed() => break,
        };

        match executor.store.claim_next(config.tenant_id) {
            Ok(Some(mut job)) => {
                debug!(executor = %config.name, job_id = %job.id, kind = job.kind.type_name(), "claimed job");
                if let Ok(mut s) = stats.lock() {
                    s.current_running += 1;
                }

                let executor = executor.clone();
                let stats = stats.clone();
                let name = config.name.clone();
                tokio::spawn(async move {
                    let result = executor.execute(&mut job).await;
                    drop(permit);

                    if let Ok(mut s) = stats.lock() {
                        s.current_running = s.current_running.saturating_sub(1);
                        s.jobs_processed += 1;
                        match &result {
                            Ok(()) => s.jobs_succeeded += 1,
                            Err(_) => {
                                s.jobs_failed += 1;
                                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                                    s.jobs_dead_lettered += 1;
                                }
                            }
                        }
                    }

                    if let Err(e) = result {
                        debug!(executor = %name, job_id = %job.id, error = %e, status = ?job.status, "job execution failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                idle(&mut shutdown_rx, poll_interval).await;
            }
            Err(e) => {
                drop(permit);
                error!(executor = %config.name, error = %e, "failed to claim job");
                idle(&mut shutdown_rx, poll_interval).await;
            }
        }
    }

    // Wait for in-flight jobs by reclaiming every permit.
    let _ = permits.acquire_many(config.max_concurrent.max(1) as u32).await;
    info!(executor = %config.name, "job executor stopped");
}

async fn idle(shutdown_rx: &mut watch::Receiver<bool>, interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = shutdown_rx.changed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::RetryPolicy;

    fn setup() -> (Arc<InMemoryJobStore>, JobExecutor) {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = JobExecutor::new(store.clone());
        (store, executor)
    }

    #[tokio::test]
    async fn execute_successful_job() {
        let (store, mut executor) = setup();
        executor.register_fn("report.send_email", |_job| JobResult::Success);

        let tenant = TenantId::new();
        store
            .enqueue(Job::new(tenant, JobKind::SendReportEmail, serde_json::json!({})))
            .unwrap();

        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        assert!(executor.execute(&mut claimed).await.is_ok());
        assert!(matches!(claimed.status, JobStatus::Completed));
        assert!(store.get(tenant, claimed.id).unwrap().is_none());
        assert_eq!(store.stats(tenant).unwrap().completed, 1);
    }

    #[tokio::test]
    async fn failing_job_is_retried_then_dead_lettered() {
        let (store, mut executor) = setup();
        executor.register_fn("report.send_email", |_job| JobResult::Failure("smtp down".to_string()));

        let tenant = TenantId::new();
        let job = Job::new(tenant, JobKind::SendReportEmail, serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO));
        store.enqueue(job).unwrap();

        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        assert!(executor.execute(&mut claimed).await.is_err());
        assert!(matches!(claimed.status, JobStatus::Retrying { .. }));

        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        assert!(executor.execute(&mut claimed).await.is_err());
        assert!(matches!(claimed.status, JobStatus::DeadLettered { .. }));
        assert_eq!(store.list_dead_letters(tenant, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unrouted_job_fails() {
        let (store, executor) = setup();
        let tenant = TenantId::new();
        store
            .enqueue(Job::new(tenant, JobKind::custom("orphan"), serde_json::json!({})))
            .unwrap();

        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        let err = executor.execute(&mut claimed).await.unwrap_err();
        assert!(err.contains("orphan"));
    }

    #[tokio::test]
    async fn category_and_wildcard_routing() {
        let (store, mut executor) = setup();
        executor.register_fn("report.*", |_job| JobResult::Success);
        executor.register_fn("*", |_job| JobResult::Failure("wildcard".to_string()));

        let tenant = TenantId::new();
        store
            .enqueue(Job::new(tenant, JobKind::RetryFailedReportDelivery, serde_json::json!({})))
            .unwrap();
        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        assert!(executor.execute(&mut claimed).await.is_ok());

        store
            .enqueue(Job::new(tenant, JobKind::custom("cleanup"), serde_json::json!({})))
            .unwrap();
        let mut claimed = store.claim_next(Some(tenant)).unwrap().unwrap();
        assert_eq!(executor.execute(&mut claimed).await.unwrap_err(), "wildcard");
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = JobExecutorConfig::default().with_poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn spawned_executor_drains_queue_and_shuts_down() {
        let (store, mut executor) = setup();
        executor.register_fn("*", |_job| JobResult::Success);

        let tenant = TenantId::new();
        for _ in 0..6 {
            store
                .enqueue(Job::new(tenant, JobKind::custom("noop"), serde_json::json!({})))
                .unwrap();
        }

        let handle = executor.spawn(
            JobExecutorConfig::default()
                .with_name("test-executor")
                .with_poll_interval(Duration::from_millis(5))
                .with_max_concurrent(2),
        );

        for _ in 0..200 {
            if handle.stats().jobs_processed == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(store.stats(tenant).unwrap().completed, 6);
        assert_eq!(handle.stats().jobs_succeeded, 6);
        handle.shutdown().await;
    }
}
