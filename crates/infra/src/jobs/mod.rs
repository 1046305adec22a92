//! Tenant-scoped background jobs.
//!
//! A [`JobExecutor`] polls a [`JobStore`], routes each claimed job to a
//! handler by its [`JobKind`] and reschedules failures according to the job's
//! [`RetryPolicy`]. Jobs that run out of attempts land in the dead-letter
//! table, where they can be inspected and replayed.
//!
//! Every report email send and every delivery retry is one job.

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler, MIN_POLL_INTERVAL};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{BackoffStrategy, DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy};
