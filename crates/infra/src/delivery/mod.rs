//! Report delivery pipeline.
//!
//! `ReportDeliveryService::deliver` creates one [`ReportDeliveryLog`] per
//! recipient and queues a [`SendReportEmailJob`] for each. The job handler
//! calls back into the service, which records the outcome and, on a retryable
//! failure, schedules a [`RetryFailedReportDeliveryJob`] for later. The
//! [`RetrySweeper`] re-drives retries whose job went missing.
//!
//! [`ReportDeliveryLog`]: workhub_reports::ReportDeliveryLog

mod config;
mod error;
mod jobs;
mod service;
mod sweeper;

pub use config::DeliveryConfig;
pub use error::DeliveryError;
pub use jobs::{ReportDeliveryJobHandler, RetryFailedReportDeliveryJob, SendReportEmailJob};
pub use service::{DeliveryCollaborators, ReportDeliveryService, RetryOutcome, SendOutcome};
pub use sweeper::{MIN_SWEEP_INTERVAL, RetrySweeper, RetrySweeperHandle};
