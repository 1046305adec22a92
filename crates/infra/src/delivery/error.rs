use thiserror::Error;

use workhub_core::DomainError;
use workhub_reports::{DeliveryLogId, ReportId};

use crate::jobs::JobStoreError;
use crate::stores::StoreError;

/// Errors from the report delivery service.
///
/// Mail and artifact failures are not errors here: they are recorded on the
/// delivery log and drive the retry decision.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("report not found: {0}")]
    ReportNotFound(ReportId),

    #[error("delivery not found: {0}")]
    DeliveryNotFound(DeliveryLogId),

    #[error("at least one recipient is required")]
    NoRecipients,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("job queue error: {0}")]
    Jobs(#[from] JobStoreError),
}

impl DeliveryError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Store(e) => e.is_transient(),
            DeliveryError::Jobs(JobStoreError::Storage(_)) => true,
            _ => false,
        }
    }
}
