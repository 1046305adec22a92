//! `workhub-reports`: report metadata and per-recipient delivery bookkeeping.
//!
//! Pure domain code: the delivery log state machine lives here, the pipeline
//! that drives it (mailer, queue, persistence) lives in `workhub-infra`.

/// Typed wrapper around [`workhub_core::AggregateId`].
macro_rules! aggregate_newtype {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub workhub_core::AggregateId);

        impl $t {
            pub fn new() -> Self {
                Self(workhub_core::AggregateId::new())
            }

            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(workhub_core::AggregateId::from_uuid(uuid))
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                self.0.as_uuid()
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::str::FromStr for $t {
            type Err = workhub_core::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

pub mod delivery;
pub mod recipient;
pub mod report;
pub mod summary;

pub use delivery::{DeliveryLogId, DeliveryStatus, ReportDeliveryLog};
pub use recipient::{EmailAddress, Recipient};
pub use report::{Report, ReportId, ReportKind, ReportPeriod};
pub use summary::{DeliverySummary, ReportDeliveryState};
