//! `workhub-core`: shared domain primitives.
//!
//! Identifiers and the domain error model used by every WorkHub crate. Nothing
//! in here performs IO.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, DepartmentId, TenantId, UserId};
