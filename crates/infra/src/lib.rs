//! `workhub-infra`: the report delivery pipeline and the services it runs on
//! (background jobs, persistence, mail, artifact lookup and notifications).

pub mod artifacts;
pub mod delivery;
pub mod jobs;
pub mod mail;
pub mod notifications;
pub mod stores;
