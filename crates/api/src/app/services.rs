//! Infrastructure wiring: stores, mailer, job queue, workers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use workhub_infra::artifacts::{ArtifactSource, FsArtifactSource, InMemoryArtifactSource};
use workhub_infra::delivery::{
    DeliveryCollaborators, DeliveryConfig, ReportDeliveryJobHandler, ReportDeliveryService, RetrySweeper,
    RetrySweeperHandle,
};
use workhub_infra::jobs::{InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobStore};
use workhub_infra::mail::{LogMailer, Mailer, SmtpMailer};
use workhub_infra::notifications::InMemoryNotificationSink;
use workhub_infra::stores::{
    DeliveryLogStore, InMemoryDeliveryLogStore, InMemoryReportStore, PostgresDeliveryLogStore, PostgresReportStore,
    ReportStore, postgres::MIGRATOR,
};

use crate::config::AppConfig;

/// The swappable edges of the delivery pipeline.
#[derive(Clone)]
pub struct Backends {
    pub reports: Arc<dyn ReportStore>,
    pub logs: Arc<dyn DeliveryLogStore>,
    pub mailer: Arc<dyn Mailer>,
    pub artifacts: Arc<dyn ArtifactSource>,
}

impl Backends {
    /// In-memory stores and artifacts, logging mailer.
    pub fn in_memory() -> Self {
        Self {
            reports: Arc::new(InMemoryReportStore::new()),
            logs: Arc::new(InMemoryDeliveryLogStore::new()),
            mailer: Arc::new(LogMailer),
            artifacts: Arc::new(InMemoryArtifactSource::new()),
        }
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut backends = Self::in_memory();

        if let Some(url) = &config.database_url {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            MIGRATOR.run(&pool).await.context("failed to run migrations")?;
            tracing::info!(max_connections = config.db_max_connections, "using postgres stores");

            backends.reports = Arc::new(PostgresReportStore::new(pool.clone()));
            backends.logs = Arc::new(PostgresDeliveryLogStore::new(pool));
        } else {
            tracing::warn!("DATABASE_URL not set; deliveries are kept in memory");
        }

        if let Some(smtp) = &config.smtp {
            backends.mailer = Arc::new(SmtpMailer::new(smtp)?);
            tracing::info!(host = %smtp.host, port = smtp.port, "using smtp mailer");
        } else {
            tracing::warn!("SMTP_HOST not set; emails are logged, not sent");
        }

        if let Some(dir) = &config.artifact_dir {
            backends.artifacts = Arc::new(FsArtifactSource::new(dir.clone()));
            tracing::info!(dir = %dir.display(), "reading report artifacts from disk");
        }

        Ok(backends)
    }
}

/// Shared application services handed to every request.
pub struct AppServices {
    pub delivery: Arc<ReportDeliveryService>,
    pub jobs: Arc<InMemoryJobStore>,
    pub notifications: Arc<InMemoryNotificationSink>,
}

impl AppServices {
    pub fn new(backends: Backends, config: DeliveryConfig) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let notifications = Arc::new(InMemoryNotificationSink::new());

        let delivery = Arc::new(ReportDeliveryService::new(
            DeliveryCollaborators {
                reports: backends.reports,
                logs: backends.logs,
                mailer: backends.mailer,
                artifacts: backends.artifacts,
                notifications: notifications.clone(),
                jobs: jobs.clone(),
            },
            config,
        ));

        Self {
            delivery,
            jobs,
            notifications,
        }
    }

    pub fn job_store(&self) -> &dyn JobStore {
        self.jobs.as_ref()
    }

    /// Spawn the job executor and the retry sweeper.
    pub fn start_workers(&self, poll_interval: Duration, sweep_interval: Duration) -> BackgroundWorkers {
        let mut executor = JobExecutor::new(self.jobs.clone());
        executor.register_handler("report.*", Arc::new(ReportDeliveryJobHandler::new(self.delivery.clone())));

        let executor = executor.spawn(
            JobExecutorConfig::default()
                .with_name("report-delivery")
                .with_poll_interval(poll_interval),
        );
        let sweeper = RetrySweeper::new(self.delivery.clone(), sweep_interval).spawn();

        BackgroundWorkers { executor, sweeper }
    }
}

pub struct BackgroundWorkers {
    executor: JobExecutorHandle,
    sweeper: RetrySweeperHandle,
}

impl BackgroundWorkers {
    pub async fn shutdown(self) {
        self.sweeper.shutdown().await;
        self.executor.shutdown().await;
        tracing::info!("background workers stopped");
    }
}
