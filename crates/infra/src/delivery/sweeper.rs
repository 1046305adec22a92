//! Periodic sweep that requeues due delivery retries.
//!
//! Retry jobs are the primary path; the sweep only matters when one was lost
//! (queue restart, failed enqueue). Version checks on the log keep the two
//! paths from double-requeueing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::service::ReportDeliveryService;

/// Shortest sweep period; `tokio::time::interval` rejects zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

pub struct RetrySweeper {
    service: Arc<ReportDeliveryService>,
    interval: Duration,
}

pub struct RetrySweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RetrySweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "retry sweeper task ended abnormally");
        }
    }
}

impl RetrySweeper {
    pub fn new(service: Arc<ReportDeliveryService>, interval: Duration) -> Self {
        if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "retry sweep interval too short; using minimum"
            );
        }
        Self {
            service,
            interval: interval.max(MIN_SWEEP_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep now.
    pub async fn sweep_once(&self) -> usize {
        match self.service.retry_due(Utc::now()).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "retry sweep failed");
                0
            }
        }
    }

    pub fn spawn(self) -> RetrySweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "retry sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("retry sweeper stopped");
        });

        RetrySweeperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}
