use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use workhub_infra::delivery::DeliveryConfig;
use workhub_infra::mail::SmtpConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,

    /// PostgreSQL connection string. In-memory stores are used when unset.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// SMTP relay. Emails are only logged when unset.
    pub smtp: Option<SmtpConfig>,

    /// Root directory of generated report files. Artifacts are kept in memory
    /// when unset.
    pub artifact_dir: Option<PathBuf>,

    pub delivery_max_attempts: u32,
    pub delivery_retry_base: Duration,
    pub delivery_retry_max: Duration,

    /// How often idle job workers poll the queue.
    pub job_poll_interval: Duration,

    /// How often due delivery retries are swept.
    pub retry_sweep_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let delivery = DeliveryConfig::default();
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            db_max_connections: 10,
            smtp: None,
            artifact_dir: None,
            delivery_max_attempts: delivery.max_attempts,
            delivery_retry_base: delivery.backoff.base_delay,
            delivery_retry_max: delivery.backoff.max_delay,
            job_poll_interval: Duration::from_millis(250),
            retry_sweep_interval: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let smtp = match var("SMTP_HOST") {
            None => None,
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or(var("SMTP_PORT"), "SMTP_PORT", 587)?,
                username: var("SMTP_USER"),
                password: var("SMTP_PASSWORD"),
                from: var("SMTP_FROM").context("SMTP_FROM is required when SMTP_HOST is set")?,
                starttls: !matches!(var("SMTP_TLS").as_deref(), Some("none" | "off" | "false")),
            }),
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: var("DATABASE_URL"),
            db_max_connections: parse_or(var("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            smtp,
            artifact_dir: var("ARTIFACT_DIR").map(PathBuf::from),
            delivery_max_attempts: parse_or(
                var("DELIVERY_MAX_ATTEMPTS"),
                "DELIVERY_MAX_ATTEMPTS",
                defaults.delivery_max_attempts,
            )?,
            delivery_retry_base: Duration::from_secs(parse_or(
                var("DELIVERY_RETRY_BASE_SECS"),
                "DELIVERY_RETRY_BASE_SECS",
                defaults.delivery_retry_base.as_secs(),
            )?),
            delivery_retry_max: Duration::from_secs(parse_or(
                var("DELIVERY_RETRY_MAX_SECS"),
                "DELIVERY_RETRY_MAX_SECS",
                defaults.delivery_retry_max.as_secs(),
            )?),
            job_poll_interval: Duration::from_millis(positive_or(
                var("JOB_POLL_INTERVAL_MS"),
                "JOB_POLL_INTERVAL_MS",
                defaults.job_poll_interval.as_millis() as u64,
            )?),
            retry_sweep_interval: Duration::from_secs(positive_or(
                var("RETRY_SWEEP_INTERVAL_SECS"),
                "RETRY_SWEEP_INTERVAL_SECS",
                defaults.retry_sweep_interval.as_secs(),
            )?),
        })
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig::default()
            .with_max_attempts(self.delivery_max_attempts)
            .with_backoff(self.delivery_retry_base, self.delivery_retry_max)
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())),
    }
}

/// Intervals drive timers and idle loops, so zero is rejected.
fn positive_or(raw: Option<String>, key: &str, default: u64) -> anyhow::Result<u64> {
    let value = parse_or(raw, key, default)?;
    anyhow::ensure!(value > 0, "{key} must be greater than zero");
    Ok(value)
}
