//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server and orchestrator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — Postgres saga store; in-memory when unset
/// - `SAGA_WORKERS` — worker pool size (default: `4`)
/// - `RESUME_INTERVAL_SECS` — crash-recovery sweep interval (default: `30`)
/// - `STEP_TIMEOUT_SECS` — per-attempt step timeout (default: `30`)
/// - `MAX_COMPENSATION_RETRIES` — transient compensation retries (default: `3`)
/// - `SAGA_RETENTION_SECS` — terminal saga retention before purge (default: 7 days)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub saga_workers: usize,
    pub resume_interval: Duration,
    pub step_timeout: Duration,
    pub max_compensation_retries: u32,
    pub saga_retention: Duration,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            saga_workers: env_parsed("SAGA_WORKERS", 4),
            resume_interval: Duration::from_secs(env_parsed("RESUME_INTERVAL_SECS", 30)),
            step_timeout: Duration::from_secs(env_parsed("STEP_TIMEOUT_SECS", 30)),
            max_compensation_retries: env_parsed("MAX_COMPENSATION_RETRIES", 3),
            saga_retention: Duration::from_secs(env_parsed("SAGA_RETENTION_SECS", 7 * 24 * 3600)),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            saga_workers: 4,
            resume_interval: Duration::from_secs(30),
            step_timeout: Duration::from_secs(30),
            max_compensation_retries: 3,
            saga_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}
