//! Environment-driven configuration for the API and worker processes.

use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_PORT: u16 = 3000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Parse an env var, falling back to a default on absence or garbage.
fn env_parse<T: std::str::FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(var = name, value = %raw, fallback = %default, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Process configuration shared by the API and worker binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub admin_api_key_read: Option<String>,
    pub admin_api_key_write: Option<String>,
    pub enable_metrics: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_port: env_parse("API_PORT", DEFAULT_API_PORT),
            poll_interval: Duration::from_millis(env_parse(
                "WORKER_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            batch_size: env_parse("WORKER_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            admin_api_key_read: std::env::var("ADMIN_API_KEY_READ").ok(),
            admin_api_key_write: std::env::var("ADMIN_API_KEY_WRITE").ok(),
            enable_metrics: matches!(
                std::env::var("ENABLE_METRICS").as_deref(),
                Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
            ),
        }
    }

    /// Startup sanity checks. Misconfiguration warns but never aborts.
    pub fn validate(&self) {
        if self.batch_size > 100 {
            warn!(
                batch_size = self.batch_size,
                "WORKER_BATCH_SIZE is unusually large; long transactions hold row locks"
            );
        }
        if self.poll_interval < Duration::from_millis(100) {
            warn!(
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                "WORKER_POLL_INTERVAL_MS below 100ms will hammer the database"
            );
        }
        if self.batch_size < 1 {
            warn!(batch_size = self.batch_size, "WORKER_BATCH_SIZE below 1 claims nothing");
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            admin_api_key_read: None,
            admin_api_key_write: None,
            enable_metrics: false,
        }
    }
}
