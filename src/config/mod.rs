use serde::Deserialize;
use std::time::Duration;

/// Provider timeouts that must pass before a claimed record counts as abandoned.
const STALE_TIMEOUT_MULTIPLE: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Records claimed per round
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Upper bound on resolutions in flight within one round
    #[serde(default = "default_max_concurrent_resolutions")]
    pub max_concurrent_resolutions: usize,

    /// Pause between rounds, in milliseconds
    #[serde(default = "default_delay_timeout")]
    pub delay_timeout: u64,

    /// Verification provider endpoint
    #[serde(rename = "youverify_api_url_v2")]
    pub provider_url: Option<String>,

    /// Verification provider token
    #[serde(rename = "youverify_api_key_v2")]
    pub provider_api_key: Option<String>,

    /// Timeout for a single provider call, in milliseconds
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Base URL of the notification and report service
    pub node_service: String,

    /// Timeout for a single notification or report call, in milliseconds
    #[serde(default = "default_downstream_timeout_ms")]
    pub downstream_timeout_ms: u64,

    /// Age after which an IN_PROGRESS record is considered abandoned
    #[serde(default = "default_stale_record_secs")]
    pub stale_record_secs: u64,

    /// How often the worker sweeps for abandoned records
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_batch_size() -> u32 {
    500
}

fn default_max_concurrent_resolutions() -> usize {
    50
}

fn default_delay_timeout() -> u64 {
    1000
}

fn default_provider_timeout_ms() -> u64 {
    30_000
}

fn default_downstream_timeout_ms() -> u64 {
    30_000
}

fn default_stale_record_secs() -> u64 {
    1800
}

fn default_recovery_interval_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size.max(1),
            max_concurrency: self.max_concurrent_resolutions.max(1),
            round_delay: Duration::from_millis(self.delay_timeout),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }

    /// Never shorter than a few provider timeouts, so a record still being
    /// resolved is not requeued under its driver.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_record_secs).max(self.provider_timeout() * STALE_TIMEOUT_MULTIPLE)
    }

    /// Enough connections for a full round of resolutions plus claims.
    pub fn pool_size(&self) -> u32 {
        (self.max_concurrent_resolutions as u32).saturating_add(5).clamp(5, 100)
    }
}

/// Knobs of the driver loop.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: u32,
    pub max_concurrency: usize,
    pub round_delay: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrent_resolutions(),
            round_delay: Duration::from_millis(default_delay_timeout()),
        }
    }
}
