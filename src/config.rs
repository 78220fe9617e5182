use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "rival_watch";
const ENV_PREFIX: &str = "RIVAL_WATCH";

/// Runtime settings. Layered: defaults, then `rival_watch.toml` (optional),
/// then `RIVAL_WATCH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Minimum gap between two requests to the same host.
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Upper bound for one target's whole run (locate + fetch + extract).
    pub target_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub concurrency: usize,
    pub user_agent: String,
    pub accept_language: String,
    /// JSON-lines file alerts are appended to. Alerts are only logged when unset.
    pub alerts_path: Option<PathBuf>,
    pub keep_snapshots: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/rival_watch.sqlite"),
            request_delay_ms: 1000,
            request_timeout_secs: 20,
            target_timeout_secs: 180,
            max_retries: 2,
            retry_backoff_ms: 2000,
            concurrency: 4,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            accept_language: "cs,en;q=0.8,pl;q=0.6".to_string(),
            alerts_path: None,
            keep_snapshots: 30,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings.sanitized())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn target_timeout(&self) -> Duration {
        Duration::from_secs(self.target_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    fn sanitized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.keep_snapshots = self.keep_snapshots.max(1);
        self
    }
}
