use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::health::MonitorConfig;
use crate::progress::ProgressSourceKind;
use crate::recovery::RecoveryConfig;
use crate::store::RetryConfig;
use crate::worker::ProcessWorkerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "crew-warden.toml";
const ENV_PREFIX: &str = "CREW_WARDEN";

/// Main configuration for crew-warden
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Holds the instance lock and the SQLite database
    pub state_dir: PathBuf,
    pub progress_source: ProgressSourceKind,
    pub monitor: MonitorConfig,
    pub recovery: RecoveryConfig,
    pub worker: ProcessWorkerConfig,
    pub store: StoreConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Defaults to `<state_dir>/warden.db`
    pub database_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
    pub with_span_list: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
            with_span_list: true,
        }
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".crew-warden"),
            progress_source: ProgressSourceKind::SelfReported,
            monitor: MonitorConfig::default(),
            recovery: RecoveryConfig::default(),
            worker: ProcessWorkerConfig::default(),
            store: StoreConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl WardenConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. The configuration file (`crew-warden.toml` unless `path` is given)
    /// 3. Environment variables (`CREW_WARDEN_MONITOR__POLL_INTERVAL_SECS=10`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&WardenConfig::default())?);

        match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Configuration file {} does not exist", path.display());
                }
                builder = builder.add_source(File::from(path));
            }
            None => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: WardenConfig = builder
            .build()?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let monitor = &self.monitor;
        if monitor.poll_interval_secs == 0 {
            bail!("monitor.poll_interval_secs must be greater than zero");
        }
        if monitor.stuck_timeout_secs == 0 || monitor.stagnation_timeout_secs == 0 {
            bail!("monitor timeouts must be greater than zero");
        }
        if monitor.stuck_timeout_secs < monitor.poll_interval_secs {
            bail!(
                "monitor.stuck_timeout_secs ({}) is shorter than the poll interval ({})",
                monitor.stuck_timeout_secs,
                monitor.poll_interval_secs
            );
        }
        if monitor.anomaly_cooldown_secs < monitor.poll_interval_secs {
            bail!(
                "monitor.anomaly_cooldown_secs ({}) must cover at least one poll interval ({})",
                monitor.anomaly_cooldown_secs,
                monitor.poll_interval_secs
            );
        }
        if monitor.status_timeout_secs == 0 {
            bail!("monitor.status_timeout_secs must be greater than zero");
        }
        if self.recovery.max_attempts == 0 {
            bail!("recovery.max_attempts must be at least 1");
        }
        if self.worker.command.trim().is_empty() {
            bail!("worker.command must not be empty");
        }
        if self.store.retry.max_attempts == 0 {
            bail!("store.retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("warden.lock")
    }

    pub fn database_url(&self) -> String {
        self.store
            .database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}", self.state_dir.join("warden.db").display()))
    }
}
