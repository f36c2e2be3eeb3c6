// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON document holding the trigger registry
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub trigger_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    #[serde(default)]
    pub misfire_policy: MisfirePolicy,
}

impl SchedulerConfig {
    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.trigger_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// What a job does with fire times that passed while its previous fire was still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Drop missed fire times and wait for the next one
    #[default]
    Skip,
    /// Fire once immediately, then resume the regular cadence
    FireOnce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    pub tracing_endpoint: Option<String>,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Settings::default();

        let builder = Config::builder()
            // Built-in defaults so a missing config directory still yields a full Settings
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default(
                "storage.path",
                defaults.storage.path.to_string_lossy().to_string(),
            )?
            .set_default(
                "scheduler.trigger_timeout_seconds",
                defaults.scheduler.trigger_timeout_seconds as i64,
            )?
            .set_default(
                "scheduler.shutdown_grace_seconds",
                defaults.scheduler.shutdown_grace_seconds as i64,
            )?
            .set_default("scheduler.misfire_policy", "skip")?
            .set_default("observability.log_level", defaults.observability.log_level)?
            .set_default("observability.metrics_enabled", true)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("CRONHOOK")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err("Storage path cannot be empty".to_string());
        }

        if self.scheduler.trigger_timeout_seconds == 0 {
            return Err("Scheduler trigger_timeout_seconds must be greater than 0".to_string());
        }
        // In-flight fires must be able to finish inside the shutdown window
        if self.scheduler.shutdown_grace_seconds < self.scheduler.trigger_timeout_seconds {
            return Err(
                "Scheduler shutdown_grace_seconds must be at least trigger_timeout_seconds"
                    .to_string(),
            );
        }

        if self.observability.log_level.trim().is_empty() {
            return Err("Observability log_level cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                path: PathBuf::from("data/triggers.json"),
            },
            scheduler: SchedulerConfig {
                trigger_timeout_seconds: 30,
                shutdown_grace_seconds: 35,
                misfire_policy: MisfirePolicy::Skip,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_enabled: true,
                tracing_endpoint: None,
            },
        }
    }
}
