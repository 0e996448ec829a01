//! Configuration management for the broadcast tracker
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "BROADCAST_TRACKER_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub tracker: TrackerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

/// Broadcast lifecycle tuning
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Blocks a sighting must be buried under before it counts as confirmed
    pub confirmation_depth: u64,
    /// Blocks a submitted but unsighted transaction may wait before it is stale
    pub stale_depth: u64,
    /// Deadline for every chain access call
    #[serde(default = "default_chain_timeout_ms")]
    pub chain_timeout_ms: u64,
    /// Deadline for each outcome handler callback
    #[serde(default = "default_notification_timeout_ms")]
    pub notification_timeout_ms: u64,
    /// Blocks past confirmation for which reverted confirmations are still detected
    #[serde(default = "default_confirmation_retention")]
    pub confirmation_retention: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_chain_timeout_ms() -> u64 {
    10_000
}

fn default_notification_timeout_ms() -> u64 {
    10_000
}

fn default_confirmation_retention() -> u64 {
    100
}

fn default_health_check_interval_secs() -> u64 {
    30
}

impl TrackerConfig {
    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_timeout_ms)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 6,
            stale_depth: 30,
            chain_timeout_ms: default_chain_timeout_ms(),
            notification_timeout_ms: default_notification_timeout_ms(),
            confirmation_retention: default_confirmation_retention(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from the file named by `BROADCAST_TRACKER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.tracker.validate()?;

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL must be set");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }
        if self.metrics.enabled && self.metrics.port == self.api.port {
            anyhow::bail!("Metrics and API cannot share port {}", self.api.port);
        }

        Ok(())
    }
}

impl TrackerConfig {
    /// Validate lifecycle tuning
    pub fn validate(&self) -> Result<()> {
        if self.confirmation_depth == 0 {
            anyhow::bail!("confirmation_depth must be at least 1");
        }
        if self.stale_depth == 0 {
            anyhow::bail!("stale_depth must be at least 1");
        }
        if self.chain_timeout_ms == 0 {
            anyhow::bail!("chain_timeout_ms must be positive");
        }
        if self.notification_timeout_ms == 0 {
            anyhow::bail!("notification_timeout_ms must be positive");
        }
        // Markers pruned earlier than this cannot catch a reorg of the sighting block
        if self.confirmation_retention < self.confirmation_depth {
            anyhow::bail!(
                "confirmation_retention ({}) must be at least confirmation_depth ({})",
                self.confirmation_retention,
                self.confirmation_depth
            );
        }
        if self.stale_depth < self.confirmation_depth {
            tracing::warn!(
                "stale_depth {} is below confirmation_depth {}; slow inclusions will be resubmitted",
                self.stale_depth,
                self.confirmation_depth
            );
        }
        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |cap: &regex::Captures<'_>| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
