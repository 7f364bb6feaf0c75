use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use regex::Regex;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Prefix of environment variables that override configuration.
pub const ENV_PREFIX: &str = "TRIAL_MONITOR_";

/// Project configuration file, lowest file precedence.
pub const PROJECT_CONFIG_PATH: &str = ".trial-monitor/config.yaml";

/// Local overrides, not meant to be committed.
pub const LOCAL_CONFIG_PATH: &str = ".trial-monitor/local.yaml";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Invalid interval_secs: {0}. Must be at least 1")]
    InvalidInterval(u64),

    #[error("Invalid {name} pattern '{pattern}': {reason}")]
    InvalidPattern {
        name: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("Invalid max_consecutive_failures: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("Invalid cooldown_multiplier: {0}. Must be at least 1")]
    InvalidCooldownMultiplier(u32),

    #[error("Invalid verify_attempts: {0}. Must be at least 1")]
    InvalidVerifyAttempts(u32),

    #[error("Invalid study_load.max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .trial-monitor/config.yaml
    /// 3. .trial-monitor/local.yaml
    /// 4. Environment variables (TRIAL_MONITOR_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(&[Path::new(PROJECT_CONFIG_PATH), Path::new(LOCAL_CONFIG_PATH)])
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment variables still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Self::figment(&[path])
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Defaults, then each YAML file in order, then the environment.
    pub fn figment(files: &[&Path]) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        for file in files {
            figment = figment.merge(Yaml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        let monitor = &config.monitor;
        if monitor.interval_secs == 0 {
            return Err(ConfigError::InvalidInterval(monitor.interval_secs));
        }

        check_pattern("prune", &monitor.prune_pattern)?;
        check_pattern("fail", &monitor.fail_pattern)?;

        if monitor.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidFailureThreshold(
                monitor.max_consecutive_failures,
            ));
        }

        if monitor.cooldown_multiplier == 0 {
            return Err(ConfigError::InvalidCooldownMultiplier(
                monitor.cooldown_multiplier,
            ));
        }

        if monitor.verify_attempts == 0 {
            return Err(ConfigError::InvalidVerifyAttempts(monitor.verify_attempts));
        }

        if config.study_load.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.study_load.max_retries));
        }

        Ok(())
    }
}

fn check_pattern(name: &'static str, pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern {
            name,
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}
