use serde::{Deserialize, Serialize};

/// Main configuration structure for the trial monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Study store connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Note monitor behaviour
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Studies to monitor; `["all"]` monitors every study
    #[serde(default)]
    pub studies: Vec<String>,

    /// Retry policy for loading studies at startup
    #[serde(default)]
    pub study_load: StudyLoadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            monitor: MonitorSettings::default(),
            studies: vec![],
            study_load: StudyLoadConfig::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// sqlx database URL of the study store
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:optuna.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Note monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorSettings {
    /// Seconds between polling cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Case-insensitive regex that marks a PRUNE command
    #[serde(default = "default_prune_pattern")]
    pub prune_pattern: String,

    /// Case-insensitive regex that marks a FAIL command
    #[serde(default = "default_fail_pattern")]
    pub fail_pattern: String,

    /// Log intended transitions without applying them
    #[serde(default)]
    pub dry_run: bool,

    /// Watch RUNNING and WAITING trials only (COMPLETE trials are skipped)
    #[serde(default)]
    pub only_active_trials: bool,

    /// Lifetime of the cached study metadata snapshot
    #[serde(default = "default_metadata_ttl_ms")]
    pub metadata_ttl_ms: u64,

    /// Delay before each post-transition verification read
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// Verification reads before giving up on a mismatch
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Consecutive failed cycles before a cooldown
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Cooldown length as a multiple of the interval
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: u32,

    /// Minimum time `stop` waits for a monitor to exit
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

const fn default_interval_secs() -> u64 {
    10
}

fn default_prune_pattern() -> String {
    "PRUNE".to_string()
}

fn default_fail_pattern() -> String {
    "FAIL".to_string()
}

const fn default_metadata_ttl_ms() -> u64 {
    5_000
}

const fn default_verify_delay_ms() -> u64 {
    500
}

const fn default_verify_attempts() -> u32 {
    1
}

const fn default_max_consecutive_failures() -> u32 {
    5
}

const fn default_cooldown_multiplier() -> u32 {
    10
}

const fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            prune_pattern: default_prune_pattern(),
            fail_pattern: default_fail_pattern(),
            dry_run: false,
            only_active_trials: false,
            metadata_ttl_ms: default_metadata_ttl_ms(),
            verify_delay_ms: default_verify_delay_ms(),
            verify_attempts: default_verify_attempts(),
            max_consecutive_failures: default_max_consecutive_failures(),
            cooldown_multiplier: default_cooldown_multiplier(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Retry policy for loading a study before its monitor starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StudyLoadConfig {
    /// Attempts per study
    #[serde(default = "default_load_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles on each retry
    #[serde(default = "default_load_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

const fn default_load_max_retries() -> u32 {
    3
}

const fn default_load_initial_delay_ms() -> u64 {
    2_000
}

impl Default for StudyLoadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_load_max_retries(),
            initial_delay_ms: default_load_initial_delay_ms(),
        }
    }
}
