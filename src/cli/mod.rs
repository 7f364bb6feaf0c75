//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::sqlite::{open_pool, redact_database_url, verify_connection, PoolConfig, SqliteStudyStore};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "trial-monitor")]
#[command(about = "Apply PRUNE/FAIL commands written in dashboard notes to running trials", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to .trial-monitor/config.yaml and local.yaml)
    #[arg(short, long, global = true, env = "TRIAL_MONITOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor studies and apply note commands until interrupted
    Run(commands::run::RunArgs),
    /// List studies with trial counts by state
    Studies(commands::studies::StudiesArgs),
    /// Write a note on a trial the way the dashboard does
    Note(commands::note::NoteArgs),
    /// Print the effective configuration
    Config,
}

/// Load configuration from `--config` or the project files.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Open the existing study store named by the configuration.
pub async fn open_store(config: &Config) -> Result<Arc<SqliteStudyStore>> {
    let pool = open_pool(
        &config.database.url,
        Some(PoolConfig::with_max_connections(config.database.max_connections)),
    )
    .await
    .with_context(|| format!("Failed to open study store at {}", redact_database_url(&config.database.url)))?;
    verify_connection(&pool).await.context("Study store did not answer")?;

    Ok(Arc::new(SqliteStudyStore::new(pool)))
}

/// Report an error and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": causes,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
