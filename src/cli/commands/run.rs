//! `run`: monitor studies until interrupted.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::sqlite::redact_database_url;
use crate::cli::output::{output, table_with_header, CommandOutput};
use crate::cli::open_store;
use crate::domain::models::{ChangeablePolicy, Config, StudySelector};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{MonitorConfig, MonitorStatus, MonitorSupervisor};

/// How often the supervisor checks that monitors are still alive.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Study to monitor; repeat for several, or pass `all`
    #[arg(short, long = "study", value_name = "NAME")]
    pub study: Vec<String>,

    /// Seconds between polling cycles
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Case-insensitive regex that marks a PRUNE command
    #[arg(long, value_name = "REGEX")]
    pub prune_pattern: Option<String>,

    /// Case-insensitive regex that marks a FAIL command
    #[arg(long, value_name = "REGEX")]
    pub fail_pattern: Option<String>,

    /// Log transitions without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Only watch RUNNING and WAITING trials
    #[arg(long)]
    pub only_active_trials: bool,

    /// Study store URL, e.g. sqlite:optuna.db
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    /// Apply command-line flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if !self.study.is_empty() {
            config.studies.clone_from(&self.study);
        }
        if let Some(interval) = self.interval {
            config.monitor.interval_secs = interval;
        }
        if let Some(ref pattern) = self.prune_pattern {
            config.monitor.prune_pattern.clone_from(pattern);
        }
        if let Some(ref pattern) = self.fail_pattern {
            config.monitor.fail_pattern.clone_from(pattern);
        }
        if self.dry_run {
            config.monitor.dry_run = true;
        }
        if self.only_active_trials {
            config.monitor.only_active_trials = true;
        }
        if let Some(ref url) = self.database_url {
            config.database.url.clone_from(url);
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    monitors: Vec<MonitorSummary>,
}

#[derive(Debug, Serialize)]
struct MonitorSummary {
    study: String,
    #[serde(flatten)]
    status: MonitorStatus,
}

impl CommandOutput for RunSummary {
    fn to_human(&self) -> String {
        if self.monitors.is_empty() {
            return "No monitors ran.".to_string();
        }

        let mut table = table_with_header(&["Study", "Cycles", "Failed", "Transitions", "Cooldowns"]);
        for m in &self.monitors {
            table.add_row(vec![
                m.study.clone(),
                m.status.cycles.to_string(),
                m.status.failed_cycles.to_string(),
                m.status.transitions_applied.to_string(),
                m.status.cooldowns.to_string(),
            ]);
        }
        table.to_string()
    }
}

pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<()> {
    args.apply(&mut config);
    ConfigLoader::validate(&config).context("Invalid configuration")?;

    let Some(selector) = StudySelector::from_names(&config.studies) else {
        info!("no studies selected; pass --study NAME (repeatable) or --study all, or set `studies` in the config file");
        if !json_mode {
            println!("No studies selected. Use --study NAME or --study all.");
        }
        return Ok(());
    };

    let monitor_config = MonitorConfig::from(&config.monitor);
    info!(
        database = %redact_database_url(&config.database.url),
        studies = ?config.studies,
        interval_secs = config.monitor.interval_secs,
        prune_pattern = %config.monitor.prune_pattern,
        fail_pattern = %config.monitor.fail_pattern,
        dry_run = config.monitor.dry_run,
        mode = ChangeablePolicy::from_only_active(config.monitor.only_active_trials).label(),
        "starting trial monitor"
    );
    if config.monitor.dry_run {
        warn!("dry-run mode: detected commands are logged, trial states are not changed");
    }

    let store = open_store(&config).await?;
    let mut supervisor = MonitorSupervisor::new(store, monitor_config, config.study_load.clone());

    if start_monitors(&mut supervisor, &selector).await? == 0 {
        if !json_mode {
            println!("No studies found in the database to monitor.");
        }
        return Ok(());
    }

    wait_for_shutdown(&supervisor).await?;
    supervisor.stop_all().await;

    let monitors = supervisor
        .statuses()
        .await
        .into_iter()
        .map(|(study, status)| MonitorSummary { study, status })
        .collect();
    output(&RunSummary { monitors }, json_mode);
    Ok(())
}

/// Start the selected monitors.
///
/// An empty store under `all` is not an error; named studies that all failed to
/// load are.
async fn start_monitors<S>(supervisor: &mut MonitorSupervisor<S>, selector: &StudySelector) -> Result<usize>
where
    S: crate::domain::ports::StudyStore + ?Sized + 'static,
{
    let started = supervisor.start(selector).await.context("Failed to start monitors")?;
    if started == 0 {
        if *selector == StudySelector::All {
            warn!("no studies found in the database to monitor");
            return Ok(0);
        }
        bail!("No studies could be loaded; nothing to monitor");
    }
    Ok(started)
}

/// Block until Ctrl-C or until every monitor has exited.
async fn wait_for_shutdown<S>(supervisor: &MonitorSupervisor<S>) -> Result<()>
where
    S: crate::domain::ports::StudyStore + ?Sized + 'static,
{
    let mut liveness = tokio::time::interval(LIVENESS_CHECK_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("interrupt received, stopping monitors");
                return Ok(());
            }
            _ = liveness.tick() => {
                if supervisor.all_stopped().await {
                    warn!("all monitors have stopped");
                    return Ok(());
                }
            }
        }
    }
}
