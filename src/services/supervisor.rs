//! Runs one note monitor per selected study.

use std::sync::Arc;
use std::time::Duration;

use backoff::future::retry_notify;
use backoff::ExponentialBackoffBuilder;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Study, StudyLoadConfig, StudySelector};
use crate::domain::ports::StudyStore;
use crate::services::note_monitor::{MonitorConfig, MonitorStatus, NoteMonitor};

/// Starts, watches and stops the monitors of a run.
pub struct MonitorSupervisor<S: ?Sized> {
    store: Arc<S>,
    config: MonitorConfig,
    load: StudyLoadConfig,
    monitors: Vec<Arc<NoteMonitor<S>>>,
}

impl<S> MonitorSupervisor<S>
where
    S: StudyStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, config: MonitorConfig, load: StudyLoadConfig) -> Self {
        Self {
            store,
            config,
            load,
            monitors: Vec::new(),
        }
    }

    pub fn monitors(&self) -> &[Arc<NoteMonitor<S>>] {
        &self.monitors
    }

    /// Load a study by name, retrying transient store errors with exponential backoff.
    ///
    /// A missing study is not retried.
    pub async fn load_study(&self, name: &str) -> DomainResult<Study> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.load.initial_delay_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let max_retries = self.load.max_retries;
        let mut attempt = 0u32;

        retry_notify(
            policy,
            || {
                attempt += 1;
                let current = attempt;
                let store = Arc::clone(&self.store);
                async move {
                    match store.find_study(name).await {
                        Ok(Some(study)) => Ok(study),
                        Ok(None) => Err(backoff::Error::permanent(DomainError::StudyNotFound(
                            name.to_string(),
                        ))),
                        Err(e) if e.is_transient() && current < max_retries => Err(backoff::Error::transient(e)),
                        Err(e) => Err(backoff::Error::permanent(e)),
                    }
                }
            },
            |e: DomainError, wait: Duration| {
                warn!(study = name, error = %e, retry_in_ms = wait.as_millis() as u64, "failed to load study, retrying");
            },
        )
        .await
    }

    /// Resolve a selector into the studies to monitor.
    ///
    /// Named studies that cannot be loaded are logged and skipped.
    pub async fn resolve_studies(&self, selector: &StudySelector) -> DomainResult<Vec<Study>> {
        match selector {
            StudySelector::All => {
                let studies = self.store.list_studies().await?;
                info!(count = studies.len(), "found studies in store");
                Ok(studies)
            }
            StudySelector::Named(names) => {
                let mut studies = Vec::with_capacity(names.len());
                for name in names {
                    match self.load_study(name).await {
                        Ok(study) => studies.push(study),
                        Err(e) => error!(study = %name, error = %e, "could not load study, skipping"),
                    }
                }
                Ok(studies)
            }
        }
    }

    /// Start a monitor for every selected study. Returns how many were started.
    pub async fn start(&mut self, selector: &StudySelector) -> DomainResult<usize> {
        let studies = self.resolve_studies(selector).await?;

        for study in studies {
            if self.monitors.iter().any(|m| m.study().study_id == study.study_id) {
                continue;
            }
            let monitor = Arc::new(NoteMonitor::new(Arc::clone(&self.store), study, self.config.clone())?);
            monitor.start().await;
            self.monitors.push(monitor);
        }

        info!(monitors = self.monitors.len(), "monitors running");
        Ok(self.monitors.len())
    }

    /// True when no monitor task is still alive.
    pub async fn all_stopped(&self) -> bool {
        for monitor in &self.monitors {
            if monitor.is_alive().await {
                return false;
            }
        }
        true
    }

    pub async fn statuses(&self) -> Vec<(String, MonitorStatus)> {
        let mut statuses = Vec::with_capacity(self.monitors.len());
        for monitor in &self.monitors {
            statuses.push((monitor.study().name.clone(), monitor.status().await));
        }
        statuses
    }

    /// Stop every monitor concurrently.
    pub async fn stop_all(&self) {
        info!(monitors = self.monitors.len(), "stopping monitors");
        join_all(self.monitors.iter().map(|m| m.stop())).await;
    }
}
