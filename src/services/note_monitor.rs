//! Background note monitor for a single study.
//!
//! One tokio task per study runs detection cycles at a fixed interval. Failed
//! cycles slow the loop down, and a run of consecutive failures triggers a long
//! cooldown that also drops the monitor's caches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ChangeablePolicy, MonitorSettings, Study};
use crate::domain::ports::StudyStore;
use crate::services::change_detector::{ChangeDetector, CycleReport, DetectorConfig};
use crate::services::command_parser::{CommandParser, DEFAULT_FAIL_PATTERN, DEFAULT_PRUNE_PATTERN};
use crate::services::events::{EventPublisher, MonitorEvent};
use crate::services::transition_engine::{TransitionConfig, TransitionEngine, TransitionOutcome};

/// Multiplier applied to the interval after a failed cycle.
const FAILURE_BACKOFF_FACTOR: u32 = 2;

/// Configuration for a note monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between successful cycles.
    pub interval: Duration,
    pub prune_pattern: String,
    pub fail_pattern: String,
    /// Log transitions without applying them.
    pub dry_run: bool,
    /// Which trial states may be changed.
    pub policy: ChangeablePolicy,
    /// How long a study attribute snapshot is reused.
    pub metadata_ttl: Duration,
    pub verify_delay: Duration,
    pub verify_attempts: u32,
    /// Consecutive failed cycles before a cooldown.
    pub max_consecutive_failures: u32,
    /// Cooldown length as a multiple of the interval.
    pub cooldown_multiplier: u32,
    /// Minimum time `stop` waits for the task to exit.
    pub shutdown_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            prune_pattern: DEFAULT_PRUNE_PATTERN.to_string(),
            fail_pattern: DEFAULT_FAIL_PATTERN.to_string(),
            dry_run: false,
            policy: ChangeablePolicy::default(),
            metadata_ttl: Duration::from_secs(5),
            verify_delay: Duration::from_millis(500),
            verify_attempts: 1,
            max_consecutive_failures: 5,
            cooldown_multiplier: 10,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            prune_pattern: settings.prune_pattern.clone(),
            fail_pattern: settings.fail_pattern.clone(),
            dry_run: settings.dry_run,
            policy: ChangeablePolicy::from_only_active(settings.only_active_trials),
            metadata_ttl: Duration::from_millis(settings.metadata_ttl_ms),
            verify_delay: Duration::from_millis(settings.verify_delay_ms),
            verify_attempts: settings.verify_attempts,
            max_consecutive_failures: settings.max_consecutive_failures,
            cooldown_multiplier: settings.cooldown_multiplier,
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
        }
    }
}

impl MonitorConfig {
    /// Sleep after reaching the failure threshold. Saturates instead of overflowing.
    pub fn cooldown(&self) -> Duration {
        self.interval.saturating_mul(self.cooldown_multiplier)
    }

    /// Sleep after a failed cycle below the failure threshold.
    pub fn failure_delay(&self) -> Duration {
        self.interval.saturating_mul(FAILURE_BACKOFF_FACTOR)
    }

    /// Upper bound on how long `stop` waits: a slow cycle may take two intervals.
    pub fn stop_wait(&self) -> Duration {
        self.shutdown_timeout.max(self.interval.saturating_mul(2))
    }
}

/// Lifecycle of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Counters describing a monitor's activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub transitions_applied: u64,
    pub cooldowns: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl MonitorStatus {
    fn record_success(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.consecutive_failures = 0;
        self.transitions_applied += report.outcome_count(TransitionOutcome::Applied) as u64;
        self.last_cycle_at = Some(Utc::now());
        self.last_error = None;
    }

    fn record_failure(&mut self, error: String) {
        self.cycles += 1;
        self.failed_cycles += 1;
        self.consecutive_failures += 1;
        self.last_cycle_at = Some(Utc::now());
        self.last_error = Some(error);
    }
}

/// Signals for one run of the background task.
struct RunHandle {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Watches one study's trial notes and applies PRUNE/FAIL commands.
pub struct NoteMonitor<S: ?Sized> {
    study: Study,
    config: MonitorConfig,
    detector: Arc<Mutex<ChangeDetector<S>>>,
    status: Arc<RwLock<MonitorStatus>>,
    events: EventPublisher,
    run: Mutex<Option<RunHandle>>,
}

impl<S> NoteMonitor<S>
where
    S: StudyStore + ?Sized + 'static,
{
    /// Create a monitor. Fails when a command pattern is not a valid regex.
    pub fn new(store: Arc<S>, study: Study, config: MonitorConfig) -> DomainResult<Self> {
        let parser = CommandParser::new(&config.prune_pattern, &config.fail_pattern)?;
        let events = EventPublisher::new();

        let engine = TransitionEngine::new(
            Arc::clone(&store),
            study.clone(),
            TransitionConfig {
                dry_run: config.dry_run,
                verify_delay: config.verify_delay,
                verify_attempts: config.verify_attempts,
            },
            events.clone(),
        );
        let detector = ChangeDetector::new(
            store,
            study.clone(),
            DetectorConfig {
                policy: config.policy,
                metadata_ttl: config.metadata_ttl,
            },
            parser,
            engine,
            events.clone(),
        );

        Ok(Self {
            study,
            config,
            detector: Arc::new(Mutex::new(detector)),
            status: Arc::new(RwLock::new(MonitorStatus::default())),
            events,
            run: Mutex::new(None),
        })
    }

    pub fn study(&self) -> &Study {
        &self.study
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Subscribe to this monitor's events.
    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> MonitorStatus {
        self.status.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.status.read().await.state == MonitorState::Running
    }

    /// Whether the background task exists and has not exited.
    pub async fn is_alive(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Last processed note version of a trial; -1 when never seen.
    pub async fn last_seen_version(&self, number: i64) -> i64 {
        self.detector.lock().await.last_seen_version(number)
    }

    /// Spawn the background task. Does nothing when already running.
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!(study = %self.study.name, "monitor already running");
            return;
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        self.status.write().await.state = MonitorState::Running;

        info!(
            study = %self.study.name,
            interval_secs = self.config.interval.as_secs_f64(),
            dry_run = self.config.dry_run,
            mode = self.config.policy.label(),
            "starting note monitor"
        );

        let worker = MonitorLoop {
            study: self.study.name.clone(),
            config: self.config.clone(),
            detector: Arc::clone(&self.detector),
            status: Arc::clone(&self.status),
            events: self.events.clone(),
            stop_flag: Arc::clone(&stop_flag),
            wake: Arc::clone(&wake),
        };
        let span = info_span!("note_monitor", study = %self.study.name);
        let task = tokio::spawn(worker.run().instrument(span));

        *run = Some(RunHandle {
            stop_flag,
            wake,
            task,
        });
    }

    /// Ask the task to stop and wait for it to finish its current cycle.
    ///
    /// Safe to call repeatedly. If the task does not exit in time it is left to
    /// finish on its own.
    pub async fn stop(&self) {
        let Some(mut handle) = self.run.lock().await.take() else {
            return;
        };

        {
            let mut status = self.status.write().await;
            if status.state == MonitorState::Running {
                status.state = MonitorState::Stopping;
            }
        }
        handle.stop_flag.store(true, Ordering::Release);
        handle.wake.notify_one();

        let wait = self.config.stop_wait();
        match tokio::time::timeout(wait, &mut handle.task).await {
            Ok(Ok(())) => info!(study = %self.study.name, "note monitor stopped"),
            Ok(Err(e)) => error!(study = %self.study.name, error = %e, "note monitor task ended abnormally"),
            Err(_) => warn!(
                study = %self.study.name,
                waited_secs = wait.as_secs_f64(),
                "note monitor did not stop in time"
            ),
        }
    }

    /// Run a single cycle outside the background loop.
    pub async fn run_once(&self) -> DomainResult<CycleReport> {
        let result = self.detector.lock().await.run_cycle().await;
        let mut status = self.status.write().await;
        match &result {
            Ok(report) => status.record_success(report),
            Err(e) => status.record_failure(e.to_string()),
        }
        result
    }
}

/// State moved into the spawned task.
struct MonitorLoop<S: ?Sized> {
    study: String,
    config: MonitorConfig,
    detector: Arc<Mutex<ChangeDetector<S>>>,
    status: Arc<RwLock<MonitorStatus>>,
    events: EventPublisher,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl<S> MonitorLoop<S>
where
    S: StudyStore + ?Sized,
{
    async fn run(self) {
        self.events.publish(MonitorEvent::Started {
            study: self.study.clone(),
        });

        while !self.stop_flag.load(Ordering::Acquire) {
            let delay = self.cycle().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.wake.notified() => {}
            }
        }

        self.status.write().await.state = MonitorState::Stopped;
        self.events.publish(MonitorEvent::Stopped {
            study: self.study.clone(),
        });
    }

    /// Run one cycle and return how long to sleep before the next.
    async fn cycle(&self) -> Duration {
        let result = self.detector.lock().await.run_cycle().await;

        let error = match result {
            Ok(report) => {
                if report.notes_changed > 0 {
                    debug!(
                        notes_changed = report.notes_changed,
                        commands = report.commands_found,
                        "cycle complete"
                    );
                }
                self.status.write().await.record_success(&report);
                return self.config.interval;
            }
            Err(e) => e.to_string(),
        };

        let consecutive = {
            let mut status = self.status.write().await;
            status.record_failure(error.clone());
            status.consecutive_failures
        };
        error!(consecutive_failures = consecutive, error = %error, "monitor cycle failed");
        self.events.publish(MonitorEvent::CycleFailed {
            study: self.study.clone(),
            consecutive_failures: consecutive,
            error,
        });

        if consecutive < self.config.max_consecutive_failures {
            return self.config.failure_delay();
        }

        let cooldown = self.config.cooldown();
        warn!(
            consecutive_failures = consecutive,
            cooldown_secs = cooldown.as_secs_f64(),
            "too many consecutive failures, cooling down and clearing caches"
        );
        self.detector.lock().await.clear_caches();
        {
            let mut status = self.status.write().await;
            status.consecutive_failures = 0;
            status.cooldowns += 1;
        }
        self.events.publish(MonitorEvent::Cooldown {
            study: self.study.clone(),
            duration: cooldown,
        });
        cooldown
    }
}
