//! Per-study note change detection.
//!
//! Each cycle compares the note version of every changeable trial against the
//! version last processed and acts on new commands. Version counters are the
//! only change signal, so a cycle costs one trial listing and at most one bulk
//! attribute read regardless of how many trials there are.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    note_from_attrs, note_version, ChangeablePolicy, NoteCommand, Study, StudyAttrs, TrialNumber,
    TrialSummary,
};
use crate::domain::ports::StudyStore;
use crate::services::command_parser::CommandParser;
use crate::services::events::{EventPublisher, MonitorEvent};
use crate::services::transition_engine::{TransitionEngine, TransitionOutcome};
use crate::services::trial_id_resolver::TrialIdResolver;

/// Characters of a note body included in log lines and events.
const NOTE_PREVIEW_CHARS: usize = 100;

/// Short-lived snapshot of a study's system attributes.
#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    snapshot: Option<(Arc<StudyAttrs>, Instant)>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, snapshot: None }
    }

    /// Snapshot younger than the TTL, if any.
    pub fn fresh(&self) -> Option<Arc<StudyAttrs>> {
        self.snapshot
            .as_ref()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < self.ttl)
            .map(|(attrs, _)| Arc::clone(attrs))
    }

    pub fn store(&mut self, attrs: StudyAttrs) -> Arc<StudyAttrs> {
        let attrs = Arc::new(attrs);
        self.snapshot = Some((Arc::clone(&attrs), Instant::now()));
        attrs
    }

    pub fn invalidate(&mut self) {
        self.snapshot = None;
    }
}

/// Summary of one detection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Trials in a changeable state that were examined.
    pub trials_checked: usize,
    /// Trials skipped because their state is outside the policy.
    pub trials_excluded: usize,
    /// Whether this cycle fetched a new attribute snapshot.
    pub metadata_refreshed: bool,
    /// Trials whose note version advanced.
    pub notes_changed: usize,
    /// Changed notes that contained a command.
    pub commands_found: usize,
    /// Transition outcomes keyed by `TransitionOutcome::as_str`.
    pub outcomes: BTreeMap<&'static str, usize>,
    /// Trials that errored and will be retried next cycle.
    pub trial_errors: usize,
}

impl CycleReport {
    pub fn outcome_count(&self, outcome: TransitionOutcome) -> usize {
        self.outcomes.get(outcome.as_str()).copied().unwrap_or(0)
    }

    fn record(&mut self, outcome: TransitionOutcome) {
        *self.outcomes.entry(outcome.as_str()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub policy: ChangeablePolicy,
    pub metadata_ttl: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            policy: ChangeablePolicy::default(),
            metadata_ttl: Duration::from_secs(5),
        }
    }
}

/// Detects new note versions for one study and dispatches their commands.
pub struct ChangeDetector<S: ?Sized> {
    store: Arc<S>,
    study: Study,
    config: DetectorConfig,
    parser: CommandParser,
    engine: TransitionEngine<S>,
    resolver: TrialIdResolver,
    metadata: MetadataCache,
    last_seen: HashMap<TrialNumber, i64>,
    events: EventPublisher,
}

impl<S> ChangeDetector<S>
where
    S: StudyStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        study: Study,
        config: DetectorConfig,
        parser: CommandParser,
        engine: TransitionEngine<S>,
        events: EventPublisher,
    ) -> Self {
        Self {
            resolver: TrialIdResolver::new(study.study_id),
            metadata: MetadataCache::new(config.metadata_ttl),
            store,
            study,
            config,
            parser,
            engine,
            last_seen: HashMap::new(),
            events,
        }
    }

    pub fn study(&self) -> &Study {
        &self.study
    }

    /// Last processed note version of a trial; -1 when never seen.
    pub fn last_seen_version(&self, number: TrialNumber) -> i64 {
        self.last_seen.get(&number).copied().unwrap_or(-1)
    }

    pub fn resolver(&self) -> &TrialIdResolver {
        &self.resolver
    }

    /// Drop the identifier cache and attribute snapshot. Version tracking is kept.
    pub fn clear_caches(&mut self) {
        self.resolver.clear();
        self.metadata.invalidate();
    }

    /// Run one detection cycle.
    ///
    /// Fails only when the trial listing or the attribute read fails; errors on
    /// individual trials are logged and counted in the report.
    pub async fn run_cycle(&mut self) -> DomainResult<CycleReport> {
        let mut report = CycleReport::default();

        let all_trials = self.store.list_trials(self.study.study_id, None).await?;
        let states = self.config.policy.states();
        let trials: Vec<TrialSummary> = all_trials
            .iter()
            .filter(|t| states.contains(&t.state))
            .cloned()
            .collect();

        report.trials_checked = trials.len();
        report.trials_excluded = all_trials.len() - trials.len();
        debug!(
            study = %self.study.name,
            mode = self.config.policy.label(),
            checked = report.trials_checked,
            total = all_trials.len(),
            excluded = report.trials_excluded,
            "listed trials"
        );

        for finished in all_trials.iter().filter(|t| t.state.is_terminal()) {
            self.evict(finished.number);
        }

        if trials.is_empty() {
            return Ok(report);
        }

        let attrs = match self.metadata.fresh() {
            Some(attrs) => attrs,
            None => {
                let attrs = self.store.study_system_attrs(self.study.study_id).await?;
                report.metadata_refreshed = true;
                self.metadata.store(attrs)
            }
        };

        for trial in &trials {
            if let Err(e) = self.process_trial(trial, &attrs, &mut report).await {
                report.trial_errors += 1;
                warn!(study = %self.study.name, trial = trial.number, error = %e, "error checking trial note");
            }
        }

        Ok(report)
    }

    async fn process_trial(
        &mut self,
        trial: &TrialSummary,
        attrs: &StudyAttrs,
        report: &mut CycleReport,
    ) -> DomainResult<()> {
        let number = trial.number;
        let trial_id = self
            .resolver
            .resolve(self.store.as_ref(), number)
            .await?
            .ok_or(DomainError::TrialNotFound {
                study_id: self.study.study_id,
                number,
            })?;

        let version = note_version(attrs, trial_id);
        let last_seen = self.last_seen_version(number);

        if version > last_seen {
            let note = note_from_attrs(attrs, trial_id);

            if last_seen < 0 && version == 0 && note.body.is_empty() {
                self.last_seen.insert(number, version);
            } else {
                report.notes_changed += 1;
                let preview = note.preview(NOTE_PREVIEW_CHARS);
                info!(study = %self.study.name, trial = number, version, note = %preview, "note version changed");
                self.events.publish(MonitorEvent::NoteChanged {
                    study: self.study.name.clone(),
                    trial: number,
                    version,
                    preview,
                });

                let command = self.parser.parse(&note.body);
                if let Some(target) = command.target_state() {
                    report.commands_found += 1;
                    self.announce_command(number, command);
                    let outcome = self.engine.attempt_transition(&mut self.resolver, number, target).await;
                    report.record(outcome);
                    if ends_terminal(outcome, self.engine.is_dry_run()) {
                        self.evict(number);
                    }
                }

                // Advance even when no command was found so the same version is never re-read.
                self.last_seen.insert(number, version);
            }
        }

        Ok(())
    }

    fn evict(&mut self, number: TrialNumber) {
        if self.resolver.evict(number) {
            debug!(study = %self.study.name, trial = number, "evicted finished trial from id cache");
        }
    }

    fn announce_command(&self, number: TrialNumber, command: NoteCommand) {
        let dry_run = self.engine.is_dry_run();
        info!(
            study = %self.study.name,
            trial = number,
            command = command.as_str(),
            dry_run,
            "command detected in note"
        );
        self.events.publish(MonitorEvent::CommandDetected {
            study: self.study.name.clone(),
            trial: number,
            command,
        });
    }
}

/// Whether a trial is known to be PRUNED or FAILED after a transition attempt.
///
/// The engine only targets terminal states, so a trial that already had the
/// target or could not be overridden is terminal too.
fn ends_terminal(outcome: TransitionOutcome, dry_run: bool) -> bool {
    match outcome {
        TransitionOutcome::Applied => !dry_run,
        TransitionOutcome::AlreadyInState | TransitionOutcome::Illegal => true,
        TransitionOutcome::Failed => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStudyStore;
    use crate::domain::models::TrialState;
    use crate::services::transition_engine::TransitionConfig;

    async fn detector(
        store: &Arc<InMemoryStudyStore>,
        policy: ChangeablePolicy,
        dry_run: bool,
    ) -> ChangeDetector<InMemoryStudyStore> {
        let study = store.add_study("detect").await;
        let events = EventPublisher::new();
        let engine = TransitionEngine::new(
            store.clone(),
            study.clone(),
            TransitionConfig {
                dry_run,
                verify_delay: Duration::from_millis(1),
                verify_attempts: 1,
            },
            events.clone(),
        );
        let config = DetectorConfig {
            policy,
            metadata_ttl: Duration::ZERO,
        };
        ChangeDetector::new(store.clone(), study, config, CommandParser::default(), engine, events)
    }

    #[tokio::test]
    async fn test_unannotated_trial_marked_silently() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, false).await;
        let study_id = detector.study().study_id;
        store.add_trial(study_id, TrialState::Running).await;

        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.trials_checked, 1);
        assert_eq!(report.notes_changed, 0);
        assert_eq!(detector.last_seen_version(0), 0);
    }

    #[tokio::test]
    async fn test_version_advances_without_command() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, false).await;
        let study_id = detector.study().study_id;
        let trial = store.add_trial(study_id, TrialState::Running).await;
        store.save_note(study_id, trial.trial_id, "looks fine so far").await;

        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.notes_changed, 1);
        assert_eq!(report.commands_found, 0);
        assert_eq!(detector.last_seen_version(0), 1);

        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.notes_changed, 0);
    }

    #[tokio::test]
    async fn test_command_acted_on_once_per_version() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, false).await;
        let study_id = detector.study().study_id;
        let trial = store.add_trial(study_id, TrialState::Complete).await;
        store.save_note(study_id, trial.trial_id, "FAIL: bad data split").await;

        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.outcome_count(TransitionOutcome::Applied), 1);
        assert_eq!(store.trial_state(trial.trial_id).await, Some(TrialState::Failed));

        detector.run_cycle().await.unwrap();
        detector.run_cycle().await.unwrap();
        assert_eq!(store.calls().tell, 1);
    }

    #[tokio::test]
    async fn test_active_only_excludes_complete() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::ActiveOnly, false).await;
        let study_id = detector.study().study_id;
        let trial = store.add_trial(study_id, TrialState::Complete).await;
        store.add_trial(study_id, TrialState::Running).await;
        store.save_note(study_id, trial.trial_id, "PRUNE").await;

        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.trials_checked, 1);
        assert_eq!(report.trials_excluded, 1);
        assert_eq!(store.calls().tell, 0);
        assert_eq!(detector.last_seen_version(0), -1);
    }

    #[tokio::test]
    async fn test_applied_transition_evicts_id() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, false).await;
        let study_id = detector.study().study_id;
        let pruned = store.add_trial(study_id, TrialState::Running).await;
        store.add_trial(study_id, TrialState::Running).await;
        store.save_note(study_id, pruned.trial_id, "PRUNE").await;

        detector.run_cycle().await.unwrap();
        assert!(!detector.resolver().contains(0));
        assert!(detector.resolver().contains(1));
    }

    #[tokio::test]
    async fn test_dry_run_keeps_id_cached() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, true).await;
        let study_id = detector.study().study_id;
        let trial = store.add_trial(study_id, TrialState::Running).await;
        store.save_note(study_id, trial.trial_id, "PRUNE").await;

        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.outcome_count(TransitionOutcome::Applied), 1);
        assert_eq!(store.calls().tell, 0);
        assert!(detector.resolver().contains(0));
    }

    #[tokio::test]
    async fn test_trial_finished_elsewhere_is_evicted() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, false).await;
        let study_id = detector.study().study_id;
        let trial = store.add_trial(study_id, TrialState::Running).await;

        detector.run_cycle().await.unwrap();
        assert!(detector.resolver().contains(0));

        store.set_trial_state(trial.trial_id, TrialState::Pruned).await;
        let report = detector.run_cycle().await.unwrap();
        assert_eq!(report.trials_checked, 0);
        assert!(detector.resolver().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_fails_cycle() {
        let store = Arc::new(InMemoryStudyStore::new());
        let mut detector = detector(&store, ChangeablePolicy::IncludeComplete, false).await;
        store.add_trial(detector.study().study_id, TrialState::Running).await;
        store.set_reads_unavailable(true);

        let err = detector.run_cycle().await.unwrap_err();
        assert!(matches!(err, DomainError::StoreUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_snapshot_reused_within_ttl() {
        let mut cache = MetadataCache::new(Duration::from_secs(5));
        assert!(cache.fresh().is_none());

        cache.store(StudyAttrs::new());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.fresh().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.fresh().is_none());
    }

    #[test]
    fn test_ends_terminal() {
        assert!(ends_terminal(TransitionOutcome::Applied, false));
        assert!(!ends_terminal(TransitionOutcome::Applied, true));
        assert!(ends_terminal(TransitionOutcome::Illegal, false));
        assert!(!ends_terminal(TransitionOutcome::Failed, false));
    }
}
