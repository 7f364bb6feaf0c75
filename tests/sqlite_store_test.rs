//! End-to-end monitoring against the SQLite study store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_monitor_config, setup_test_logging, wait_for_event};
use trial_monitor::adapters::sqlite::create_migrated_test_pool;
use trial_monitor::adapters::SqliteStudyStore;
use trial_monitor::domain::models::{note_from_attrs, StudySelector, StudyLoadConfig, TrialState};
use trial_monitor::domain::ports::StudyStore;
use trial_monitor::services::{MonitorEvent, MonitorSupervisor, NoteMonitor, TransitionOutcome};

async fn store() -> Arc<SqliteStudyStore> {
    Arc::new(SqliteStudyStore::new(create_migrated_test_pool().await.unwrap()))
}

#[tokio::test]
async fn test_note_prunes_running_trial() {
    setup_test_logging();
    let store = store().await;
    let study = store.create_study("sqlite-e2e").await.unwrap();
    let keep = store.create_trial(study.study_id, TrialState::Running).await.unwrap();
    let prune = store.create_trial(study.study_id, TrialState::Running).await.unwrap();
    store
        .save_note(study.study_id, prune.trial_id, "diverging, PRUNE")
        .await
        .unwrap();

    let monitor = NoteMonitor::new(store.clone(), study, fast_monitor_config()).unwrap();
    let report = monitor.run_once().await.unwrap();

    assert_eq!(report.trials_checked, 2);
    assert_eq!(report.outcome_count(TransitionOutcome::Applied), 1);

    let pruned = store.get_trial(prune.trial_id).await.unwrap().unwrap();
    assert_eq!(pruned.state, TrialState::Pruned);
    assert!(pruned.datetime_complete.is_some());

    let kept = store.get_trial(keep.trial_id).await.unwrap().unwrap();
    assert_eq!(kept.state, TrialState::Running);
}

#[tokio::test]
async fn test_finished_trials_are_not_overridden() {
    let store = store().await;
    let study = store.create_study("finished").await.unwrap();
    let trial = store.create_trial(study.study_id, TrialState::Pruned).await.unwrap();
    store.save_note(study.study_id, trial.trial_id, "FAIL").await.unwrap();

    let monitor = NoteMonitor::new(store.clone(), study, fast_monitor_config()).unwrap();
    let report = monitor.run_once().await.unwrap();

    assert_eq!(report.trials_checked, 0);
    assert_eq!(report.trials_excluded, 1);
    let trial = store.get_trial(trial.trial_id).await.unwrap().unwrap();
    assert_eq!(trial.state, TrialState::Pruned);
}

#[tokio::test]
async fn test_long_note_spans_chunks() {
    let store = store().await;
    let study = store.create_study("chunks").await.unwrap();
    let trial = store.create_trial(study.study_id, TrialState::Complete).await.unwrap();

    let body = format!("{}\nverdict: FAIL", "x".repeat(5000));
    let saved = store.save_note(study.study_id, trial.trial_id, &body).await.unwrap();
    assert_eq!(saved.version, 1);

    let attrs = store.study_system_attrs(study.study_id).await.unwrap();
    assert_eq!(note_from_attrs(&attrs, trial.trial_id).body, body);

    let monitor = NoteMonitor::new(store.clone(), study, fast_monitor_config()).unwrap();
    monitor.run_once().await.unwrap();
    let trial = store.get_trial(trial.trial_id).await.unwrap().unwrap();
    assert_eq!(trial.state, TrialState::Failed);
}

#[tokio::test]
async fn test_shorter_note_drops_stale_chunks() {
    let store = store().await;
    let study = store.create_study("rewrite").await.unwrap();
    let trial = store.create_trial(study.study_id, TrialState::Running).await.unwrap();

    store
        .save_note(study.study_id, trial.trial_id, &"y".repeat(4500))
        .await
        .unwrap();
    let saved = store.save_note(study.study_id, trial.trial_id, "short").await.unwrap();
    assert_eq!(saved.version, 2);

    let attrs = store.study_system_attrs(study.study_id).await.unwrap();
    let note = note_from_attrs(&attrs, trial.trial_id);
    assert_eq!(note.body, "short");
    assert_eq!(note.version, 2);
}

#[tokio::test]
async fn test_supervisor_monitors_named_studies() {
    let store = store().await;
    let study = store.create_study("supervised").await.unwrap();
    store.create_study("ignored").await.unwrap();
    let trial = store.create_trial(study.study_id, TrialState::Running).await.unwrap();

    let mut supervisor =
        MonitorSupervisor::new(store.clone(), fast_monitor_config(), StudyLoadConfig::default());
    let selector = StudySelector::Named(vec!["supervised".to_string()]);
    assert_eq!(supervisor.start(&selector).await.unwrap(), 1);

    let mut events = supervisor.monitors()[0].events();
    store.save_note(study.study_id, trial.trial_id, "FAIL").await.unwrap();

    wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, MonitorEvent::TransitionVerified { state: TrialState::Failed, .. })
    })
    .await;

    supervisor.stop_all().await;
    assert!(supervisor.all_stopped().await);
    let statuses = supervisor.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].0, "supervised");
    assert_eq!(statuses[0].1.transitions_applied, 1);
}
