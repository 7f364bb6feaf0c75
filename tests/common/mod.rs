//! Common test utilities for integration tests
//!
//! Shared fixtures for building stores, studies and monitors.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use trial_monitor::adapters::InMemoryStudyStore;
use trial_monitor::domain::models::{Study, TrialState, TrialSummary};
use trial_monitor::services::{MonitorConfig, MonitorEvent};

/// Setup test logging
///
/// Initializes a tracing subscriber writing to the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Monitor configuration with short delays and no attribute caching.
pub fn fast_monitor_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(50),
        metadata_ttl: Duration::ZERO,
        verify_delay: Duration::from_millis(1),
        shutdown_timeout: Duration::from_secs(2),
        ..MonitorConfig::default()
    }
}

/// An in-memory store with one study holding trials in the given states.
pub async fn seeded_store(
    name: &str,
    states: &[TrialState],
) -> (Arc<InMemoryStudyStore>, Study, Vec<TrialSummary>) {
    let store = Arc::new(InMemoryStudyStore::new());
    let study = store.add_study(name).await;
    let mut trials = Vec::with_capacity(states.len());
    for state in states {
        trials.push(store.add_trial(study.study_id, *state).await);
    }
    (store, study, trials)
}

/// Receive events until one matches, or panic after `timeout`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<MonitorEvent>,
    timeout: Duration,
    mut matches: F,
) -> MonitorEvent
where
    F: FnMut(&MonitorEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for monitor event")
}

/// Poll an async condition until it holds, or panic after `timeout`.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
