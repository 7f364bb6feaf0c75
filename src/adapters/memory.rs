//! In-memory study store.
//!
//! Behaves like the SQLite store but keeps everything in process. It also lets
//! callers switch off the direct trial-id lookup, inject outages and count calls,
//! which is what the monitor tests lean on.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    note_update, Note, Study, StudyAttrs, Trial, TrialId, TrialNumber, TrialState, TrialSummary,
};
use crate::domain::ports::StudyStore;

/// Snapshot of how often each store operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub list_trials: u64,
    pub trial_id_lookups: u64,
    pub get_trial: u64,
    pub study_system_attrs: u64,
    pub tell: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    list_trials: AtomicU64,
    trial_id_lookups: AtomicU64,
    get_trial: AtomicU64,
    study_system_attrs: AtomicU64,
    tell: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    studies: BTreeMap<i64, Study>,
    trials: BTreeMap<TrialId, Trial>,
    attrs: BTreeMap<i64, StudyAttrs>,
    next_study_id: i64,
    next_trial_id: TrialId,
}

#[derive(Debug)]
pub struct InMemoryStudyStore {
    inner: RwLock<Inner>,
    direct_lookup: bool,
    reads_unavailable: AtomicBool,
    tell_fails: AtomicBool,
    tell_ignored: AtomicBool,
    lookup_fails_for: AtomicI64,
    calls: CallCounters,
}

const NO_LOOKUP_FAULT: i64 = -1;

impl Default for InMemoryStudyStore {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            direct_lookup: true,
            reads_unavailable: AtomicBool::new(false),
            tell_fails: AtomicBool::new(false),
            tell_ignored: AtomicBool::new(false),
            lookup_fails_for: AtomicI64::new(NO_LOOKUP_FAULT),
            calls: CallCounters::default(),
        }
    }
}

impl InMemoryStudyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store without the direct number -> id lookup.
    pub fn without_trial_id_lookup() -> Self {
        Self {
            direct_lookup: false,
            ..Self::default()
        }
    }

    pub async fn add_study(&self, name: &str) -> Study {
        let mut inner = self.inner.write().await;
        inner.next_study_id += 1;
        let study = Study::new(inner.next_study_id, name);
        inner.studies.insert(study.study_id, study.clone());
        inner.attrs.insert(study.study_id, StudyAttrs::new());
        study
    }

    pub async fn add_trial(&self, study_id: i64, state: TrialState) -> TrialSummary {
        let mut inner = self.inner.write().await;
        inner.next_trial_id += 1;
        let trial_id = inner.next_trial_id;
        let number = inner
            .trials
            .values()
            .filter(|t| t.study_id == study_id)
            .count() as TrialNumber;

        let trial = Trial {
            trial_id,
            study_id,
            number,
            state,
            datetime_start: Some(chrono::Utc::now()),
            datetime_complete: None,
        };
        let summary = trial.summary();
        inner.trials.insert(trial_id, trial);
        summary
    }

    /// Change a trial's state behind the monitor's back, as the optimizer would.
    pub async fn set_trial_state(&self, trial_id: TrialId, state: TrialState) {
        if let Some(trial) = self.inner.write().await.trials.get_mut(&trial_id) {
            trial.state = state;
        }
    }

    pub async fn trial_state(&self, trial_id: TrialId) -> Option<TrialState> {
        self.inner.read().await.trials.get(&trial_id).map(|t| t.state)
    }

    /// Save a note the way the dashboard does: new body, version + 1.
    pub async fn save_note(&self, study_id: i64, trial_id: TrialId, body: &str) -> Note {
        let mut inner = self.inner.write().await;
        let attrs = inner.attrs.entry(study_id).or_default();
        let (writes, stale) = note_update(attrs, trial_id, body);
        for key in stale {
            attrs.remove(&key);
        }
        let version = writes.iter().find_map(|(_, v)| v.as_i64()).unwrap_or_default();
        attrs.extend(writes);
        Note {
            version,
            body: body.to_string(),
        }
    }

    pub async fn set_study_system_attr(&self, study_id: i64, key: &str, value: Value) {
        self.inner
            .write()
            .await
            .attrs
            .entry(study_id)
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Make trial listings and metadata reads fail, as during an outage.
    pub fn set_reads_unavailable(&self, unavailable: bool) {
        self.reads_unavailable.store(unavailable, Ordering::Release);
    }

    /// Make every `tell` call fail.
    pub fn set_tell_fails(&self, fails: bool) {
        self.tell_fails.store(fails, Ordering::Release);
    }

    /// Accept `tell` calls without applying them, so verification sees the old state.
    pub fn set_tell_ignored(&self, ignored: bool) {
        self.tell_ignored.store(ignored, Ordering::Release);
    }

    /// Make the id lookup of one trial number fail; `None` clears the fault.
    pub fn set_lookup_fails_for(&self, number: Option<TrialNumber>) {
        self.lookup_fails_for
            .store(number.unwrap_or(NO_LOOKUP_FAULT), Ordering::Release);
    }

    pub fn calls(&self) -> StoreCallCounts {
        StoreCallCounts {
            list_trials: self.calls.list_trials.load(Ordering::Relaxed),
            trial_id_lookups: self.calls.trial_id_lookups.load(Ordering::Relaxed),
            get_trial: self.calls.get_trial.load(Ordering::Relaxed),
            study_system_attrs: self.calls.study_system_attrs.load(Ordering::Relaxed),
            tell: self.calls.tell.load(Ordering::Relaxed),
        }
    }

    fn check_reads(&self) -> DomainResult<()> {
        if self.reads_unavailable.load(Ordering::Acquire) {
            return Err(DomainError::StoreUnavailable("reads disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StudyStore for InMemoryStudyStore {
    async fn list_studies(&self) -> DomainResult<Vec<Study>> {
        self.check_reads()?;
        Ok(self.inner.read().await.studies.values().cloned().collect())
    }

    async fn find_study(&self, name: &str) -> DomainResult<Option<Study>> {
        self.check_reads()?;
        Ok(self
            .inner
            .read()
            .await
            .studies
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list_trials(
        &self,
        study_id: i64,
        states: Option<&[TrialState]>,
    ) -> DomainResult<Vec<TrialSummary>> {
        self.calls.list_trials.fetch_add(1, Ordering::Relaxed);
        self.check_reads()?;

        let inner = self.inner.read().await;
        let mut trials: Vec<TrialSummary> = inner
            .trials
            .values()
            .filter(|t| t.study_id == study_id)
            .filter(|t| states.map_or(true, |s| s.contains(&t.state)))
            .map(Trial::summary)
            .collect();
        trials.sort_by_key(|t| t.number);
        Ok(trials)
    }

    fn supports_trial_id_lookup(&self) -> bool {
        self.direct_lookup
    }

    async fn trial_id_for_number(
        &self,
        study_id: i64,
        number: TrialNumber,
    ) -> DomainResult<Option<TrialId>> {
        if !self.direct_lookup {
            return Err(DomainError::Unsupported("trial id lookup by number"));
        }
        self.calls.trial_id_lookups.fetch_add(1, Ordering::Relaxed);
        if self.lookup_fails_for.load(Ordering::Acquire) == number {
            return Err(DomainError::StoreUnavailable(format!("lookup of trial {number} rejected")));
        }

        Ok(self
            .inner
            .read()
            .await
            .trials
            .values()
            .find(|t| t.study_id == study_id && t.number == number)
            .map(|t| t.trial_id))
    }

    async fn get_trial(&self, trial_id: TrialId) -> DomainResult<Option<Trial>> {
        self.calls.get_trial.fetch_add(1, Ordering::Relaxed);
        Ok(self.inner.read().await.trials.get(&trial_id).cloned())
    }

    async fn study_system_attrs(&self, study_id: i64) -> DomainResult<StudyAttrs> {
        self.calls.study_system_attrs.fetch_add(1, Ordering::Relaxed);
        self.check_reads()?;
        Ok(self
            .inner
            .read()
            .await
            .attrs
            .get(&study_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn tell(&self, study_id: i64, number: TrialNumber, state: TrialState) -> DomainResult<()> {
        self.calls.tell.fetch_add(1, Ordering::Relaxed);
        if self.tell_fails.load(Ordering::Acquire) {
            return Err(DomainError::StoreUnavailable("tell rejected".to_string()));
        }

        let mut inner = self.inner.write().await;
        let trial = inner
            .trials
            .values_mut()
            .find(|t| t.study_id == study_id && t.number == number)
            .ok_or(DomainError::TrialNotFound { study_id, number })?;

        if !self.tell_ignored.load(Ordering::Acquire) {
            trial.state = state;
            trial.datetime_complete = Some(chrono::Utc::now());
        }
        Ok(())
    }
}
