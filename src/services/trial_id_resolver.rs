//! Trial number to trial id resolution with a cache for open trials.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{TrialId, TrialNumber};
use crate::domain::ports::StudyStore;

/// Memoizes `number -> trial_id` for one study.
///
/// Entries are evicted once a trial turns terminal so the cache only grows with
/// the number of trials that can still change.
#[derive(Debug)]
pub struct TrialIdResolver {
    study_id: i64,
    cache: HashMap<TrialNumber, TrialId>,
}

impl TrialIdResolver {
    pub fn new(study_id: i64) -> Self {
        Self {
            study_id,
            cache: HashMap::new(),
        }
    }

    /// Resolve a trial number, consulting the cache first.
    ///
    /// Uses the store's direct lookup when it has one, otherwise scans the full
    /// trial list. `Ok(None)` means the store has no such trial.
    pub async fn resolve<S>(&mut self, store: &S, number: TrialNumber) -> DomainResult<Option<TrialId>>
    where
        S: StudyStore + ?Sized,
    {
        if let Some(id) = self.cache.get(&number) {
            return Ok(Some(*id));
        }

        let resolved = if store.supports_trial_id_lookup() {
            store.trial_id_for_number(self.study_id, number).await?
        } else {
            debug!(study_id = self.study_id, trial = number, "no direct trial id lookup, scanning trials");
            store
                .list_trials(self.study_id, None)
                .await?
                .into_iter()
                .find(|t| t.number == number)
                .map(|t| t.trial_id)
        };

        match resolved {
            Some(id) => {
                self.cache.insert(number, id);
            }
            None => {
                warn!(study_id = self.study_id, trial = number, "could not determine trial id");
            }
        }

        Ok(resolved)
    }

    pub fn evict(&mut self, number: TrialNumber) -> bool {
        self.cache.remove(&number).is_some()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn contains(&self, number: TrialNumber) -> bool {
        self.cache.contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
