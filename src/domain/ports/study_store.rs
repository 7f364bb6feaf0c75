//! Study store port.

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Study, StudyAttrs, Trial, TrialId, TrialNumber, TrialState, TrialSummary};

/// Narrow read/write contract the monitor needs from the optimization store.
///
/// The store is shared with the optimizer and the dashboard, which mutate it
/// concurrently. Implementations must be safe to call from several monitor
/// tasks at once.
#[async_trait]
pub trait StudyStore: Send + Sync {
    /// List every study in the store.
    async fn list_studies(&self) -> DomainResult<Vec<Study>>;

    /// Look up a study by name.
    async fn find_study(&self, name: &str) -> DomainResult<Option<Study>>;

    /// List the trials of a study in number order, optionally filtered by state.
    async fn list_trials(
        &self,
        study_id: i64,
        states: Option<&[TrialState]>,
    ) -> DomainResult<Vec<TrialSummary>>;

    /// Whether `trial_id_for_number` is backed by a direct lookup.
    ///
    /// Callers fall back to scanning `list_trials` when this returns false.
    fn supports_trial_id_lookup(&self) -> bool {
        false
    }

    /// Resolve a trial number to its durable id.
    async fn trial_id_for_number(
        &self,
        _study_id: i64,
        _number: TrialNumber,
    ) -> DomainResult<Option<TrialId>> {
        Err(DomainError::Unsupported("trial id lookup by number"))
    }

    /// Read a full trial record.
    async fn get_trial(&self, trial_id: TrialId) -> DomainResult<Option<Trial>>;

    /// Read all study-level system attributes in one call.
    async fn study_system_attrs(&self, study_id: i64) -> DomainResult<StudyAttrs>;

    /// Move a trial into `state` without reporting any objective values.
    async fn tell(&self, study_id: i64, number: TrialNumber, state: TrialState) -> DomainResult<()>;
}
