//! Validated, verified trial state transitions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::domain::models::{Study, TrialNumber, TrialState};
use crate::domain::ports::StudyStore;
use crate::services::events::{EventPublisher, MonitorEvent};
use crate::services::trial_id_resolver::TrialIdResolver;

/// Result of a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionOutcome {
    /// The mutation was issued (or logged, in dry-run).
    Applied,
    /// The trial already had the requested state; nothing was issued.
    AlreadyInState,
    /// The current state cannot be overridden, or the target is not PRUNED/FAILED.
    Illegal,
    /// The trial could not be resolved or read, or the mutation call failed.
    Failed,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyInState => "already_in_state",
            Self::Illegal => "illegal",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionConfig {
    /// Log intended transitions instead of applying them.
    pub dry_run: bool,
    /// Wait before each verification read.
    pub verify_delay: Duration,
    /// Verification reads before reporting a mismatch.
    pub verify_attempts: u32,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            verify_delay: Duration::from_millis(500),
            verify_attempts: 1,
        }
    }
}

/// Moves trials of one study into PRUNED or FAILED on request.
///
/// Current state is always read from the store, never from a listing, since the
/// optimizer may have finished the trial since the listing was taken. A successful
/// call is followed by a verification read; a mismatch is only logged because the
/// store's write path is not guaranteed visible to the next read.
pub struct TransitionEngine<S: ?Sized> {
    store: Arc<S>,
    study: Study,
    config: TransitionConfig,
    events: EventPublisher,
}

impl<S> TransitionEngine<S>
where
    S: StudyStore + ?Sized,
{
    pub fn new(store: Arc<S>, study: Study, config: TransitionConfig, events: EventPublisher) -> Self {
        Self {
            store,
            study,
            config,
            events,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub async fn attempt_transition(
        &self,
        resolver: &mut TrialIdResolver,
        number: TrialNumber,
        target: TrialState,
    ) -> TransitionOutcome {
        let study = self.study.name.as_str();

        if !target.is_terminal() {
            warn!(study, trial = number, to = %target, "refusing transition to a non-terminal state");
            return TransitionOutcome::Illegal;
        }

        let Some(current) = self.current_state(resolver, number).await else {
            error!(study, trial = number, to = %target, "could not determine current state, skipping state change");
            self.events.publish(MonitorEvent::TransitionFailed {
                study: study.to_string(),
                trial: number,
                to: target,
                error: "current state unavailable".to_string(),
            });
            return TransitionOutcome::Failed;
        };

        if current == target {
            info!(study, trial = number, state = %current, "trial is already in the requested state");
            self.publish_skipped(number, current, target);
            return TransitionOutcome::AlreadyInState;
        }

        if !current.is_overridable() {
            warn!(study, trial = number, from = %current, to = %target, "cannot change trial from this state");
            self.publish_skipped(number, current, target);
            return TransitionOutcome::Illegal;
        }

        if self.config.dry_run {
            info!(study, trial = number, from = %current, to = %target, "DRY RUN: would change trial state");
            self.events.publish(MonitorEvent::TransitionApplied {
                study: study.to_string(),
                trial: number,
                from: current,
                to: target,
                dry_run: true,
            });
            return TransitionOutcome::Applied;
        }

        info!(study, trial = number, from = %current, to = %target, "changing trial state");
        if let Err(e) = self.store.tell(self.study.study_id, number, target).await {
            error!(study, trial = number, to = %target, error = %e, "state change call failed");
            self.events.publish(MonitorEvent::TransitionFailed {
                study: study.to_string(),
                trial: number,
                to: target,
                error: e.to_string(),
            });
            return TransitionOutcome::Failed;
        }

        self.events.publish(MonitorEvent::TransitionApplied {
            study: study.to_string(),
            trial: number,
            from: current,
            to: target,
            dry_run: false,
        });

        self.verify(resolver, number, target).await;
        TransitionOutcome::Applied
    }

    async fn current_state(&self, resolver: &mut TrialIdResolver, number: TrialNumber) -> Option<TrialState> {
        let study = self.study.name.as_str();

        let trial_id = match resolver.resolve(self.store.as_ref(), number).await {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                error!(study, trial = number, error = %e, "error resolving trial id");
                return None;
            }
        };

        match self.store.get_trial(trial_id).await {
            Ok(Some(trial)) => Some(trial.state),
            Ok(None) => {
                warn!(study, trial = number, trial_id, "trial id no longer present in store");
                None
            }
            Err(e) => {
                error!(study, trial = number, trial_id, error = %e, "error reading trial state");
                None
            }
        }
    }

    async fn verify(&self, resolver: &mut TrialIdResolver, number: TrialNumber, target: TrialState) {
        let study = self.study.name.as_str();
        let mut observed = None;

        for _ in 0..self.config.verify_attempts.max(1) {
            tokio::time::sleep(self.config.verify_delay).await;
            observed = self.current_state(resolver, number).await;
            if observed == Some(target) {
                info!(study, trial = number, state = %target, "verified trial state change");
                self.events.publish(MonitorEvent::TransitionVerified {
                    study: study.to_string(),
                    trial: number,
                    state: target,
                });
                return;
            }
        }

        match observed {
            Some(actual) => warn!(
                study,
                trial = number,
                expected = %target,
                actual = %actual,
                "verification failed: trial state differs from requested"
            ),
            None => warn!(study, trial = number, expected = %target, "could not verify state change"),
        }
        self.events.publish(MonitorEvent::VerificationMismatch {
            study: study.to_string(),
            trial: number,
            expected: target,
            actual: observed,
        });
    }

    fn publish_skipped(&self, number: TrialNumber, current: TrialState, requested: TrialState) {
        self.events.publish(MonitorEvent::TransitionSkipped {
            study: self.study.name.clone(),
            trial: number,
            current,
            requested,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStudyStore;
    use crate::domain::models::TrialSummary;

    async fn setup(state: TrialState, dry_run: bool) -> (Arc<InMemoryStudyStore>, TransitionEngine<InMemoryStudyStore>, TrialSummary) {
        let store = Arc::new(InMemoryStudyStore::new());
        let study = store.add_study("engine").await;
        let trial = store.add_trial(study.study_id, state).await;
        let config = TransitionConfig {
            dry_run,
            verify_delay: Duration::from_millis(1),
            verify_attempts: 2,
        };
        let engine = TransitionEngine::new(store.clone(), study, config, EventPublisher::new());
        (store, engine, trial)
    }

    fn resolver_for(engine: &TransitionEngine<InMemoryStudyStore>) -> TrialIdResolver {
        TrialIdResolver::new(engine.study.study_id)
    }

    #[tokio::test]
    async fn test_running_to_pruned_applied_and_verified() {
        let (store, engine, trial) = setup(TrialState::Running, false).await;
        let mut events = engine.events.subscribe();
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Pruned).await;

        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(store.trial_state(trial.trial_id).await, Some(TrialState::Pruned));
        assert_eq!(store.calls().tell, 1);
        assert!(matches!(events.recv().await.unwrap(), MonitorEvent::TransitionApplied { dry_run: false, .. }));
        assert!(matches!(events.recv().await.unwrap(), MonitorEvent::TransitionVerified { .. }));
    }

    #[tokio::test]
    async fn test_complete_can_be_overridden() {
        let (store, engine, trial) = setup(TrialState::Complete, false).await;
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Failed).await;
        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(store.trial_state(trial.trial_id).await, Some(TrialState::Failed));
    }

    #[tokio::test]
    async fn test_same_state_is_noop() {
        let (store, engine, trial) = setup(TrialState::Pruned, false).await;
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Pruned).await;
        assert_eq!(outcome, TransitionOutcome::AlreadyInState);
        assert_eq!(store.calls().tell, 0);
    }

    #[tokio::test]
    async fn test_terminal_state_is_illegal() {
        let (store, engine, trial) = setup(TrialState::Pruned, false).await;
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Failed).await;
        assert_eq!(outcome, TransitionOutcome::Illegal);
        assert_eq!(store.calls().tell, 0);
    }

    #[tokio::test]
    async fn test_non_terminal_target_is_illegal_without_store_calls() {
        let (store, engine, trial) = setup(TrialState::Running, false).await;
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Complete).await;
        assert_eq!(outcome, TransitionOutcome::Illegal);
        assert_eq!(store.calls().get_trial, 0);
        assert_eq!(store.calls().tell, 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates() {
        let (store, engine, trial) = setup(TrialState::Running, true).await;
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Pruned).await;
        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(store.calls().tell, 0);
        assert_eq!(store.trial_state(trial.trial_id).await, Some(TrialState::Running));
    }

    #[tokio::test]
    async fn test_unknown_trial_fails() {
        let (store, engine, _) = setup(TrialState::Running, false).await;
        let mut resolver = resolver_for(&engine);

        let outcome = engine.attempt_transition(&mut resolver, 99, TrialState::Pruned).await;
        assert_eq!(outcome, TransitionOutcome::Failed);
        assert_eq!(store.calls().tell, 0);
    }

    #[tokio::test]
    async fn test_failed_call_skips_verification() {
        let (store, engine, trial) = setup(TrialState::Running, false).await;
        let mut resolver = resolver_for(&engine);
        store.set_tell_fails(true);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Failed).await;
        assert_eq!(outcome, TransitionOutcome::Failed);
        assert_eq!(store.calls().get_trial, 1);
    }

    #[tokio::test]
    async fn test_verification_mismatch_is_still_applied() {
        let (store, engine, trial) = setup(TrialState::Running, false).await;
        let mut events = engine.events.subscribe();
        let mut resolver = resolver_for(&engine);
        store.set_tell_ignored(true);

        let outcome = engine.attempt_transition(&mut resolver, trial.number, TrialState::Pruned).await;
        assert_eq!(outcome, TransitionOutcome::Applied);
        // One read before the call, then one per verification attempt.
        assert_eq!(store.calls().get_trial, 3);

        let _applied = events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::VerificationMismatch {
                study: "engine".to_string(),
                trial: trial.number,
                expected: TrialState::Pruned,
                actual: Some(TrialState::Running),
            }
        );
    }
}
