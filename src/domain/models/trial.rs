//! Trial domain model.
//!
//! Trials are owned by the optimizer and the dashboard. The monitor only reads
//! them and, on a human's request, moves an open trial into a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

/// Durable trial key used for every store operation.
pub type TrialId = i64;

/// Human-facing ordinal of a trial within its study.
pub type TrialNumber = i64;

/// Lifecycle state of a trial.
///
/// RUNNING and WAITING are open. COMPLETE, PRUNED and FAILED are finished in the
/// optimizer's model, but the store accepts an override from RUNNING, WAITING or
/// COMPLETE into PRUNED or FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialState {
    Waiting,
    Running,
    Complete,
    Pruned,
    #[serde(rename = "FAIL")]
    Failed,
}

impl TrialState {
    /// States from which a human may stop a trial.
    pub const OVERRIDABLE: [TrialState; 3] = [Self::Running, Self::Waiting, Self::Complete];

    /// Storage representation (Optuna convention).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Pruned => "PRUNED",
            Self::Failed => "FAIL",
        }
    }

    /// Whether the trial has finished from the optimizer's point of view.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Pruned | Self::Failed)
    }

    /// PRUNED and FAILED: states the monitor can set but never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Pruned | Self::Failed)
    }

    /// Whether the store allows overriding this state into a terminal one.
    pub fn is_overridable(&self) -> bool {
        Self::OVERRIDABLE.contains(self)
    }
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "COMPLETE" | "COMPLETED" => Ok(Self::Complete),
            "PRUNED" => Ok(Self::Pruned),
            "FAIL" | "FAILED" => Ok(Self::Failed),
            other => Err(DomainError::InvalidTrialState(other.to_string())),
        }
    }
}

/// Which trial states the change detector keeps watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeablePolicy {
    /// RUNNING and WAITING only.
    ActiveOnly,
    /// RUNNING, WAITING and COMPLETE; a finished trial may still be annotated.
    #[default]
    IncludeComplete,
}

impl ChangeablePolicy {
    pub fn from_only_active(only_active_trials: bool) -> Self {
        if only_active_trials {
            Self::ActiveOnly
        } else {
            Self::IncludeComplete
        }
    }

    pub fn states(&self) -> &'static [TrialState] {
        match self {
            Self::ActiveOnly => &[TrialState::Running, TrialState::Waiting],
            Self::IncludeComplete => &TrialState::OVERRIDABLE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ActiveOnly => "active-only",
            Self::IncludeComplete => "changeable",
        }
    }
}

/// Lightweight view of a trial as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trial_id: TrialId,
    pub number: TrialNumber,
    pub state: TrialState,
}

/// Full trial record read by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: TrialId,
    pub study_id: i64,
    pub number: TrialNumber,
    pub state: TrialState,
    pub datetime_start: Option<chrono::DateTime<chrono::Utc>>,
    pub datetime_complete: Option<chrono::DateTime<chrono::Utc>>,
}

impl Trial {
    pub fn summary(&self) -> TrialSummary {
        TrialSummary {
            trial_id: self.trial_id,
            number: self.number,
            state: self.state,
        }
    }
}
