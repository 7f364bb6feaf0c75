//! Events published by note monitors.
//!
//! Every event mirrors a log line; subscribers use them for dashboards and tests.

use std::time::Duration;
use tokio::sync::broadcast;

use crate::domain::models::{NoteCommand, TrialNumber, TrialState};

/// Capacity of a monitor's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Monitor task started.
    Started { study: String },
    /// A trial's note version advanced past what was last processed.
    NoteChanged {
        study: String,
        trial: TrialNumber,
        version: i64,
        preview: String,
    },
    /// A command was found in a changed note.
    CommandDetected {
        study: String,
        trial: TrialNumber,
        command: NoteCommand,
    },
    /// The transition call went through (or would have, in dry-run).
    TransitionApplied {
        study: String,
        trial: TrialNumber,
        from: TrialState,
        to: TrialState,
        dry_run: bool,
    },
    /// Re-reading the trial showed the requested state.
    TransitionVerified {
        study: String,
        trial: TrialNumber,
        state: TrialState,
    },
    /// Re-reading the trial did not show the requested state.
    VerificationMismatch {
        study: String,
        trial: TrialNumber,
        expected: TrialState,
        actual: Option<TrialState>,
    },
    /// The transition was not attempted: already in state or not overridable.
    TransitionSkipped {
        study: String,
        trial: TrialNumber,
        current: TrialState,
        requested: TrialState,
    },
    /// The transition could not be carried out.
    TransitionFailed {
        study: String,
        trial: TrialNumber,
        to: TrialState,
        error: String,
    },
    /// A whole polling cycle failed.
    CycleFailed {
        study: String,
        consecutive_failures: u32,
        error: String,
    },
    /// Too many consecutive failures; caches were cleared and the loop is pausing.
    Cooldown { study: String, duration: Duration },
    /// Monitor task exited.
    Stopped { study: String },
}

/// Cloneable publisher handed to the detector and the transition engine.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine; events are observational.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
