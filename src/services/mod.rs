//! Monitoring services: command parsing, change detection, transitions and scheduling.

pub mod change_detector;
pub mod command_parser;
pub mod events;
pub mod note_monitor;
pub mod supervisor;
pub mod transition_engine;
pub mod trial_id_resolver;

pub use change_detector::{ChangeDetector, CycleReport, DetectorConfig, MetadataCache};
pub use command_parser::CommandParser;
pub use events::{EventPublisher, MonitorEvent};
pub use note_monitor::{MonitorConfig, MonitorState, MonitorStatus, NoteMonitor};
pub use supervisor::MonitorSupervisor;
pub use transition_engine::{TransitionConfig, TransitionEngine, TransitionOutcome};
pub use trial_id_resolver::TrialIdResolver;
