pub mod config;
pub mod note;
pub mod study;
pub mod trial;

pub use config::{Config, DatabaseConfig, LoggingConfig, MonitorSettings, StudyLoadConfig};
pub use note::{note_from_attrs, note_update, note_version, note_version_key, Note, NoteCommand};
pub use study::{Study, StudyAttrs, StudySelector};
pub use trial::{ChangeablePolicy, Trial, TrialId, TrialNumber, TrialState, TrialSummary};
