//! Trial Monitor - human-in-the-loop control of optimization trials
//!
//! A reviewer writes "PRUNE" or "FAIL" in a trial's dashboard note; a background
//! monitor notices the new note version and moves the trial into the requested
//! state, exactly once per note version.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): trial and note models, the `StudyStore` port, errors
//! - **Adapters** (`adapters`): SQLite and in-memory study stores
//! - **Service Layer** (`services`): command parsing, change detection, transitions,
//!   per-study monitors and the supervisor that runs them
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trial_monitor::adapters::InMemoryStudyStore;
//! use trial_monitor::services::{MonitorConfig, NoteMonitor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(InMemoryStudyStore::new());
//!     let study = store.add_study("sweep").await;
//!     let monitor = NoteMonitor::new(store, study, MonitorConfig::default())?;
//!     monitor.start().await;
//!     tokio::signal::ctrl_c().await?;
//!     monitor.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    ChangeablePolicy, Config, Note, NoteCommand, Study, StudySelector, Trial, TrialState,
    TrialSummary,
};
pub use domain::ports::StudyStore;
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CommandParser, MonitorConfig, MonitorEvent, MonitorStatus, MonitorSupervisor, NoteMonitor,
    TransitionOutcome,
};
