//! Port trait definitions (Hexagonal Architecture)
//!
//! - StudyStore: the external optimization store shared with the optimizer and dashboard
//!
//! The monitor services depend only on these traits, so the same detection and
//! transition logic runs against SQLite or an in-memory store.

pub mod study_store;

pub use study_store::StudyStore;
