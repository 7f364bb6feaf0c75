//! Infrastructure adapters for external systems.

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryStudyStore, StoreCallCounts};
pub use sqlite::SqliteStudyStore;
