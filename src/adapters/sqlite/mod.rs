//! SQLite database adapters for the study store.

pub mod connection;
pub mod migrations;
pub mod study_store;

pub use connection::{
    create_test_pool, open_pool, redact_database_url, verify_connection, ConnectionError, PoolConfig,
};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use study_store::SqliteStudyStore;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};

/// Parse a datetime column.
///
/// Accepts RFC3339 (written by this crate) and the `YYYY-MM-DD HH:MM:SS[.ffffff]`
/// form other writers of the same database use.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| DomainError::SerializationError(format!("invalid datetime '{s}': {e}")))
}

/// Parse an optional datetime column.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime).transpose()
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Create an in-memory test pool with all migrations applied.
///
/// The embedded schema only seeds test stores; real study databases are opened
/// with [`open_pool`] and never migrated.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_datetime("2025-10-29T17:28:13Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-29T17:28:13+00:00");
    }

    #[test]
    fn test_parse_space_separated_with_fraction() {
        let dt = parse_datetime("2025-10-29 17:28:13.250000").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 250);
        let dt = parse_datetime("2025-10-29 17:28:13").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-29T17:28:13+00:00");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_datetime("yesterday").is_err());
        assert_eq!(parse_optional_datetime(None).unwrap(), None);
    }
}
