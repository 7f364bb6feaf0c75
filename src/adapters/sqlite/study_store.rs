//! SQLite implementation of the StudyStore.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use super::parse_optional_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    note_update, Note, Study, StudyAttrs, Trial, TrialId, TrialNumber, TrialState, TrialSummary,
};
use crate::domain::ports::StudyStore;

#[derive(Clone, Debug)]
pub struct SqliteStudyStore {
    pool: SqlitePool,
}

impl SqliteStudyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a study. Used when seeding a store; the monitor never creates studies.
    pub async fn create_study(&self, name: &str) -> DomainResult<Study> {
        let result = sqlx::query("INSERT INTO studies (study_name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(Study::new(result.last_insert_rowid(), name))
    }

    /// Append a trial with the next free number, the way the optimizer does.
    pub async fn create_trial(&self, study_id: i64, state: TrialState) -> DomainResult<TrialSummary> {
        let mut tx = self.pool.begin().await?;

        let (next_number,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(number) + 1, 0) FROM trials WHERE study_id = ?")
                .bind(study_id)
                .fetch_one(&mut *tx)
                .await?;

        let now = Utc::now().to_rfc3339();
        let complete = state.is_finished().then(|| now.clone());
        let result = sqlx::query(
            r#"INSERT INTO trials (number, study_id, state, datetime_start, datetime_complete)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(next_number)
        .bind(study_id)
        .bind(state.as_str())
        .bind(&now)
        .bind(complete)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TrialSummary {
            trial_id: result.last_insert_rowid(),
            number: next_number,
            state,
        })
    }

    /// Write one study system attribute.
    pub async fn set_study_system_attr(&self, study_id: i64, key: &str, value: &Value) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO study_system_attributes (study_id, key, value_json) VALUES (?, ?, ?)
               ON CONFLICT (study_id, key) DO UPDATE SET value_json = excluded.value_json"#,
        )
        .bind(study_id)
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Save a trial note the way the dashboard does: new body, version + 1.
    pub async fn save_note(&self, study_id: i64, trial_id: TrialId, body: &str) -> DomainResult<Note> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<AttributeRow> = sqlx::query_as(
            "SELECT key, value_json FROM study_system_attributes WHERE study_id = ? AND key LIKE 'dashboard:note_%'",
        )
        .bind(study_id)
        .fetch_all(&mut *tx)
        .await?;
        let attrs = rows_to_attrs(rows)?;

        let (writes, stale) = note_update(&attrs, trial_id, body);
        for key in &stale {
            sqlx::query("DELETE FROM study_system_attributes WHERE study_id = ? AND key = ?")
                .bind(study_id)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        let mut version = 0;
        for (key, value) in &writes {
            if let Some(v) = value.as_i64() {
                version = v;
            }
            sqlx::query(
                r#"INSERT INTO study_system_attributes (study_id, key, value_json) VALUES (?, ?, ?)
                   ON CONFLICT (study_id, key) DO UPDATE SET value_json = excluded.value_json"#,
            )
            .bind(study_id)
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Note {
            version,
            body: body.to_string(),
        })
    }
}

#[async_trait]
impl StudyStore for SqliteStudyStore {
    async fn list_studies(&self) -> DomainResult<Vec<Study>> {
        let rows: Vec<StudyRow> =
            sqlx::query_as("SELECT study_id, study_name FROM studies ORDER BY study_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_study(&self, name: &str) -> DomainResult<Option<Study>> {
        let row: Option<StudyRow> =
            sqlx::query_as("SELECT study_id, study_name FROM studies WHERE study_name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn list_trials(
        &self,
        study_id: i64,
        states: Option<&[TrialState]>,
    ) -> DomainResult<Vec<TrialSummary>> {
        let mut query = String::from("SELECT trial_id, number, state FROM trials WHERE study_id = ?");

        if let Some(states) = states {
            if states.is_empty() {
                return Ok(vec![]);
            }
            let placeholders = vec!["?"; states.len()].join(", ");
            query.push_str(&format!(" AND state IN ({placeholders})"));
        }

        query.push_str(" ORDER BY number");

        let mut q = sqlx::query_as::<_, TrialSummaryRow>(&query).bind(study_id);
        for state in states.unwrap_or_default() {
            q = q.bind(state.as_str());
        }

        let rows: Vec<TrialSummaryRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    fn supports_trial_id_lookup(&self) -> bool {
        true
    }

    async fn trial_id_for_number(
        &self,
        study_id: i64,
        number: TrialNumber,
    ) -> DomainResult<Option<TrialId>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT trial_id FROM trials WHERE study_id = ? AND number = ?")
                .bind(study_id)
                .bind(number)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn get_trial(&self, trial_id: TrialId) -> DomainResult<Option<Trial>> {
        let row: Option<TrialRow> = sqlx::query_as(
            "SELECT trial_id, study_id, number, state, datetime_start, datetime_complete FROM trials WHERE trial_id = ?",
        )
        .bind(trial_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn study_system_attrs(&self, study_id: i64) -> DomainResult<StudyAttrs> {
        let rows: Vec<AttributeRow> =
            sqlx::query_as("SELECT key, value_json FROM study_system_attributes WHERE study_id = ?")
                .bind(study_id)
                .fetch_all(&self.pool)
                .await?;

        rows_to_attrs(rows)
    }

    async fn tell(&self, study_id: i64, number: TrialNumber, state: TrialState) -> DomainResult<()> {
        let complete = state.is_finished().then(|| Utc::now().to_rfc3339());

        let result = sqlx::query(
            "UPDATE trials SET state = ?, datetime_complete = COALESCE(?, datetime_complete) WHERE study_id = ? AND number = ?",
        )
        .bind(state.as_str())
        .bind(complete)
        .bind(study_id)
        .bind(number)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TrialNotFound { study_id, number });
        }

        Ok(())
    }
}

fn rows_to_attrs(rows: Vec<AttributeRow>) -> DomainResult<StudyAttrs> {
    rows.into_iter()
        .map(|row| {
            let value: Value = serde_json::from_str(&row.value_json)?;
            Ok((row.key, value))
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct StudyRow {
    study_id: i64,
    study_name: String,
}

impl From<StudyRow> for Study {
    fn from(row: StudyRow) -> Self {
        Study::new(row.study_id, row.study_name)
    }
}

#[derive(sqlx::FromRow)]
struct TrialSummaryRow {
    trial_id: i64,
    number: i64,
    state: String,
}

impl TryFrom<TrialSummaryRow> for TrialSummary {
    type Error = DomainError;

    fn try_from(row: TrialSummaryRow) -> Result<Self, Self::Error> {
        Ok(TrialSummary {
            trial_id: row.trial_id,
            number: row.number,
            state: row.state.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrialRow {
    trial_id: i64,
    study_id: i64,
    number: i64,
    state: String,
    datetime_start: Option<String>,
    datetime_complete: Option<String>,
}

impl TryFrom<TrialRow> for Trial {
    type Error = DomainError;

    fn try_from(row: TrialRow) -> Result<Self, Self::Error> {
        Ok(Trial {
            trial_id: row.trial_id,
            study_id: row.study_id,
            number: row.number,
            state: row.state.parse()?,
            datetime_start: parse_optional_datetime(row.datetime_start)?,
            datetime_complete: parse_optional_datetime(row.datetime_complete)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttributeRow {
    key: String,
    value_json: String,
}
