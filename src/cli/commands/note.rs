//! `note`: write a dashboard-compatible trial note.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::SqliteStudyStore;
use crate::cli::open_store;
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::{Config, TrialNumber};
use crate::domain::ports::StudyStore;

#[derive(Args, Debug)]
pub struct NoteArgs {
    /// Study name
    #[arg(short, long)]
    pub study: String,

    /// Trial number within the study
    #[arg(short, long)]
    pub trial: TrialNumber,

    /// Note body; replaces the current note
    pub text: String,

    /// Study store URL, e.g. sqlite:optuna.db
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NoteWritten {
    pub study: String,
    pub trial: TrialNumber,
    pub trial_id: i64,
    pub version: i64,
    pub body: String,
}

impl CommandOutput for NoteWritten {
    fn to_human(&self) -> String {
        format!(
            "Saved note v{} on trial #{} of {}: {}",
            self.version,
            self.trial,
            self.study,
            truncate(&self.body, 60)
        )
    }
}

/// Save `text` as the next version of a trial's note.
pub async fn write_note(store: &SqliteStudyStore, study: &str, trial: TrialNumber, text: &str) -> Result<NoteWritten> {
    let found = store
        .find_study(study)
        .await?
        .ok_or_else(|| DomainError::StudyNotFound(study.to_string()))?;

    let trial_id = store
        .trial_id_for_number(found.study_id, trial)
        .await?
        .ok_or(DomainError::TrialNotFound {
            study_id: found.study_id,
            number: trial,
        })?;

    let note = store
        .save_note(found.study_id, trial_id, text)
        .await
        .context("Failed to save note")?;

    Ok(NoteWritten {
        study: found.name,
        trial,
        trial_id,
        version: note.version,
        body: note.body,
    })
}

pub async fn execute(args: NoteArgs, mut config: Config, json_mode: bool) -> Result<()> {
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    let store = open_store(&config).await?;
    let written = write_note(&store, &args.study, args.trial, &args.text).await?;
    output(&written, json_mode);
    Ok(())
}
