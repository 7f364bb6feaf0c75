//! `studies`: list studies with trial counts by state.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::open_store;
use crate::cli::output::{output, table_with_header, CommandOutput};
use crate::domain::models::{Config, TrialState};
use crate::domain::ports::StudyStore;

const STATE_COLUMNS: [TrialState; 5] = [
    TrialState::Running,
    TrialState::Waiting,
    TrialState::Complete,
    TrialState::Pruned,
    TrialState::Failed,
];

#[derive(Args, Debug, Default)]
pub struct StudiesArgs {
    /// Study store URL, e.g. sqlite:optuna.db
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StudyRow {
    pub study_id: i64,
    pub name: String,
    pub trials: usize,
    pub states: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct StudyList {
    pub studies: Vec<StudyRow>,
}

impl CommandOutput for StudyList {
    fn to_human(&self) -> String {
        if self.studies.is_empty() {
            return "No studies found.".to_string();
        }

        let mut headers = vec!["ID", "Study", "Trials"];
        headers.extend(STATE_COLUMNS.iter().map(TrialState::as_str));
        let mut table = table_with_header(&headers);

        for study in &self.studies {
            let mut row = vec![study.study_id.to_string(), study.name.clone(), study.trials.to_string()];
            row.extend(
                STATE_COLUMNS
                    .iter()
                    .map(|s| study.states.get(s.as_str()).copied().unwrap_or(0).to_string()),
            );
            table.add_row(row);
        }
        table.to_string()
    }
}

/// Collect per-study trial counts through the store port.
pub async fn collect<S>(store: &S) -> Result<StudyList>
where
    S: StudyStore + ?Sized,
{
    let mut studies = Vec::new();
    for study in store.list_studies().await.context("Failed to list studies")? {
        let trials = store
            .list_trials(study.study_id, None)
            .await
            .with_context(|| format!("Failed to list trials of {}", study.name))?;

        let mut states = BTreeMap::new();
        for trial in &trials {
            *states.entry(trial.state.as_str().to_string()).or_insert(0) += 1;
        }
        studies.push(StudyRow {
            study_id: study.study_id,
            name: study.name,
            trials: trials.len(),
            states,
        });
    }
    studies.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(StudyList { studies })
}

pub async fn execute(args: StudiesArgs, mut config: Config, json_mode: bool) -> Result<()> {
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    let store = open_store(&config).await?;
    let list = collect(store.as_ref()).await?;
    output(&list, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStudyStore;

    #[tokio::test]
    async fn test_collect_counts_states() {
        let store = InMemoryStudyStore::new();
        let b = store.add_study("b-study").await;
        let a = store.add_study("a-study").await;
        store.add_trial(a.study_id, TrialState::Running).await;
        store.add_trial(a.study_id, TrialState::Running).await;
        store.add_trial(a.study_id, TrialState::Pruned).await;
        store.add_trial(b.study_id, TrialState::Complete).await;

        let list = collect(&store).await.unwrap();
        assert_eq!(list.studies[0].name, "a-study");
        assert_eq!(list.studies[0].trials, 3);
        assert_eq!(list.studies[0].states["RUNNING"], 2);
        assert_eq!(list.studies[0].states["PRUNED"], 1);
        assert_eq!(list.studies[1].states["COMPLETE"], 1);

        let human = list.to_human();
        assert!(human.contains("a-study"));
        assert!(human.contains("FAIL"));
    }
}
