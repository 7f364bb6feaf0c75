//! Trial notes as stored by the dashboard in study system attributes.
//!
//! The dashboard keeps one version counter per trial and splits the note body
//! into chunks:
//!
//! - `dashboard:note_ver:{trial_id}` -> integer, bumped on every edit
//! - `dashboard:note_str:{trial_id}:{index}` -> string chunk, indices from 0
//!
//! A missing version reads as 0 and missing chunks as an empty body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::study::StudyAttrs;
use super::trial::{TrialId, TrialState};

const NOTE_VER_KEY_PREFIX: &str = "dashboard:note_ver:";
const NOTE_STR_KEY_PREFIX: &str = "dashboard:note_str:";

/// Maximum characters stored in a single body chunk.
pub const NOTE_CHUNK_MAX_CHARS: usize = 2045;

/// A trial note: body text plus the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Note {
    pub version: i64,
    pub body: String,
}

impl Note {
    /// Body shortened for log output.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.body.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// Command a human expressed in a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteCommand {
    None,
    Prune,
    Fail,
}

impl NoteCommand {
    /// Trial state the command asks for.
    pub fn target_state(&self) -> Option<TrialState> {
        match self {
            Self::None => None,
            Self::Prune => Some(TrialState::Pruned),
            Self::Fail => Some(TrialState::Failed),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Prune => "PRUNE",
            Self::Fail => "FAIL",
        }
    }
}

/// Key holding the note version of a trial.
pub fn note_version_key(trial_id: TrialId) -> String {
    format!("{NOTE_VER_KEY_PREFIX}{trial_id}")
}

fn note_chunk_key(trial_id: TrialId, index: usize) -> String {
    format!("{NOTE_STR_KEY_PREFIX}{trial_id}:{index}")
}

/// Current note version of a trial; 0 when never annotated.
///
/// Accepts integers and numeric strings, since some writers store the counter as text.
pub fn note_version(attrs: &StudyAttrs, trial_id: TrialId) -> i64 {
    match attrs.get(&note_version_key(trial_id)) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Read the full note of a trial from a bulk attribute snapshot.
pub fn note_from_attrs(attrs: &StudyAttrs, trial_id: TrialId) -> Note {
    let mut body = String::new();
    let mut index = 0;
    while let Some(chunk) = attrs.get(&note_chunk_key(trial_id, index)) {
        match chunk {
            Value::String(s) => body.push_str(s),
            other => body.push_str(&other.to_string()),
        }
        index += 1;
    }

    Note {
        version: note_version(attrs, trial_id),
        body,
    }
}

/// Attribute writes that store `body` as the next version of a trial's note.
///
/// Returns the attributes to set and the keys of stale chunks to delete.
pub fn note_update(
    attrs: &StudyAttrs,
    trial_id: TrialId,
    body: &str,
) -> (Vec<(String, Value)>, Vec<String>) {
    let next_version = note_version(attrs, trial_id) + 1;

    let chars: Vec<char> = body.chars().collect();
    let chunks: Vec<String> = chars
        .chunks(NOTE_CHUNK_MAX_CHARS)
        .map(|c| c.iter().collect())
        .collect();

    let mut writes: Vec<(String, Value)> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| (note_chunk_key(trial_id, i), Value::String(chunk.clone())))
        .collect();
    writes.push((note_version_key(trial_id), Value::from(next_version)));

    let mut stale = Vec::new();
    let mut index = chunks.len();
    while attrs.contains_key(&note_chunk_key(trial_id, index)) {
        stale.push(note_chunk_key(trial_id, index));
        index += 1;
    }

    (writes, stale)
}
