//! Study domain model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Flat key/value metadata attached to a study. Values are JSON-encoded.
pub type StudyAttrs = HashMap<String, serde_json::Value>;

/// Handle to a study in the external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Study {
    pub study_id: i64,
    pub name: String,
}

impl Study {
    pub fn new(study_id: i64, name: impl Into<String>) -> Self {
        Self {
            study_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Study {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id {})", self.name, self.study_id)
    }
}

/// Which studies the supervisor should monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudySelector {
    /// Every study found in the store at startup.
    All,
    /// The named studies.
    Named(Vec<String>),
}

impl StudySelector {
    /// Build a selector from CLI/config study names.
    ///
    /// A single `all` (any case) selects every study. Blank names are dropped;
    /// `None` means nothing usable was given.
    pub fn from_names(names: &[String]) -> Option<Self> {
        if names.len() == 1 && names[0].trim().eq_ignore_ascii_case("all") {
            return Some(Self::All);
        }

        let named: Vec<String> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();

        if named.is_empty() {
            None
        } else {
            Some(Self::Named(named))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_selector_all() {
        assert_eq!(StudySelector::from_names(&names(&["ALL"])), Some(StudySelector::All));
    }

    #[test]
    fn test_selector_named_drops_blanks() {
        assert_eq!(
            StudySelector::from_names(&names(&["a", " ", "b "])),
            Some(StudySelector::Named(names(&["a", "b"])))
        );
    }

    #[test]
    fn test_selector_empty() {
        assert_eq!(StudySelector::from_names(&[]), None);
        assert_eq!(StudySelector::from_names(&names(&["", "  "])), None);
    }

    #[test]
    fn test_all_among_others_is_a_name() {
        assert_eq!(
            StudySelector::from_names(&names(&["all", "b"])),
            Some(StudySelector::Named(names(&["all", "b"])))
        );
    }
}
