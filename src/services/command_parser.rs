//! Note command classification.

use regex::{Regex, RegexBuilder};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::NoteCommand;

/// Default pattern for PRUNE commands.
pub const DEFAULT_PRUNE_PATTERN: &str = "PRUNE";
/// Default pattern for FAIL commands.
pub const DEFAULT_FAIL_PATTERN: &str = "FAIL";

/// Classifies a note body as PRUNE, FAIL or no command.
///
/// Both patterns are case-insensitive searches, so commentary around the keyword
/// is allowed. PRUNE is checked first and wins when both match.
#[derive(Debug, Clone)]
pub struct CommandParser {
    prune: Regex,
    fail: Regex,
}

impl CommandParser {
    pub fn new(prune_pattern: &str, fail_pattern: &str) -> DomainResult<Self> {
        Ok(Self {
            prune: compile("prune", prune_pattern)?,
            fail: compile("fail", fail_pattern)?,
        })
    }

    pub fn parse(&self, body: &str) -> NoteCommand {
        if body.is_empty() {
            NoteCommand::None
        } else if self.prune.is_match(body) {
            NoteCommand::Prune
        } else if self.fail.is_match(body) {
            NoteCommand::Fail
        } else {
            NoteCommand::None
        }
    }

    pub fn prune_pattern(&self) -> &str {
        self.prune.as_str()
    }

    pub fn fail_pattern(&self) -> &str {
        self.fail.as_str()
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self {
            prune: RegexBuilder::new(DEFAULT_PRUNE_PATTERN)
                .case_insensitive(true)
                .build()
                .expect("default prune pattern is valid"),
            fail: RegexBuilder::new(DEFAULT_FAIL_PATTERN)
                .case_insensitive(true)
                .build()
                .expect("default fail pattern is valid"),
        }
    }
}

fn compile(name: &'static str, pattern: &str) -> DomainResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| DomainError::InvalidPattern {
            name,
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let parser = CommandParser::default();
        assert_eq!(parser.parse("PRUNE"), NoteCommand::Prune);
        assert_eq!(parser.parse("fail"), NoteCommand::Fail);
        assert_eq!(parser.parse("looks fine"), NoteCommand::None);
        assert_eq!(parser.parse(""), NoteCommand::None);
    }

    #[test]
    fn test_prune_wins_over_fail() {
        let parser = CommandParser::default();
        assert_eq!(parser.parse("please PRUNE, do not FAIL"), NoteCommand::Prune);
        assert_eq!(parser.parse("FAIL then prune"), NoteCommand::Prune);
    }

    #[test]
    fn test_search_not_full_match() {
        let parser = CommandParser::default();
        assert_eq!(
            parser.parse("Loss diverged after epoch 3.\nPrune it please."),
            NoteCommand::Prune
        );
        // Substring search: "failure" contains "fail".
        assert_eq!(parser.parse("saw a failure"), NoteCommand::Fail);
    }

    #[test]
    fn test_custom_patterns() {
        let parser = CommandParser::new(r"\bstop\b", r"^broken").unwrap();
        assert_eq!(parser.parse("please STOP now"), NoteCommand::Prune);
        assert_eq!(parser.parse("stopping"), NoteCommand::None);
        assert_eq!(parser.parse("Broken GPU"), NoteCommand::Fail);
        assert_eq!(parser.parse("PRUNE"), NoteCommand::None);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = CommandParser::new("(unclosed", "FAIL").unwrap_err();
        assert!(matches!(err, DomainError::InvalidPattern { name: "prune", .. }));
    }
}
