use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("Unknown column '{column}'{}", did_you_mean(.suggestion))]
    UnknownColumn {
        column: String,
        suggestion: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rule store error: {0}")]
    RuleStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;

/// Non-fatal conditions. The compiler always produces SQL; these record
/// where it had to fall back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    NoPatternMatched,
    NoFtsColumnsConfigured,
    AmbiguousDateText,
    RuleStoreUnavailable(String),
    DroppedShortTokens(Vec<String>),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::NoPatternMatched => {
                write!(f, "No specific pattern matched; using the generic listing")
            }
            Degradation::NoFtsColumnsConfigured => {
                write!(f, "Full-text search requested but no FTS columns are configured; predicate omitted")
            }
            Degradation::AmbiguousDateText => {
                write!(f, "Date wording could not be resolved to a window; no date filter applied")
            }
            Degradation::RuleStoreUnavailable(reason) => {
                write!(f, "Learned rules unavailable ({}); using the parsed question only", reason)
            }
            Degradation::DroppedShortTokens(tokens) => {
                write!(f, "Ignored search tokens below the minimum length: {}", tokens.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_message_includes_suggestion() {
        let err = NlqError::UnknownColumn {
            column: "REQEST_TYPE".to_string(),
            suggestion: Some("REQUEST_TYPE".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Unknown column 'REQEST_TYPE' (did you mean 'REQUEST_TYPE'?)"
        );

        let err = NlqError::UnknownColumn {
            column: "FOO".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "Unknown column 'FOO'");
    }

    #[test]
    fn test_degradation_display() {
        let d = Degradation::DroppedShortTokens(vec!["a".to_string()]);
        assert!(d.to_string().contains("a"));
        assert!(Degradation::NoFtsColumnsConfigured.to_string().contains("FTS"));
    }
}
