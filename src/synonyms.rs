//! Enum value synonyms (`REQUEST_TYPE`, `CONTRACT_STATUS`).
//!
//! A configured bucket has `equals`, `prefix` and `contains` lists. A user
//! value that falls in a bucket expands to the whole bucket: an IN-set for
//! the equals list plus LIKE checks for prefixes and contained fragments.

use crate::config::{Settings, SynonymRule};
use crate::normalize::{collapse_whitespace, dedup_ci};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymExpansion {
    /// Upper-cased, trimmed values for the IN-list
    pub equals: Vec<String>,
    /// Upper-cased prefixes rendered as `LIKE 'X%'`
    pub prefixes: Vec<String>,
    /// Upper-cased fragments rendered as `LIKE '%X%'`
    pub contains: Vec<String>,
}

impl SynonymExpansion {
    pub fn is_plain(&self) -> bool {
        self.prefixes.is_empty() && self.contains.is_empty()
    }
}

fn upper(v: &str) -> String {
    collapse_whitespace(v).to_uppercase()
}

/// Which bucket a single value falls into. Buckets are tried as equals,
/// then prefix, then contains.
pub fn match_bucket<'a>(
    buckets: &'a std::collections::BTreeMap<String, SynonymRule>,
    value: &str,
) -> Option<(&'a str, &'a SynonymRule)> {
    let v = upper(value);
    if v.is_empty() {
        return None;
    }
    let by_equals = buckets
        .iter()
        .find(|(canon, rule)| **canon == v || rule.equals.iter().any(|e| upper(e) == v));
    let by_prefix = || {
        buckets
            .iter()
            .find(|(_, rule)| rule.prefix.iter().any(|p| v.starts_with(&upper(p))))
    };
    let by_contains = || {
        buckets
            .iter()
            .find(|(_, rule)| rule.contains.iter().any(|c| v.contains(&upper(c))))
    };
    by_equals
        .or_else(by_prefix)
        .or_else(by_contains)
        .map(|(canon, rule)| (canon.as_str(), rule))
}

/// Expand user values for one physical column
pub fn expand(settings: &Settings, column: &str, values: &[String]) -> SynonymExpansion {
    let Some(buckets) = settings.synonyms_for(column) else {
        return SynonymExpansion {
            equals: dedup_ci(values.iter().map(|v| upper(v))),
            ..Default::default()
        };
    };

    let mut equals = Vec::new();
    let mut prefixes = Vec::new();
    let mut contains = Vec::new();
    for value in values {
        match match_bucket(buckets, value) {
            Some((_, rule)) => {
                equals.push(upper(value));
                equals.extend(rule.equals.iter().map(|e| upper(e)));
                prefixes.extend(rule.prefix.iter().map(|p| upper(p)));
                contains.extend(rule.contains.iter().map(|c| upper(c)));
            }
            None => equals.push(upper(value)),
        }
    }
    SynonymExpansion {
        equals: dedup_ci(equals),
        prefixes: dedup_ci(prefixes),
        contains: dedup_ci(contains),
    }
}

/// `expire`, `Ended`, `finished` -> `EXPIRED` (upper-cased passthrough when
/// no spelling matches)
pub fn normalize_status(settings: &Settings, value: &str) -> String {
    let v = upper(value);
    settings
        .status_synonyms
        .iter()
        .find(|(canon, spellings)| **canon == v || spellings.iter().any(|s| *s == v))
        .map(|(canon, _)| canon.clone())
        .unwrap_or(v)
}
