//! Logical column names to physical columns.
//!
//! `DEPARTMENT` fans out to the eight department slots plus the owner
//! department; `STAKEHOLDER` to the eight stakeholder slots. Anything the
//! map does not know resolves to itself.

use crate::config::Settings;
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::normalize::canonical_column;

pub struct AliasResolver<'a> {
    settings: &'a Settings,
}

impl<'a> AliasResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Ordered physical columns for a logical name
    pub fn resolve(&self, logical: &str) -> Vec<String> {
        let family = self.canonical_family(logical);
        match self.settings.aliases.get(&family) {
            Some(cols) => cols.clone(),
            None => vec![family],
        }
    }

    /// Canonical logical key: `stakeholders`, `STAKEHOLDER*` and
    /// `stackholder` all become `STAKEHOLDER`; `dept` becomes `DEPARTMENT`.
    pub fn canonical_family(&self, name: &str) -> String {
        let trimmed = name.trim().trim_end_matches('*');
        if let Some(target) = self.phrase_target(trimmed) {
            return target;
        }
        let canon = canonical_column(trimmed);
        if self.settings.aliases.contains_key(&canon) {
            return canon;
        }
        if let Some(singular) = canon.strip_suffix('S') {
            if self.settings.aliases.contains_key(singular) {
                return singular.to_string();
            }
        }
        let plural = format!("{}S", canon);
        if self.settings.aliases.contains_key(&plural) {
            return plural;
        }
        canon
    }

    /// Logical column a human phrase points at (trailing `*` stripped)
    pub fn phrase_target(&self, phrase: &str) -> Option<String> {
        let key = phrase.trim().to_lowercase();
        self.settings
            .column_phrases
            .get(&key)
            .map(|t| t.trim_end_matches('*').to_string())
    }

    /// True for logical names with more than one physical slot
    pub fn is_family(&self, name: &str) -> bool {
        self.settings
            .aliases
            .get(&self.canonical_family(name))
            .is_some_and(|cols| cols.len() > 1)
    }

    /// Column names a question or comment may refer to
    pub fn is_known(&self, name: &str) -> bool {
        let family = self.canonical_family(name);
        self.settings.aliases.contains_key(&family) || self.settings.is_physical_column(&family)
    }

    /// Every identifier a comment may name, in a stable order
    pub fn known_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.settings.aliases.keys().map(String::as_str).collect();
        names.extend(self.settings.columns.iter().map(String::as_str));
        names
    }

    /// True when `name` (or its family) is on the equality-filter
    /// allow-list or is an alias family
    pub fn is_filterable(&self, name: &str) -> bool {
        self.settings.is_filterable(&self.canonical_family(name))
    }

    /// Names accepted in eq/neq/contains filters: alias families, then the
    /// allow-list
    pub fn filterable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.settings.aliases.keys().map(String::as_str).collect();
        for col in &self.settings.eq_filter_columns {
            if !names.contains(&col.as_str()) {
                names.push(col.as_str());
            }
        }
        names
    }

    /// Closest known name for an unknown one
    pub fn suggest(&self, unknown: &str) -> Option<String> {
        closest(unknown, self.known_names())
    }

    /// Closest filterable name
    pub fn suggest_filterable(&self, unknown: &str) -> Option<String> {
        closest(unknown, self.filterable_names())
    }

    /// Phrases ordered longest first, for scanning free text
    pub fn phrases_longest_first(&self) -> Vec<(&str, String)> {
        let mut phrases: Vec<(&str, String)> = self
            .settings
            .column_phrases
            .iter()
            .map(|(p, t)| (p.as_str(), t.trim_end_matches('*').to_string()))
            .collect();
        phrases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        phrases
    }
}

fn closest<'a>(unknown: &str, candidates: Vec<&'a str>) -> Option<String> {
    FuzzyMatcher::default()
        .find_best_match(&canonical_column(unknown), candidates)
        .map(|(name, _)| name)
}
