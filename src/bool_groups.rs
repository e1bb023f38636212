//! AND/OR grouping of extracted terms.
//!
//! Terms are walked in source order and the gap between neighbours decides
//! the connector: `or` closes the current group, `and` (or nothing) keeps
//! accumulating. AND therefore binds tighter than OR: `A or B and C` is
//! `[A] OR [B AND C]`.

use crate::intent::{FieldClause, FieldOp};
use crate::normalize::dedup_ci;
use crate::terms::{Term, TermKind};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CONNECTOR: Regex = Regex::new(r"(?i)\b(and|or)\b").unwrap();
}

/// AND-cluster of field clauses and FTS tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolGroup {
    pub fields: Vec<FieldClause>,
    /// All tokens must match (each across the FTS columns)
    pub fts_tokens: Vec<String>,
}

impl BoolGroup {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.fts_tokens.is_empty()
    }

    fn push(&mut self, term: &Term) {
        match (term.kind, term.column.as_deref()) {
            (TermKind::Fts, _) | (_, None) => {
                let merged = dedup_ci(self.fts_tokens.iter().chain(term.values.iter()));
                self.fts_tokens = merged;
            }
            (TermKind::Field, Some(column)) => {
                match self
                    .fields
                    .iter_mut()
                    .find(|f| f.column == column && f.op == term.op)
                {
                    Some(existing) => {
                        existing.values = dedup_ci(existing.values.iter().chain(term.values.iter()));
                    }
                    None => self.fields.push(FieldClause {
                        column: column.to_string(),
                        op: term.op,
                        values: dedup_ci(term.values.iter()),
                    }),
                }
            }
        }
    }

    /// Clauses with the given operator
    pub fn fields_with(&self, op: FieldOp) -> impl Iterator<Item = &FieldClause> {
        self.fields.iter().filter(move |f| f.op == op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

/// Last connector word in the text between two terms; no word means AND
fn connector_between(text: &str, from: usize, to: usize) -> Connector {
    if from >= to || to > text.len() || !text.is_char_boundary(from) || !text.is_char_boundary(to) {
        return Connector::And;
    }
    match CONNECTOR.find_iter(&text[from..to]).last() {
        Some(m) if m.as_str().eq_ignore_ascii_case("or") => Connector::Or,
        _ => Connector::And,
    }
}

/// Group terms into OR'd AND-clusters
pub fn compose(text: &str, terms: &[Term]) -> Vec<BoolGroup> {
    let mut ordered: Vec<&Term> = terms.iter().collect();
    ordered.sort_by_key(|t| t.span.0);

    let mut groups = Vec::new();
    let mut current = BoolGroup::default();
    let mut prev_end: Option<usize> = None;
    for term in ordered {
        if let Some(end) = prev_end {
            if connector_between(text, end, term.span.0) == Connector::Or && !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
        }
        current.push(term);
        prev_end = Some(prev_end.map_or(term.span.1, |e| e.max(term.span.1)));
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::terms::extract;

    fn groups_for(text: &str) -> Vec<BoolGroup> {
        let settings = Settings::contracts_default();
        compose(text, &extract(text, &settings).terms)
    }

    #[test]
    fn test_and_keeps_one_group() {
        let groups = groups_for("stakeholder has Alice or Bob and department = X");
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.fields.len(), 2);
        assert_eq!(group.fields[0].column, "STAKEHOLDER");
        assert_eq!(group.fields[0].values, vec!["Alice", "Bob"]);
        assert_eq!(group.fields[1].column, "DEPARTMENT");
        assert_eq!(group.fields[1].values, vec!["X"]);
    }

    #[test]
    fn test_or_splits_groups() {
        let groups = groups_for("department = IT or entity = Riyadh");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].fields[0].column, "DEPARTMENT");
        assert_eq!(groups[1].fields[0].column, "ENTITY");
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let groups = groups_for("entity = A or department = B and status = C");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].fields.len(), 1);
        assert_eq!(groups[1].fields.len(), 2);
    }

    #[test]
    fn test_fts_tokens_group_by_connector() {
        let groups = groups_for("has it or home care");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].fts_tokens, vec!["it"]);
        assert_eq!(groups[1].fts_tokens, vec!["home care"]);

        let groups = groups_for("has it and home care");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].fts_tokens, vec!["it", "home care"]);
    }

    #[test]
    fn test_same_column_merges_within_group() {
        let groups = groups_for("entity = A and entity = a and entity = B");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].fields[0].values, vec!["A", "B"]);
    }

    #[test]
    fn test_empty() {
        assert!(compose("nothing here", &[]).is_empty());
    }
}
