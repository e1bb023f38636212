//! Question text to query intent.
//!
//! A `Question` bundles everything extracted from the text once: terms,
//! boolean groups, the date window and a top-N. The ordered pattern table
//! is then tried top to bottom; the first predicate that holds builds the
//! intent. With no match the generic listing is built from the same pieces.

mod patterns;

pub use patterns::{Pattern, PATTERNS};

use crate::aliases::AliasResolver;
use crate::bool_groups::{compose, BoolGroup};
use crate::comment::CommentHints;
use crate::config::Settings;
use crate::dates::{self, DateWindow};
use crate::error::Degradation;
use crate::intent::{
    AggTarget, Dimension, FieldClause, FieldOp, Measure, NumericTarget, QueryIntent, Shape,
};
use crate::normalize::normalize_question;
use crate::synonyms::normalize_status;
use crate::terms::{self, Extraction};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

pub(crate) const STATUS_COLUMN: &str = "CONTRACT_STATUS";

lazy_static! {
    static ref TOP_N: Regex =
        Regex::new(r"(?i)\b(?:top|first|highest|largest|biggest|limit)\s+(\d{1,3})\b").unwrap();
    static ref IMPLICIT_STATUS: Regex = Regex::new(
        r"(?i)\b(expired|ended|finished|active|running|pending|waiting)\s+contracts?\b"
    )
    .unwrap();
    static ref DIMENSION: Regex = Regex::new(
        r"(?i)\b(?:by|per|for\s+each|for\s+every|grouped\s+by|group\s+by|across)\s+([a-z_]+(?:\s+[a-z_]+){0,2})"
    )
    .unwrap();
}

/// Intent plus the trace of how it was read
#[derive(Debug, Clone, Serialize)]
pub struct BuiltIntent {
    pub intent: QueryIntent,
    pub explain: Vec<String>,
    /// Name of the matched pattern; `None` for the generic listing
    pub pattern: Option<&'static str>,
    pub degradations: Vec<Degradation>,
}

/// Everything read from the question text before pattern matching
pub struct Question<'a> {
    pub text: &'a str,
    /// Lower-cased, whitespace-collapsed text
    pub norm: String,
    pub today: NaiveDate,
    pub settings: &'a Settings,
    pub extraction: Extraction,
    pub groups: Vec<BoolGroup>,
    pub window: Option<DateWindow>,
    pub top_n: Option<u32>,
}

impl<'a> Question<'a> {
    pub fn parse(text: &'a str, settings: &'a Settings, today: NaiveDate) -> Self {
        let extraction = terms::extract(text, settings);
        let groups = compose(text, &extraction.terms);
        let top_n = TOP_N
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .filter(|n: &u32| *n > 0);
        Self {
            text,
            norm: normalize_question(text),
            today,
            settings,
            extraction,
            groups,
            window: dates::resolve(text, today),
            top_n,
        }
    }

    pub fn has(&self, needle: &str) -> bool {
        self.norm.contains(needle)
    }

    pub fn has_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.norm.contains(n))
    }

    /// Whole-word match
    pub fn has_word(&self, word: &str) -> bool {
        self.norm.match_indices(word).any(|(idx, _)| {
            let before = self.norm[..idx].chars().next_back();
            let after = self.norm[idx + word.len()..].chars().next();
            let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric() && c != '_');
            boundary(before) && boundary(after)
        })
    }

    pub fn wants_count(&self) -> bool {
        self.has_any(&["how many", "count", "number of"])
    }

    pub fn wants_average(&self) -> bool {
        self.has_any(&["average", "avg", "mean"])
    }

    /// First field clause on a logical column, any group
    pub fn field(&self, column: &str) -> Option<&FieldClause> {
        self.groups
            .iter()
            .flat_map(|g| g.fields.iter())
            .find(|f| f.column == column)
    }

    /// Equality values on a column, after status normalization
    pub fn eq_values(&self, column: &str) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.fields_with(FieldOp::Eq))
            .filter(|f| f.column == column)
            .flat_map(|f| f.values.iter().cloned())
            .collect()
    }

    /// Measure named in the text, if any
    pub fn measure_hint(&self) -> Option<Measure> {
        if self.has_word("gross") {
            Some(Measure::Gross)
        } else if self.has_word("net") {
            Some(Measure::Net)
        } else {
            None
        }
    }

    pub fn measure_or(&self, default: Measure) -> Measure {
        self.measure_hint().unwrap_or(default)
    }

    /// Logical column named by up to three words
    pub fn column_from_words(&self, words: &str) -> Option<String> {
        let resolver = AliasResolver::new(self.settings);
        let words: Vec<&str> = words.split_whitespace().collect();
        (1..=words.len().min(3)).rev().find_map(|n| {
            let phrase = words[..n].join(" ");
            resolver.phrase_target(&phrase).or_else(|| {
                let canon = resolver.canonical_family(&phrase);
                resolver.is_known(&canon).then_some(canon)
            })
        })
    }

    /// Column after `by` / `per` / `for each`
    pub fn dimension(&self) -> Option<String> {
        DIMENSION
            .captures_iter(&self.norm)
            .filter_map(|c| c.get(1))
            .find_map(|m| self.column_from_words(m.as_str()))
    }

    /// Generic filters every pattern starts from
    pub fn base(&self) -> QueryIntent {
        let mut intent = QueryIntent::default();
        self.apply_groups(&mut intent);
        intent.numeric_filters = self.extraction.comparisons.clone();
        intent.window = self.window.clone();
        if let Some(n) = self.top_n {
            intent.set_limit(n);
        }

        if intent.eq_values(STATUS_COLUMN).is_none() {
            let implied: Vec<String> = IMPLICIT_STATUS
                .captures_iter(self.text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .collect();
            intent.add_eq(STATUS_COLUMN, implied);
        }
        for filter in intent.eq_filters.iter_mut() {
            if filter.column == STATUS_COLUMN {
                filter.values = filter
                    .values
                    .iter()
                    .map(|v| normalize_status(self.settings, v))
                    .collect();
            }
        }
        intent
    }

    fn apply_groups(&self, intent: &mut QueryIntent) {
        match self.groups.as_slice() {
            [] => {}
            [single] => flatten_group(single, intent),
            groups => {
                if groups.iter().all(|g| g.fields.is_empty()) {
                    intent.fts_groups = groups.iter().map(|g| g.fts_tokens.clone()).collect();
                } else if let Some(column) = single_eq_column(groups) {
                    let values = groups
                        .iter()
                        .flat_map(|g| g.fields.iter())
                        .flat_map(|f| f.values.iter().cloned());
                    intent.add_eq(&column, values);
                } else {
                    intent.bool_groups = groups.to_vec();
                }
            }
        }
    }
}

fn flatten_group(group: &BoolGroup, intent: &mut QueryIntent) {
    for field in &group.fields {
        match field.op {
            FieldOp::Eq => intent.add_eq(&field.column, field.values.iter().cloned()),
            _ => intent.text_filters.push(field.clone()),
        }
    }
    if !group.fts_tokens.is_empty() {
        intent.fts_groups.push(group.fts_tokens.clone());
    }
}

/// `A = x or A = y`: every group is one equality on the same column
fn single_eq_column(groups: &[BoolGroup]) -> Option<String> {
    let first = groups.first()?.fields.first()?.column.clone();
    groups
        .iter()
        .all(|g| {
            g.fts_tokens.is_empty()
                && g.fields.len() == 1
                && g.fields[0].op == FieldOp::Eq
                && g.fields[0].column == first
        })
        .then_some(first)
}

fn measure_line(intent: &QueryIntent) -> Option<String> {
    let from_aggs = intent.aggregations.iter().find_map(|a| match a.target {
        AggTarget::Measure(m) => Some(m),
        _ => None,
    });
    let from_filters = intent.numeric_filters.iter().find_map(|f| match f.target {
        NumericTarget::Gross => Some(Measure::Gross),
        NumericTarget::Net => Some(Measure::Net),
        NumericTarget::Column(_) => None,
    });
    let measure = intent.measure.or(from_aggs).or(from_filters)?;
    Some(match measure {
        Measure::Gross => {
            "Measure: gross value (net value plus VAT; VAT between 0 and 1 is read as a rate)."
                .to_string()
        }
        Measure::Net => "Measure: contract value net of VAT.".to_string(),
    })
}

/// Lines shared by every branch, plus degradations
fn finish(
    q: &Question<'_>,
    intent: QueryIntent,
    mut explain: Vec<String>,
    pattern: Option<&'static str>,
) -> BuiltIntent {
    let mut degradations = Vec::new();
    if pattern.is_none() {
        degradations.push(Degradation::NoPatternMatched);
    }

    match (&intent.window, &intent.shape) {
        (_, Shape::PeriodComparison { current, previous }) => {
            explain.push(format!("Current period: {}", current.describe()));
            explain.push(format!("Previous period: {}", previous.describe()));
        }
        (Some(window), _) => explain.push(window.describe()),
        (None, _) => {
            let bucketed = intent
                .group_by
                .iter()
                .any(|d| matches!(d, Dimension::Month(_) | Dimension::Quarter(_)));
            if q.window.is_none() && !bucketed && dates::mentions_dates(q.text) {
                degradations.push(Degradation::AmbiguousDateText);
                explain.push(Degradation::AmbiguousDateText.to_string());
            } else {
                explain.push("No date window applied.".to_string());
            }
        }
    }
    explain.extend(measure_line(&intent));

    if !q.extraction.dropped_tokens.is_empty() {
        let dropped = Degradation::DroppedShortTokens(q.extraction.dropped_tokens.clone());
        explain.push(dropped.to_string());
        degradations.push(dropped);
    }

    BuiltIntent {
        intent,
        explain,
        pattern,
        degradations,
    }
}

/// Build the intent for a free-text question
pub fn build(text: &str, settings: &Settings, today: NaiveDate) -> BuiltIntent {
    let q = Question::parse(text, settings, today);
    for pattern in PATTERNS {
        if (pattern.matches)(&q) {
            debug!("Question matched pattern {}", pattern.name);
            let mut explain = Vec::new();
            let intent = (pattern.build)(&q, &mut explain);
            return finish(&q, intent, explain, Some(pattern.name));
        }
    }
    debug!("No pattern matched; using the generic listing");
    let intent = q.base();
    let mut explain = vec![fallback_line(&intent)];
    if intent.bool_groups.len() > 1 {
        explain.push(format!(
            "Filters form {} alternatives (AND inside each, OR between them).",
            intent.bool_groups.len()
        ));
    }
    finish(&q, intent, explain, None)
}

fn fallback_line(intent: &QueryIntent) -> String {
    let filters = intent.eq_filters.len()
        + intent.text_filters.len()
        + intent.numeric_filters.len()
        + intent.fts_groups.len()
        + intent.bool_groups.len();
    if filters == 0 {
        "Listing contracts without extra filters.".to_string()
    } else {
        format!("Listing contracts matching {} extracted filter(s).", filters)
    }
}

/// Intent described by a structured comment
pub fn from_comment(hints: &CommentHints, settings: &Settings) -> BuiltIntent {
    let mut intent = QueryIntent::default();
    for eq in &hints.eq_filters {
        let values: Vec<String> = if eq.column == STATUS_COLUMN {
            eq.values.iter().map(|v| normalize_status(settings, v)).collect()
        } else {
            eq.values.clone()
        };
        intent.add_eq(&eq.column, values);
    }
    for clause in &hints.field_filters {
        if clause.op == FieldOp::Eq {
            intent.add_eq(&clause.column, clause.values.iter().cloned());
        } else {
            intent.text_filters.push(clause.clone());
        }
    }
    intent.fts_groups = hints.fts_groups.clone();
    intent.group_by = hints.group_by.clone();
    intent.aggregations = hints.aggregations.clone();
    intent.order_by = hints.order_by.clone();
    intent.measure = hints.measure;
    intent.limit = hints.limit;
    intent.empty_checks = hints.empty_checks.clone();
    intent.window = hints.window.clone();
    intent.numeric_filters = hints.numeric_filters.clone();
    if intent.measure.is_some() && !intent.is_aggregate() {
        intent.projection = crate::intent::Projection::Detail;
    }

    let mut explain = vec!["Read as a structured comment.".to_string()];
    for eq in &intent.eq_filters {
        explain.push(format!(
            "{} IN ({}) (case-insensitive, trimmed).",
            eq.column,
            eq.values.join(", ")
        ));
    }
    if !intent.fts_groups.is_empty() {
        explain.push(format!(
            "Full-text search over {} group(s) of tokens.",
            intent.fts_groups.len()
        ));
    }
    match &intent.window {
        Some(window) => explain.push(window.describe()),
        None => explain.push("No date window applied.".to_string()),
    }
    explain.extend(measure_line(&intent));
    for segment in &hints.unparsed {
        explain.push(format!("Ignored comment text: {}", segment));
    }

    let mut degradations = Vec::new();
    if !hints.dropped_tokens.is_empty() {
        degradations.push(Degradation::DroppedShortTokens(hints.dropped_tokens.clone()));
    }
    BuiltIntent {
        intent,
        explain,
        pattern: Some("structured_comment"),
        degradations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, 10).unwrap()
    }

    fn build_default(text: &str) -> BuiltIntent {
        build(text, &Settings::contracts_default(), today())
    }

    #[test]
    fn test_fallback_listing() {
        let built = build_default("show me everything");
        assert!(built.pattern.is_none());
        assert_eq!(built.intent, QueryIntent::default());
        assert!(built.degradations.contains(&Degradation::NoPatternMatched));
        assert!(built.explain.iter().any(|l| l == "No date window applied."));
    }

    #[test]
    fn test_stakeholder_and_department_stay_separate() {
        let built = build_default("stakeholder has Alice or Bob and department = X");
        let intent = &built.intent;
        assert_eq!(intent.eq_values("DEPARTMENT").unwrap(), &["X".to_string()]);
        assert_eq!(intent.text_filters.len(), 1);
        assert_eq!(intent.text_filters[0].column, "STAKEHOLDER");
        assert_eq!(intent.text_filters[0].values, vec!["Alice", "Bob"]);
        assert!(intent.bool_groups.is_empty());
    }

    #[test]
    fn test_or_across_same_column_merges() {
        let built = build_default("entity = Riyadh or entity = Jeddah");
        assert_eq!(
            built.intent.eq_values("ENTITY").unwrap(),
            &["Riyadh".to_string(), "Jeddah".to_string()]
        );
    }

    #[test]
    fn test_mixed_or_keeps_clusters() {
        let built = build_default("entity = A or department = B and status = active");
        assert_eq!(built.intent.bool_groups.len(), 2);
        assert!(built.intent.eq_filters.is_empty());
    }

    #[test]
    fn test_implicit_status_is_normalized() {
        let built = build_default("list expired contracts");
        assert_eq!(
            built.intent.eq_values(STATUS_COLUMN).unwrap(),
            &["EXPIRED".to_string()]
        );
    }

    #[test]
    fn test_top_n_and_window_in_base() {
        let settings = Settings::contracts_default();
        let q = Question::parse("top 5 contracts last month", &settings, today());
        assert_eq!(q.top_n, Some(5));
        let window = q.window.clone().unwrap();
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2023, 1, 31).unwrap());
    }

    #[test]
    fn test_dimension_words() {
        let settings = Settings::contracts_default();
        let q = Question::parse("total gross by owner department", &settings, today());
        assert_eq!(q.dimension().as_deref(), Some("OWNER_DEPARTMENT"));
        let q = Question::parse("count by stakeholders", &settings, today());
        assert_eq!(q.dimension().as_deref(), Some("STAKEHOLDER"));
        let q = Question::parse("top contracts by gross value", &settings, today());
        assert_eq!(q.dimension(), None);
    }

    #[test]
    fn test_ambiguous_date_wording_is_reported() {
        let built = build_default("contracts from around some month");
        assert!(built.degradations.contains(&Degradation::AmbiguousDateText));
    }

    #[test]
    fn test_from_comment() {
        let settings = Settings::contracts_default();
        let hints = crate::comment::parse("eq: CONTRACT_STATUS = expire; gross: true", &settings, today())
            .unwrap();
        let built = from_comment(&hints, &settings);
        assert_eq!(
            built.intent.eq_values(STATUS_COLUMN).unwrap(),
            &["EXPIRED".to_string()]
        );
        assert_eq!(built.intent.measure, Some(Measure::Gross));
        assert_eq!(built.pattern, Some("structured_comment"));
    }
}
