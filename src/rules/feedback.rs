//! Ratings and correction comments.
//!
//! `rate` re-plans the question with the comment applied as a correction.
//! Ratings of 4 and up store one rule per hint kind; ratings of 2 and below
//! store a pending patch for review. Store failures are logged and reported
//! in the outcome but never fail the call.

use super::{LearnedHints, PatchRecord, PatchStatus, RuleKeys, RuleRecord, RuleStore};
use crate::aliases::AliasResolver;
use crate::comment::{self, CommentHints};
use crate::compiler::{self, CompileOutput};
use crate::config::Settings;
use crate::error::Result;
use crate::intent::QueryIntent;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

pub const POSITIVE_RATING: u8 = 4;
pub const NEGATIVE_RATING: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub inquiry_id: i64,
    /// 1 to 5
    pub rating: u8,
    pub question: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateOutcome {
    pub inquiry_id: i64,
    pub rating: u8,
    /// Hints read from the comment
    pub applied: LearnedHints,
    pub rules_saved: Vec<i64>,
    pub patch_id: Option<i64>,
    /// Persistence failures; the outcome is still valid
    pub store_errors: Vec<String>,
    /// The question compiled with the correction applied
    pub output: CompileOutput,
}

/// Comment hints win over the question, family by family
fn apply_correction(intent: &mut QueryIntent, hints: &LearnedHints, settings: &Settings) -> Vec<String> {
    let resolver = AliasResolver::new(settings);
    let mut explain = Vec::new();
    for filter in &hints.eq_filters {
        let family = resolver.canonical_family(&filter.column);
        intent
            .eq_filters
            .retain(|f| resolver.canonical_family(&f.column) != family);
        intent
            .text_filters
            .retain(|f| resolver.canonical_family(&f.column) != family);
        intent.add_eq(&family, filter.values.iter().cloned());
        explain.push(format!(
            "Correction: {} IN ({}).",
            family,
            filter.values.join(", ")
        ));
    }
    if !hints.fts_groups.is_empty() {
        intent.fts_groups = hints.fts_groups.clone();
        explain.push("Correction: full-text tokens replaced.".to_string());
    }
    if !hints.group_by.is_empty() {
        intent.group_by = hints.group_by.clone();
        explain.push("Correction: grouping replaced.".to_string());
    }
    if let Some(measure) = hints.measure {
        intent.measure = Some(measure);
        explain.push(format!("Correction: measure is {}.", measure.as_str()));
    }
    if !hints.aggregations.is_empty() {
        intent.aggregations = hints.aggregations.clone();
        explain.push("Correction: aggregations replaced.".to_string());
    }
    if let Some(order) = &hints.order_by {
        intent.order_by = Some(order.clone());
        explain.push("Correction: ordering replaced.".to_string());
    }
    explain
}

/// Store one rule per non-empty hint kind
pub fn save_positive_rule(
    store: &dyn RuleStore,
    settings: &Settings,
    question_norm: &str,
    keys: &RuleKeys,
    hints: &LearnedHints,
) -> (Vec<i64>, Vec<String>) {
    let mut saved = Vec::new();
    let mut errors = Vec::new();
    for (kind, payload) in hints.to_payloads() {
        let rule = RuleRecord {
            id: None,
            namespace: settings.namespace.clone(),
            question_norm: question_norm.to_string(),
            kind,
            payload,
            enabled: true,
            keys: keys.clone(),
            created_at: None,
        };
        match store.insert_rule(&rule) {
            Ok(id) => {
                info!("Saved {} rule {} for '{}'", kind.as_str(), id, question_norm);
                saved.push(id);
            }
            Err(e) => {
                warn!("Failed to save {} rule: {}", kind.as_str(), e);
                errors.push(e.to_string());
            }
        }
    }
    (saved, errors)
}

/// Store the comment and its extracted delta as a pending patch
pub fn save_patch(
    store: &dyn RuleStore,
    settings: &Settings,
    feedback: &Feedback,
    question_norm: &str,
    hints: &CommentHints,
) -> std::result::Result<i64, String> {
    let patch = PatchRecord {
        id: None,
        namespace: settings.namespace.clone(),
        inquiry_id: feedback.inquiry_id,
        question_norm: question_norm.to_string(),
        rating: feedback.rating,
        comment: feedback.comment.clone(),
        delta: serde_json::to_value(hints).unwrap_or_else(|_| json!({})),
        status: PatchStatus::Pending,
        created_at: None,
    };
    match store.insert_patch(&patch) {
        Ok(id) => {
            info!("Saved patch {} for inquiry {}", id, feedback.inquiry_id);
            Ok(id)
        }
        Err(e) => {
            warn!("Failed to save patch for inquiry {}: {}", feedback.inquiry_id, e);
            Err(e.to_string())
        }
    }
}

/// Rate a compiled answer. Fails only when the question or comment cannot
/// be read (an unknown column in the comment).
pub fn rate(
    store: &dyn RuleStore,
    settings: &Settings,
    feedback: &Feedback,
    today: NaiveDate,
) -> Result<RateOutcome> {
    let hints = match feedback.comment.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => comment::parse(text, settings, today)?,
        _ => CommentHints::default(),
    };
    let applied = LearnedHints::from_comment(&hints);

    let mut planned = compiler::plan(&feedback.question, false, settings, today)?;
    let keys = RuleKeys::from_variants(&planned.variants);
    let question_norm = planned.question_norm.clone();
    let corrections = apply_correction(&mut planned.built.intent, &applied, settings);
    let output = compiler::render(planned, corrections, settings);

    let mut rules_saved = Vec::new();
    let mut patch_id = None;
    let mut store_errors = Vec::new();
    if feedback.rating >= POSITIVE_RATING {
        if applied.is_empty() {
            info!("Positive rating without hints for inquiry {}; nothing to learn", feedback.inquiry_id);
        } else {
            let (saved, errors) = save_positive_rule(store, settings, &question_norm, &keys, &applied);
            rules_saved = saved;
            store_errors = errors;
        }
    } else if feedback.rating <= NEGATIVE_RATING {
        match save_patch(store, settings, feedback, &question_norm, &hints) {
            Ok(id) => patch_id = Some(id),
            Err(e) => store_errors.push(e),
        }
    }

    Ok(RateOutcome {
        inquiry_id: feedback.inquiry_id,
        rating: feedback.rating,
        applied,
        rules_saved,
        patch_id,
        store_errors,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::SqliteRuleStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, 10).unwrap()
    }

    fn feedback(rating: u8, comment: &str) -> Feedback {
        Feedback {
            inquiry_id: 7,
            rating,
            question: "contracts last month".to_string(),
            comment: Some(comment.to_string()),
        }
    }

    #[test]
    fn test_correction_replaces_question_filter() {
        let settings = Settings::contracts_default();
        let store = SqliteRuleStore::open_in_memory().unwrap();
        let mut fb = feedback(5, "eq: ENTITY = Jeddah");
        fb.question = "contracts where entity = Riyadh".to_string();
        let outcome = rate(&store, &settings, &fb, today()).unwrap();
        assert_eq!(
            outcome.output.intent.eq_values("ENTITY").unwrap(),
            &["Jeddah".to_string()]
        );
        assert_eq!(outcome.rules_saved.len(), 1);
    }

    #[test]
    fn test_neutral_rating_stores_nothing() {
        let settings = Settings::contracts_default();
        let store = SqliteRuleStore::open_in_memory().unwrap();
        let outcome = rate(&store, &settings, &feedback(3, "eq: ENTITY = Jeddah"), today()).unwrap();
        assert!(outcome.rules_saved.is_empty());
        assert!(outcome.patch_id.is_none());
        assert!(store.rules(&settings.namespace).unwrap().is_empty());
        assert!(store.patches(&settings.namespace).unwrap().is_empty());
    }

    #[test]
    fn test_positive_rating_without_comment_learns_nothing() {
        let settings = Settings::contracts_default();
        let store = SqliteRuleStore::open_in_memory().unwrap();
        let mut fb = feedback(5, "");
        fb.comment = None;
        let outcome = rate(&store, &settings, &fb, today()).unwrap();
        assert!(outcome.applied.is_empty());
        assert!(outcome.rules_saved.is_empty());
    }
}
