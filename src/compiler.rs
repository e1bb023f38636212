//! Question in, parameterized SQL out.
//!
//! `plan` reads the question (or structured comment) into an intent and
//! computes its signature variants; `render` turns a planned intent into SQL
//! and the explain trace. `compile_with_rules` sits between the two and
//! folds in learned rules when a store is available.

use crate::comment;
use crate::config::Settings;
use crate::error::{Degradation, Result};
use crate::intent::QueryIntent;
use crate::intent_builder::{self, BuiltIntent};
use crate::normalize::normalize_question;
use crate::rules::{self, LearnedHints, RuleStore};
use crate::signature::{signature_variants, value_signature, Signature};
use crate::sql::{self, BindSet};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CompileOutput {
    pub sql: String,
    pub binds: BindSet,
    pub intent: QueryIntent,
    pub explain: Vec<String>,
    pub degradations: Vec<Degradation>,
    pub pattern: Option<String>,
    /// Primary (value) signature of the question intent, before learning
    pub signature: Signature,
    /// Rules folded into the intent
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applied_rules: Vec<i64>,
}

/// A question read into an intent, ready for learning and rendering
#[derive(Debug, Clone)]
pub struct Planned {
    pub built: BuiltIntent,
    pub signature: Signature,
    /// Signature variants in lookup priority order
    pub variants: Vec<Signature>,
    pub question_norm: String,
}

/// Read the question. Structured comments fail on unknown columns; free
/// text never fails.
pub fn plan(text: &str, structured: bool, settings: &Settings, today: NaiveDate) -> Result<Planned> {
    let built = if structured {
        let hints = comment::parse(text, settings, today)?;
        intent_builder::from_comment(&hints, settings)
    } else {
        intent_builder::build(text, settings, today)
    };
    let signature = value_signature(&built.intent, settings);
    let variants = signature_variants(&built.intent, settings);
    debug!(
        "Signature variants: {}",
        variants
            .iter()
            .map(|s| format!("{:?}:{}", s.kind, &s.sha256[..12.min(s.sha256.len())]))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(Planned {
        built,
        signature,
        variants,
        question_norm: normalize_question(text),
    })
}

/// Generate SQL for a planned intent
pub fn render(planned: Planned, mut explain_extra: Vec<String>, settings: &Settings) -> CompileOutput {
    let signature = planned.signature;
    let BuiltIntent {
        intent,
        mut explain,
        pattern,
        mut degradations,
    } = planned.built;

    let generated = sql::generate(&intent, settings);
    explain.append(&mut explain_extra);
    if generated.order_by.is_empty() {
        explain.push("Unordered (single aggregate row or fixed buckets).".to_string());
    } else {
        explain.push(format!("Ordered by {}.", generated.order_by.join(", ")));
    }
    if intent.limit.is_some() {
        explain.push(format!(
            "Row limit bound as :top_n ({}).",
            intent.limit.map(|n| n.get()).unwrap_or_default()
        ));
    }
    for degradation in generated.degradations {
        explain.push(degradation.to_string());
        degradations.push(degradation);
    }

    CompileOutput {
        sql: generated.sql,
        binds: generated.binds,
        intent,
        explain,
        degradations,
        pattern: pattern.map(str::to_string),
        signature,
        applied_rules: Vec::new(),
    }
}

/// Compile without a rule store
pub fn compile(text: &str, structured: bool, settings: &Settings, today: NaiveDate) -> Result<CompileOutput> {
    let planned = plan(text, structured, settings, today)?;
    Ok(render(planned, Vec::new(), settings))
}

/// Compile, folding in learned rules. Store failures degrade to a plain
/// compile.
pub fn compile_with_rules(
    text: &str,
    structured: bool,
    settings: &Settings,
    store: &dyn RuleStore,
    today: NaiveDate,
) -> Result<CompileOutput> {
    let mut planned = plan(text, structured, settings, today)?;
    let hints = match rules::lookup(
        store,
        settings,
        &planned.variants,
        &planned.question_norm,
        &planned.built.intent.eq_filters,
    ) {
        Ok(hints) => hints,
        Err(e) => {
            warn!("Rule store lookup failed: {}", e);
            let degradation = Degradation::RuleStoreUnavailable(e.to_string());
            planned.built.explain.push(degradation.to_string());
            planned.built.degradations.push(degradation);
            LearnedHints::default()
        }
    };
    let learned = rules::merge(&mut planned.built.intent, &hints, settings);
    let mut output = render(planned, learned, settings);
    output.applied_rules = hints.rule_ids;
    Ok(output)
}
