//! Learned rules and feedback patches.
//!
//! Positive feedback stores small JSON payloads keyed by the question's
//! signatures. At compile time the signature variants are tried in order,
//! then the normalized question text; the first stage with enabled rules
//! supplies `LearnedHints`, which `merge` folds into the intent without
//! overriding anything the question said itself.

pub mod feedback;
pub mod sqlite;

pub use feedback::{rate, Feedback, RateOutcome};
pub use sqlite::SqliteRuleStore;

use crate::aliases::AliasResolver;
use crate::comment::CommentHints;
use crate::config::Settings;
use crate::error::{NlqError, Result};
use crate::intent::{
    Aggregation, Dimension, EqFilter, FieldOp, Measure, OrderBy, OrderKey, QueryIntent,
};
use crate::normalize::canonical_column;
use crate::signature::{Signature, SignatureKind, SignatureKnobs};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Eq,
    Fts,
    GroupBy,
    OrderBy,
    Agg,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Eq => "eq",
            RuleKind::Fts => "fts",
            RuleKind::GroupBy => "group_by",
            RuleKind::OrderBy => "order_by",
            RuleKind::Agg => "agg",
        }
    }
}

impl FromStr for RuleKind {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "eq" => Ok(RuleKind::Eq),
            "fts" => Ok(RuleKind::Fts),
            "group_by" => Ok(RuleKind::GroupBy),
            "order_by" => Ok(RuleKind::OrderBy),
            "agg" => Ok(RuleKind::Agg),
            other => Err(NlqError::RuleStore(format!("unknown rule kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Approved,
    Rejected,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Pending => "pending",
            PatchStatus::Approved => "approved",
            PatchStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for PatchStatus {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PatchStatus::Pending),
            "approved" => Ok(PatchStatus::Approved),
            "rejected" => Ok(PatchStatus::Rejected),
            other => Err(NlqError::RuleStore(format!("unknown patch status '{}'", other))),
        }
    }
}

/// Lookup keys stored with a rule. Each signature variant matches on the
/// key of its own kind: value by SHA-256, shape by JSON, legacy by SHA-1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleKeys {
    pub json: String,
    pub sha256: String,
    pub sha1: String,
}

impl RuleKeys {
    pub fn from_variants(variants: &[Signature]) -> Self {
        let of = |kind: SignatureKind| variants.iter().find(|s| s.kind == kind).or(variants.first());
        Self {
            json: of(SignatureKind::Shape).map(|s| s.json.clone()).unwrap_or_default(),
            sha256: of(SignatureKind::Value).map(|s| s.sha256.clone()).unwrap_or_default(),
            sha1: of(SignatureKind::Legacy).map(|s| s.sha1.clone()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Assigned by the store
    pub id: Option<i64>,
    pub namespace: String,
    pub question_norm: String,
    pub kind: RuleKind,
    pub payload: Value,
    pub enabled: bool,
    pub keys: RuleKeys,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub id: Option<i64>,
    pub namespace: String,
    pub inquiry_id: i64,
    pub question_norm: String,
    pub rating: u8,
    pub comment: Option<String>,
    /// Hints extracted from the comment
    pub delta: Value,
    pub status: PatchStatus,
    pub created_at: Option<String>,
}

/// Persistence for rules and patches. Reads return enabled rules only,
/// newest first.
pub trait RuleStore: Send + Sync {
    fn rules_by_signature(&self, namespace: &str, signature: &Signature) -> Result<Vec<RuleRecord>>;

    fn rules_by_question(&self, namespace: &str, question_norm: &str) -> Result<Vec<RuleRecord>>;

    fn insert_rule(&self, rule: &RuleRecord) -> Result<i64>;

    fn insert_patch(&self, patch: &PatchRecord) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum MatchStage {
    Signature { variant: usize, kind: SignatureKind },
    Question,
}

/// Hints recovered from stored rules (or from a feedback comment)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearnedHints {
    pub eq_filters: Vec<EqFilter>,
    pub fts_groups: Vec<Vec<String>>,
    pub group_by: Vec<Dimension>,
    pub measure: Option<Measure>,
    pub order_by: Option<OrderBy>,
    pub aggregations: Vec<Aggregation>,
    pub matched: Option<MatchStage>,
    pub rule_ids: Vec<i64>,
}

impl LearnedHints {
    pub fn is_empty(&self) -> bool {
        self.eq_filters.is_empty()
            && self.fts_groups.is_empty()
            && self.group_by.is_empty()
            && self.measure.is_none()
            && self.order_by.is_none()
            && self.aggregations.is_empty()
    }

    /// Hints a feedback comment carries, in rule form
    pub fn from_comment(hints: &CommentHints) -> Self {
        let mut eq_filters = hints.eq_filters.clone();
        for clause in hints.field_filters.iter().filter(|c| c.op == FieldOp::Eq) {
            eq_filters.push(EqFilter {
                column: clause.column.clone(),
                values: clause.values.clone(),
            });
        }
        Self {
            eq_filters,
            fts_groups: hints.fts_groups.clone(),
            group_by: hints.group_by.clone(),
            measure: hints.measure,
            order_by: hints.order_by.clone(),
            aggregations: hints.aggregations.clone(),
            matched: None,
            rule_ids: Vec::new(),
        }
    }

    /// One `(kind, payload)` per non-empty hint kind
    pub fn to_payloads(&self) -> Vec<(RuleKind, Value)> {
        let mut out = Vec::new();
        if !self.eq_filters.is_empty() {
            let pairs: Vec<Value> = self
                .eq_filters
                .iter()
                .map(|f| json!([f.column, f.values]))
                .collect();
            out.push((RuleKind::Eq, json!({ "eq_filters": pairs })));
        }
        if !self.fts_groups.is_empty() {
            out.push((RuleKind::Fts, json!({ "tokens": self.fts_groups })));
        }
        if !self.group_by.is_empty() || self.measure.is_some() {
            let dims: Vec<String> = self.group_by.iter().map(dimension_text).collect();
            let mut payload = json!({ "group_by": dims });
            if let Some(measure) = self.measure {
                payload["gross"] = json!(measure == Measure::Gross);
            }
            out.push((RuleKind::GroupBy, payload));
        }
        if let Some(order) = &self.order_by {
            out.push((
                RuleKind::OrderBy,
                json!({ "sort_by": order_key_text(&order.key), "sort_desc": order.desc }),
            ));
        }
        if !self.aggregations.is_empty() {
            out.push((RuleKind::Agg, json!({ "aggregations": self.aggregations })));
        }
        out
    }
}

fn dimension_text(dim: &Dimension) -> String {
    match dim {
        Dimension::Column(c) => c.clone(),
        Dimension::Month(c) => format!("MONTH({})", c),
        Dimension::Quarter(c) => format!("QUARTER({})", c),
    }
}

fn parse_dimension(text: &str) -> Option<Dimension> {
    let text = text.trim();
    let inner = |prefix: &str| {
        text.to_uppercase()
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(')'))
            .map(canonical_column)
    };
    if let Some(col) = inner("MONTH(") {
        return Some(Dimension::Month(col));
    }
    if let Some(col) = inner("QUARTER(") {
        return Some(Dimension::Quarter(col));
    }
    let col = canonical_column(text);
    (!col.is_empty()).then_some(Dimension::Column(col))
}

fn order_key_text(key: &OrderKey) -> String {
    match key {
        OrderKey::Column(c) | OrderKey::Alias(c) => c.clone(),
        OrderKey::Measure(Measure::Gross) => "GROSS_VALUE".to_string(),
        OrderKey::Measure(Measure::Net) => "NET_VALUE".to_string(),
    }
}

fn parse_order_key(text: &str, settings: &Settings) -> OrderKey {
    let key = canonical_column(text);
    match key.as_str() {
        "GROSS" | "GROSS_VALUE" => OrderKey::Measure(Measure::Gross),
        "NET" | "NET_VALUE" => OrderKey::Measure(Measure::Net),
        _ if settings.is_physical_column(&key) => OrderKey::Column(key),
        _ => OrderKey::Alias(key),
    }
}

#[derive(Deserialize)]
struct EqPayload {
    eq_filters: Vec<(String, Vec<String>)>,
}

#[derive(Deserialize)]
struct FtsPayload {
    tokens: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct GroupByPayload {
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    gross: Option<bool>,
}

fn default_desc() -> bool {
    true
}

#[derive(Deserialize)]
struct OrderPayload {
    sort_by: String,
    #[serde(default = "default_desc")]
    sort_desc: bool,
}

#[derive(Deserialize)]
struct AggPayload {
    aggregations: Vec<Aggregation>,
}

/// Fold rules (newest first) into hints; for each kind the newest wins
fn collect(rules: &[RuleRecord], settings: &Settings) -> LearnedHints {
    let mut hints = LearnedHints::default();
    let mut eq_seen: BTreeSet<String> = BTreeSet::new();
    let mut kinds_seen: BTreeSet<&'static str> = BTreeSet::new();

    for rule in rules {
        let fresh = kinds_seen.insert(rule.kind.as_str());
        let applied = match rule.kind {
            RuleKind::Eq => serde_json::from_value::<EqPayload>(rule.payload.clone())
                .map(|p| {
                    for (column, values) in p.eq_filters {
                        let column = canonical_column(&column);
                        if values.is_empty() || !eq_seen.insert(column.clone()) {
                            continue;
                        }
                        hints.eq_filters.push(EqFilter { column, values });
                    }
                })
                .map_err(|e| e.to_string()),
            RuleKind::Fts if fresh => serde_json::from_value::<FtsPayload>(rule.payload.clone())
                .map(|p| {
                    hints.fts_groups = p.tokens.into_iter().filter(|g| !g.is_empty()).collect();
                })
                .map_err(|e| e.to_string()),
            RuleKind::GroupBy if fresh => {
                serde_json::from_value::<GroupByPayload>(rule.payload.clone())
                    .map(|p| {
                        hints.group_by = p.group_by.iter().filter_map(|d| parse_dimension(d)).collect();
                        hints.measure = p.gross.map(|g| if g { Measure::Gross } else { Measure::Net });
                    })
                    .map_err(|e| e.to_string())
            }
            RuleKind::OrderBy if fresh => {
                serde_json::from_value::<OrderPayload>(rule.payload.clone())
                    .map(|p| {
                        hints.order_by = Some(OrderBy {
                            key: parse_order_key(&p.sort_by, settings),
                            desc: p.sort_desc,
                        });
                    })
                    .map_err(|e| e.to_string())
            }
            RuleKind::Agg if fresh => serde_json::from_value::<AggPayload>(rule.payload.clone())
                .map(|p| hints.aggregations = p.aggregations)
                .map_err(|e| e.to_string()),
            _ => continue,
        };
        match applied {
            Ok(()) => hints.rule_ids.extend(rule.id),
            Err(e) => warn!(
                "Dropping {} rule {:?} with unreadable payload: {}",
                rule.kind.as_str(),
                rule.id,
                e
            ),
        }
    }
    hints
}

/// Share of the rule's eq columns the question also filters with an
/// overlapping value. `None` when the rules carry no eq filters.
pub fn eq_coverage(question: &[EqFilter], rules: &[EqFilter]) -> Option<f64> {
    if rules.is_empty() {
        return None;
    }
    let upper = |vals: &[String]| -> BTreeSet<String> {
        vals.iter()
            .map(|v| v.trim().to_uppercase())
            .filter(|v| !v.is_empty())
            .collect()
    };
    let q: BTreeMap<String, BTreeSet<String>> = question
        .iter()
        .map(|f| (canonical_column(&f.column), upper(&f.values)))
        .collect();
    let matches = rules
        .iter()
        .filter(|r| match q.get(&canonical_column(&r.column)) {
            Some(values) => {
                let rule_values = upper(&r.values);
                rule_values.is_empty() || !values.is_disjoint(&rule_values)
            }
            None => false,
        })
        .count();
    Some(matches as f64 / rules.len() as f64)
}

/// Signature variants first, then the normalized question text
pub fn lookup(
    store: &dyn RuleStore,
    settings: &Settings,
    variants: &[Signature],
    question_norm: &str,
    question_eq: &[EqFilter],
) -> Result<LearnedHints> {
    let namespace = settings.namespace.as_str();
    let mut rules = Vec::new();
    let mut stage = None;
    for (variant, signature) in variants.iter().enumerate() {
        rules = store.rules_by_signature(namespace, signature)?;
        if !rules.is_empty() {
            stage = Some(MatchStage::Signature {
                variant,
                kind: signature.kind,
            });
            break;
        }
    }
    if rules.is_empty() {
        rules = store.rules_by_question(namespace, question_norm)?;
        if !rules.is_empty() {
            stage = Some(MatchStage::Question);
        }
    }
    if rules.is_empty() {
        return Ok(LearnedHints::default());
    }

    let mut hints = collect(&rules, settings);
    hints.matched = stage;
    info!(
        "Rule hit ({:?}): {} rule(s) for '{}'",
        stage,
        hints.rule_ids.len(),
        question_norm
    );
    apply_coverage(&mut hints, question_eq, &settings.signature);
    Ok(hints)
}

fn apply_coverage(hints: &mut LearnedHints, question_eq: &[EqFilter], knobs: &SignatureKnobs) {
    if knobs.eq_list_min_coverage <= 0.0 {
        return;
    }
    if let Some(coverage) = eq_coverage(question_eq, &hints.eq_filters) {
        if coverage < knobs.eq_list_min_coverage {
            warn!(
                "Dropping learned eq filters: coverage {:.2} below {:.2}",
                coverage, knobs.eq_list_min_coverage
            );
            hints.eq_filters.clear();
        }
    }
}

/// Families the question already constrains by any text predicate
fn question_families(intent: &QueryIntent, resolver: &AliasResolver<'_>) -> BTreeSet<String> {
    intent
        .eq_filters
        .iter()
        .map(|f| f.column.as_str())
        .chain(intent.text_filters.iter().map(|f| f.column.as_str()))
        .chain(
            intent
                .bool_groups
                .iter()
                .flat_map(|g| g.fields.iter().map(|f| f.column.as_str())),
        )
        .map(|c| resolver.canonical_family(c))
        .collect()
}

/// Fold learned hints into the intent. The question always wins; applying
/// the same hints twice changes nothing the second time.
pub fn merge(intent: &mut QueryIntent, hints: &LearnedHints, settings: &Settings) -> Vec<String> {
    let resolver = AliasResolver::new(settings);
    let mut explain = Vec::new();

    let taken = question_families(intent, &resolver);
    for filter in &hints.eq_filters {
        let family = resolver.canonical_family(&filter.column);
        if taken.contains(&family) || !resolver.is_known(&family) {
            continue;
        }
        intent.add_eq(&family, filter.values.iter().cloned());
        explain.push(format!(
            "Learned filter: {} IN ({}).",
            family,
            filter.values.join(", ")
        ));
    }
    if !intent.has_fts() && !hints.fts_groups.is_empty() {
        intent.fts_groups = hints.fts_groups.clone();
        explain.push(format!(
            "Learned full-text search over {} group(s).",
            hints.fts_groups.len()
        ));
    }
    if intent.group_by.is_empty() && !hints.group_by.is_empty() {
        let known: Vec<Dimension> = hints
            .group_by
            .iter()
            .filter(|d| resolver.is_known(d.column()))
            .cloned()
            .collect();
        if !known.is_empty() {
            explain.push(format!(
                "Learned grouping: {}.",
                known.iter().map(dimension_text).collect::<Vec<_>>().join(", ")
            ));
            intent.group_by = known;
        }
    }
    if intent.measure.is_none() {
        if let Some(measure) = hints.measure {
            intent.measure = Some(measure);
            explain.push(format!("Learned measure: {}.", measure.as_str()));
        }
    }
    if intent.aggregations.is_empty() && !hints.aggregations.is_empty() {
        intent.aggregations = hints.aggregations.clone();
        explain.push(format!(
            "Learned aggregations: {}.",
            hints
                .aggregations
                .iter()
                .map(|a| a.alias.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if intent.order_by.is_none() {
        if let Some(order) = &hints.order_by {
            intent.order_by = Some(order.clone());
            explain.push(format!(
                "Learned ordering: {} {}.",
                order_key_text(&order.key),
                if order.desc { "DESC" } else { "ASC" }
            ));
        }
    }
    explain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{AggFunc, FieldClause};

    fn eq(column: &str, values: &[&str]) -> EqFilter {
        EqFilter {
            column: column.to_string(),
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn rule(id: i64, kind: RuleKind, payload: Value) -> RuleRecord {
        RuleRecord {
            id: Some(id),
            namespace: "dw::common".to_string(),
            question_norm: "q".to_string(),
            kind,
            payload,
            enabled: true,
            keys: RuleKeys::default(),
            created_at: None,
        }
    }

    #[test]
    fn test_payload_round_trip_through_collect() {
        let settings = Settings::contracts_default();
        let hints = LearnedHints {
            eq_filters: vec![eq("ENTITY", &["Riyadh"])],
            fts_groups: vec![vec!["HOME CARE".to_string()]],
            group_by: vec![Dimension::Month("REQUEST_DATE".to_string())],
            measure: Some(Measure::Gross),
            order_by: Some(OrderBy {
                key: OrderKey::Measure(Measure::Gross),
                desc: true,
            }),
            aggregations: vec![Aggregation::of_measure(AggFunc::Sum, Measure::Gross)],
            ..Default::default()
        };
        let rules: Vec<RuleRecord> = hints
            .to_payloads()
            .into_iter()
            .enumerate()
            .map(|(i, (kind, payload))| rule(i as i64, kind, payload))
            .collect();
        assert_eq!(rules.len(), 5);
        let back = collect(&rules, &settings);
        assert_eq!(back.eq_filters, hints.eq_filters);
        assert_eq!(back.fts_groups, hints.fts_groups);
        assert_eq!(back.group_by, hints.group_by);
        assert_eq!(back.measure, hints.measure);
        assert_eq!(back.order_by, hints.order_by);
        assert_eq!(back.aggregations, hints.aggregations);
    }

    #[test]
    fn test_newest_rule_wins_per_kind() {
        let settings = Settings::contracts_default();
        let rules = vec![
            rule(2, RuleKind::OrderBy, json!({"sort_by": "END_DATE", "sort_desc": false})),
            rule(1, RuleKind::OrderBy, json!({"sort_by": "REQUEST_DATE"})),
            rule(3, RuleKind::Eq, json!({"not_eq_filters": 1})),
        ];
        let hints = collect(&rules, &settings);
        assert_eq!(
            hints.order_by,
            Some(OrderBy {
                key: OrderKey::Column("END_DATE".to_string()),
                desc: false
            })
        );
        assert_eq!(hints.rule_ids, vec![2]);
        assert!(hints.eq_filters.is_empty());
    }

    #[test]
    fn test_question_eq_wins_and_merge_is_idempotent() {
        let settings = Settings::contracts_default();
        let mut intent = QueryIntent::default();
        intent.add_eq("DEPARTMENT", vec!["Finance".to_string()]);
        intent.text_filters.push(FieldClause {
            column: "STAKEHOLDER".to_string(),
            op: FieldOp::Like,
            values: vec!["Alice".to_string()],
        });
        let hints = LearnedHints {
            eq_filters: vec![
                eq("DEPARTMENTS", &["Legal"]),
                eq("STAKEHOLDER", &["Bob"]),
                eq("ENTITY", &["Riyadh"]),
            ],
            order_by: Some(OrderBy {
                key: OrderKey::Column("END_DATE".to_string()),
                desc: false,
            }),
            ..Default::default()
        };
        let lines = merge(&mut intent, &hints, &settings);
        assert_eq!(lines.len(), 2);
        assert_eq!(intent.eq_values("DEPARTMENT").unwrap(), &["Finance".to_string()]);
        assert!(intent.eq_values("STAKEHOLDER").is_none());
        assert_eq!(intent.eq_values("ENTITY").unwrap(), &["Riyadh".to_string()]);

        let once = intent.clone();
        let lines = merge(&mut intent, &hints, &settings);
        assert!(lines.is_empty());
        assert_eq!(intent, once);
    }

    #[test]
    fn test_eq_coverage() {
        let question = vec![eq("ENTITY", &["riyadh"]), eq("CONTRACT_STATUS", &["ACTIVE"])];
        let rules = vec![eq("ENTITY", &["RIYADH"]), eq("REQUEST_TYPE", &["NEW"])];
        assert_eq!(eq_coverage(&question, &rules), Some(0.5));
        assert_eq!(eq_coverage(&question, &[]), None);
    }

    #[test]
    fn test_low_coverage_drops_learned_eq() {
        let knobs = SignatureKnobs {
            eq_list_min_coverage: 0.75,
            ..Default::default()
        };
        let mut hints = LearnedHints {
            eq_filters: vec![eq("ENTITY", &["A"]), eq("REQUEST_TYPE", &["NEW"])],
            ..Default::default()
        };
        apply_coverage(&mut hints, &[eq("ENTITY", &["A"])], &knobs);
        assert!(hints.eq_filters.is_empty());
    }

    #[test]
    fn test_dimension_text_parses_back() {
        for dim in [
            Dimension::Column("ENTITY".to_string()),
            Dimension::Quarter("REQUEST_DATE".to_string()),
        ] {
            assert_eq!(parse_dimension(&dimension_text(&dim)), Some(dim));
        }
    }
}
