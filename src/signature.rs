//! Intent signatures for replaying learned rules.
//!
//! The value signature covers the normalized eq filters, FTS token sets,
//! group-by, order and aggregations. Shape signatures drop the literal values
//! according to the configured knobs, and the legacy form reproduces the
//! older `{eq, fts, group_by, order}` document hashed with SHA-1. Lookups try
//! the variants in order and fall back to the normalized question text.

use crate::aliases::AliasResolver;
use crate::config::Settings;
use crate::intent::{Dimension, FieldOp, OrderKey, QueryIntent};
use crate::normalize::{is_email, is_phone, normalize_value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FtsShape {
    /// Keep the size of every FTS group
    #[default]
    GroupsSizes,
    /// Keep only how many FTS groups there are
    GroupsOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EqListMode {
    /// Exact number of values per column
    #[default]
    ExactLen,
    /// Any number of values
    AnyLen,
    /// Value count bucketed into 1, 2-3, 4-8, 9+
    Bins,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignatureKnobs {
    #[serde(default)]
    pub fts_shape: FtsShape,
    #[serde(default)]
    pub eq_list_mode: EqListMode,
    /// Share of a shape-matched rule's eq columns the question must also
    /// name before the rule's eq values are applied
    #[serde(default)]
    pub eq_list_min_coverage: f64,
}

impl Default for SignatureKnobs {
    fn default() -> Self {
        Self {
            fts_shape: FtsShape::GroupsSizes,
            eq_list_mode: EqListMode::ExactLen,
            eq_list_min_coverage: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Value,
    Shape,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    /// Canonical JSON text that was hashed
    pub json: String,
    pub sha256: String,
    pub sha1: String,
}

impl Signature {
    fn from_text(kind: SignatureKind, json: String) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(json.as_bytes()));
        let sha1 = format!("{:x}", Sha1::digest(json.as_bytes()));
        Self {
            kind,
            json,
            sha256,
            sha1,
        }
    }
}

/// Semantic parts of an intent, already normalized
struct Parts {
    eq: BTreeMap<String, BTreeSet<String>>,
    fts: BTreeSet<Vec<String>>,
    group_by: Vec<String>,
    order: (String, bool),
    agg: Vec<Value>,
}

fn dimension_key(dim: &Dimension) -> String {
    match dim {
        Dimension::Column(c) => c.clone(),
        Dimension::Month(c) => format!("MONTH({})", c),
        Dimension::Quarter(c) => format!("QUARTER({})", c),
    }
}

fn parts(intent: &QueryIntent, settings: &Settings, collapse_families: bool) -> Parts {
    let resolver = AliasResolver::new(settings);
    let family = |c: &str| {
        if collapse_families {
            resolver.canonical_family(c)
        } else {
            c.trim().to_uppercase()
        }
    };

    let mut eq: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let eq_sources = intent
        .eq_filters
        .iter()
        .map(|f| (f.column.as_str(), &f.values))
        .chain(intent.bool_groups.iter().flat_map(|g| {
            g.fields_with(FieldOp::Eq)
                .map(|f| (f.column.as_str(), &f.values))
        }));
    for (column, values) in eq_sources {
        let normalized: BTreeSet<String> = values
            .iter()
            .map(|v| normalize_value(v))
            .filter(|v| !v.is_empty())
            .collect();
        if !normalized.is_empty() {
            eq.entry(family(column)).or_default().extend(normalized);
        }
    }

    let mut fts: BTreeSet<Vec<String>> = BTreeSet::new();
    let groups = intent
        .fts_groups
        .iter()
        .chain(intent.bool_groups.iter().map(|g| &g.fts_tokens));
    for group in groups {
        let tokens: BTreeSet<String> = group
            .iter()
            .filter(|t| !is_email(t) && !is_phone(t))
            .map(|t| normalize_value(t))
            .filter(|t| !t.is_empty())
            .collect();
        if !tokens.is_empty() {
            fts.insert(tokens.into_iter().collect());
        }
    }

    let mut group_by: Vec<String> = intent.group_by.iter().map(dimension_key).collect();
    group_by.sort();
    group_by.dedup();

    let order = match &intent.order_by {
        Some(o) => {
            let key = match &o.key {
                OrderKey::Column(c) => family(c),
                OrderKey::Alias(a) => a.to_uppercase(),
                OrderKey::Measure(m) => format!("{}_VALUE", m.as_str().to_uppercase()),
            };
            (key, o.desc)
        }
        None => (settings.date_column.clone(), true),
    };

    let mut agg: Vec<Value> = intent
        .aggregations
        .iter()
        .map(|a| {
            json!({
                "func": a.func.as_str(),
                "col": a.target.key(),
                "distinct": a.distinct,
            })
        })
        .collect();
    agg.sort_by_key(|v| v.to_string());
    agg.dedup();

    Parts {
        eq,
        fts,
        group_by,
        order,
        agg,
    }
}

fn order_value(order: &(String, bool)) -> Value {
    json!({ "col": order.0, "desc": order.1 })
}

/// Canonical value signature (SHA-256 primary, SHA-1 alongside)
pub fn value_signature(intent: &QueryIntent, settings: &Settings) -> Signature {
    let p = parts(intent, settings, true);
    let eq: Map<String, Value> = p
        .eq
        .into_iter()
        .map(|(k, v)| (k, json!(v.into_iter().collect::<Vec<_>>())))
        .collect();
    let doc = json!({
        "eq": eq,
        "fts": p.fts.into_iter().collect::<Vec<_>>(),
        "group_by": p.group_by,
        "order": order_value(&p.order),
        "agg": p.agg,
    });
    Signature::from_text(SignatureKind::Value, doc.to_string())
}

fn eq_shape(count: usize, mode: EqListMode) -> Value {
    match mode {
        EqListMode::ExactLen => json!(count),
        EqListMode::AnyLen => json!("any"),
        EqListMode::Bins => json!(match count {
            0 | 1 => "1",
            2..=3 => "2-3",
            4..=8 => "4-8",
            _ => "9+",
        }),
    }
}

/// Value-free signature governed by `knobs`
pub fn shape_signature(intent: &QueryIntent, settings: &Settings, knobs: &SignatureKnobs) -> Signature {
    let p = parts(intent, settings, true);
    let eq: Map<String, Value> = p
        .eq
        .into_iter()
        .map(|(k, v)| (k, eq_shape(v.len(), knobs.eq_list_mode)))
        .collect();
    let fts = match knobs.fts_shape {
        FtsShape::GroupsSizes => {
            let mut sizes: Vec<usize> = p.fts.iter().map(Vec::len).collect();
            sizes.sort_unstable();
            json!(sizes)
        }
        FtsShape::GroupsOnly => json!(p.fts.len()),
    };
    let doc = json!({
        "shape": true,
        "eq": eq,
        "fts": fts,
        "group_by": p.group_by,
        "order": order_value(&p.order),
        "agg": p.agg,
    });
    Signature::from_text(SignatureKind::Shape, doc.to_string())
}

/// The older `{eq, fts, group_by, order}` document, without family
/// collapsing, serialized with `", "` / `": "` separators
pub fn legacy_signature(intent: &QueryIntent, settings: &Settings) -> Signature {
    let p = parts(intent, settings, false);
    let eq: Map<String, Value> = p
        .eq
        .into_iter()
        .map(|(k, v)| (k, json!(v.into_iter().collect::<Vec<_>>())))
        .collect();
    let flat: BTreeSet<String> = p.fts.into_iter().flatten().collect();
    let doc = json!({
        "eq": eq,
        "fts": flat.into_iter().collect::<Vec<_>>(),
        "group_by": p.group_by,
        "order": order_value(&p.order),
    });
    Signature::from_text(SignatureKind::Legacy, spaced_json(&doc))
}

/// Sorted-key JSON with spaced separators
fn spaced_json(value: &Value) -> String {
    match value {
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(spaced_json).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            format!(
                "{{{}}}",
                entries
                    .into_iter()
                    .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), spaced_json(v)))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
        other => other.to_string(),
    }
}

/// Variants in lookup priority order, duplicates removed
pub fn signature_variants(intent: &QueryIntent, settings: &Settings) -> Vec<Signature> {
    let candidates = [
        value_signature(intent, settings),
        shape_signature(intent, settings, &settings.signature),
        shape_signature(intent, settings, &SignatureKnobs::default()),
        legacy_signature(intent, settings),
    ];
    let mut out: Vec<Signature> = Vec::new();
    for sig in candidates {
        if !out.iter().any(|s| s.sha256 == sig.sha256) {
            out.push(sig);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::EqFilter;

    fn intent_with(values: &[&str], fts: &[&[&str]]) -> QueryIntent {
        QueryIntent {
            eq_filters: vec![EqFilter {
                column: "STAKEHOLDERS".to_string(),
                values: values.iter().map(|s| s.to_string()).collect(),
            }],
            fts_groups: fts
                .iter()
                .map(|g| g.iter().map(|s| s.to_string()).collect())
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_value_signature_ignores_case_whitespace_and_order() {
        let settings = Settings::contracts_default();
        let a = intent_with(&["Alice", " BOB "], &[&["Home  Care", "it"]]);
        let b = intent_with(&["bob", "alice"], &[&["IT", "home care"]]);
        assert_eq!(
            value_signature(&a, &settings).sha256,
            value_signature(&b, &settings).sha256
        );
    }

    #[test]
    fn test_value_signature_differs_on_values() {
        let settings = Settings::contracts_default();
        let a = intent_with(&["Alice"], &[]);
        let b = intent_with(&["Carol"], &[]);
        assert_ne!(
            value_signature(&a, &settings).sha256,
            value_signature(&b, &settings).sha256
        );
        // same shape though
        assert_eq!(
            shape_signature(&a, &settings, &SignatureKnobs::default()).sha256,
            shape_signature(&b, &settings, &SignatureKnobs::default()).sha256
        );
    }

    #[test]
    fn test_family_collapse() {
        let settings = Settings::contracts_default();
        let sig = value_signature(&intent_with(&["x"], &[]), &settings);
        assert!(sig.json.contains("\"STAKEHOLDER\""));
        let legacy = legacy_signature(&intent_with(&["x"], &[]), &settings);
        assert!(legacy.json.contains("\"STAKEHOLDERS\": [\"x\"]"));
    }

    #[test]
    fn test_email_and_phone_normalization() {
        let settings = Settings::contracts_default();
        let mk = |v: &str| QueryIntent {
            eq_filters: vec![EqFilter {
                column: "REPRESENTATIVE_EMAIL".to_string(),
                values: vec![v.to_string()],
            }],
            ..Default::default()
        };
        assert_eq!(
            value_signature(&mk("A@B.COM"), &settings).sha256,
            value_signature(&mk(" a@b.com"), &settings).sha256
        );
    }

    #[test]
    fn test_knob_variants() {
        let settings = Settings::contracts_default();
        let one = intent_with(&["a"], &[&["x"], &["y", "z"]]);
        let two = intent_with(&["a", "b", "c"], &[&["x", "q"], &["y"]]);
        let any = SignatureKnobs {
            fts_shape: FtsShape::GroupsOnly,
            eq_list_mode: EqListMode::AnyLen,
            eq_list_min_coverage: 0.0,
        };
        assert_eq!(
            shape_signature(&one, &settings, &any).sha256,
            shape_signature(&two, &settings, &any).sha256
        );
        let bins = SignatureKnobs {
            eq_list_mode: EqListMode::Bins,
            ..Default::default()
        };
        let three = intent_with(&["a", "b"], &[&["x"], &["y", "z"]]);
        let four = intent_with(&["a", "b", "c"], &[&["x"], &["y", "z"]]);
        assert_eq!(
            shape_signature(&three, &settings, &bins).sha256,
            shape_signature(&four, &settings, &bins).sha256
        );
    }

    #[test]
    fn test_variants_are_deduplicated_and_ordered() {
        let settings = Settings::contracts_default();
        let variants = signature_variants(&intent_with(&["a"], &[]), &settings);
        assert_eq!(variants[0].kind, SignatureKind::Value);
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[2].kind, SignatureKind::Legacy);
    }

    #[test]
    fn test_spaced_json() {
        let doc = json!({"b": [1, 2], "a": {"x": true}});
        assert_eq!(spaced_json(&doc), r#"{"a": {"x": true}, "b": [1, 2]}"#);
    }
}
