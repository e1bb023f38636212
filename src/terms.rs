//! Term extraction from free text.
//!
//! Recognizes `COLUMN = value [or value]` style clauses over the configured
//! column vocabulary, `COLUMN has value` LIKE clauses, implicit full-text
//! phrases (`has`, `contains`, `about`), numeric comparator clauses and bare
//! email/phone tokens. Nothing here fails: unrecognized text yields no terms.

use crate::aliases::AliasResolver;
use crate::config::Settings;
use crate::intent::{CmpOp, FieldOp, NumericFilter, NumericTarget};
use crate::normalize::{clean_literal, collapse_whitespace, is_connector, is_email, is_phone};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Field,
    Fts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub kind: TermKind,
    /// Canonical logical column; `None` for FTS terms
    pub column: Option<String>,
    pub values: Vec<String>,
    pub op: FieldOp,
    /// Byte range in the source text
    pub span: (usize, usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Ordered by source position
    pub terms: Vec<Term>,
    pub comparisons: Vec<NumericFilter>,
    /// FTS tokens shorter than the configured minimum
    pub dropped_tokens: Vec<String>,
}

const NUMBER: &str = r"(\d[\d,]*(?:\.\d+)?)\s*(k|m|million|thousand)?\b";

lazy_static! {
    static ref COMPARISON: Regex = Regex::new(&format!(
        r"(?i)(?:\b(?:and|with|where)\s+)?\b(gross\s+value|gross|net\s+value|contract\s+value|contract_value_net_of_vat|value|vat|duration)\s*(>=|<=|<>|!=|>|<|=|\bgreater\s+than\s+or\s+equal\s+to\b|\bat\s+least\b|\bgreater\s+than\b|\bmore\s+than\b|\babove\b|\bover\b|\bexceeding\b|\bexceeds?\b|\bless\s+than\b|\bbelow\b|\bunder\b|\bat\s+most\b|\bbetween\b|\bequals?\b|\bis\b)\s*{n}(?:\s*(?:and|to|-)\s*{n})?",
        n = NUMBER
    ))
    .unwrap();
    static ref OPERATOR: Regex = Regex::new(
        r"(?i)^\s*(?:(!=|<>)|(==|=|:)|\b(is\s+not|isn't|not\s+equal\s+to)\b|\b(does\s+not\s+contain|doesn't\s+contain|not\s+containing|not\s+contains?|not\s+like)\b|\b(has|contains?|containing|includes?|like)\b|\b(is|equals?|equal\s+to)\b|\b(in)\s*\()\s*"
    )
    .unwrap();
    static ref STOP: Regex = Regex::new(
        r"(?i);|\band\b|\b(?:order(?:ed)?\s+by|sort(?:ed)?\s+by|group(?:ed)?\s+by|per|top\s+\d+|last|next|this|past|since|between|during|ytd|year\s+to\s+date|expiring|requested|(?:19|20)\d{2}-\d{1,2}-\d{1,2}|in\s+(?:19|20)\d{2})\b"
    )
    .unwrap();
    static ref FTS_STOP: Regex = Regex::new(
        r"(?i);|\b(?:order(?:ed)?\s+by|sort(?:ed)?\s+by|group(?:ed)?\s+by|per|top\s+\d+|last|next|this|past|since|between|during|ytd|year\s+to\s+date|expiring|requested|(?:19|20)\d{2}-\d{1,2}-\d{1,2}|in\s+(?:19|20)\d{2})\b"
    )
    .unwrap();
    static ref FTS_TRIGGER: Regex = Regex::new(
        r"(?i)\b(?:has|contains?|containing|mentions?|mentioning|about|regarding)\s+"
    )
    .unwrap();
    static ref VALUE_SEP: Regex = Regex::new(r"(?i)\s+or\s+|\s*,\s*|\s*\|\s*").unwrap();
    static ref FTS_SEP: Regex = Regex::new(r"(?i)\s+(?:or|and)\s+|\s*,\s*").unwrap();
    static ref TRAILING_FILLER: Regex = Regex::new(
        r"(?i)\s+(?:for|in|during|with|from|of|on|where|that|which|the|and|or|contracts?)\s*$"
    )
    .unwrap();
    static ref LEADING_FILLER: Regex =
        Regex::new(r"(?i)^(?:the|a|an|word|words|text|keyword|keywords)\s+").unwrap();
    static ref EMAIL_ANY: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref PHONE_ANY: Regex = Regex::new(r"\+?\d[\d\s\-()]{6,}\d").unwrap();
}

/// Replace quoted content with filler of the same byte length so that
/// connector words inside quotes are never treated as structure.
fn mask_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open: Option<char> = None;
    for ch in text.chars() {
        match open {
            Some(q) if ch == q => {
                open = None;
                out.push(ch);
            }
            Some(_) => out.extend(std::iter::repeat('x').take(ch.len_utf8())),
            None if ch == '"' || ch == '\'' => {
                // apostrophes inside words ("isn't") are not quotes
                if ch == '\'' && out.chars().last().is_some_and(|c| c.is_alphanumeric()) {
                    out.push(ch);
                } else {
                    open = Some(ch);
                    out.push(ch);
                }
            }
            None => out.push(ch),
        }
    }
    out
}

fn blank(masked: &mut String, start: usize, end: usize) {
    masked.replace_range(start..end, &" ".repeat(end - start));
}

fn parse_number(raw: &str, suffix: Option<&str>) -> Option<f64> {
    let base: f64 = raw.replace(',', "").parse().ok()?;
    let scale = match suffix.map(|s| s.to_lowercase()).as_deref() {
        Some("k") | Some("thousand") => 1_000.0,
        Some("m") | Some("million") => 1_000_000.0,
        _ => 1.0,
    };
    Some(base * scale)
}

fn comparison_target(word: &str, settings: &Settings) -> Option<NumericTarget> {
    let w = collapse_whitespace(word).to_lowercase();
    match w.as_str() {
        "gross value" | "gross" => Some(NumericTarget::Gross),
        "net value" | "net" | "contract value" | "value" | "contract_value_net_of_vat" => {
            Some(NumericTarget::Net)
        }
        "vat" => Some(NumericTarget::Column(settings.measure.vat.clone())),
        "duration" if settings.is_physical_column("DURATION") => {
            Some(NumericTarget::Column("DURATION".to_string()))
        }
        _ => None,
    }
}

fn comparison_op(word: &str) -> Option<CmpOp> {
    let w = collapse_whitespace(word).to_lowercase();
    Some(match w.as_str() {
        ">" | "greater than" | "more than" | "above" | "over" | "exceeds" | "exceed"
        | "exceeding" => CmpOp::Gt,
        ">=" | "greater than or equal to" | "at least" => CmpOp::Ge,
        "<" | "less than" | "below" | "under" => CmpOp::Lt,
        "<=" | "at most" => CmpOp::Le,
        "=" | "is" | "equals" | "equal" => CmpOp::Eq,
        "!=" | "<>" => CmpOp::Ne,
        "between" => CmpOp::Between,
        _ => return None,
    })
}

/// Numeric comparator clauses, blanked out of `masked` once recognized
fn extract_comparisons(masked: &mut String, settings: &Settings) -> Vec<NumericFilter> {
    let mut found = Vec::new();
    let mut ranges = Vec::new();
    for caps in COMPARISON.captures_iter(masked) {
        let (Some(target_m), Some(op_m), Some(num_m)) = (caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let (Some(target), Some(op)) = (
            comparison_target(target_m.as_str(), settings),
            comparison_op(op_m.as_str()),
        ) else {
            continue;
        };
        let Some(first) = parse_number(num_m.as_str(), caps.get(4).map(|m| m.as_str())) else {
            continue;
        };
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        let (values, end) = if op == CmpOp::Between {
            match caps.get(5).and_then(|m| parse_number(m.as_str(), caps.get(6).map(|s| s.as_str()))) {
                Some(second) => (vec![first.min(second), first.max(second)], whole.1),
                None => continue,
            }
        } else {
            let end = caps.get(4).unwrap_or(num_m).end();
            (vec![first], end)
        };
        found.push(NumericFilter { target, op, values });
        ranges.push((whole.0, end));
    }
    for (start, end) in ranges {
        blank(masked, start, end);
    }
    found
}

/// Numeric comparator clauses only
pub fn comparisons(text: &str, settings: &Settings) -> Vec<NumericFilter> {
    let mut masked = mask_quotes(text);
    extract_comparisons(&mut masked, settings)
}

/// Alternation over every filterable column spelling, longest first so
/// `owner department` wins over `owner`.
fn vocabulary(settings: &Settings) -> Option<Regex> {
    let mut phrases: Vec<String> = settings.column_phrases.keys().cloned().collect();
    phrases.extend(settings.eq_filter_columns.iter().map(|c| c.to_lowercase()));
    for logical in settings.aliases.keys() {
        phrases.push(logical.to_lowercase());
        phrases.push(format!("{}s", logical.to_lowercase()));
    }
    phrases.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    phrases.dedup();

    let alternation = phrases
        .iter()
        .map(|p| {
            p.split(|c: char| c == ' ' || c == '_')
                .filter(|part| !part.is_empty())
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\s_]+")
        })
        .filter(|frag| !frag.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Column vocabulary regex failed to compile: {}", e);
            None
        }
    }
}

struct Clause {
    start: usize,
    value_start: usize,
    op: FieldOp,
    column: String,
}

fn operator_kind(caps: &regex::Captures<'_>) -> Option<FieldOp> {
    if caps.get(1).is_some() || caps.get(3).is_some() {
        Some(FieldOp::NotEq)
    } else if caps.get(2).is_some() || caps.get(6).is_some() || caps.get(7).is_some() {
        Some(FieldOp::Eq)
    } else if caps.get(4).is_some() {
        Some(FieldOp::NotLike)
    } else if caps.get(5).is_some() {
        Some(FieldOp::Like)
    } else {
        None
    }
}

fn clean_value(raw: &str) -> String {
    let mut v = raw.trim().trim_matches(|c| c == '(' || c == ')').to_string();
    loop {
        let trimmed = TRAILING_FILLER.replace(&v, "").to_string();
        if trimmed == v {
            break;
        }
        v = trimmed;
    }
    clean_literal(&v)
}

/// Split `[start, end)` of `text` on separators found in `masked`
fn split_region(
    text: &str,
    masked: &str,
    start: usize,
    end: usize,
    sep: &Regex,
) -> Vec<(String, usize, usize)> {
    let mut parts = Vec::new();
    let mut cursor = start;
    for m in sep.find_iter(&masked[start..end]) {
        let (s, e) = (start + m.start(), start + m.end());
        parts.push((text[cursor..s].to_string(), cursor, s));
        cursor = e;
    }
    parts.push((text[cursor..end].to_string(), cursor, end));
    parts
        .into_iter()
        .map(|(raw, s, e)| (clean_value(&raw), s, e))
        .filter(|(v, _, _)| !v.is_empty())
        .collect()
}

/// Extract terms and comparisons from `text`
pub fn extract(text: &str, settings: &Settings) -> Extraction {
    let resolver = AliasResolver::new(settings);
    let mut masked = mask_quotes(text);
    let mut out = Extraction {
        comparisons: extract_comparisons(&mut masked, settings),
        ..Default::default()
    };

    let mut clauses: Vec<Clause> = Vec::new();
    if let Some(vocab) = vocabulary(settings) {
        for m in vocab.find_iter(&masked) {
            let Some(caps) = OPERATOR.captures(&masked[m.end()..]) else {
                continue;
            };
            let Some(op) = operator_kind(&caps) else {
                continue;
            };
            let column = resolver.canonical_family(&collapse_whitespace(&text[m.start()..m.end()]));
            if !resolver.is_filterable(&column) {
                continue;
            }
            let op_len = caps.get(0).map(|c| c.end()).unwrap_or(0);
            clauses.push(Clause {
                start: m.start(),
                value_start: m.end() + op_len,
                op,
                column,
            });
        }
    }

    let mut covered: Vec<(usize, usize)> = Vec::new();
    for (i, clause) in clauses.iter().enumerate() {
        let limit = clauses
            .get(i + 1)
            .map(|next| next.start)
            .unwrap_or(text.len())
            .max(clause.value_start);
        let end = STOP
            .find(&masked[clause.value_start..limit])
            .map(|m| clause.value_start + m.start())
            .unwrap_or(limit);
        let parts: Vec<_> = split_region(text, &masked, clause.value_start, end, &VALUE_SEP)
            .into_iter()
            .filter(|(v, _, _)| !is_connector(v))
            .collect();
        covered.push((clause.start, end));
        // span stops at the last value so a trailing "or" stays a connector
        let Some(value_end) = parts.last().map(|(_, _, e)| *e) else {
            continue;
        };
        out.terms.push(Term {
            kind: TermKind::Field,
            column: Some(clause.column.clone()),
            values: parts.into_iter().map(|(v, _, _)| v).collect(),
            op: clause.op,
            span: (clause.start, value_end),
        });
    }

    let inside = |pos: usize, covered: &[(usize, usize)]| covered.iter().any(|(s, e)| pos >= *s && pos < *e);

    let triggers: Vec<(usize, usize)> = FTS_TRIGGER
        .find_iter(&masked)
        .map(|m| (m.start(), m.end()))
        .filter(|(s, _)| !inside(*s, &covered))
        .collect();
    for (trigger_start, region_start) in triggers {
        let limit = clauses
            .iter()
            .map(|c| c.start)
            .find(|s| *s >= region_start)
            .unwrap_or(text.len());
        let end = FTS_STOP
            .find(&masked[region_start..limit])
            .map(|m| region_start + m.start())
            .unwrap_or(limit);
        for (token, s, e) in split_region(text, &masked, region_start, end, &FTS_SEP) {
            let token = LEADING_FILLER.replace(&token, "").trim().to_string();
            if token.is_empty() {
                continue;
            }
            if let Some(term) = contact_term(&token, settings, (s, e)) {
                out.terms.push(term);
            } else if token.chars().count() < settings.fts.min_token_len {
                out.dropped_tokens.push(token);
            } else {
                out.terms.push(Term {
                    kind: TermKind::Fts,
                    column: None,
                    values: vec![token],
                    op: FieldOp::Eq,
                    span: (s, e),
                });
            }
        }
        covered.push((trigger_start, end));
    }

    for m in EMAIL_ANY.find_iter(&masked) {
        if inside(m.start(), &covered) {
            continue;
        }
        if let Some(term) = contact_term(m.as_str(), settings, (m.start(), m.end())) {
            covered.push((m.start(), m.end()));
            out.terms.push(term);
        }
    }
    for m in PHONE_ANY.find_iter(&masked) {
        let token = m.as_str().trim();
        let dialable = token.starts_with('+') || token.starts_with('0');
        if !dialable || inside(m.start(), &covered) {
            continue;
        }
        if let Some(term) = contact_term(token, settings, (m.start(), m.end())) {
            covered.push((m.start(), m.end()));
            out.terms.push(term);
        }
    }

    out.terms.sort_by_key(|t| t.span.0);
    out
}

/// Email/phone-shaped tokens become equality terms on the contact columns
fn contact_term(token: &str, settings: &Settings, span: (usize, usize)) -> Option<Term> {
    let column = if is_email(token) {
        settings.contact.email.clone()
    } else if is_phone(token) {
        settings.contact.phone.clone()
    } else {
        return None;
    };
    Some(Term {
        kind: TermKind::Field,
        column: Some(column),
        values: vec![token.trim().to_string()],
        op: FieldOp::Eq,
        span,
    })
}
