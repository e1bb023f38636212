//! Structured comment grammar shared by the compile and feedback paths.
//!
//! A comment is a `;`- or newline-separated list of directives:
//!
//! ```text
//! eq: REQUEST_TYPE = Renewal or Renew (ci, trim);
//! neq: CONTRACT_STATUS = Cancelled;
//! contains: ENTITY = care;      not_contains: ENTITY = test;
//! fts: it or home care;         fts: water & pipes;
//! group_by: OWNER_DEPARTMENT, month;
//! order_by: TOTAL_GROSS desc;   top: 10;
//! gross: true;                  measure: net;
//! agg: sum(gross), count(distinct CONTRACT_ID);
//! empty: CONTRACT_ID;           not_empty: REPRESENTATIVE_EMAIL;
//! window: expiring next 90 days;
//! numeric: VAT > 200;
//! ```
//!
//! A bare `COLUMN = value` segment is read as `eq:`. Filter columns (`eq`,
//! `neq`, `contains`, `not_contains`) must be on the equality-filter
//! allow-list or be an alias family; grouping, ordering and empty checks
//! accept any table column. A rejected name is a hard error carrying the
//! closest accepted one.

use crate::aliases::AliasResolver;
use crate::config::Settings;
use crate::dates::{self, DateWindow};
use crate::error::{NlqError, Result};
use crate::intent::{
    AggFunc, AggTarget, Aggregation, Dimension, EmptyCheck, EqFilter, FieldClause, FieldOp,
    Measure, NumericFilter, OrderBy, OrderKey,
};
use crate::normalize::{canonical_column, clean_literal, dedup_ci, is_connector};
use crate::terms;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

lazy_static! {
    static ref DIRECTIVE: Regex = Regex::new(r"(?is)^\s*([a-z_ ]+?)\s*:\s*(.*?)\s*$").unwrap();
    static ref ASSIGNMENT: Regex =
        Regex::new(r"(?s)^\s*([^=]+?)\s*==?\s*(.+?)\s*$").unwrap();
    static ref FLAGS: Regex = Regex::new(
        r"(?i)\(\s*((?:ci|trim|case_insensitive)(?:\s*,\s*(?:ci|trim|case_insensitive))*)\s*\)\s*$"
    )
    .unwrap();
    static ref OR_SPLIT: Regex = Regex::new(r"(?i)\s+or\s+|\s*\|\s*|\s*,\s*").unwrap();
    static ref FTS_OR_SPLIT: Regex = Regex::new(r"(?i)\s+or\s+|\s*\|\s*|\s*,\s*").unwrap();
    static ref FTS_AND_SPLIT: Regex = Regex::new(r"(?i)\s*&\s*|\s+and\s+").unwrap();
    static ref AGG_CALL: Regex =
        Regex::new(r"(?i)^\s*([a-z]+)\s*\(\s*(distinct\s+)?([^)]*?)\s*\)\s*(?:as\s+([a-z_][a-z0-9_]*))?\s*$")
            .unwrap();
    static ref ORDER: Regex =
        Regex::new(r"(?i)^\s*(.+?)(?:\s+(asc|desc|ascending|descending))?\s*$").unwrap();
}

/// Everything a structured comment can say
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentHints {
    pub eq_filters: Vec<EqFilter>,
    /// Not-equal and LIKE clauses
    pub field_filters: Vec<FieldClause>,
    pub fts_groups: Vec<Vec<String>>,
    pub group_by: Vec<Dimension>,
    pub order_by: Option<OrderBy>,
    pub measure: Option<Measure>,
    pub limit: Option<NonZeroU32>,
    pub aggregations: Vec<Aggregation>,
    pub empty_checks: Vec<EmptyCheck>,
    pub window: Option<DateWindow>,
    pub numeric_filters: Vec<NumericFilter>,
    pub dropped_tokens: Vec<String>,
    /// Segments that were not directives
    pub unparsed: Vec<String>,
}

impl CommentHints {
    pub fn is_empty(&self) -> bool {
        self.eq_filters.is_empty()
            && self.field_filters.is_empty()
            && self.fts_groups.is_empty()
            && self.group_by.is_empty()
            && self.order_by.is_none()
            && self.measure.is_none()
            && self.limit.is_none()
            && self.aggregations.is_empty()
            && self.empty_checks.is_empty()
            && self.window.is_none()
            && self.numeric_filters.is_empty()
    }
}

struct Parser<'a> {
    settings: &'a Settings,
    resolver: AliasResolver<'a>,
    today: NaiveDate,
    hints: CommentHints,
}

/// Parse a structured comment
pub fn parse(comment: &str, settings: &Settings, today: NaiveDate) -> Result<CommentHints> {
    let mut parser = Parser {
        settings,
        resolver: AliasResolver::new(settings),
        today,
        hints: CommentHints::default(),
    };
    for segment in comment.split([';', '\n']) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        parser.segment(segment)?;
    }
    Ok(parser.hints)
}

/// Quick check used to route feedback comments
pub fn looks_structured(text: &str) -> bool {
    text.split([';', '\n']).any(|seg| {
        DIRECTIVE
            .captures(seg)
            .and_then(|c| c.get(1))
            .is_some_and(|k| directive_key(k.as_str()).is_some())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Eq,
    NotEq,
    Like,
    NotLike,
    Fts,
    GroupBy,
    OrderBy,
    Gross,
    Measure,
    Top,
    Agg,
    Empty,
    NotEmpty,
    Window,
    Numeric,
}

fn directive_key(raw: &str) -> Option<Key> {
    let key = raw.trim().to_lowercase().replace([' ', '-'], "_");
    Some(match key.as_str() {
        "eq" | "filter" | "where" => Key::Eq,
        "neq" | "ne" | "not_eq" => Key::NotEq,
        "contains" | "has" | "have" | "like" => Key::Like,
        "not_contains" | "not_like" | "excludes" => Key::NotLike,
        "fts" | "search" => Key::Fts,
        "group_by" | "group" => Key::GroupBy,
        "order_by" | "sort_by" | "order" | "sort" => Key::OrderBy,
        "gross" => Key::Gross,
        "measure" => Key::Measure,
        "top" | "limit" => Key::Top,
        "agg" | "aggregate" | "aggregations" => Key::Agg,
        "empty" | "missing" => Key::Empty,
        "not_empty" | "present" => Key::NotEmpty,
        "window" | "date" | "dates" => Key::Window,
        "numeric" | "value" | "amount" => Key::Numeric,
        _ => return None,
    })
}

fn split_values(payload: &str) -> Vec<String> {
    dedup_ci(
        OR_SPLIT
            .split(payload)
            .map(clean_literal)
            .filter(|v| !is_connector(v)),
    )
}

impl<'a> Parser<'a> {
    fn segment(&mut self, segment: &str) -> Result<()> {
        let directive = DIRECTIVE.captures(segment).and_then(|caps| {
            let key = directive_key(caps.get(1)?.as_str())?;
            Some((key, caps.get(2).map_or("", |m| m.as_str()).to_string()))
        });
        match directive {
            Some((key, body)) => self.directive(key, &body),
            None if ASSIGNMENT.is_match(segment) => self.assignment(segment, FieldOp::Eq),
            None => {
                self.hints.unparsed.push(segment.to_string());
                Ok(())
            }
        }
    }

    fn directive(&mut self, key: Key, body: &str) -> Result<()> {
        match key {
            Key::Eq => self.assignment(body, FieldOp::Eq),
            Key::NotEq => self.assignment(body, FieldOp::NotEq),
            Key::Like => self.assignment(body, FieldOp::Like),
            Key::NotLike => self.assignment(body, FieldOp::NotLike),
            Key::Fts => {
                self.fts(body);
                Ok(())
            }
            Key::GroupBy => self.group_by(body),
            Key::OrderBy => self.order_by(body),
            Key::Gross => {
                let on = matches!(body.trim().to_lowercase().as_str(), "true" | "yes" | "1" | "on");
                self.hints.measure = Some(if on { Measure::Gross } else { Measure::Net });
                Ok(())
            }
            Key::Measure => {
                self.hints.measure = match body.trim().to_lowercase().as_str() {
                    "gross" => Some(Measure::Gross),
                    "net" => Some(Measure::Net),
                    _ => {
                        self.hints.unparsed.push(format!("measure: {}", body));
                        self.hints.measure
                    }
                };
                Ok(())
            }
            Key::Top => {
                match body.trim().parse::<u32>().ok().and_then(NonZeroU32::new) {
                    Some(n) => self.hints.limit = Some(n),
                    None => self.hints.unparsed.push(format!("top: {}", body)),
                }
                Ok(())
            }
            Key::Agg => self.aggregations(body),
            Key::Empty => self.empty(body, true),
            Key::NotEmpty => self.empty(body, false),
            Key::Window => {
                match dates::resolve(body, self.today) {
                    Some(window) => self.hints.window = Some(window),
                    None => self.hints.unparsed.push(format!("window: {}", body)),
                }
                Ok(())
            }
            Key::Numeric => {
                let found = terms::comparisons(body, self.settings);
                if found.is_empty() {
                    self.hints.unparsed.push(format!("numeric: {}", body));
                }
                self.hints.numeric_filters.extend(found);
                Ok(())
            }
        }
    }

    /// Validate a column reference, returning its canonical logical name
    fn column(&self, raw: &str) -> Result<String> {
        let family = self.resolver.canonical_family(raw);
        if self.resolver.is_known(&family) {
            Ok(family)
        } else {
            Err(NlqError::UnknownColumn {
                column: canonical_column(raw),
                suggestion: self.resolver.suggest(raw),
            })
        }
    }

    /// Like `column`, restricted to the equality-filter allow-list
    fn filter_column(&self, raw: &str) -> Result<String> {
        let family = self.resolver.canonical_family(raw);
        if self.resolver.is_filterable(&family) {
            Ok(family)
        } else {
            Err(NlqError::UnknownColumn {
                column: canonical_column(raw),
                suggestion: self.resolver.suggest_filterable(raw),
            })
        }
    }

    fn assignment(&mut self, body: &str, op: FieldOp) -> Result<()> {
        let Some(caps) = ASSIGNMENT.captures(body) else {
            self.hints.unparsed.push(body.to_string());
            return Ok(());
        };
        let (Some(col), Some(val)) = (caps.get(1), caps.get(2)) else {
            return Ok(());
        };
        let column = self.filter_column(col.as_str())?;
        // (ci, trim) flags are accepted; comparisons are always both
        let payload = FLAGS.replace(val.as_str(), "");
        let values = split_values(&payload);
        if values.is_empty() {
            return Ok(());
        }

        if op == FieldOp::Eq {
            match self.hints.eq_filters.iter_mut().find(|f| f.column == column) {
                Some(existing) => {
                    existing.values = dedup_ci(existing.values.iter().chain(values.iter()))
                }
                None => self.hints.eq_filters.push(EqFilter { column, values }),
            }
        } else {
            let values = values
                .into_iter()
                .map(|v| v.trim_matches('%').to_string())
                .filter(|v| !v.is_empty())
                .collect();
            self.hints.field_filters.push(FieldClause { column, op, values });
        }
        Ok(())
    }

    fn fts(&mut self, body: &str) {
        for group in FTS_OR_SPLIT.split(body) {
            let mut tokens = Vec::new();
            for token in FTS_AND_SPLIT.split(group).map(clean_literal) {
                if token.is_empty() {
                    continue;
                }
                if token.chars().count() < self.settings.fts.min_token_len {
                    self.hints.dropped_tokens.push(token);
                } else {
                    tokens.push(token);
                }
            }
            let tokens = dedup_ci(tokens);
            if !tokens.is_empty() && !self.hints.fts_groups.contains(&tokens) {
                self.hints.fts_groups.push(tokens);
            }
        }
    }

    fn group_by(&mut self, body: &str) -> Result<()> {
        for raw in body.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let dim = match raw.to_lowercase().as_str() {
                "month" | "monthly" => Dimension::Month(self.settings.date_column.clone()),
                "quarter" | "quarterly" => Dimension::Quarter(self.settings.date_column.clone()),
                _ => Dimension::Column(self.column(raw)?),
            };
            if !self.hints.group_by.contains(&dim) {
                self.hints.group_by.push(dim);
            }
        }
        Ok(())
    }

    fn order_by(&mut self, body: &str) -> Result<()> {
        let Some(caps) = ORDER.captures(body) else {
            return Ok(());
        };
        let target = caps.get(1).map_or("", |m| m.as_str()).trim();
        let desc = caps
            .get(2)
            .map_or(true, |d| d.as_str().to_lowercase().starts_with("desc"));
        let key = match target.to_lowercase().as_str() {
            "gross" | "gross value" => OrderKey::Measure(Measure::Gross),
            "net" | "net value" | "value" => OrderKey::Measure(Measure::Net),
            _ => {
                let canon = canonical_column(target);
                let is_alias = self.hints.aggregations.iter().any(|a| a.alias == canon)
                    || matches!(canon.as_str(), "CNT" | "TOTAL_GROSS" | "TOTAL_NET" | "MONTH" | "QUARTER");
                if is_alias {
                    OrderKey::Alias(canon)
                } else {
                    OrderKey::Column(self.column(target)?)
                }
            }
        };
        self.hints.order_by = Some(OrderBy { key, desc });
        Ok(())
    }

    fn aggregations(&mut self, body: &str) -> Result<()> {
        for call in split_calls(body) {
            let Some(caps) = AGG_CALL.captures(&call) else {
                self.hints.unparsed.push(format!("agg: {}", call));
                continue;
            };
            let Some(func) = caps.get(1).and_then(|m| AggFunc::parse(m.as_str())) else {
                self.hints.unparsed.push(format!("agg: {}", call));
                continue;
            };
            let distinct = caps.get(2).is_some();
            let arg = caps.get(3).map_or("", |m| m.as_str()).trim();
            let target = match arg.to_lowercase().as_str() {
                "" | "*" => AggTarget::Star,
                "gross" | "gross value" => AggTarget::Measure(Measure::Gross),
                "net" | "net value" | "value" => AggTarget::Measure(Measure::Net),
                _ => AggTarget::Column(self.column(arg)?),
            };
            let alias = match caps.get(4) {
                Some(a) => canonical_column(a.as_str()),
                None => match (&target, func) {
                    (AggTarget::Star, AggFunc::Count) => "CNT".to_string(),
                    (AggTarget::Measure(m), f) => Aggregation::of_measure(f, *m).alias,
                    (t, f) => format!("{}_{}", f.as_str(), t.key()).to_uppercase(),
                },
            };
            let agg = Aggregation {
                func,
                target,
                distinct,
                alias,
            };
            if !self.hints.aggregations.contains(&agg) {
                self.hints.aggregations.push(agg);
            }
        }
        Ok(())
    }

    fn empty(&mut self, body: &str, empty: bool) -> Result<()> {
        for raw in body.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let column = self.column(raw)?;
            self.hints.empty_checks.push(EmptyCheck {
                column,
                empty,
                placeholders: Vec::new(),
            });
        }
        Ok(())
    }
}

/// Split `sum(gross), count(distinct X)` on top-level commas
fn split_calls(body: &str) -> Vec<String> {
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    calls.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        calls.push(current.trim().to_string());
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, 10).unwrap()
    }

    fn parse_default(text: &str) -> Result<CommentHints> {
        parse(text, &Settings::contracts_default(), today())
    }

    #[test]
    fn test_eq_directive() {
        let hints = parse_default("eq: REQUEST_TYPE = Renewal;").unwrap();
        assert_eq!(hints.eq_filters.len(), 1);
        assert_eq!(hints.eq_filters[0].column, "REQUEST_TYPE");
        assert_eq!(hints.eq_filters[0].values, vec!["Renewal"]);
        assert!(hints.unparsed.is_empty());
    }

    #[test]
    fn test_eq_with_flags_and_or_values() {
        let hints = parse_default("eq: entity = 'Home Care' or Riyadh (ci, trim)").unwrap();
        assert_eq!(hints.eq_filters[0].column, "ENTITY");
        assert_eq!(hints.eq_filters[0].values, vec!["Home Care", "Riyadh"]);
    }

    #[test]
    fn test_fts_or_and_groups() {
        let hints = parse_default("fts: it or home care").unwrap();
        assert_eq!(
            hints.fts_groups,
            vec![vec!["it".to_string()], vec!["home care".to_string()]]
        );
        let hints = parse_default("fts: water & pipes | roads").unwrap();
        assert_eq!(hints.fts_groups.len(), 2);
        assert_eq!(hints.fts_groups[0], vec!["water", "pipes"]);
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let err = parse_default("eq: REQEST_TYPE = Renewal").unwrap_err();
        match err {
            NlqError::UnknownColumn { column, suggestion } => {
                assert_eq!(column, "REQEST_TYPE");
                assert_eq!(suggestion.as_deref(), Some("REQUEST_TYPE"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(parse_default("group_by: FOO_BAR").is_err());
        assert!(parse_default("order_by: NOPE desc").is_err());
    }

    #[test]
    fn test_filters_limited_to_allow_list() {
        for text in ["eq: VAT = 5", "eq: START_DATE = x", "neq: CONTRACT_SUBJECT = x", "END_DATE = x"] {
            match parse_default(text).unwrap_err() {
                NlqError::UnknownColumn { .. } => {}
                other => panic!("unexpected error for '{}': {:?}", text, other),
            }
        }
        let hints = parse_default("eq: ENTITY = x").unwrap();
        assert_eq!(hints.eq_filters[0].column, "ENTITY");
        // physical columns outside the allow-list still group and sort
        let hints = parse_default("group_by: CONTRACT_SUBJECT; order_by: START_DATE asc").unwrap();
        assert_eq!(hints.group_by.len(), 1);
        assert!(hints.order_by.is_some());
    }

    #[test]
    fn test_connector_only_values_are_ignored() {
        let hints = parse_default("eq: ENTITY = or").unwrap();
        assert!(hints.eq_filters.is_empty());
    }

    #[test]
    fn test_alias_columns_are_known() {
        let hints = parse_default("has: stakeholders = alice; group_by: department").unwrap();
        assert_eq!(hints.field_filters[0].column, "STAKEHOLDER");
        assert_eq!(hints.field_filters[0].op, FieldOp::Like);
        assert_eq!(hints.group_by, vec![Dimension::Column("DEPARTMENT".to_string())]);
    }

    #[test]
    fn test_order_top_gross_agg() {
        let hints = parse_default(
            "agg: sum(gross), count(distinct CONTRACT_ID); order_by: TOTAL_GROSS asc; top: 5; gross: true",
        )
        .unwrap();
        assert_eq!(hints.aggregations.len(), 2);
        assert_eq!(hints.aggregations[1].alias, "COUNT_CONTRACT_ID");
        assert!(hints.aggregations[1].distinct);
        assert_eq!(
            hints.order_by,
            Some(OrderBy {
                key: OrderKey::Alias("TOTAL_GROSS".to_string()),
                desc: false
            })
        );
        assert_eq!(hints.limit.map(NonZeroU32::get), Some(5));
        assert_eq!(hints.measure, Some(Measure::Gross));
    }

    #[test]
    fn test_window_and_numeric() {
        let hints = parse_default("window: expiring next 30 days\nnumeric: VAT > 200").unwrap();
        let window = hints.window.unwrap();
        assert_eq!(window.mode, dates::WindowMode::EndOnly);
        assert_eq!(hints.numeric_filters.len(), 1);
    }

    #[test]
    fn test_bare_assignment_and_unparsed() {
        let hints = parse_default("CONTRACT_STATUS = Active; please fix this").unwrap();
        assert_eq!(hints.eq_filters[0].column, "CONTRACT_STATUS");
        assert_eq!(hints.unparsed, vec!["please fix this"]);
        assert!(looks_structured("fts: x"));
        assert!(!looks_structured("wrong answer"));
    }
}
