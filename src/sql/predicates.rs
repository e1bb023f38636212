//! WHERE-clause fragments.
//!
//! Every user value goes through the bind set. The only literals written
//! into the SQL text are fixed constants (`0`, `''`, date-part names).

use super::binds::BindSet;
use crate::aliases::AliasResolver;
use crate::bool_groups::BoolGroup;
use crate::config::Settings;
use crate::dates::{DateWindow, WindowMode};
use crate::error::Degradation;
use crate::intent::{
    Anomaly, CmpOp, EmptyCheck, FieldClause, FieldOp, Measure, NumericFilter, NumericTarget,
};
use crate::normalize::collapse_whitespace;
use crate::synonyms;
use tracing::warn;

/// OR of the parts, parenthesized when there is more than one
pub fn any_of(parts: Vec<String>) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("({})", parts.join(" OR "))),
    }
}

/// AND of the parts, parenthesized when there is more than one
pub fn all_of(parts: Vec<String>) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("({})", parts.join(" AND "))),
    }
}

fn bind_text(value: &str) -> String {
    collapse_whitespace(value).to_uppercase()
}

/// Net value expression
pub fn net_expr(settings: &Settings) -> String {
    settings.dialect.nvl(&settings.measure.net, "0")
}

/// Gross value: VAT between 0 and 1 is a rate, anything else an amount
pub fn gross_expr(settings: &Settings) -> String {
    let net = net_expr(settings);
    let vat = settings.dialect.nvl(&settings.measure.vat, "0");
    format!(
        "{net} + CASE WHEN {vat} BETWEEN 0 AND 1 THEN {net} * {vat} ELSE {vat} END",
        net = net,
        vat = vat
    )
}

pub fn measure_expr(measure: Measure, settings: &Settings) -> String {
    match measure {
        Measure::Net => net_expr(settings),
        Measure::Gross => gross_expr(settings),
    }
}

/// Date window predicate over already-registered bind placeholders
pub fn window_predicate(
    window: &DateWindow,
    settings: &Settings,
    start_ph: &str,
    end_ph: &str,
) -> String {
    let cols = &settings.window_columns;
    match window.mode {
        WindowMode::Overlap => {
            let overlap = &settings.overlap;
            if overlap.require_both {
                format!(
                    "({s} IS NOT NULL AND {e} IS NOT NULL AND {s} <= {de} AND {e} >= {ds})",
                    s = cols.start,
                    e = cols.end,
                    ds = start_ph,
                    de = end_ph
                )
            } else if overlap.strict {
                format!(
                    "({s} <= {de} AND {e} >= {ds})",
                    s = cols.start,
                    e = cols.end,
                    ds = start_ph,
                    de = end_ph
                )
            } else {
                format!(
                    "(({s} IS NULL OR {s} <= {de}) AND ({e} IS NULL OR {e} >= {ds}))",
                    s = cols.start,
                    e = cols.end,
                    ds = start_ph,
                    de = end_ph
                )
            }
        }
        WindowMode::Request => format!("{} BETWEEN {} AND {}", cols.request, start_ph, end_ph),
        WindowMode::EndOnly => format!("{} BETWEEN {} AND {}", cols.end, start_ph, end_ph),
        WindowMode::StartOnly => format!("{} BETWEEN {} AND {}", cols.start, start_ph, end_ph),
    }
}

/// Builds predicates against one settings snapshot, registering binds as
/// it goes
pub struct PredicateBuilder<'a> {
    settings: &'a Settings,
    resolver: AliasResolver<'a>,
    pub binds: BindSet,
    pub degradations: Vec<Degradation>,
}

impl<'a> PredicateBuilder<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            resolver: AliasResolver::new(settings),
            binds: BindSet::new(),
            degradations: Vec::new(),
        }
    }

    pub fn settings(&self) -> &'a Settings {
        self.settings
    }

    /// Physical columns of a logical name that are on the allow-list
    pub fn physical(&self, logical: &str) -> Vec<String> {
        let (allowed, rejected): (Vec<String>, Vec<String>) = self
            .resolver
            .resolve(logical)
            .into_iter()
            .partition(|c| self.settings.is_physical_column(c));
        if !rejected.is_empty() {
            warn!("Skipping columns not on the allow-list: {:?}", rejected);
        }
        allowed
    }

    fn degrade(&mut self, d: Degradation) {
        if !self.degradations.contains(&d) {
            self.degradations.push(d);
        }
    }

    /// `:date_start` / `:date_end` window predicate
    pub fn window(&mut self, window: &DateWindow) -> String {
        let start = self.binds.named("date_start", window.start);
        let end = self.binds.named("date_end", window.end);
        window_predicate(window, self.settings, &start, &end)
    }

    /// Window over custom bind names (period comparison branches)
    pub fn window_as(&mut self, window: &DateWindow, prefix: &str) -> String {
        let start = self.binds.named(&format!("{}_start", prefix), window.start);
        let end = self.binds.named(&format!("{}_end", prefix), window.end);
        window_predicate(window, self.settings, &start, &end)
    }

    /// Equality over a logical column: every slot column is checked against
    /// the same binds, OR'd across slots
    pub fn eq(&mut self, logical: &str, values: &[String]) -> Option<String> {
        let columns = self.physical(logical);
        let family = self.resolver.canonical_family(logical);
        self.eq_over(&columns, &family, values)
    }

    /// Equality over explicit columns; `synonym_column` selects the
    /// synonym buckets applied to the values
    pub fn eq_over(
        &mut self,
        columns: &[String],
        synonym_column: &str,
        values: &[String],
    ) -> Option<String> {
        if columns.is_empty() || values.is_empty() {
            return None;
        }
        let expansion = synonyms::expand(self.settings, synonym_column, values);
        let eq_binds: Vec<String> = expansion
            .equals
            .iter()
            .map(|v| self.binds.fresh("eq", v.as_str()))
            .collect();
        let like_binds: Vec<String> = expansion
            .prefixes
            .iter()
            .map(|p| format!("{}%", p))
            .chain(expansion.contains.iter().map(|c| format!("%{}%", c)))
            .map(|pattern| self.binds.fresh("eq_like", pattern))
            .collect();

        let per_column = columns
            .iter()
            .filter_map(|col| {
                let mut checks = Vec::new();
                if !eq_binds.is_empty() {
                    checks.push(format!("UPPER(TRIM({})) IN ({})", col, eq_binds.join(", ")));
                }
                for ph in &like_binds {
                    checks.push(format!("UPPER(TRIM({})) LIKE {}", col, ph));
                }
                any_of(checks)
            })
            .collect();
        any_of(per_column)
    }

    /// Not-equal and LIKE clauses. Negations hold on every slot column.
    pub fn field(&mut self, clause: &FieldClause) -> Option<String> {
        if clause.op == FieldOp::Eq {
            return self.eq(&clause.column, &clause.values);
        }
        let columns = self.physical(&clause.column);
        self.field_over(&columns, clause)
    }

    /// Field clause over explicit columns (the flattened slot column of a
    /// fan-out CTE)
    pub fn field_over(&mut self, columns: &[String], clause: &FieldClause) -> Option<String> {
        if clause.op == FieldOp::Eq {
            let family = self.resolver.canonical_family(&clause.column);
            return self.eq_over(columns, &family, &clause.values);
        }
        if columns.is_empty() || clause.values.is_empty() {
            return None;
        }
        let dialect = self.settings.dialect;
        match clause.op {
            FieldOp::Eq => None,
            FieldOp::NotEq => {
                let binds: Vec<String> = clause
                    .values
                    .iter()
                    .map(|v| self.binds.fresh("ne", bind_text(v)))
                    .collect();
                let checks = columns
                    .iter()
                    .map(|col| {
                        format!(
                            "{} NOT IN ({})",
                            dialect.nvl(&format!("UPPER(TRIM({}))", col), "'-'"),
                            binds.join(", ")
                        )
                    })
                    .collect();
                all_of(checks)
            }
            FieldOp::Like => {
                let binds: Vec<String> = clause
                    .values
                    .iter()
                    .map(|v| self.binds.fresh("like", format!("%{}%", bind_text(v))))
                    .collect();
                let checks = columns
                    .iter()
                    .flat_map(|col| binds.iter().map(move |ph| format!("UPPER({}) LIKE {}", col, ph)))
                    .collect();
                any_of(checks)
            }
            FieldOp::NotLike => {
                let binds: Vec<String> = clause
                    .values
                    .iter()
                    .map(|v| self.binds.fresh("nlike", format!("%{}%", bind_text(v))))
                    .collect();
                let checks = columns
                    .iter()
                    .flat_map(|col| {
                        binds.iter().map(move |ph| {
                            format!("{} NOT LIKE {}", dialect.nvl(&format!("UPPER({})", col), "'-'"), ph)
                        })
                    })
                    .collect();
                all_of(checks)
            }
        }
    }

    pub fn numeric(&mut self, filter: &NumericFilter) -> Option<String> {
        let expr = match &filter.target {
            NumericTarget::Net => net_expr(self.settings),
            NumericTarget::Gross => gross_expr(self.settings),
            NumericTarget::Column(c) => {
                if !self.settings.is_physical_column(c) {
                    warn!("Numeric filter on unknown column {} skipped", c);
                    return None;
                }
                self.settings.dialect.nvl(c, "0")
            }
        };
        match (filter.op, filter.values.as_slice()) {
            (CmpOp::Between, [lo, hi, ..]) => {
                let lo = self.binds.fresh("num", *lo);
                let hi = self.binds.fresh("num", *hi);
                Some(format!("{} BETWEEN {} AND {}", expr, lo, hi))
            }
            (CmpOp::Between, _) | (_, []) => None,
            (op, [v, ..]) => {
                let ph = self.binds.fresh("num", *v);
                Some(format!("{} {} {}", expr, op.sql(), ph))
            }
        }
    }

    /// Blank or placeholder check. For slot families "empty" means every
    /// slot is empty and "not empty" means some slot is filled.
    pub fn empty(&mut self, check: &EmptyCheck) -> Option<String> {
        let columns = self.physical(&check.column);
        if columns.is_empty() {
            return None;
        }
        let placeholders: Vec<String> = check
            .placeholders
            .iter()
            .map(|p| self.binds.fresh("ph", bind_text(p)))
            .collect();
        let checks: Vec<String> = columns
            .iter()
            .map(|col| {
                let mut parts = if check.empty {
                    vec![format!("{} IS NULL", col), format!("TRIM({}) = ''", col)]
                } else {
                    vec![format!("{} IS NOT NULL", col), format!("TRIM({}) <> ''", col)]
                };
                if !placeholders.is_empty() {
                    let op = if check.empty { "IN" } else { "NOT IN" };
                    parts.push(format!("UPPER(TRIM({})) {} ({})", col, op, placeholders.join(", ")));
                }
                if check.empty {
                    format!("({})", parts.join(" OR "))
                } else {
                    format!("({})", parts.join(" AND "))
                }
            })
            .collect();
        if check.empty {
            all_of(checks)
        } else {
            any_of(checks)
        }
    }

    pub fn anomaly(&mut self, check: Anomaly) -> Option<String> {
        let s = self.settings;
        let d = s.dialect;
        let net = net_expr(s);
        let vat = d.nvl(&s.measure.vat, "0");
        let (sql, needed): (String, Vec<&str>) = match check {
            Anomaly::VatZeroWithValue => (
                format!("({} = 0 AND {} > 0)", vat, net),
                vec![s.measure.vat.as_str(), s.measure.net.as_str()],
            ),
            Anomaly::VatExceedsNet => (
                format!("({} > 1 AND {} > {})", vat, vat, net),
                vec![s.measure.vat.as_str(), s.measure.net.as_str()],
            ),
            Anomaly::EndBeforeStart => (
                format!("{} < {}", s.window_columns.end, s.window_columns.start),
                vec![s.window_columns.end.as_str(), s.window_columns.start.as_str()],
            ),
            Anomaly::DurationMismatch => {
                let months = d.duration_months("DURATION");
                (
                    format!(
                        "({m} IS NOT NULL AND {st} IS NOT NULL AND {en} IS NOT NULL AND {shifted} <> {en})",
                        m = months,
                        st = s.window_columns.start,
                        en = s.window_columns.end,
                        shifted = d.add_months(&s.window_columns.start, &months)
                    ),
                    vec!["DURATION", s.window_columns.start.as_str(), s.window_columns.end.as_str()],
                )
            }
            Anomaly::OwnerDeptOulMismatch => (
                format!(
                    "{} <> {}",
                    d.nvl("UPPER(TRIM(OWNER_DEPARTMENT))", "'(NULL)'"),
                    d.nvl("UPPER(TRIM(DEPARTMENT_OUL))", "'(NULL)'")
                ),
                vec!["OWNER_DEPARTMENT", "DEPARTMENT_OUL"],
            ),
        };
        if needed.iter().all(|c| s.is_physical_column(c)) {
            Some(sql)
        } else {
            warn!("Check {:?} needs columns {:?}; skipped", check, needed);
            None
        }
    }

    /// FTS over the configured columns: each token is one bind checked on
    /// every column (OR), tokens AND within a group, groups OR'd
    pub fn fts(&mut self, groups: &[Vec<String>]) -> Option<String> {
        let groups: Vec<&Vec<String>> = groups.iter().filter(|g| !g.is_empty()).collect();
        if groups.is_empty() {
            return None;
        }
        let columns = self.settings.fts_columns();
        if columns.is_empty() {
            self.degrade(Degradation::NoFtsColumnsConfigured);
            return None;
        }
        let group_preds = groups
            .into_iter()
            .filter_map(|tokens| {
                let token_preds = tokens
                    .iter()
                    .filter_map(|token| {
                        let ph = self.binds.fresh("fts", format!("%{}%", bind_text(token)));
                        any_of(
                            columns
                                .iter()
                                .map(|col| format!("UPPER({}) LIKE {}", col, ph))
                                .collect(),
                        )
                    })
                    .collect();
                all_of(token_preds)
            })
            .collect();
        any_of(group_preds)
    }

    /// OR of AND-clusters
    pub fn bool_groups(&mut self, groups: &[BoolGroup]) -> Option<String> {
        let preds = groups
            .iter()
            .filter_map(|group| {
                let mut parts: Vec<String> =
                    group.fields.iter().filter_map(|f| self.field(f)).collect();
                if !group.fts_tokens.is_empty() {
                    parts.extend(self.fts(&[group.fts_tokens.clone()]));
                }
                all_of(parts)
            })
            .collect();
        any_of(preds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_gross_expression() {
        let settings = Settings::contracts_default();
        assert_eq!(
            gross_expr(&settings),
            "NVL(CONTRACT_VALUE_NET_OF_VAT, 0) + CASE WHEN NVL(VAT, 0) BETWEEN 0 AND 1 THEN NVL(CONTRACT_VALUE_NET_OF_VAT, 0) * NVL(VAT, 0) ELSE NVL(VAT, 0) END"
        );
    }

    #[test]
    fn test_overlap_variants() {
        let mut settings = Settings::contracts_default();
        let window = DateWindow::new(WindowMode::Overlap, d(2024, 1, 1), d(2024, 3, 31), "q1");
        let strict = window_predicate(&window, &settings, ":date_start", ":date_end");
        assert!(strict.contains("START_DATE IS NOT NULL AND END_DATE IS NOT NULL"));
        assert!(strict.contains("START_DATE <= :date_end AND END_DATE >= :date_start"));

        settings.overlap.require_both = false;
        settings.overlap.strict = false;
        let open = window_predicate(&window, &settings, ":date_start", ":date_end");
        assert!(open.contains("START_DATE IS NULL OR START_DATE <= :date_end"));
    }

    #[test]
    fn test_eq_over_slot_family_reuses_binds() {
        let settings = Settings::contracts_default();
        let mut builder = PredicateBuilder::new(&settings);
        let sql = builder
            .eq("DEPARTMENT", &["IT".to_string(), "Finance".to_string()])
            .unwrap();
        assert_eq!(sql.matches("UPPER(TRIM(").count(), 9);
        assert_eq!(sql.matches(" OR ").count(), 8);
        assert_eq!(builder.binds.len(), 2);
        assert!(sql.contains("UPPER(TRIM(OWNER_DEPARTMENT)) IN (:eq_0, :eq_1)"));
    }

    #[test]
    fn test_eq_with_synonyms_adds_like() {
        let settings = Settings::contracts_default();
        let mut builder = PredicateBuilder::new(&settings);
        let sql = builder.eq("REQUEST_TYPE", &["renewal".to_string()]).unwrap();
        assert!(sql.contains("UPPER(TRIM(REQUEST_TYPE)) IN ("));
        assert!(sql.contains("UPPER(TRIM(REQUEST_TYPE)) LIKE :eq_like_0"));
        assert_eq!(
            builder.binds.get("eq_like_0"),
            Some(&crate::sql::BindValue::Text("RENEW%".to_string()))
        );
    }

    #[test]
    fn test_fts_token_binds_shared_across_columns() {
        let mut settings = Settings::contracts_default();
        settings
            .fts
            .columns
            .insert("*".to_string(), vec!["CONTRACT_SUBJECT".to_string(), "ENTITY".to_string()]);
        let mut builder = PredicateBuilder::new(&settings);
        let sql = builder
            .fts(&[vec!["it".to_string()], vec!["home care".to_string()]])
            .unwrap();
        assert_eq!(
            sql,
            "((UPPER(CONTRACT_SUBJECT) LIKE :fts_0 OR UPPER(ENTITY) LIKE :fts_0) OR (UPPER(CONTRACT_SUBJECT) LIKE :fts_1 OR UPPER(ENTITY) LIKE :fts_1))"
        );
        assert_eq!(
            builder.binds.get("fts_1"),
            Some(&crate::sql::BindValue::Text("%HOME CARE%".to_string()))
        );
    }

    #[test]
    fn test_fts_without_columns_degrades() {
        let mut settings = Settings::contracts_default();
        settings.fts.columns.clear();
        let mut builder = PredicateBuilder::new(&settings);
        assert!(builder.fts(&[vec!["x".to_string()]]).is_none());
        assert_eq!(builder.degradations, vec![Degradation::NoFtsColumnsConfigured]);
        assert!(builder.binds.is_empty());
    }

    #[test]
    fn test_unknown_column_never_rendered() {
        let settings = Settings::contracts_default();
        let mut builder = PredicateBuilder::new(&settings);
        assert!(builder.eq("DROP_TABLE", &["x".to_string()]).is_none());
    }

    #[test]
    fn test_numeric_between() {
        let settings = Settings::contracts_default();
        let mut builder = PredicateBuilder::new(&settings);
        let sql = builder
            .numeric(&NumericFilter {
                target: NumericTarget::Net,
                op: CmpOp::Between,
                values: vec![100.0, 200.0],
            })
            .unwrap();
        assert_eq!(sql, "NVL(CONTRACT_VALUE_NET_OF_VAT, 0) BETWEEN :num_0 AND :num_1");
    }

    #[test]
    fn test_empty_check_with_placeholders() {
        let settings = Settings::contracts_default();
        let mut builder = PredicateBuilder::new(&settings);
        let sql = builder
            .empty(&EmptyCheck {
                column: "REPRESENTATIVE_EMAIL".to_string(),
                empty: true,
                placeholders: vec!["NA".to_string(), "N/A".to_string()],
            })
            .unwrap();
        assert!(sql.starts_with("(REPRESENTATIVE_EMAIL IS NULL OR TRIM(REPRESENTATIVE_EMAIL) = ''"));
        assert!(sql.contains("IN (:ph_0, :ph_1)"));
    }

    #[test]
    fn test_bool_groups_or_of_ands() {
        let settings = Settings::contracts_default();
        let mut builder = PredicateBuilder::new(&settings);
        let groups = vec![
            BoolGroup {
                fields: vec![FieldClause {
                    column: "ENTITY".to_string(),
                    op: FieldOp::Eq,
                    values: vec!["A".to_string()],
                }],
                fts_tokens: vec![],
            },
            BoolGroup {
                fields: vec![
                    FieldClause {
                        column: "CONTRACT_STATUS".to_string(),
                        op: FieldOp::Eq,
                        values: vec!["ACTIVE".to_string()],
                    },
                    FieldClause {
                        column: "REQUESTER".to_string(),
                        op: FieldOp::NotEq,
                        values: vec!["Bob".to_string()],
                    },
                ],
                fts_tokens: vec![],
            },
        ];
        let sql = builder.bool_groups(&groups).unwrap();
        assert_eq!(
            sql,
            "(UPPER(TRIM(ENTITY)) IN (:eq_0) OR (UPPER(TRIM(CONTRACT_STATUS)) IN (:eq_1) AND NVL(UPPER(TRIM(REQUESTER)), '-') NOT IN (:ne_0)))"
        );
    }
}
