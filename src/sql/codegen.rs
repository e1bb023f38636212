//! Query intent to SQL.
//!
//! One entry point, `generate`, builds a statement tree for the intent's
//! shape and renders it once. ORDER BY is resolved here and nowhere else.

use super::binds::BindSet;
use super::ir::{render, Body, Cte, Select, Statement};
use super::predicates::{measure_expr, PredicateBuilder};
use crate::aliases::AliasResolver;
use crate::config::Settings;
use crate::dates::{DateWindow, WindowMode};
use crate::error::Degradation;
use crate::intent::{
    AggFunc, AggTarget, Aggregation, Dimension, Measure, OrderKey, Projection, QueryIntent, Shape,
};
use itertools::Itertools;
use tracing::{debug, info, warn};

/// Rendered SQL with its binds
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub binds: BindSet,
    pub degradations: Vec<Degradation>,
    /// Rendered ORDER BY keys (empty when the statement is unordered)
    pub order_by: Vec<String>,
}

/// Where aggregate and dimension expressions read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// The analytic table itself
    Base,
    /// A fan-out CTE exposing `NET_VALUE` / `GROSS_VALUE` and carried columns
    Slots,
}

/// What the outer SELECT exposes to ORDER BY
#[derive(Debug, Default)]
struct OrderScope {
    /// Output names usable as sort keys
    names: Vec<String>,
    /// Row-level query over the base table: any physical column sorts
    base_rows: bool,
    measure_aliases: Vec<(Measure, String)>,
    first_agg: Option<String>,
    first_dim: Option<String>,
    /// Aggregate without dimensions: a single row, never sorted
    scalar: bool,
}

fn measure_alias(measure: Measure) -> String {
    AggTarget::Measure(measure).key()
}

fn total_alias(measure: Measure) -> String {
    match measure {
        Measure::Gross => "TOTAL_GROSS".to_string(),
        Measure::Net => "TOTAL_NET".to_string(),
    }
}

struct Codegen<'a> {
    intent: &'a QueryIntent,
    settings: &'a Settings,
    resolver: AliasResolver<'a>,
    pb: PredicateBuilder<'a>,
    table: String,
}

impl<'a> Codegen<'a> {
    fn new(intent: &'a QueryIntent, settings: &'a Settings) -> Self {
        Self {
            intent,
            settings,
            resolver: AliasResolver::new(settings),
            pb: PredicateBuilder::new(settings),
            table: settings.dialect.quote_ident(&settings.table),
        }
    }

    fn same_family(&self, column: &str, family: Option<&str>) -> bool {
        family.map_or(false, |f| self.resolver.canonical_family(column) == f)
    }

    /// AND-ed row filters. Filters on `skip_family` are left to the caller.
    fn base_filters(&mut self, include_window: bool, skip_family: Option<&str>) -> Vec<String> {
        let intent = self.intent;
        let mut filters = Vec::new();

        if include_window {
            if let Some(window) = &intent.window {
                filters.push(self.pb.window(window));
            }
        }
        for eq in &intent.eq_filters {
            if self.same_family(&eq.column, skip_family) {
                continue;
            }
            filters.extend(self.pb.eq(&eq.column, &eq.values));
        }
        for clause in &intent.text_filters {
            if self.same_family(&clause.column, skip_family) {
                continue;
            }
            filters.extend(self.pb.field(clause));
        }
        for numeric in &intent.numeric_filters {
            filters.extend(self.pb.numeric(numeric));
        }
        for check in &intent.empty_checks {
            filters.extend(self.pb.empty(check));
        }
        for anomaly in &intent.checks {
            filters.extend(self.pb.anomaly(*anomaly));
        }
        filters.extend(self.pb.fts(&intent.fts_groups));
        filters.extend(self.pb.bool_groups(&intent.bool_groups));
        filters
    }

    fn target_expr(&self, target: &AggTarget, source: Source) -> Option<String> {
        match (target, source) {
            (AggTarget::Star, _) => Some("*".to_string()),
            (AggTarget::Measure(m), Source::Base) => Some(measure_expr(*m, self.settings)),
            (AggTarget::Measure(m), Source::Slots) => Some(measure_alias(*m)),
            (AggTarget::Column(c), Source::Slots) => Some(c.clone()),
            (AggTarget::Column(c), Source::Base) => {
                if self.settings.is_physical_column(c) {
                    Some(c.clone())
                } else {
                    warn!("Aggregation over unknown column {} dropped", c);
                    None
                }
            }
        }
    }

    fn agg_expr(&self, agg: &Aggregation, source: Source) -> Option<String> {
        let target = self.target_expr(&agg.target, source)?;
        let distinct = if agg.distinct && agg.target != AggTarget::Star {
            "DISTINCT "
        } else {
            ""
        };
        let dialect = self.settings.dialect;
        Some(match agg.func {
            AggFunc::Count => format!("COUNT({}{})", distinct, target),
            AggFunc::Sum => format!("SUM({}{})", distinct, target),
            AggFunc::Avg => format!("AVG({}{})", distinct, target),
            AggFunc::Min => format!("MIN({})", target),
            AggFunc::Max => format!("MAX({})", target),
            AggFunc::Median => dialect.median(&target),
            AggFunc::ListAgg => dialect.list_agg(&target, agg.distinct),
        })
    }

    fn dim_expr(&self, dim: &Dimension, source: Source) -> Option<String> {
        let column = dim.column();
        if source == Source::Base && !self.settings.is_physical_column(column) {
            warn!("Grouping by unknown column {} dropped", column);
            return None;
        }
        Some(match dim {
            Dimension::Column(c) => c.clone(),
            Dimension::Month(c) => self.settings.dialect.trunc_month(c),
            Dimension::Quarter(c) => self.settings.dialect.trunc_quarter(c),
        })
    }

    /// GROUP BY, aggregate items and HAVING on `select`
    fn apply_aggregation(&mut self, select: &mut Select, scope: &mut OrderScope, source: Source) {
        let intent = self.intent;
        for dim in &intent.group_by {
            let Some(expr) = self.dim_expr(dim, source) else {
                continue;
            };
            let alias = dim.alias();
            if expr == alias {
                select.items.push(expr.clone());
            } else {
                select.items.push(format!("{} AS {}", expr, alias));
            }
            select.group_by.push(expr);
            scope.first_dim.get_or_insert_with(|| alias.clone());
            scope.names.push(alias);
        }
        for agg in &intent.aggregations {
            let Some(expr) = self.agg_expr(agg, source) else {
                continue;
            };
            select.items.push(format!("{} AS {}", expr, agg.alias));
            scope.first_agg.get_or_insert_with(|| agg.alias.clone());
            scope.names.push(agg.alias.clone());
            if let AggTarget::Measure(m) = agg.target {
                if matches!(agg.func, AggFunc::Sum) {
                    scope.measure_aliases.push((m, agg.alias.clone()));
                }
            }
        }
        if let Some(having) = &intent.having {
            if let Some(expr) = self.agg_expr(&having.aggregation, source) {
                let ph = self.pb.binds.fresh("having", having.value);
                select.having = Some(format!("{} {} {}", expr, having.op.sql(), ph));
            }
        }
        scope.scalar = select.group_by.is_empty();
    }

    /// Row-level projection over the base table
    fn projection_items(&self, scope: &mut OrderScope) -> Vec<String> {
        let intent = self.intent;
        let mut items: Vec<String> = match &intent.projection {
            Projection::All => Vec::new(),
            Projection::Detail => self
                .settings
                .detail_columns
                .iter()
                .filter(|c| self.settings.is_physical_column(c))
                .cloned()
                .collect(),
            Projection::Columns(cols) => cols
                .iter()
                .flat_map(|c| self.pb.physical(c))
                .unique()
                .collect(),
        };
        scope.names.extend(items.iter().cloned());
        let select_all = items.is_empty();
        if let Some(measure) = intent.measure {
            if select_all {
                items.push(format!("{}.*", self.table));
            }
            let alias = measure_alias(measure);
            items.push(format!("{} AS {}", measure_expr(measure, self.settings), alias));
            scope.measure_aliases.push((measure, alias.clone()));
            scope.names.push(alias);
        } else if select_all {
            items.push("*".to_string());
        }
        items
    }

    fn standard(&mut self) -> (Statement, OrderScope) {
        let mut scope = OrderScope::default();
        let filters = self.base_filters(true, None);
        let mut select = Select {
            from: self.table.clone(),
            filters,
            ..Default::default()
        };
        if self.intent.is_aggregate() {
            self.apply_aggregation(&mut select, &mut scope, Source::Base);
        } else {
            select.items = self.projection_items(&mut scope);
            select.distinct = self.intent.distinct;
            scope.base_rows = !select.distinct;
        }
        (Statement::new(Body::Select(select)), scope)
    }

    /// Measures referenced anywhere in the intent
    fn measures_used(&self) -> Vec<Measure> {
        let intent = self.intent;
        let mut used: Vec<Measure> = intent
            .aggregations
            .iter()
            .chain(intent.having.iter().map(|h| &h.aggregation))
            .filter_map(|a| match a.target {
                AggTarget::Measure(m) => Some(m),
                _ => None,
            })
            .collect();
        used.extend(intent.measure);
        if let Some(OrderKey::Measure(m)) = intent.order_by.as_ref().map(|o| &o.key) {
            used.push(*m);
        }
        used.into_iter().unique().collect()
    }

    /// One UNION ALL branch per slot column, then the outer query over the
    /// flattened `<FAMILY>_SLOTS` CTE
    fn fan_out(&mut self, family: &str) -> (Statement, OrderScope) {
        let intent = self.intent;
        let slots = self.pb.physical(family);

        let mut carried: Vec<String> = Vec::new();
        for dim in &intent.group_by {
            if !self.same_family(dim.column(), Some(family)) {
                carried.push(dim.column().to_string());
            }
        }
        for agg in intent
            .aggregations
            .iter()
            .chain(intent.having.iter().map(|h| &h.aggregation))
        {
            if let AggTarget::Column(c) = &agg.target {
                if !self.same_family(c, Some(family)) {
                    carried.push(c.clone());
                }
            }
        }
        if let Projection::Columns(cols) = &intent.projection {
            carried.extend(
                cols.iter()
                    .filter(|c| !self.same_family(c, Some(family)))
                    .cloned(),
            );
        }
        let carried: Vec<String> = carried
            .into_iter()
            .filter(|c| self.settings.is_physical_column(c))
            .unique()
            .collect();
        let measures = self.measures_used();

        let branch_filters = self.base_filters(true, Some(family));
        let branches: Vec<Select> = slots
            .iter()
            .map(|slot| {
                let mut items = vec![format!("{} AS {}", slot, family)];
                items.extend(carried.iter().cloned());
                for m in &measures {
                    items.push(format!("{} AS {}", measure_expr(*m, self.settings), measure_alias(*m)));
                }
                Select {
                    items,
                    from: self.table.clone(),
                    filters: branch_filters.clone(),
                    ..Default::default()
                }
            })
            .collect();
        let cte_name = format!("{}_SLOTS", family);
        debug!("Fan-out over {} slot columns of {}", branches.len(), family);

        let family_col = vec![family.to_string()];
        let mut outer_filters = vec![
            format!("{} IS NOT NULL", family),
            format!("TRIM({}) <> ''", family),
        ];
        for eq in &intent.eq_filters {
            if self.same_family(&eq.column, Some(family)) {
                outer_filters.extend(self.pb.eq_over(&family_col, family, &eq.values));
            }
        }
        for clause in &intent.text_filters {
            if self.same_family(&clause.column, Some(family)) {
                outer_filters.extend(self.pb.field_over(&family_col, clause));
            }
        }

        let mut scope = OrderScope::default();
        let mut outer = Select {
            from: cte_name.clone(),
            filters: outer_filters,
            ..Default::default()
        };
        if intent.is_aggregate() {
            self.apply_aggregation(&mut outer, &mut scope, Source::Slots);
        } else {
            outer.distinct = true;
            outer.items.push(family.to_string());
            outer.items.extend(carried.iter().cloned());
            scope.names.extend(outer.items.iter().cloned());
        }

        let mut stmt = Statement::new(Body::Select(outer));
        stmt.ctes.push(Cte {
            name: cte_name,
            body: Body::UnionAll(branches),
        });
        (stmt, scope)
    }

    /// Disjoint day buckets ahead of the window start: 0-30, 31-60, ...
    fn expiry_buckets(&mut self, horizons: &[u32], anchor: &DateWindow) -> Statement {
        let filters = self.base_filters(false, None);
        let end_col = self.settings.window_columns.end.clone();
        let mut horizons: Vec<u32> = horizons.iter().copied().filter(|h| *h > 0).collect();
        horizons.sort_unstable();
        horizons.dedup();

        let mut branches = Vec::new();
        let mut lower = 0u32;
        for (idx, horizon) in horizons.iter().enumerate() {
            let start = anchor.start + chrono::Duration::days(lower as i64);
            let end = anchor.start + chrono::Duration::days(*horizon as i64);
            let bucket = idx + 1;
            let ds = self.pb.binds.named(&format!("bucket_{}_start", bucket), start);
            let de = self.pb.binds.named(&format!("bucket_{}_end", bucket), end);
            let mut branch_filters = vec![format!("{} BETWEEN {} AND {}", end_col, ds, de)];
            branch_filters.extend(filters.iter().cloned());
            branches.push(Select {
                items: vec![
                    format!("'{}-{}' AS BUCKET", lower, horizon),
                    "COUNT(*) AS CNT".to_string(),
                ],
                from: self.table.clone(),
                filters: branch_filters,
                ..Default::default()
            });
            lower = horizon + 1;
        }
        Statement::new(Body::UnionAll(branches))
    }

    /// Current period against previous period, one labelled row each
    fn period_comparison(&mut self, current: &DateWindow, previous: &DateWindow) -> Statement {
        let filters = self.base_filters(false, None);
        let measure = self.intent.measure.unwrap_or(Measure::Gross);
        let total = format!(
            "SUM({}) AS {}",
            measure_expr(measure, self.settings),
            total_alias(measure)
        );
        let periods = [("CURRENT", "cur", current), ("PREVIOUS", "prev", previous)];
        let branches = periods
            .iter()
            .map(|(label, prefix, window)| {
                let mut branch_filters = vec![self.pb.window_as(window, prefix)];
                branch_filters.extend(filters.iter().cloned());
                Select {
                    items: vec![
                        format!("'{}' AS PERIOD_LABEL", label),
                        total.clone(),
                        "COUNT(*) AS CNT".to_string(),
                    ],
                    from: self.table.clone(),
                    filters: branch_filters,
                    ..Default::default()
                }
            })
            .collect();
        Statement::new(Body::UnionAll(branches))
    }

    /// ROW_NUMBER() per partition over the measure, keeping `per_group`
    fn top_per_group(&mut self, partition: &str, per_group: u32) -> (Statement, OrderScope) {
        let measure = self.intent.measure.unwrap_or(Measure::Gross);
        let expr = measure_expr(measure, self.settings);
        let total = total_alias(measure);
        let filters = self.base_filters(true, None);

        let mut keep = vec![partition.to_string()];
        if self.settings.is_physical_column("CONTRACT_ID") && partition != "CONTRACT_ID" {
            keep.push("CONTRACT_ID".to_string());
        }
        let mut items = keep.clone();
        items.push(format!("{} AS {}", expr, total));
        items.push(format!(
            "ROW_NUMBER() OVER (PARTITION BY {} ORDER BY {} DESC) AS RN",
            partition, expr
        ));
        let ranked = Select {
            items,
            from: self.table.clone(),
            filters,
            ..Default::default()
        };

        let ph = self.pb.binds.named("per_group", per_group);
        let mut outer_items = keep;
        outer_items.push(total.clone());
        let outer = Select {
            items: outer_items.clone(),
            from: "RANKED".to_string(),
            filters: vec![format!("RN <= {}", ph)],
            ..Default::default()
        };
        let mut stmt = Statement::new(Body::Select(outer));
        stmt.ctes.push(Cte {
            name: "RANKED".to_string(),
            body: Body::Select(ranked),
        });
        let scope = OrderScope {
            names: outer_items,
            measure_aliases: vec![(measure, total)],
            ..Default::default()
        };
        (stmt, scope)
    }

    fn order_key(&self, key: &OrderKey, scope: &OrderScope) -> Option<String> {
        match key {
            OrderKey::Column(c) | OrderKey::Alias(c) => {
                if scope.names.iter().any(|n| n == c) {
                    Some(c.clone())
                } else if scope.base_rows && self.settings.is_physical_column(c) {
                    Some(c.clone())
                } else {
                    None
                }
            }
            OrderKey::Measure(m) => scope
                .measure_aliases
                .iter()
                .find(|(measure, _)| measure == m)
                .map(|(_, alias)| alias.clone())
                .or_else(|| scope.base_rows.then(|| measure_expr(*m, self.settings))),
        }
    }

    /// Explicit order, then the shape default, then the first aggregation,
    /// then the window's natural sort, then the date column
    fn resolve_order(&self, scope: &OrderScope, shape_default: Option<Vec<String>>) -> Vec<String> {
        if let Some(order) = &self.intent.order_by {
            if let Some(key) = self.order_key(&order.key, scope) {
                let dir = if order.desc { "DESC" } else { "ASC" };
                return vec![format!("{} {}", key, dir)];
            }
            warn!("Order key {:?} is not available in the output; using default", order.key);
        }
        if let Some(default) = shape_default {
            return default;
        }
        if scope.scalar {
            return Vec::new();
        }
        if let Some(agg) = &scope.first_agg {
            return vec![format!("{} DESC", agg)];
        }
        if let Some(dim) = &scope.first_dim {
            return vec![format!("{} ASC", dim)];
        }
        if !scope.base_rows {
            return scope.names.first().map(|n| vec![format!("{} ASC", n)]).unwrap_or_default();
        }
        let cols = &self.settings.window_columns;
        match self.intent.window.as_ref().map(|w| w.mode) {
            Some(WindowMode::EndOnly) => return vec![format!("{} ASC", cols.end)],
            Some(WindowMode::StartOnly) => return vec![format!("{} ASC", cols.start)],
            _ => {}
        }
        if self.settings.is_physical_column(&self.settings.date_column) {
            vec![format!("{} DESC", self.settings.date_column)]
        } else {
            Vec::new()
        }
    }

    fn apply_paging(&mut self, stmt: &mut Statement) {
        if let Some(offset) = self.intent.offset.filter(|o| *o > 0) {
            stmt.offset = Some(self.pb.binds.named("offset", offset));
        }
        if let Some(limit) = self.intent.limit {
            stmt.limit = Some(self.pb.binds.named("top_n", limit.get()));
        }
    }

    /// Slot family to flatten: explicit, or a family named as a dimension
    fn fan_out_family(&self) -> Option<String> {
        if let Some(family) = &self.intent.fan_out {
            return Some(self.resolver.canonical_family(family));
        }
        self.intent
            .group_by
            .iter()
            .filter_map(|d| match d {
                Dimension::Column(c) if self.resolver.is_family(c) => {
                    Some(self.resolver.canonical_family(c))
                }
                _ => None,
            })
            .next()
    }

    fn build(mut self) -> GeneratedSql {
        let intent = self.intent;
        let (mut stmt, order) = match (&intent.shape, &intent.window) {
            (Shape::ExpiryBuckets { horizons }, Some(anchor)) if !horizons.is_empty() => {
                (self.expiry_buckets(horizons, anchor), Vec::new())
            }
            (Shape::PeriodComparison { current, previous }, _) => {
                (self.period_comparison(current, previous), Vec::new())
            }
            (
                Shape::TopPerGroup {
                    partition,
                    per_group,
                },
                _,
            ) if self.settings.is_physical_column(partition) => {
                let (mut stmt, scope) = self.top_per_group(partition, (*per_group).max(1));
                // RN is not projected by the outer query but stays sortable
                let order = self.resolve_order(
                    &scope,
                    Some(vec![format!("{} ASC", partition), "RN ASC".to_string()]),
                );
                self.apply_paging(&mut stmt);
                (stmt, order)
            }
            _ => {
                if !matches!(intent.shape, Shape::Standard) {
                    warn!("Shape {:?} cannot be built from this intent; using standard", intent.shape);
                }
                let (mut stmt, scope) = match self.fan_out_family() {
                    Some(family) => {
                        let (stmt, mut scope) = self.fan_out(&family);
                        if !intent.is_aggregate() {
                            scope.first_dim = Some(family);
                        }
                        (stmt, scope)
                    }
                    None => self.standard(),
                };
                let order = self.resolve_order(&scope, None);
                self.apply_paging(&mut stmt);
                (stmt, order)
            }
        };
        stmt.order_by = order.clone();

        let sql = render(&stmt, self.settings.dialect);
        let unreferenced = self.pb.binds.unreferenced(&sql);
        debug_assert!(unreferenced.is_empty(), "unreferenced binds {:?}", unreferenced);
        info!(
            "Generated {} SQL with {} binds",
            self.settings.dialect.name(),
            self.pb.binds.len()
        );
        GeneratedSql {
            sql,
            binds: self.pb.binds,
            degradations: self.pb.degradations,
            order_by: order,
        }
    }
}

/// Render an intent as SQL for the configured dialect
pub fn generate(intent: &QueryIntent, settings: &Settings) -> GeneratedSql {
    Codegen::new(intent, settings).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{CmpOp, HavingFilter, OrderBy};
    use crate::sql::BindValue;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_plain_listing_defaults_to_date_desc() {
        let settings = Settings::contracts_default();
        let out = generate(&QueryIntent::default(), &settings);
        assert_eq!(out.sql, "SELECT *\nFROM \"Contract\"\nORDER BY REQUEST_DATE DESC");
        assert!(out.binds.is_empty());
    }

    #[test]
    fn test_end_only_window_sorts_ascending() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            window: Some(DateWindow::new(WindowMode::EndOnly, d(2024, 1, 1), d(2024, 1, 31), "jan")),
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert!(out.sql.contains("WHERE END_DATE BETWEEN :date_start AND :date_end"));
        assert!(out.sql.ends_with("ORDER BY END_DATE ASC"));
        assert_eq!(out.binds.get("date_start"), Some(&BindValue::Date(d(2024, 1, 1))));
    }

    #[test]
    fn test_group_by_with_count_orders_by_count() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            group_by: vec![Dimension::Column("ENTITY".to_string())],
            aggregations: vec![Aggregation::count_star()],
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert_eq!(
            out.sql,
            "SELECT ENTITY,\n  COUNT(*) AS CNT\nFROM \"Contract\"\nGROUP BY ENTITY\nORDER BY CNT DESC"
        );
    }

    #[test]
    fn test_scalar_aggregate_has_no_order() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            aggregations: vec![Aggregation::of_measure(AggFunc::Sum, Measure::Net)],
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert!(!out.sql.contains("ORDER BY"));
        assert!(out.order_by.is_empty());
    }

    #[test]
    fn test_fan_out_top_stakeholders() {
        let settings = Settings::contracts_default();
        let mut intent = QueryIntent {
            group_by: vec![Dimension::Column("STAKEHOLDER".to_string())],
            aggregations: vec![Aggregation::of_measure(AggFunc::Sum, Measure::Gross)],
            window: Some(DateWindow::new(WindowMode::Overlap, d(2024, 1, 1), d(2024, 12, 31), "2024")),
            ..Default::default()
        };
        intent.set_limit(10);
        let out = generate(&intent, &settings);
        assert!(out.sql.starts_with("WITH STAKEHOLDER_SLOTS AS ("));
        assert_eq!(out.sql.matches("UNION ALL").count(), 7);
        assert!(out.sql.contains("CONTRACT_STAKEHOLDER_8 AS STAKEHOLDER"));
        assert!(out.sql.contains("SUM(GROSS_VALUE) AS TOTAL_GROSS"));
        assert!(out.sql.contains("WHERE STAKEHOLDER IS NOT NULL\n  AND TRIM(STAKEHOLDER) <> ''"));
        assert!(out.sql.contains("GROUP BY STAKEHOLDER"));
        assert!(out.sql.ends_with("ORDER BY TOTAL_GROSS DESC\nFETCH FIRST :top_n ROWS ONLY"));
        assert_eq!(out.binds.len(), 3);
        assert_eq!(out.sql.matches("ORDER BY").count(), 1);
    }

    #[test]
    fn test_fan_out_eq_on_family_goes_outside() {
        let settings = Settings::contracts_default();
        let mut intent = QueryIntent {
            group_by: vec![Dimension::Column("STAKEHOLDER".to_string())],
            aggregations: vec![Aggregation::count_star()],
            ..Default::default()
        };
        intent.add_eq("STAKEHOLDER", vec!["Alice".to_string()]);
        let out = generate(&intent, &settings);
        assert!(out.sql.contains("AND UPPER(TRIM(STAKEHOLDER)) IN (:eq_0)"));
        assert!(!out.sql.contains("UPPER(TRIM(CONTRACT_STAKEHOLDER_1))"));
    }

    #[test]
    fn test_having_and_explicit_order() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            group_by: vec![Dimension::Column("CONTRACT_ID".to_string())],
            aggregations: vec![Aggregation::count_star()],
            having: Some(HavingFilter {
                aggregation: Aggregation::count_star(),
                op: CmpOp::Gt,
                value: 1.0,
            }),
            order_by: Some(OrderBy {
                key: OrderKey::Alias("CNT".to_string()),
                desc: true,
            }),
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert!(out.sql.contains("HAVING COUNT(*) > :having_0"));
        assert_eq!(out.binds.get("having_0"), Some(&BindValue::Int(1)));
        assert!(out.sql.ends_with("ORDER BY CNT DESC"));
    }

    #[test]
    fn test_monthly_trend_postgres() {
        let mut settings = Settings::contracts_default();
        settings.dialect = crate::sql::Dialect::Postgres;
        let intent = QueryIntent {
            group_by: vec![Dimension::Month("REQUEST_DATE".to_string())],
            aggregations: vec![Aggregation::count_star()],
            order_by: Some(OrderBy {
                key: OrderKey::Alias("MONTH".to_string()),
                desc: false,
            }),
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert!(out.sql.contains("DATE_TRUNC('month', REQUEST_DATE) AS MONTH"));
        assert!(out.sql.contains("GROUP BY DATE_TRUNC('month', REQUEST_DATE)"));
        assert!(out.sql.ends_with("ORDER BY MONTH ASC"));
    }

    #[test]
    fn test_expiry_buckets_are_disjoint() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            shape: Shape::ExpiryBuckets {
                horizons: vec![30, 60, 90],
            },
            window: Some(DateWindow::new(WindowMode::EndOnly, d(2024, 1, 1), d(2024, 3, 31), "next 90 days")),
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert_eq!(out.sql.matches("UNION ALL").count(), 2);
        assert!(out.sql.contains("'31-60' AS BUCKET"));
        assert_eq!(out.binds.get("bucket_2_start"), Some(&BindValue::Date(d(2024, 2, 1))));
        assert_eq!(out.binds.get("bucket_3_end"), Some(&BindValue::Date(d(2024, 3, 31))));
        assert!(!out.sql.contains(":date_start"));
    }

    #[test]
    fn test_top_per_group() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            shape: Shape::TopPerGroup {
                partition: "ENTITY".to_string(),
                per_group: 3,
            },
            measure: Some(Measure::Gross),
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert!(out.sql.starts_with("WITH RANKED AS ("));
        assert!(out.sql.contains("ROW_NUMBER() OVER (PARTITION BY ENTITY ORDER BY"));
        assert!(out.sql.contains("WHERE RN <= :per_group"));
        assert!(out.sql.ends_with("ORDER BY ENTITY ASC, RN ASC"));
    }

    #[test]
    fn test_measure_projection_row_level() {
        let settings = Settings::contracts_default();
        let intent = QueryIntent {
            measure: Some(Measure::Gross),
            order_by: Some(OrderBy {
                key: OrderKey::Measure(Measure::Gross),
                desc: true,
            }),
            ..Default::default()
        };
        let out = generate(&intent, &settings);
        assert!(out.sql.starts_with("SELECT \"Contract\".*,\n  NVL(CONTRACT_VALUE_NET_OF_VAT, 0) + CASE"));
        assert!(out.sql.ends_with("ORDER BY GROSS_VALUE DESC"));
    }
}
