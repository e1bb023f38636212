//! Query intent: the value every compile step reads and writes.
//!
//! The intent is dialect-free and holds only logical names. Codegen is the
//! single place that turns it into SQL text.

use crate::bool_groups::BoolGroup;
use crate::dates::DateWindow;
use crate::normalize::dedup_ci;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// Contract value net of VAT
    Net,
    /// Net value plus VAT (VAT stored either as a rate or as an amount)
    Gross,
}

impl Measure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::Net => "net",
            Measure::Gross => "gross",
        }
    }
}

/// OR within the value list, AND across filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqFilter {
    /// Logical column (alias family or physical column)
    pub column: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOp {
    Eq,
    NotEq,
    Like,
    NotLike,
}

/// Column comparison with a value list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldClause {
    pub column: String,
    pub op: FieldOp,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    Between,
}

impl CmpOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Between => "BETWEEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericTarget {
    Column(String),
    Net,
    Gross,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFilter {
    pub target: NumericTarget,
    pub op: CmpOp,
    /// One value, or two for BETWEEN
    pub values: Vec<f64>,
}

/// `COL IS NULL OR TRIM(COL) = ''` (or the negation), with optional
/// placeholder spellings such as `N/A` treated as empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyCheck {
    pub column: String,
    pub empty: bool,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

/// Fixed data-quality predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    VatZeroWithValue,
    VatExceedsNet,
    EndBeforeStart,
    DurationMismatch,
    OwnerDeptOulMismatch,
}

impl Anomaly {
    pub fn describe(&self) -> &'static str {
        match self {
            Anomaly::VatZeroWithValue => "VAT is zero or missing while the contract has a value",
            Anomaly::VatExceedsNet => "VAT amount is larger than the net contract value",
            Anomaly::EndBeforeStart => "end date is earlier than start date",
            Anomaly::DurationMismatch => "stated duration disagrees with the start/end dates",
            Anomaly::OwnerDeptOulMismatch => "owner department differs from the department OUL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Column(String),
    /// Month bucket of a date column
    Month(String),
    /// Quarter bucket of a date column
    Quarter(String),
}

impl Dimension {
    /// Output column name of the dimension
    pub fn alias(&self) -> String {
        match self {
            Dimension::Column(c) => c.clone(),
            Dimension::Month(_) => "MONTH".to_string(),
            Dimension::Quarter(_) => "QUARTER".to_string(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Dimension::Column(c) | Dimension::Month(c) | Dimension::Quarter(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Median,
    ListAgg,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Median => "median",
            AggFunc::ListAgg => "listagg",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "count" => Some(AggFunc::Count),
            "sum" | "total" => Some(AggFunc::Sum),
            "avg" | "average" | "mean" => Some(AggFunc::Avg),
            "min" | "minimum" => Some(AggFunc::Min),
            "max" | "maximum" => Some(AggFunc::Max),
            "median" => Some(AggFunc::Median),
            "listagg" | "list" => Some(AggFunc::ListAgg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggTarget {
    Star,
    Column(String),
    Measure(Measure),
}

impl AggTarget {
    pub fn key(&self) -> String {
        match self {
            AggTarget::Star => "*".to_string(),
            AggTarget::Column(c) => c.clone(),
            AggTarget::Measure(m) => format!("{}_value", m.as_str()).to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregation {
    pub func: AggFunc,
    pub target: AggTarget,
    #[serde(default)]
    pub distinct: bool,
    pub alias: String,
}

impl Aggregation {
    pub fn count_star() -> Self {
        Self {
            func: AggFunc::Count,
            target: AggTarget::Star,
            distinct: false,
            alias: "CNT".to_string(),
        }
    }

    pub fn of_measure(func: AggFunc, measure: Measure) -> Self {
        let alias = match (func, measure) {
            (AggFunc::Sum, Measure::Gross) => "TOTAL_GROSS".to_string(),
            (AggFunc::Sum, Measure::Net) => "TOTAL_NET".to_string(),
            (f, m) => format!("{}_{}", f.as_str(), m.as_str()).to_uppercase(),
        };
        Self {
            func,
            target: AggTarget::Measure(measure),
            distinct: false,
            alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HavingFilter {
    pub aggregation: Aggregation,
    pub op: CmpOp,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    Column(String),
    /// Output alias (aggregation or dimension)
    Alias(String),
    Measure(Measure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub key: OrderKey,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    All,
    /// Configured detail columns plus the measure
    Detail,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    #[default]
    Standard,
    /// Counts of contracts ending within each horizon (days)
    ExpiryBuckets { horizons: Vec<u32> },
    /// Measure totals for the current and previous period
    PeriodComparison {
        current: DateWindow,
        previous: DateWindow,
    },
    /// ROW_NUMBER() per partition, keeping `per_group` rows each
    TopPerGroup { partition: String, per_group: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub eq_filters: Vec<EqFilter>,
    /// Not-equal and LIKE/NOT LIKE clauses
    pub text_filters: Vec<FieldClause>,
    pub numeric_filters: Vec<NumericFilter>,
    pub empty_checks: Vec<EmptyCheck>,
    pub checks: Vec<Anomaly>,
    /// AND-token lists, OR'd across groups
    pub fts_groups: Vec<Vec<String>>,
    /// Boolean clusters when the question has more than one OR'd group
    pub bool_groups: Vec<BoolGroup>,
    pub projection: Projection,
    pub group_by: Vec<Dimension>,
    pub aggregations: Vec<Aggregation>,
    pub having: Option<HavingFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<NonZeroU32>,
    pub offset: Option<u32>,
    pub window: Option<DateWindow>,
    pub measure: Option<Measure>,
    /// Slot family flattened through a UNION ALL
    pub fan_out: Option<String>,
    pub shape: Shape,
    /// `SELECT DISTINCT` over the projection
    #[serde(default)]
    pub distinct: bool,
}

impl QueryIntent {
    pub fn eq_values(&self, column: &str) -> Option<&[String]> {
        self.eq_filters
            .iter()
            .find(|f| f.column == column)
            .map(|f| f.values.as_slice())
    }

    /// Union values into the filter for `column`, keeping first spellings
    pub fn add_eq(&mut self, column: &str, values: impl IntoIterator<Item = String>) {
        let values: Vec<String> = values.into_iter().collect();
        match self.eq_filters.iter_mut().find(|f| f.column == column) {
            Some(existing) => {
                let merged = dedup_ci(existing.values.iter().chain(values.iter()));
                existing.values = merged;
            }
            None => {
                let values = dedup_ci(values);
                if !values.is_empty() {
                    self.eq_filters.push(EqFilter {
                        column: column.to_string(),
                        values,
                    });
                }
            }
        }
    }

    pub fn set_order(&mut self, key: OrderKey, desc: bool) {
        self.order_by = Some(OrderBy { key, desc });
    }

    pub fn set_limit(&mut self, n: u32) {
        self.limit = NonZeroU32::new(n);
    }

    pub fn is_aggregate(&self) -> bool {
        !self.aggregations.is_empty() || !self.group_by.is_empty()
    }

    pub fn has_fts(&self) -> bool {
        self.fts_groups.iter().any(|g| !g.is_empty())
            || self.bool_groups.iter().any(|g| !g.fts_tokens.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_eq_unions_case_insensitively() {
        let mut intent = QueryIntent::default();
        intent.add_eq("ENTITY", vec!["Riyadh".to_string()]);
        intent.add_eq("ENTITY", vec!["riyadh".to_string(), "Jeddah".to_string()]);
        assert_eq!(
            intent.eq_values("ENTITY").unwrap(),
            &["Riyadh".to_string(), "Jeddah".to_string()]
        );
        intent.add_eq("DEPARTMENT", Vec::new());
        assert!(intent.eq_values("DEPARTMENT").is_none());
    }

    #[test]
    fn test_limit_zero_is_absent() {
        let mut intent = QueryIntent::default();
        intent.set_limit(0);
        assert!(intent.limit.is_none());
        intent.set_limit(10);
        assert_eq!(intent.limit.map(NonZeroU32::get), Some(10));
    }

    #[test]
    fn test_measure_aggregation_aliases() {
        assert_eq!(Aggregation::of_measure(AggFunc::Sum, Measure::Gross).alias, "TOTAL_GROSS");
        assert_eq!(Aggregation::of_measure(AggFunc::Avg, Measure::Net).alias, "AVG_NET");
        assert_eq!(AggTarget::Measure(Measure::Gross).key(), "GROSS_VALUE");
    }

    #[test]
    fn test_agg_func_parse() {
        assert_eq!(AggFunc::parse("Average"), Some(AggFunc::Avg));
        assert_eq!(AggFunc::parse("total"), Some(AggFunc::Sum));
        assert_eq!(AggFunc::parse("mode"), None);
    }
}
