//! Ordered question patterns. The first pattern whose predicate holds
//! builds the intent; more specific shapes come first.

use super::{Question, STATUS_COLUMN};
use crate::dates::{DateWindow, WindowMode};
use crate::intent::{
    AggFunc, AggTarget, Aggregation, Anomaly, CmpOp, Dimension, EmptyCheck, HavingFilter,
    Measure, NumericTarget, OrderKey, Projection, QueryIntent, Shape,
};
use chrono::{Datelike, Duration, Months, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

pub struct Pattern {
    pub name: &'static str,
    pub matches: fn(&Question<'_>) -> bool,
    pub build: fn(&Question<'_>, &mut Vec<String>) -> QueryIntent,
}

lazy_static! {
    static ref BUCKETS: Regex = Regex::new(
        r"(?i)\b(\d{1,3})\s*(?:/|,)\s*(\d{1,3})(?:\s*(?:/|,|and)\s*(\d{1,3}))?\s*days?\b"
    )
    .unwrap();
    static ref MORE_THAN: Regex = Regex::new(
        r"(?i)\b(?:more\s+than|over|at\s+least|>\s*)\s*(\d+)\s+contracts?\b"
    )
    .unwrap();
    static ref PER_GROUP: Regex = Regex::new(
        r"(?i)\b(?:for\s+each|in\s+each|within\s+each|per)\s+([a-z_]+(?:\s+[a-z_]+){0,2})"
    )
    .unwrap();
    static ref DISTINCT_OF: Regex = Regex::new(
        r"(?i)\b(?:distinct|unique|different)\s+([a-z_]+(?:\s+[a-z_]+){0,2})"
    )
    .unwrap();
    static ref MISSING_BEFORE: Regex = Regex::new(
        r"(?i)\b(?:missing|without|no|null|blank|empty)\s+(?:an?\s+|the\s+)?([a-z_]+(?:\s+[a-z_]+){0,2})"
    )
    .unwrap();
    static ref MISSING_AFTER: Regex = Regex::new(
        r"(?i)\b([a-z_]+(?:\s+[a-z_]+)?)\s+(?:is\s+|are\s+)?(?:missing|null|blank|empty)\b"
    )
    .unwrap();
    static ref WHICH: Regex =
        Regex::new(r"(?i)\bwhich\s+([a-z_]+(?:\s+[a-z_]+)?)").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b((?:19|20)\d{2})\b").unwrap();
}

const MISSING_WORDS: &[&str] = &["missing", "without", "null", "blank", "empty", " no "];
const CONTACT_PLACEHOLDERS: &[&str] = &["NA", "N/A"];

pub static PATTERNS: &[Pattern] = &[
    Pattern { name: "expiry_buckets", matches: expiry_buckets_matches, build: expiry_buckets },
    Pattern { name: "expiring_count", matches: expiring_count_matches, build: expiring_count },
    Pattern { name: "year_over_year", matches: year_over_year_matches, build: year_over_year },
    Pattern { name: "top_per_group", matches: top_per_group_matches, build: top_per_group },
    Pattern { name: "status_with_threshold", matches: status_threshold_matches, build: status_threshold },
    Pattern { name: "stakeholders_above_count", matches: stakeholders_above_count_matches, build: stakeholders_above_count },
    Pattern { name: "stakeholder_departments", matches: stakeholder_departments_matches, build: stakeholder_departments },
    Pattern { name: "owner_stakeholder_pairs", matches: owner_stakeholder_pairs_matches, build: owner_stakeholder_pairs },
    Pattern { name: "stakeholder_value", matches: stakeholder_value_matches, build: stakeholder_value },
    Pattern { name: "ytd_top", matches: ytd_top_matches, build: ytd_top },
    Pattern { name: "highest_average", matches: highest_average_matches, build: highest_average },
    Pattern { name: "median_by_dimension", matches: median_matches, build: median_by_dimension },
    Pattern { name: "average_by_request_type", matches: avg_request_type_matches, build: avg_by_request_type },
    Pattern { name: "status_totals_for_entity_no", matches: entity_no_status_matches, build: entity_no_status_totals },
    Pattern { name: "requester_quarterly", matches: requester_quarterly_matches, build: requester_quarterly },
    Pattern { name: "monthly_trend", matches: monthly_trend_matches, build: monthly_trend },
    Pattern { name: "duplicate_ids", matches: duplicate_ids_matches, build: duplicate_ids },
    Pattern { name: "missing_contact", matches: missing_contact_matches, build: missing_contact },
    Pattern { name: "end_before_start", matches: end_before_start_matches, build: end_before_start },
    Pattern { name: "duration_mismatch", matches: duration_mismatch_matches, build: duration_mismatch },
    Pattern { name: "owner_department_vs_oul", matches: owner_vs_oul_matches, build: owner_vs_oul },
    Pattern { name: "vat_zero", matches: vat_zero_matches, build: vat_zero },
    Pattern { name: "vat_above_net", matches: vat_above_net_matches, build: vat_above_net },
    Pattern { name: "missing_column", matches: missing_column_matches, build: missing_column },
    Pattern { name: "top_contracts_by_value", matches: top_contracts_matches, build: top_contracts },
    Pattern { name: "distinct_with_counts", matches: distinct_matches, build: distinct_with_counts },
    Pattern { name: "grouped_measure", matches: grouped_measure_matches, build: grouped_measure },
    Pattern { name: "count_in_window", matches: count_matches, build: count_in_window },
    Pattern { name: "request_type_filter", matches: request_type_matches, build: request_type_filter },
    Pattern { name: "status_filter", matches: status_matches, build: status_filter },
];

fn named(func: AggFunc, target: AggTarget, alias: &str) -> Aggregation {
    Aggregation {
        func,
        target,
        distinct: false,
        alias: alias.to_string(),
    }
}

fn contract_count() -> Aggregation {
    named(AggFunc::Count, AggTarget::Star, "CONTRACT_COUNT")
}

fn measure_name(measure: Measure) -> &'static str {
    match measure {
        Measure::Gross => "gross value",
        Measure::Net => "net value",
    }
}

// ---- expiry ----

fn expiry_buckets_matches(q: &Question<'_>) -> bool {
    q.has("expir") && BUCKETS.is_match(&q.norm)
}

fn expiry_buckets(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let mut horizons: Vec<u32> = BUCKETS
        .captures(&q.norm)
        .map(|c| {
            (1..=3)
                .filter_map(|i| c.get(i))
                .filter_map(|m| m.as_str().parse().ok())
                .filter(|h| *h > 0)
                .collect()
        })
        .unwrap_or_default();
    horizons.sort_unstable();
    horizons.dedup();
    let longest = horizons.last().copied().unwrap_or(90);

    let mut intent = q.base();
    intent.limit = None;
    intent.window = Some(DateWindow::new(
        WindowMode::EndOnly,
        q.today,
        q.today + Duration::days(i64::from(longest)),
        format!("next {} days", longest),
    ));
    explain.push(format!(
        "Counting contracts by END_DATE in disjoint buckets of {} days from today.",
        horizons
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("/")
    ));
    intent.shape = Shape::ExpiryBuckets { horizons };
    intent
}

fn expiring_count_matches(q: &Question<'_>) -> bool {
    q.has("expir") && q.wants_count()
}

fn expiring_count(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let mut intent = q.base();
    let window = q.window.clone().unwrap_or_else(|| {
        DateWindow::new(
            WindowMode::EndOnly,
            q.today,
            q.today + Duration::days(30),
            "next 30 days",
        )
    });
    intent.window = Some(window.with_mode(WindowMode::EndOnly));
    intent.aggregations = vec![Aggregation::count_star()];
    intent.limit = None;
    explain.push("Reading 'expiring' as END_DATE inside the window; counting contracts.".to_string());
    intent
}

// ---- period comparison ----

fn year_over_year_matches(q: &Question<'_>) -> bool {
    q.has_any(&["year-over-year", "year over year"]) || q.has_word("yoy")
}

fn year_over_year(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let current = q.window.clone().unwrap_or_else(|| {
        DateWindow::new(
            WindowMode::Overlap,
            NaiveDate::from_ymd_opt(q.today.year(), 1, 1).unwrap_or(q.today),
            q.today,
            "year to date",
        )
    });
    let shift = |d: NaiveDate| d.checked_sub_months(Months::new(12)).unwrap_or(d);
    let previous = DateWindow::new(
        current.mode,
        shift(current.start),
        shift(current.end),
        format!("{} (previous year)", current.label),
    );
    let measure = q.measure_or(Measure::Gross);

    let mut intent = q.base();
    intent.window = None;
    intent.limit = None;
    intent.measure = Some(measure);
    intent.shape = Shape::PeriodComparison { current, previous };
    explain.push(format!(
        "Comparing total {} and contract count with the same period a year earlier.",
        measure_name(measure)
    ));
    intent
}

// ---- ranking ----

fn partition_column(q: &Question<'_>) -> Option<String> {
    let column = PER_GROUP
        .captures_iter(&q.norm)
        .filter_map(|c| c.get(1))
        .find_map(|m| q.column_from_words(m.as_str()))?;
    q.settings.is_physical_column(&column).then_some(column)
}

fn top_per_group_matches(q: &Question<'_>) -> bool {
    q.top_n.is_some() && partition_column(q).is_some()
}

fn top_per_group(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let partition = partition_column(q).unwrap_or_else(|| q.settings.date_column.clone());
    let per_group = q.top_n.unwrap_or(1);
    let measure = q.measure_or(Measure::Gross);

    let mut intent = q.base();
    intent.limit = None;
    intent.measure = Some(measure);
    explain.push(format!(
        "Keeping the top {} contracts by {} within each {}.",
        per_group,
        measure_name(measure),
        partition
    ));
    intent.shape = Shape::TopPerGroup {
        partition,
        per_group,
    };
    intent
}

fn value_threshold(q: &Question<'_>) -> Option<Measure> {
    q.extraction.comparisons.iter().find_map(|c| match c.target {
        NumericTarget::Gross => Some(Measure::Gross),
        NumericTarget::Net => Some(Measure::Net),
        NumericTarget::Column(_) => None,
    })
}

fn status_threshold_matches(q: &Question<'_>) -> bool {
    q.base().eq_values(STATUS_COLUMN).is_some() && value_threshold(q).is_some()
}

fn status_threshold(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = value_threshold(q).unwrap_or(Measure::Net);
    let mut intent = q.base();
    intent.measure = Some(measure);
    intent.projection = Projection::Detail;
    intent.set_order(OrderKey::Measure(measure), true);
    explain.push(format!(
        "Status filter combined with a {} threshold; largest first.",
        measure_name(measure)
    ));
    intent
}

// ---- stakeholder slots ----

fn stakeholders_above_count_matches(q: &Question<'_>) -> bool {
    q.has("stakeholder") && MORE_THAN.is_match(&q.norm)
}

fn stakeholders_above_count(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let threshold: f64 = MORE_THAN
        .captures(&q.norm)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1.0);
    let mut intent = q.base();
    intent.fan_out = Some("STAKEHOLDER".to_string());
    intent.group_by = vec![Dimension::Column("STAKEHOLDER".to_string())];
    intent.aggregations = vec![contract_count()];
    intent.having = Some(HavingFilter {
        aggregation: contract_count(),
        op: CmpOp::Gt,
        value: threshold,
    });
    explain.push(format!(
        "Flattening the stakeholder slots and keeping stakeholders on more than {} contracts.",
        threshold
    ));
    intent
}

fn stakeholder_departments_matches(q: &Question<'_>) -> bool {
    q.has("stakeholder") && q.has("department") && q.field("DEPARTMENT").is_none()
}

fn stakeholder_departments(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let mut intent = q.base();
    intent.fan_out = Some("STAKEHOLDER".to_string());
    intent.group_by = vec![Dimension::Column("STAKEHOLDER".to_string())];
    intent.aggregations = vec![
        contract_count(),
        Aggregation::of_measure(AggFunc::Sum, Measure::Gross),
        Aggregation {
            func: AggFunc::ListAgg,
            target: AggTarget::Column("OWNER_DEPARTMENT".to_string()),
            distinct: true,
            alias: "DEPARTMENTS".to_string(),
        },
    ];
    intent.set_order(OrderKey::Alias("TOTAL_GROSS".to_string()), true);
    explain.push(
        "Per stakeholder: contract count, total gross value and the owner departments involved."
            .to_string(),
    );
    intent
}

fn owner_stakeholder_pairs_matches(q: &Question<'_>) -> bool {
    q.has("pair") && q.has("owner") && q.has("stakeholder")
}

fn owner_stakeholder_pairs(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let mut intent = q.base();
    intent.fan_out = Some("STAKEHOLDER".to_string());
    intent.group_by = vec![
        Dimension::Column("CONTRACT_OWNER".to_string()),
        Dimension::Column("STAKEHOLDER".to_string()),
    ];
    intent.aggregations = vec![
        Aggregation::of_measure(AggFunc::Sum, measure),
        contract_count(),
    ];
    if intent.limit.is_none() {
        intent.set_limit(10);
    }
    explain.push(format!(
        "Owner and stakeholder pairs ranked by total {}.",
        measure_name(measure)
    ));
    intent
}

fn stakeholder_value_matches(q: &Question<'_>) -> bool {
    q.has("stakeholder")
        && q.field("STAKEHOLDER").is_none()
        && (q.top_n.is_some()
            || q.has_any(&[
                "by gross",
                "by net",
                "by value",
                "by contract value",
                "total value",
                "gross value",
                "net value",
            ]))
}

fn stakeholder_value(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let mut intent = q.base();
    intent.fan_out = Some("STAKEHOLDER".to_string());
    intent.group_by = vec![Dimension::Column("STAKEHOLDER".to_string())];
    intent.aggregations = vec![Aggregation::of_measure(AggFunc::Sum, measure)];
    explain.push(format!(
        "Flattening the stakeholder slots with UNION ALL and summing {} per stakeholder.",
        measure_name(measure)
    ));
    intent
}

fn ytd_top_matches(q: &Question<'_>) -> bool {
    (q.has_word("ytd") || q.has("year to date")) && q.top_n.is_some()
}

fn ytd_top(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let year = YEAR
        .captures(&q.norm)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .unwrap_or_else(|| q.today.year());
    let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(q.today);
    let end = NaiveDate::from_ymd_opt(year, 12, 31)
        .unwrap_or(q.today)
        .min(q.today);

    let mut intent = q.base();
    intent.window = Some(DateWindow::new(
        WindowMode::Request,
        start,
        end.max(start),
        format!("{} year to date", year),
    ));
    intent.measure = Some(measure);
    intent.projection = Projection::Columns(vec![
        "CONTRACT_ID".to_string(),
        "CONTRACT_OWNER".to_string(),
    ]);
    intent.set_order(OrderKey::Measure(measure), true);
    explain.push(format!(
        "Contracts requested in {} so far, ranked by {}.",
        year,
        measure_name(measure)
    ));
    intent
}

// ---- grouped statistics ----

fn group_dimension(q: &Question<'_>, default: &str) -> String {
    match q.dimension() {
        Some(d) if d == "DEPARTMENT" => "OWNER_DEPARTMENT".to_string(),
        Some(d) => d,
        None => default.to_string(),
    }
}

fn highest_average_matches(q: &Question<'_>) -> bool {
    q.has_any(&[
        "highest average",
        "highest avg",
        "top average",
        "largest average",
        "highest mean",
    ])
}

fn highest_average(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let asked = WHICH
        .captures(&q.norm)
        .and_then(|c| c.get(1))
        .and_then(|m| q.column_from_words(m.as_str()));
    let column = match asked {
        Some(c) if c != "DEPARTMENT" => c,
        _ => group_dimension(q, "OWNER_DEPARTMENT"),
    };
    let avg = Aggregation::of_measure(AggFunc::Avg, measure);
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Column(column.clone())];
    intent.set_order(OrderKey::Alias(avg.alias.clone()), true);
    intent.aggregations = vec![avg];
    intent.set_limit(1);
    explain.push(format!(
        "{} with the highest average {}.",
        column,
        measure_name(measure)
    ));
    intent
}

fn median_matches(q: &Question<'_>) -> bool {
    q.has_word("median")
}

fn median_by_dimension(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let column = group_dimension(q, "OWNER_DEPARTMENT");
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Column(column.clone())];
    intent.aggregations = vec![
        Aggregation::of_measure(AggFunc::Median, measure),
        contract_count(),
    ];
    explain.push(format!("Median {} per {}.", measure_name(measure), column));
    intent
}

fn avg_request_type_matches(q: &Question<'_>) -> bool {
    q.wants_average() && q.has_any(&["request type", "request_type"])
}

fn avg_by_request_type(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Column("REQUEST_TYPE".to_string())];
    intent.aggregations = vec![
        Aggregation::of_measure(AggFunc::Avg, measure),
        contract_count(),
    ];
    explain.push(format!("Average {} per request type.", measure_name(measure)));
    intent
}

fn entity_no_status_matches(q: &Question<'_>) -> bool {
    !q.eq_values("ENTITY_NO").is_empty() && q.has("status")
}

fn entity_no_status_totals(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Column(STATUS_COLUMN.to_string())];
    intent.aggregations = vec![
        Aggregation::of_measure(AggFunc::Sum, measure),
        contract_count(),
    ];
    explain.push(format!(
        "Totals of {} per contract status for the given entity number.",
        measure_name(measure)
    ));
    intent
}

fn requester_quarterly_matches(q: &Question<'_>) -> bool {
    q.has("quarter") && !q.eq_values("REQUESTER").is_empty()
}

fn requester_quarterly(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Gross);
    let date_column = q.settings.date_column.clone();
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Quarter(date_column.clone())];
    intent.aggregations = vec![
        Aggregation::of_measure(AggFunc::Sum, measure),
        contract_count(),
    ];
    intent.set_order(OrderKey::Alias("QUARTER".to_string()), false);
    explain.push(format!(
        "Quarterly totals of {} by {} for the requester.",
        measure_name(measure),
        date_column
    ));
    intent
}

fn monthly_trend_matches(q: &Question<'_>) -> bool {
    q.has_any(&[
        "monthly",
        "per month",
        "by month",
        "each month",
        "month over month",
        "trend",
    ])
}

fn monthly_trend(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let date_column = q.settings.date_column.clone();
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Month(date_column.clone())];
    let mut aggregations = vec![Aggregation::count_star()];
    if let Some(measure) = q.measure_hint() {
        aggregations.push(Aggregation::of_measure(AggFunc::Sum, measure));
    }
    intent.aggregations = aggregations;
    if date_column == q.settings.window_columns.request {
        intent.window = intent.window.map(|w| w.with_mode(WindowMode::Request));
    }
    intent.set_order(OrderKey::Alias("MONTH".to_string()), false);
    explain.push(format!("Monthly buckets of {}.", date_column));
    intent
}

// ---- data quality ----

fn duplicate_ids_matches(q: &Question<'_>) -> bool {
    q.has("duplicate") && q.has_any(&["contract id", "contract_id", "ids", " id"])
}

fn duplicate_ids(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let dup = named(AggFunc::Count, AggTarget::Star, "DUP_COUNT");
    let mut intent = q.base();
    intent.empty_checks.push(EmptyCheck {
        column: "CONTRACT_ID".to_string(),
        empty: false,
        placeholders: Vec::new(),
    });
    intent.group_by = vec![Dimension::Column("CONTRACT_ID".to_string())];
    intent.aggregations = vec![dup.clone()];
    intent.having = Some(HavingFilter {
        aggregation: dup,
        op: CmpOp::Gt,
        value: 1.0,
    });
    explain.push("CONTRACT_ID values that occur on more than one row.".to_string());
    intent
}

fn contact_column(q: &Question<'_>) -> Option<String> {
    if q.has("email") {
        Some(q.settings.contact.email.clone())
    } else if q.has("phone") {
        Some(q.settings.contact.phone.clone())
    } else {
        None
    }
}

fn missing_contact_matches(q: &Question<'_>) -> bool {
    q.has_any(MISSING_WORDS) && contact_column(q).is_some()
}

fn missing_contact(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let column = contact_column(q).unwrap_or_else(|| q.settings.contact.email.clone());
    let mut intent = q.base();
    intent.eq_filters.retain(|f| f.column != column);
    intent.empty_checks.push(EmptyCheck {
        column: column.clone(),
        empty: true,
        placeholders: CONTACT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect(),
    });
    explain.push(format!(
        "{} is empty, missing or a placeholder ({}).",
        column,
        CONTACT_PLACEHOLDERS.join(", ")
    ));
    intent
}

fn missing_target(q: &Question<'_>) -> Option<String> {
    MISSING_BEFORE
        .captures_iter(&q.norm)
        .chain(MISSING_AFTER.captures_iter(&q.norm))
        .filter_map(|c| c.get(1))
        .find_map(|m| q.column_from_words(m.as_str()))
}

fn missing_column_matches(q: &Question<'_>) -> bool {
    q.has_any(MISSING_WORDS) && missing_target(q).is_some()
}

fn missing_column(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let column = missing_target(q).unwrap_or_else(|| q.settings.date_column.clone());
    let mut intent = q.base();
    intent.empty_checks.push(EmptyCheck {
        column: column.clone(),
        empty: true,
        placeholders: Vec::new(),
    });
    explain.push(format!("{} is NULL or blank.", column));
    intent
}

/// Wording like "VAT is zero" or "end date is before" reads as a filter on
/// the checked column; those clauses are dropped in favour of the check.
fn anomaly(q: &Question<'_>, explain: &mut Vec<String>, check: Anomaly) -> QueryIntent {
    let s = q.settings;
    let checked = [
        s.window_columns.start.as_str(),
        s.window_columns.end.as_str(),
        s.measure.vat.as_str(),
        s.measure.net.as_str(),
        "DURATION",
    ];
    let mut intent = q.base();
    intent.eq_filters.retain(|f| !checked.contains(&f.column.as_str()));
    intent.text_filters.retain(|f| !checked.contains(&f.column.as_str()));
    intent.numeric_filters.retain(|f| match &f.target {
        NumericTarget::Column(c) => !checked.contains(&c.as_str()),
        _ => check != Anomaly::VatZeroWithValue && check != Anomaly::VatExceedsNet,
    });
    intent.checks.push(check);
    explain.push(format!("Data-quality check: {}.", check.describe()));
    intent
}

fn end_before_start_matches(q: &Question<'_>) -> bool {
    q.has_any(&[
        "end_date < start_date",
        "end date before start",
        "end date is before",
        "end before start",
        "ends before",
        "ended before it started",
    ])
}

fn end_before_start(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    anomaly(q, explain, Anomaly::EndBeforeStart)
}

fn duration_mismatch_matches(q: &Question<'_>) -> bool {
    q.has("duration")
        && q.has_any(&[
            "mismatch",
            "not match",
            "doesn't match",
            "does not match",
            "inconsistent",
            "differ",
            "!=",
        ])
}

fn duration_mismatch(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    anomaly(q, explain, Anomaly::DurationMismatch)
}

fn owner_vs_oul_matches(q: &Question<'_>) -> bool {
    q.has_word("oul")
        && q.has_any(&[" vs", "versus", "mismatch", "differ", "different", "not match", "<>", "!="])
}

fn owner_vs_oul(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let mut intent = anomaly(q, explain, Anomaly::OwnerDeptOulMismatch);
    intent.projection = Projection::Columns(vec![
        "CONTRACT_ID".to_string(),
        "OWNER_DEPARTMENT".to_string(),
        "DEPARTMENT_OUL".to_string(),
    ]);
    intent
}

fn vat_zero_matches(q: &Question<'_>) -> bool {
    q.has_word("vat") && q.has_any(&["null", "zero", "missing", "= 0", "is 0", "empty", "no vat"])
}

fn vat_zero(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    anomaly(q, explain, Anomaly::VatZeroWithValue)
}

fn vat_above_net_matches(q: &Question<'_>) -> bool {
    q.has_word("vat")
        && q.has_any(&[
            "greater than net",
            "greater than the net",
            "more than net",
            "more than the net",
            "exceeds net",
            "exceeds the net",
            "exceed net",
            "above net",
            "higher than net",
            "larger than net",
            "> net",
        ])
}

fn vat_above_net(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    anomaly(q, explain, Anomaly::VatExceedsNet)
}

// ---- listings ----

fn top_contracts_matches(q: &Question<'_>) -> bool {
    q.top_n.is_some() && (q.has("contract") || q.has_any(&["value", "gross", "net"]))
}

fn top_contracts(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let measure = q.measure_or(Measure::Net);
    let mut intent = q.base();
    intent.measure = Some(measure);
    intent.projection = Projection::Detail;
    intent.set_order(OrderKey::Measure(measure), true);
    explain.push(format!("Contracts ranked by {}, largest first.", measure_name(measure)));
    intent
}

fn distinct_column(q: &Question<'_>) -> Option<String> {
    DISTINCT_OF
        .captures_iter(&q.norm)
        .filter_map(|c| c.get(1))
        .find_map(|m| q.column_from_words(m.as_str()))
        .or_else(|| q.dimension())
}

fn distinct_matches(q: &Question<'_>) -> bool {
    q.has_any(&["distinct", "unique", "different"]) && distinct_column(q).is_some()
}

fn distinct_with_counts(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let column = distinct_column(q).unwrap_or_else(|| STATUS_COLUMN.to_string());
    let mut intent = q.base();
    intent.group_by = vec![Dimension::Column(column.clone())];
    intent.aggregations = vec![Aggregation::count_star()];
    explain.push(format!("Distinct {} values with their contract counts.", column));
    intent
}

fn grouped_measure_matches(q: &Question<'_>) -> bool {
    q.dimension().is_some()
        && (q.wants_count()
            || q.wants_average()
            || q.has_any(&["total", "sum", "value", "gross", "net", "contracts"]))
}

fn grouped_measure(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let column = q.dimension().unwrap_or_else(|| STATUS_COLUMN.to_string());
    let mut intent = q.base();
    let mut aggregations = Vec::new();
    if q.wants_average() {
        aggregations.push(Aggregation::of_measure(AggFunc::Avg, q.measure_or(Measure::Net)));
    } else if !q.wants_count() || q.measure_hint().is_some() || q.has_any(&["total", "sum"]) {
        aggregations.push(Aggregation::of_measure(AggFunc::Sum, q.measure_or(Measure::Net)));
    }
    if q.wants_count() || aggregations.is_empty() {
        aggregations.push(Aggregation::count_star());
    }
    if q.settings.aliases.get(&column).is_some_and(|c| c.len() > 1) {
        intent.fan_out = Some(column.clone());
    }
    intent.group_by = vec![Dimension::Column(column.clone())];
    intent.aggregations = aggregations;
    explain.push(format!("Grouped by {}.", column));
    intent
}

fn count_matches(q: &Question<'_>) -> bool {
    q.wants_count()
}

fn count_in_window(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let mut intent = q.base();
    intent.aggregations = vec![Aggregation::count_star()];
    intent.limit = None;
    explain.push("Counting matching contracts.".to_string());
    intent
}

fn request_type_matches(q: &Question<'_>) -> bool {
    q.base().eq_values("REQUEST_TYPE").is_some()
}

fn request_type_filter(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let mut intent = q.base();
    if q.has("request") {
        intent.window = intent.window.map(|w| w.with_mode(WindowMode::Request));
    }
    explain.push(
        "Request type matched through its configured synonyms and prefixes.".to_string(),
    );
    intent
}

fn status_matches(q: &Question<'_>) -> bool {
    q.base().eq_values(STATUS_COLUMN).is_some()
}

fn status_filter(q: &Question<'_>, explain: &mut Vec<String>) -> QueryIntent {
    let intent = q.base();
    if let Some(values) = intent.eq_values(STATUS_COLUMN) {
        explain.push(format!("Contract status in ({}).", values.join(", ")));
    }
    intent
}

#[cfg(test)]
mod tests {
    use super::super::build;
    use super::*;
    use crate::config::Settings;
    use std::num::NonZeroU32;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, 10).unwrap()
    }

    fn run(text: &str) -> (Option<&'static str>, QueryIntent) {
        let built = build(text, &Settings::contracts_default(), today());
        (built.pattern, built.intent)
    }

    #[test]
    fn test_pattern_names_are_unique() {
        let mut names: Vec<&str> = PATTERNS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PATTERNS.len());
    }

    #[test]
    fn test_top_stakeholders_by_gross_last_month() {
        let (pattern, intent) = run("top 10 stakeholders by gross value last month");
        assert_eq!(pattern, Some("stakeholder_value"));
        assert_eq!(intent.fan_out.as_deref(), Some("STAKEHOLDER"));
        assert_eq!(
            intent.aggregations,
            vec![Aggregation::of_measure(AggFunc::Sum, Measure::Gross)]
        );
        assert_eq!(intent.limit, NonZeroU32::new(10));
        let window = intent.window.unwrap();
        assert_eq!(window.mode, WindowMode::Overlap);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2023, 1, 31).unwrap());
    }

    #[test]
    fn test_expiry_buckets() {
        let (pattern, intent) = run("contracts expiring in 30/60/90 days");
        assert_eq!(pattern, Some("expiry_buckets"));
        assert_eq!(
            intent.shape,
            Shape::ExpiryBuckets {
                horizons: vec![30, 60, 90]
            }
        );
        let window = intent.window.unwrap();
        assert_eq!(window.mode, WindowMode::EndOnly);
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2023, 5, 11).unwrap());
    }

    #[test]
    fn test_expiring_count_defaults_to_thirty_days() {
        let (pattern, intent) = run("how many contracts are expiring soon");
        assert_eq!(pattern, Some("expiring_count"));
        let window = intent.window.unwrap();
        assert_eq!(window.mode, WindowMode::EndOnly);
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2023, 3, 12).unwrap());
        assert_eq!(intent.aggregations, vec![Aggregation::count_star()]);
    }

    #[test]
    fn test_year_over_year_shifts_twelve_months() {
        let (pattern, intent) = run("year over year gross value");
        assert_eq!(pattern, Some("year_over_year"));
        match intent.shape {
            Shape::PeriodComparison { current, previous } => {
                assert_eq!(current.start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
                assert_eq!(previous.start, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
                assert_eq!(previous.end, NaiveDate::from_ymd_opt(2022, 2, 10).unwrap());
            }
            other => panic!("unexpected shape {:?}", other),
        }
        assert!(intent.window.is_none());
    }

    #[test]
    fn test_top_per_group() {
        let (pattern, intent) = run("top 3 contracts per entity by gross");
        assert_eq!(pattern, Some("top_per_group"));
        assert_eq!(
            intent.shape,
            Shape::TopPerGroup {
                partition: "ENTITY".to_string(),
                per_group: 3
            }
        );
        assert!(intent.limit.is_none());
    }

    #[test]
    fn test_stakeholders_above_count() {
        let (pattern, intent) = run("stakeholders involved in more than 3 contracts");
        assert_eq!(pattern, Some("stakeholders_above_count"));
        let having = intent.having.unwrap();
        assert_eq!(having.op, CmpOp::Gt);
        assert_eq!(having.value, 3.0);
    }

    #[test]
    fn test_missing_email_uses_placeholders() {
        let (pattern, intent) = run("contracts with missing email");
        assert_eq!(pattern, Some("missing_contact"));
        assert_eq!(intent.empty_checks.len(), 1);
        assert_eq!(intent.empty_checks[0].column, "REPRESENTATIVE_EMAIL");
        assert_eq!(intent.empty_checks[0].placeholders, vec!["NA", "N/A"]);
    }

    #[test]
    fn test_missing_column() {
        let (pattern, intent) = run("contracts without an entity");
        assert_eq!(pattern, Some("missing_column"));
        assert_eq!(intent.empty_checks[0].column, "ENTITY");
        assert!(intent.empty_checks[0].empty);
    }

    #[test]
    fn test_anomalies() {
        assert_eq!(
            run("contracts where end date is before start date").1.checks,
            vec![Anomaly::EndBeforeStart]
        );
        assert_eq!(
            run("duration does not match the dates").1.checks,
            vec![Anomaly::DurationMismatch]
        );
        assert_eq!(
            run("owner department vs oul").1.checks,
            vec![Anomaly::OwnerDeptOulMismatch]
        );
        let (_, intent) = run("vat is zero but value is set");
        assert_eq!(intent.checks, vec![Anomaly::VatZeroWithValue]);
        assert!(intent.numeric_filters.is_empty());
        assert_eq!(
            run("vat greater than net value").1.checks,
            vec![Anomaly::VatExceedsNet]
        );
    }

    #[test]
    fn test_top_contracts_default_to_net() {
        let (pattern, intent) = run("top 5 contracts by value");
        assert_eq!(pattern, Some("top_contracts_by_value"));
        assert_eq!(intent.measure, Some(Measure::Net));
        assert_eq!(intent.projection, Projection::Detail);
    }

    #[test]
    fn test_grouped_count_by_department_fans_out() {
        let (pattern, intent) = run("count of contracts by department");
        assert_eq!(pattern, Some("grouped_measure"));
        assert_eq!(intent.fan_out.as_deref(), Some("DEPARTMENT"));
        assert_eq!(intent.aggregations, vec![Aggregation::count_star()]);
    }

    #[test]
    fn test_monthly_trend_orders_by_month() {
        let (pattern, intent) = run("monthly trend of requests in 2022");
        assert_eq!(pattern, Some("monthly_trend"));
        assert_eq!(intent.group_by, vec![Dimension::Month("REQUEST_DATE".to_string())]);
        assert_eq!(intent.window.unwrap().mode, WindowMode::Request);
    }

    #[test]
    fn test_request_type_filter() {
        let (pattern, intent) = run("request type = renewal");
        assert_eq!(pattern, Some("request_type_filter"));
        assert!(intent.eq_values("REQUEST_TYPE").is_some());
    }
}
