//! Date window inference.
//!
//! `resolve` turns relative and absolute wording ("last month", "next 30
//! days", "2023-01-01..2023-03-31", "in 2022") into an inclusive
//! `[start, end]` range and picks which date columns the range applies to.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowMode {
    /// Contract active window intersects the range
    Overlap,
    /// Request date inside the range
    Request,
    /// End date inside the range (expiring contracts)
    EndOnly,
    /// Start date inside the range
    StartOnly,
}

/// Inclusive date window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub mode: WindowMode,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
}

impl DateWindow {
    pub fn new(mode: WindowMode, start: NaiveDate, end: NaiveDate, label: impl Into<String>) -> Self {
        Self {
            mode,
            start,
            end,
            label: label.into(),
        }
    }

    /// First day after the window, for half-open comparisons
    pub fn end_exclusive(&self) -> NaiveDate {
        self.end.succ_opt().unwrap_or(self.end)
    }

    pub fn with_mode(mut self, mode: WindowMode) -> Self {
        self.mode = mode;
        self
    }

    /// One-line description for the explain trace
    pub fn describe(&self) -> String {
        let semantics = match self.mode {
            WindowMode::Overlap => "contracts active at any point in",
            WindowMode::Request => "requested in",
            WindowMode::EndOnly => "ending in",
            WindowMode::StartOnly => "starting in",
        };
        format!(
            "Window: {} {} ({} to {}, inclusive)",
            semantics, self.label, self.start, self.end
        )
    }
}

const DATE_TOKEN: &str = r"(\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{4})";

lazy_static! {
    static ref EXPLICIT_RANGE: Regex = Regex::new(&format!(
        r"(?i){d}\s*(?:\.\.|\bto\b|\buntil\b|\bthrough\b|–)\s*{d}",
        d = DATE_TOKEN
    ))
    .unwrap();
    static ref BETWEEN_RANGE: Regex = Regex::new(&format!(
        r"(?i)\b(?:between|from)\s+{d}\s+(?:and|to|until|through)\s+{d}",
        d = DATE_TOKEN
    ))
    .unwrap();
    static ref SINCE: Regex = Regex::new(&format!(r"(?i)\bsince\s+{}", DATE_TOKEN)).unwrap();
    static ref SINGLE_DATE: Regex = Regex::new(&format!(r"(?i)\b{}\b", DATE_TOKEN)).unwrap();
    static ref NEXT_COUNT: Regex = Regex::new(
        r"(?i)\b(?:next|coming|in|within)\s+(\d{1,4})\s+(day|week|month|year)s?\b"
    )
    .unwrap();
    static ref LAST_COUNT: Regex = Regex::new(
        r"(?i)\b(?:last|past|previous|prior)\s+(\d{1,4})\s+(day|week|month|year)s?\b"
    )
    .unwrap();
    static ref NAMED: Regex = Regex::new(
        r"(?i)\b(last|previous|prior|this|current|next|coming)\s+(week|month|quarter|year)\b"
    )
    .unwrap();
    static ref YTD: Regex = Regex::new(r"(?i)\b(ytd|year[\s-]to[\s-]date)\b").unwrap();
    static ref MONTH_YEAR: Regex = Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{4})\b"
    )
    .unwrap();
    static ref QUARTER_YEAR: Regex =
        Regex::new(r"(?i)\bq([1-4])\s*(?:of\s+)?(\d{4})\b").unwrap();
    static ref IN_YEAR: Regex =
        Regex::new(r"(?i)\b(?:in|during|for|of|year)\s+((?:19|20)\d{2})\b").unwrap();
    static ref MODE_REQUEST: Regex =
        Regex::new(r"(?i)\b(requested|request[ _]date|created|submitted)\b").unwrap();
    static ref MODE_END: Regex =
        Regex::new(r"(?i)\b(expir\w*|ending|ends|end[ _]date)\b").unwrap();
    static ref MODE_START: Regex =
        Regex::new(r"(?i)\b(starting|starts|started|start[ _]date|commenc\w*)\b").unwrap();
    static ref DATE_WORDS: Regex = Regex::new(
        r"(?i)\b(month|quarter|year|week|days?|ytd|since|before|after|yesterday|tomorrow|today|\d{4}-\d{1,2}-\d{1,2})\b"
    )
    .unwrap();
}

/// Parse the numeric date spellings accepted in questions
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    const FORMATS: [&str; 6] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

pub fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    month_start(year, month)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

pub fn quarter_bounds(year: i32, quarter: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first_month = (quarter - 1) * 3 + 1;
    Some((month_start(year, first_month)?, month_end(year, first_month + 2)?))
}

fn shift_months(date: NaiveDate, delta: i32) -> Option<NaiveDate> {
    if delta >= 0 {
        date.checked_add_months(Months::new(delta as u32))
    } else {
        date.checked_sub_months(Months::new(delta.unsigned_abs()))
    }
}

/// Window mode implied by the wording
pub fn detect_mode(text: &str) -> WindowMode {
    if MODE_REQUEST.is_match(text) {
        WindowMode::Request
    } else if MODE_END.is_match(text) {
        WindowMode::EndOnly
    } else if MODE_START.is_match(text) {
        WindowMode::StartOnly
    } else {
        WindowMode::Overlap
    }
}

/// True when the text talks about time but no window could be resolved
pub fn mentions_dates(text: &str) -> bool {
    DATE_WORDS.is_match(text)
}

/// Resolve the window for a question. `None` means no window applies.
pub fn resolve(text: &str, today: NaiveDate) -> Option<DateWindow> {
    let (start, end, label) = resolve_range(text, today)?;
    Some(DateWindow::new(detect_mode(text), start, end, label))
}

/// Range only, without mode detection
pub fn resolve_range(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate, String)> {
    explicit_range(text)
        .or_else(|| since(text, today))
        .or_else(|| relative_count(text, today))
        .or_else(|| ytd(text, today))
        .or_else(|| named_window(text, today))
        .or_else(|| month_year(text))
        .or_else(|| quarter_year(text))
        .or_else(|| in_year(text))
        .or_else(|| single_date(text))
}

fn ordered(a: NaiveDate, b: NaiveDate) -> (NaiveDate, NaiveDate) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn explicit_range(text: &str) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = BETWEEN_RANGE
        .captures(text)
        .or_else(|| EXPLICIT_RANGE.captures(text))?;
    let a = parse_date(caps.get(1)?.as_str())?;
    let b = parse_date(caps.get(2)?.as_str())?;
    let (start, end) = ordered(a, b);
    Some((start, end, format!("{}..{}", start, end)))
}

fn since(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = SINCE.captures(text)?;
    let start = parse_date(caps.get(1)?.as_str())?;
    let (start, end) = ordered(start, today);
    Some((start, end, format!("since {}", start)))
}

fn relative_count(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate, String)> {
    if let Some(caps) = NEXT_COUNT.captures(text) {
        let n: u32 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        let end = add_units(today, &unit, n as i64)?;
        return Some((today, end, format!("next {} {}s", n, unit)));
    }
    if let Some(caps) = LAST_COUNT.captures(text) {
        let n: u32 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        let start = add_units(today, &unit, -(n as i64))?;
        return Some((start, today, format!("last {} {}s", n, unit)));
    }
    None
}

fn add_units(date: NaiveDate, unit: &str, n: i64) -> Option<NaiveDate> {
    match unit {
        "day" => date.checked_add_signed(Duration::days(n)),
        "week" => date.checked_add_signed(Duration::weeks(n)),
        "month" => shift_months(date, i32::try_from(n).ok()?),
        "year" => shift_months(date, i32::try_from(n.checked_mul(12)?).ok()?),
        _ => None,
    }
}

fn ytd(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate, String)> {
    if !YTD.is_match(text) {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
    Some((start, today, "year to date".to_string()))
}

fn named_window(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = NAMED.captures(text)?;
    let which = caps.get(1)?.as_str().to_lowercase();
    let unit = caps.get(2)?.as_str().to_lowercase();
    let offset: i32 = match which.as_str() {
        "last" | "previous" | "prior" => -1,
        "next" | "coming" => 1,
        _ => 0,
    };
    let (start, end) = match unit.as_str() {
        "week" => {
            let monday = today.week(Weekday::Mon).first_day();
            let start = monday.checked_add_signed(Duration::weeks(offset as i64))?;
            (start, start.checked_add_signed(Duration::days(6))?)
        }
        "month" => {
            let anchor = shift_months(month_start(today.year(), today.month())?, offset)?;
            (anchor, month_end(anchor.year(), anchor.month())?)
        }
        "quarter" => {
            let first = month_start(today.year(), (quarter_of(today) - 1) * 3 + 1)?;
            let anchor = shift_months(first, offset * 3)?;
            quarter_bounds(anchor.year(), quarter_of(anchor))?
        }
        "year" => {
            let year = today.year() + offset;
            (
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            )
        }
        _ => return None,
    };
    let label = match offset {
        -1 => format!("last {}", unit),
        1 => format!("next {}", unit),
        _ => format!("this {}", unit),
    };
    Some((start, end, label))
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix: String = abbrev.to_lowercase().chars().take(3).collect();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

fn month_year(text: &str) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = MONTH_YEAR.captures(text)?;
    let month = month_number(caps.get(1)?.as_str())?;
    let year: i32 = caps.get(2)?.as_str().parse().ok()?;
    let start = month_start(year, month)?;
    Some((start, month_end(year, month)?, start.format("%B %Y").to_string()))
}

fn quarter_year(text: &str) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = QUARTER_YEAR.captures(text)?;
    let quarter: u32 = caps.get(1)?.as_str().parse().ok()?;
    let year: i32 = caps.get(2)?.as_str().parse().ok()?;
    let (start, end) = quarter_bounds(year, quarter)?;
    Some((start, end, format!("Q{} {}", quarter, year)))
}

fn in_year(text: &str) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = IN_YEAR.captures(text)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
        year.to_string(),
    ))
}

fn single_date(text: &str) -> Option<(NaiveDate, NaiveDate, String)> {
    let caps = SINGLE_DATE.captures(text)?;
    let date = parse_date(caps.get(1)?.as_str())?;
    Some((date, date, date.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_last_month_is_previous_calendar_month() {
        let w = resolve("contracts last month", d(2023, 2, 10)).unwrap();
        assert_eq!(w.start, d(2023, 1, 1));
        assert_eq!(w.end, d(2023, 1, 31));
        assert_eq!(w.end_exclusive(), d(2023, 2, 1));
        assert_eq!(w.mode, WindowMode::Overlap);
    }

    #[test]
    fn test_month_boundaries_respect_leap_years() {
        let w = resolve("last month", d(2024, 3, 15)).unwrap();
        assert_eq!(w.end, d(2024, 2, 29));
        let w = resolve("last month", d(2023, 3, 31)).unwrap();
        assert_eq!(w.end, d(2023, 2, 28));
        let w = resolve("last month", d(2023, 1, 5)).unwrap();
        assert_eq!((w.start, w.end), (d(2022, 12, 1), d(2022, 12, 31)));
    }

    #[test]
    fn test_quarters() {
        let w = resolve("last quarter", d(2023, 2, 10)).unwrap();
        assert_eq!((w.start, w.end), (d(2022, 10, 1), d(2022, 12, 31)));
        let w = resolve("this quarter", d(2023, 8, 1)).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 7, 1), d(2023, 9, 30)));
        let w = resolve("q1 2024", d(2023, 8, 1)).unwrap();
        assert_eq!((w.start, w.end), (d(2024, 1, 1), d(2024, 3, 31)));
    }

    #[test]
    fn test_relative_counts() {
        let today = d(2023, 2, 10);
        let w = resolve("expiring in the next 30 days", today).unwrap();
        assert_eq!((w.start, w.end), (today, d(2023, 3, 12)));
        assert_eq!(w.mode, WindowMode::EndOnly);

        let w = resolve("requested in the last 3 months", today).unwrap();
        assert_eq!((w.start, w.end), (d(2022, 11, 10), today));
        assert_eq!(w.mode, WindowMode::Request);
    }

    #[test]
    fn test_named_years_and_ytd() {
        let today = d(2023, 5, 20);
        let w = resolve("ytd gross", today).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 1, 1), today));
        let w = resolve("next year", today).unwrap();
        assert_eq!((w.start, w.end), (d(2024, 1, 1), d(2024, 12, 31)));
        let w = resolve("renewals in 2022", today).unwrap();
        assert_eq!((w.start, w.end), (d(2022, 1, 1), d(2022, 12, 31)));
    }

    #[test]
    fn test_explicit_ranges() {
        let today = d(2023, 5, 20);
        let w = resolve("2023-01-01..2023-03-31", today).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 1, 1), d(2023, 3, 31)));
        let w = resolve("starting between 2023-04-30 and 2023-01-01", today).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 1, 1), d(2023, 4, 30)));
        assert_eq!(w.mode, WindowMode::StartOnly);
        let w = resolve("from 01/02/2023 to 28/02/2023", today).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 2, 1), d(2023, 2, 28)));
    }

    #[test]
    fn test_month_name_and_single_date() {
        let today = d(2023, 5, 20);
        let w = resolve("contracts in February 2024", today).unwrap();
        assert_eq!((w.start, w.end), (d(2024, 2, 1), d(2024, 2, 29)));
        let w = resolve("on 2023-03-05", today).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 3, 5), d(2023, 3, 5)));
    }

    #[test]
    fn test_last_week_is_monday_to_sunday() {
        // 2023-02-10 is a Friday
        let w = resolve("last week", d(2023, 2, 10)).unwrap();
        assert_eq!((w.start, w.end), (d(2023, 1, 30), d(2023, 2, 5)));
    }

    #[test]
    fn test_no_window() {
        let today = d(2023, 5, 20);
        assert!(resolve("list all contracts", today).is_none());
        assert!(resolve("top 10 contracts by value", today).is_none());
        assert!(!mentions_dates("list all contracts"));
        assert!(mentions_dates("contracts from some month"));
    }
}
