//! Named bind parameters collected while rendering a statement.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Value bound to a named parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        BindValue::Text(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        BindValue::Text(v)
    }
}

impl From<NaiveDate> for BindValue {
    fn from(v: NaiveDate) -> Self {
        BindValue::Date(v)
    }
}

impl From<u32> for BindValue {
    fn from(v: u32) -> Self {
        BindValue::Int(v as i64)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            BindValue::Int(v as i64)
        } else {
            BindValue::Float(v)
        }
    }
}

/// Named bind parameters of one statement.
///
/// Each name is registered exactly once; the SQL may reference a name more
/// than once (the same value checked against several slot columns).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindSet {
    values: BTreeMap<String, BindValue>,
    #[serde(skip)]
    counters: HashMap<String, usize>,
}

impl BindSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed name (`date_start`, `top_n`). Returns the `:name`
    /// placeholder. Registering a name twice is a bug in the caller.
    pub fn named(&mut self, name: &str, value: impl Into<BindValue>) -> String {
        assert!(
            !self.values.contains_key(name),
            "bind parameter '{}' registered twice",
            name
        );
        self.values.insert(name.to_string(), value.into());
        format!(":{}", name)
    }

    /// Register under the next free `prefix_N` name
    pub fn fresh(&mut self, prefix: &str, value: impl Into<BindValue>) -> String {
        loop {
            let counter = self.counters.entry(prefix.to_string()).or_insert(0);
            let name = format!("{}_{}", prefix, counter);
            *counter += 1;
            if !self.values.contains_key(&name) {
                return self.named(&name, value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&BindValue> {
        self.values.get(name.trim_start_matches(':'))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_map(self) -> BTreeMap<String, BindValue> {
        self.values
    }

    /// Names that never appear in `sql`
    pub fn unreferenced(&self, sql: &str) -> Vec<String> {
        self.values
            .keys()
            .filter(|name| !references(sql, name))
            .cloned()
            .collect()
    }
}

/// True when `:name` occurs in `sql` as a whole placeholder (`:eq_1` does
/// not count as a reference inside `:eq_10`)
pub fn references(sql: &str, name: &str) -> bool {
    let needle = format!(":{}", name);
    sql.match_indices(&needle).any(|(idx, _)| {
        sql[idx + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_names_are_sequential_per_prefix() {
        let mut binds = BindSet::new();
        assert_eq!(binds.fresh("eq", "A"), ":eq_0");
        assert_eq!(binds.fresh("eq", "B"), ":eq_1");
        assert_eq!(binds.fresh("fts", "%X%"), ":fts_0");
        assert_eq!(binds.len(), 3);
        assert_eq!(binds.get(":eq_1"), Some(&BindValue::Text("B".to_string())));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_name_panics() {
        let mut binds = BindSet::new();
        binds.named("top_n", 10u32);
        binds.named("top_n", 5u32);
    }

    #[test]
    fn test_reference_detection() {
        let mut binds = BindSet::new();
        for v in 0..11 {
            binds.fresh("eq", format!("V{}", v));
        }
        let sql = "X IN (:eq_10)";
        assert!(references(sql, "eq_10"));
        assert!(!references(sql, "eq_1"));
        assert_eq!(binds.unreferenced(sql).len(), 10);
    }

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(BindValue::from(200.0), BindValue::Int(200));
        assert_eq!(BindValue::from(0.15), BindValue::Float(0.15));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut binds = BindSet::new();
        binds.named("top_n", 10u32);
        binds.named(
            "date_start",
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        let json = serde_json::to_string(&binds).unwrap();
        assert_eq!(json, r#"{"date_start":"2023-01-01","top_n":10}"#);
    }
}
