use serde::{Deserialize, Serialize};

/// Target SQL dialect. Only functions and row limiting differ; predicates
/// are written in the common subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Oracle,
    Postgres,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Oracle => "oracle",
            Dialect::Postgres => "postgres",
        }
    }

    /// Null replacement: `NVL` / `COALESCE`
    pub fn nvl(&self, expr: &str, default: &str) -> String {
        match self {
            Dialect::Oracle => format!("NVL({}, {})", expr, default),
            Dialect::Postgres => format!("COALESCE({}, {})", expr, default),
        }
    }

    pub fn trunc_month(&self, expr: &str) -> String {
        match self {
            Dialect::Oracle => format!("TRUNC({}, 'MM')", expr),
            Dialect::Postgres => format!("DATE_TRUNC('month', {})", expr),
        }
    }

    pub fn trunc_quarter(&self, expr: &str) -> String {
        match self {
            Dialect::Oracle => format!("TRUNC({}, 'Q')", expr),
            Dialect::Postgres => format!("DATE_TRUNC('quarter', {})", expr),
        }
    }

    pub fn list_agg(&self, expr: &str, distinct: bool) -> String {
        let distinct = if distinct { "DISTINCT " } else { "" };
        match self {
            Dialect::Oracle => format!(
                "LISTAGG({}{}, ', ') WITHIN GROUP (ORDER BY {})",
                distinct, expr, expr
            ),
            Dialect::Postgres => format!("STRING_AGG({}{}, ', ')", distinct, expr),
        }
    }

    pub fn median(&self, expr: &str) -> String {
        format!("PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {})", expr)
    }

    /// Month count written in a free-text duration column (`12 Months`)
    pub fn duration_months(&self, col: &str) -> String {
        match self {
            Dialect::Oracle => format!(
                "TO_NUMBER(REGEXP_SUBSTR(UPPER({}), '([0-9]+)\\s*MONTH', 1, 1, NULL, 1))",
                col
            ),
            Dialect::Postgres => format!(
                "CAST(SUBSTRING(UPPER({}) FROM '([0-9]+)\\s*MONTH') AS INTEGER)",
                col
            ),
        }
    }

    pub fn add_months(&self, date: &str, months: &str) -> String {
        match self {
            Dialect::Oracle => format!("ADD_MONTHS({}, {})", date, months),
            Dialect::Postgres => format!("({} + ({}) * INTERVAL '1 month')", date, months),
        }
    }

    /// Row limit clause for a bind placeholder (`:top_n`)
    pub fn limit_clause(&self, placeholder: &str) -> String {
        match self {
            Dialect::Oracle => format!("FETCH FIRST {} ROWS ONLY", placeholder),
            Dialect::Postgres => format!("LIMIT {}", placeholder),
        }
    }

    /// Row offset clause; rendered before the limit clause
    pub fn offset_clause(&self, placeholder: &str) -> String {
        match self {
            Dialect::Oracle => format!("OFFSET {} ROWS", placeholder),
            Dialect::Postgres => format!("OFFSET {}", placeholder),
        }
    }

    pub fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_functions() {
        let d = Dialect::Oracle;
        assert_eq!(d.nvl("VAT", "0"), "NVL(VAT, 0)");
        assert_eq!(d.trunc_month("REQUEST_DATE"), "TRUNC(REQUEST_DATE, 'MM')");
        assert_eq!(d.limit_clause(":top_n"), "FETCH FIRST :top_n ROWS ONLY");
        assert!(d.list_agg("ENTITY", true).starts_with("LISTAGG(DISTINCT ENTITY"));
        assert_eq!(d.add_months("START_DATE", "12"), "ADD_MONTHS(START_DATE, 12)");
        assert!(d.duration_months("DURATION").starts_with("TO_NUMBER(REGEXP_SUBSTR(UPPER(DURATION)"));
    }

    #[test]
    fn test_postgres_functions() {
        let d = Dialect::Postgres;
        assert_eq!(d.nvl("VAT", "0"), "COALESCE(VAT, 0)");
        assert_eq!(d.trunc_month("REQUEST_DATE"), "DATE_TRUNC('month', REQUEST_DATE)");
        assert_eq!(d.limit_clause(":top_n"), "LIMIT :top_n");
        assert_eq!(d.list_agg("ENTITY", false), "STRING_AGG(ENTITY, ', ')");
    }

    #[test]
    fn test_serde_names() {
        let d: Dialect = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(d, Dialect::Postgres);
        assert_eq!(serde_json::to_string(&Dialect::Oracle).unwrap(), "\"oracle\"");
    }
}
