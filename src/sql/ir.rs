//! Statement tree and its renderer.
//!
//! Codegen assembles a `Statement`; `render` is the only place that emits
//! clause keywords. ORDER BY, OFFSET and the row limit live on the outer
//! statement only, so a statement cannot carry two of them.

use super::dialect::Dialect;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<String>,
    pub from: String,
    /// AND-ed predicates
    pub filters: Vec<String>,
    pub group_by: Vec<String>,
    pub having: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Select(Select),
    UnionAll(Vec<Select>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub ctes: Vec<Cte>,
    pub body: Body,
    /// Rendered sort keys, e.g. `TOTAL_GROSS DESC`
    pub order_by: Vec<String>,
    /// Bind placeholders
    pub offset: Option<String>,
    pub limit: Option<String>,
}

impl Statement {
    pub fn new(body: Body) -> Self {
        Self {
            ctes: Vec::new(),
            body,
            order_by: Vec::new(),
            offset: None,
            limit: None,
        }
    }
}

fn render_select(select: &Select, indent: &str) -> String {
    let mut lines = Vec::new();
    let keyword = if select.distinct { "SELECT DISTINCT" } else { "SELECT" };
    let items = if select.items.is_empty() {
        "*".to_string()
    } else {
        select.items.join(&format!(",\n{}  ", indent))
    };
    lines.push(format!("{}{} {}", indent, keyword, items));
    lines.push(format!("{}FROM {}", indent, select.from));
    if !select.filters.is_empty() {
        lines.push(format!(
            "{}WHERE {}",
            indent,
            select.filters.join(&format!("\n{}  AND ", indent))
        ));
    }
    if !select.group_by.is_empty() {
        lines.push(format!("{}GROUP BY {}", indent, select.group_by.join(", ")));
    }
    if let Some(having) = &select.having {
        lines.push(format!("{}HAVING {}", indent, having));
    }
    lines.join("\n")
}

fn render_body(body: &Body, indent: &str) -> String {
    match body {
        Body::Select(select) => render_select(select, indent),
        Body::UnionAll(branches) => branches
            .iter()
            .map(|b| render_select(b, indent))
            .collect::<Vec<_>>()
            .join(&format!("\n{}UNION ALL\n", indent)),
    }
}

/// Render the statement as one SQL string
pub fn render(stmt: &Statement, dialect: Dialect) -> String {
    let mut parts = Vec::new();

    // Step 1: common table expressions
    if !stmt.ctes.is_empty() {
        let ctes: Vec<String> = stmt
            .ctes
            .iter()
            .map(|cte| format!("{} AS (\n{}\n)", cte.name, render_body(&cte.body, "  ")))
            .collect();
        parts.push(format!("WITH {}", ctes.join(",\n")));
    }

    // Step 2: main body
    parts.push(render_body(&stmt.body, ""));

    // Step 3: ordering and row limiting
    if !stmt.order_by.is_empty() {
        parts.push(format!("ORDER BY {}", stmt.order_by.join(", ")));
    }
    if let Some(offset) = &stmt.offset {
        parts.push(dialect.offset_clause(offset));
    }
    if let Some(limit) = &stmt.limit {
        parts.push(dialect.limit_clause(limit));
    }

    let sql = parts.join("\n");
    debug_assert!(order_by_count(&sql) <= 1, "more than one ORDER BY in {}", sql);
    sql
}

/// Number of top-level ORDER BY clauses (window `OVER (... ORDER BY ...)`
/// clauses are inline and not counted)
pub fn order_by_count(sql: &str) -> usize {
    sql.lines()
        .filter(|l| l.trim_start().starts_with("ORDER BY"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(items: &[&str], filters: &[&str]) -> Select {
        Select {
            items: items.iter().map(|s| s.to_string()).collect(),
            from: "\"Contract\"".to_string(),
            filters: filters.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_simple_statement() {
        let mut stmt = Statement::new(Body::Select(select(&["*"], &["A = :a", "B = :b"])));
        stmt.order_by = vec!["REQUEST_DATE DESC".to_string()];
        stmt.limit = Some(":top_n".to_string());
        let sql = render(&stmt, Dialect::Oracle);
        assert_eq!(
            sql,
            "SELECT *\nFROM \"Contract\"\nWHERE A = :a\n  AND B = :b\nORDER BY REQUEST_DATE DESC\nFETCH FIRST :top_n ROWS ONLY"
        );
    }

    #[test]
    fn test_render_cte_union() {
        let mut stmt = Statement::new(Body::Select(select(&["FAMILY"], &[])));
        stmt.ctes.push(Cte {
            name: "X_SLOTS".to_string(),
            body: Body::UnionAll(vec![select(&["A AS FAMILY"], &[]), select(&["B AS FAMILY"], &[])]),
        });
        stmt.offset = Some(":offset".to_string());
        stmt.limit = Some(":top_n".to_string());
        let sql = render(&stmt, Dialect::Postgres);
        assert!(sql.starts_with("WITH X_SLOTS AS (\n  SELECT A AS FAMILY"));
        assert_eq!(sql.matches("UNION ALL").count(), 1);
        assert!(sql.ends_with("OFFSET :offset\nLIMIT :top_n"));
        assert_eq!(order_by_count(&sql), 0);
    }

    #[test]
    fn test_window_order_by_not_counted() {
        let sql = "SELECT ROW_NUMBER() OVER (PARTITION BY ENTITY ORDER BY X DESC) AS RN\nFROM T\nORDER BY ENTITY";
        assert_eq!(order_by_count(sql), 1);
    }
}
