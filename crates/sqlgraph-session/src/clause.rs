//! WHERE and ORDER BY / LIMIT / OFFSET rendering.

use sqlgraph_core::{Value, quote_ident};
use std::fmt;

/// A WHERE condition with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = ?`, or `column IS NULL` for a NULL value
    Eq(String, Value),
    /// `column IN (?, ...)`
    In(String, Vec<Value>),
    /// Every condition holds.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(column.into(), values)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Render the condition (without the `WHERE` keyword) and its parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.render(&mut params);
        (sql, params)
    }

    fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Filter::Eq(column, Value::Null) => format!("{} IS NULL", quote_ident(column)),
            Filter::Eq(column, value) => {
                params.push(value.clone());
                format!("{} = ?", quote_ident(column))
            }
            // An empty IN list matches nothing.
            Filter::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Filter::In(column, values) => {
                params.extend(values.iter().cloned());
                format!("{} IN ({})", quote_ident(column), placeholders(values.len()))
            }
            Filter::And(filters) if filters.is_empty() => "1 = 1".to_string(),
            Filter::And(filters) => filters
                .iter()
                .map(|f| match f {
                    Filter::And(inner) if inner.len() > 1 => format!("({})", f.render(params)),
                    _ => f.render(params),
                })
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// `?, ?, ...` with `n` placeholders.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Ordering and windowing appended to a SELECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Search {
    orders: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Search {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an ORDER BY term, e.g. `"position desc"`.
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.orders.push(order.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.limit.is_none() && self.offset.is_none()
    }

    /// Append the clauses to `sql`.
    ///
    /// SQLite only accepts OFFSET after a LIMIT, so an offset alone is
    /// rendered with `LIMIT -1`.
    pub fn apply(&self, sql: &str) -> String {
        let mut sql = sql.to_string();
        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.orders.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        sql
    }
}

impl fmt::Display for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.apply("").trim_start())
    }
}
