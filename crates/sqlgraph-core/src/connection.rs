//! The connection trait every engine executes through.
//!
//! Operations are async and take the caller's `Cx`, so cancellation and
//! timeouts belong to the caller's runtime. Savepoints, foreign-key toggling
//! and column introspection have SQLite-flavoured default implementations
//! built on [`Connection::query`] and [`Connection::execute`].

use crate::identifiers::quote_ident;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// One column as reported by the store's table introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    /// Declared type (`INTEGER`, `TEXT`, ...)
    pub sql_type: String,
    pub not_null: bool,
    /// 1-based position within the primary key, 0 when not part of it
    pub primary_key: u32,
    pub default: Option<String>,
}

/// A database connection capable of executing statements.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query(&cx, "SELECT * FROM users WHERE id = ?", &[Value::BigInt(1)]).await;
/// let changed = conn.execute(&cx, "DELETE FROM users", &[]).await;
/// ```
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, crate::Error>> + Send;

    /// Execute a statement and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, crate::Error>> + Send;

    /// Execute an INSERT and return the key the store assigned to the row.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, crate::Error>> + Send {
        async move {
            match self.execute(cx, sql, params).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            let row = match self.query_one(cx, "SELECT last_insert_rowid()", &[]).await {
                Outcome::Ok(row) => row,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            match row.map(|r| r.get_as::<i64>(0)) {
                Some(Ok(id)) => Outcome::Ok(id),
                Some(Err(e)) => Outcome::Err(e),
                None => Outcome::Err(crate::Error::Custom(format!(
                    "No rowid reported after: {}",
                    sql
                ))),
            }
        }
    }

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, crate::Error>> + Send {
        async move {
            self.query(cx, sql, params)
                .await
                .map(|rows| rows.into_iter().next())
        }
    }

    /// Live columns of `table`; empty when the table does not exist.
    fn table_columns(
        &self,
        cx: &Cx,
        table: &str,
    ) -> impl Future<Output = Outcome<Vec<TableColumn>, crate::Error>> + Send {
        async move {
            let sql = format!("PRAGMA table_info({})", quote_ident(table));
            let rows = match self.query(cx, &sql, &[]).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let mut columns = Vec::with_capacity(rows.len());
            for row in &rows {
                let column = (|| {
                    Ok::<_, crate::Error>(TableColumn {
                        name: row.get_named("name")?,
                        sql_type: row.get_named("type")?,
                        not_null: row.get_named("notnull")?,
                        primary_key: u32::try_from(row.get_named::<i64>("pk")?).unwrap_or(0),
                        default: row.get_named("dflt_value")?,
                    })
                })();
                match column {
                    Ok(column) => columns.push(column),
                    Err(e) => return Outcome::Err(e),
                }
            }
            Outcome::Ok(columns)
        }
    }

    /// Toggle foreign-key enforcement.
    fn set_foreign_keys(
        &self,
        cx: &Cx,
        enabled: bool,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move {
            let sql = format!("PRAGMA foreign_keys = {}", if enabled { 1 } else { 0 });
            self.execute(cx, &sql, &[]).await.map(|_| ())
        }
    }

    /// Open a named savepoint.
    fn savepoint(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move {
            let sql = format!("SAVEPOINT {}", quote_ident(name));
            self.execute(cx, &sql, &[]).await.map(|_| ())
        }
    }

    /// Release (commit) a named savepoint.
    fn release(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move {
            let sql = format!("RELEASE SAVEPOINT {}", quote_ident(name));
            self.execute(cx, &sql, &[]).await.map(|_| ())
        }
    }

    /// Roll back to a named savepoint and discard it.
    fn rollback_to(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), crate::Error>> + Send {
        async move {
            let sql = format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name));
            match self.execute(cx, &sql, &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            self.release(cx, name).await
        }
    }
}
