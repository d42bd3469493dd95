//! Write statements queued by the save engine.
//!
//! A save first decides everything it is going to write, then executes the
//! queue in order: inserts, then updates, then (for join tables) deletes.

use asupersync::{Cx, Outcome};
use sqlgraph_core::{Connection, Error, Record, Value, quote_ident, quote_list, try_outcome};

use crate::clause::placeholders;

/// A pending write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert one row.
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    /// Update the changed columns of the row identified by `key_columns`.
    Update {
        table: String,
        key_columns: Vec<String>,
        key_values: Vec<Value>,
        set_columns: Vec<String>,
        set_values: Vec<Value>,
    },
    /// Delete rows matching `key_column = key_value AND in_column IN (...)`.
    DeleteIn {
        table: String,
        key_column: String,
        key_value: Value,
        in_column: String,
        in_values: Vec<Value>,
    },
}

impl WriteOp {
    /// Insert every persisted column of `record`; unset fields are written as NULL.
    pub fn insert(record: &Record) -> Self {
        let model = record.model();
        let (columns, values) = model
            .persisted_fields()
            .into_iter()
            .map(|f| (f.db_name.clone(), record.get(&f.name).clone()))
            .unzip();
        WriteOp::Insert {
            table: model.table_name().to_string(),
            columns,
            values,
        }
    }

    /// Insert `record` leaving `key_column` out, so the store assigns it.
    pub fn insert_generated(record: &Record, key_column: &str) -> Self {
        match Self::insert(record) {
            WriteOp::Insert {
                table,
                columns,
                values,
            } => {
                let (columns, values) = columns
                    .into_iter()
                    .zip(values)
                    .filter(|(column, _)| column != key_column)
                    .unzip();
                WriteOp::Insert {
                    table,
                    columns,
                    values,
                }
            }
            op => op,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            WriteOp::Insert { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::DeleteIn { table, .. } => table,
        }
    }

    /// Render the statement and its parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        match self {
            WriteOp::Insert { table, columns, .. } if columns.is_empty() => (
                format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)),
                Vec::new(),
            ),
            WriteOp::Insert {
                table,
                columns,
                values,
            } => (
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(table),
                    quote_list(columns),
                    placeholders(values.len())
                ),
                values.clone(),
            ),
            WriteOp::Update {
                table,
                key_columns,
                key_values,
                set_columns,
                set_values,
            } => {
                let set = set_columns
                    .iter()
                    .map(|c| format!("{} = ?", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let filter = key_columns
                    .iter()
                    .map(|c| format!("{} = ?", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let mut params = set_values.clone();
                params.extend(key_values.iter().cloned());
                (
                    format!("UPDATE {} SET {} WHERE {}", quote_ident(table), set, filter),
                    params,
                )
            }
            WriteOp::DeleteIn {
                table,
                key_column,
                key_value,
                in_column,
                in_values,
            } => {
                let mut params = Vec::with_capacity(in_values.len() + 1);
                params.push(key_value.clone());
                params.extend(in_values.iter().cloned());
                (
                    format!(
                        "DELETE FROM {} WHERE {} = ? AND {} IN ({})",
                        quote_ident(table),
                        quote_ident(key_column),
                        quote_ident(in_column),
                        placeholders(in_values.len())
                    ),
                    params,
                )
            }
        }
    }
}

/// Execute `ops` in order, stopping at the first failure.
pub async fn execute_ops<C: Connection>(cx: &Cx, conn: &C, ops: &[WriteOp]) -> Outcome<(), Error> {
    for op in ops {
        let (sql, params) = op.to_sql();
        tracing::trace!(sql = %sql, params = params.len(), "write");
        try_outcome!(conn.execute(cx, &sql, &params).await);
    }
    Outcome::Ok(())
}
