//! Comparison of a model against a live table.

use asupersync::{Cx, Outcome};
use sqlgraph_core::{Connection, Error, ModelDef, TableColumn};
use std::collections::HashSet;

/// How a live table relates to its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    /// The table does not exist.
    Absent,
    /// Same column names and count as the model.
    Current,
    /// The table must be rebuilt; `common` lists the columns (in model
    /// order) present both in the table and in the model.
    Diverged { common: Vec<String> },
}

impl TableState {
    pub fn is_current(&self) -> bool {
        matches!(self, TableState::Current)
    }
}

/// Classify `live` against `model`.
///
/// A table is current when every model column exists and the column counts
/// match; types are not compared.
pub fn compare(model: &ModelDef, live: &[TableColumn]) -> TableState {
    if live.is_empty() {
        return TableState::Absent;
    }

    let existing: HashSet<&str> = live.iter().map(|c| c.name.as_str()).collect();
    let wanted = model.column_names();
    let common: Vec<String> = wanted
        .iter()
        .filter(|name| existing.contains(name.as_str()))
        .cloned()
        .collect();

    if common.len() == wanted.len() && live.len() == wanted.len() {
        TableState::Current
    } else {
        TableState::Diverged { common }
    }
}

/// Read the live columns of the model's table and classify them.
pub async fn inspect<C: Connection>(
    cx: &Cx,
    conn: &C,
    model: &ModelDef,
) -> Outcome<TableState, Error> {
    conn.table_columns(cx, model.table_name())
        .await
        .map(|live| compare(model, &live))
}
