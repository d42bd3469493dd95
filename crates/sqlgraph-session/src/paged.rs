//! Fetching records by key set, a page of keys at a time.

use crate::clause::{Search, placeholders};
use asupersync::{Cx, Outcome};
use sqlgraph_core::{
    Connection, Error, Key, ModelDef, Record, quote_ident, try_outcome, try_result,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Number of keys bound per query when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Fetch every row of `model` whose `column` is in `keys`.
///
/// Keys are de-duplicated and split into pages of at most `page_size`, one
/// `SELECT * ... WHERE column IN (...)` per page, with `search` appended to
/// each. Rows are hydrated into records in store order, page after page.
/// No query is issued when `keys` is empty.
pub async fn paged_by_keys<C: Connection>(
    cx: &Cx,
    conn: &C,
    model: &Arc<ModelDef>,
    column: &str,
    keys: &[Key],
    search: Option<&Search>,
    page_size: usize,
) -> Outcome<Vec<Record>, Error> {
    let mut seen = HashSet::with_capacity(keys.len());
    let unique: Vec<&Key> = keys.iter().filter(|k| seen.insert(*k)).collect();
    if unique.is_empty() {
        return Outcome::Ok(Vec::new());
    }

    let page_size = page_size.max(1);
    let mut records = Vec::new();
    for page in unique.chunks(page_size) {
        let mut sql = format!(
            "SELECT * FROM {} WHERE {} IN ({})",
            quote_ident(model.table_name()),
            quote_ident(column),
            placeholders(page.len())
        );
        if let Some(search) = search {
            sql = search.apply(&sql);
        }
        let params: Vec<_> = page.iter().map(|k| k.to_value()).collect();

        let rows = try_outcome!(conn.query(cx, &sql, &params).await);
        tracing::trace!(
            table = %model.table_name(),
            keys = page.len(),
            rows = rows.len(),
            "fetched page"
        );
        for row in &rows {
            records.push(try_result!(Record::from_row(Arc::clone(model), row)));
        }
    }
    Outcome::Ok(records)
}
