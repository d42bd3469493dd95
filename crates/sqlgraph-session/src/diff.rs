//! Field-by-field record comparison.

use sqlgraph_core::{Record, Value};
use std::collections::BTreeMap;

/// Changed persisted fields: field name to new value. Empty means unchanged.
pub type ChangedFields = BTreeMap<String, Value>;

/// Compare `fresh` against `cached` over every persisted field of the model.
///
/// Values are normalized through their field type first, so an in-memory
/// `Int(3)` equals the `BigInt(3)` read back from the store.
pub fn diff_records(fresh: &Record, cached: &Record) -> ChangedFields {
    fresh
        .model()
        .persisted_fields()
        .into_iter()
        .filter_map(|field| {
            let new = fresh.normalized(&field.name);
            (new != cached.normalized(&field.name)).then(|| (field.name.clone(), new))
        })
        .collect()
}

/// Same record with associations dropped.
pub(crate) fn detached(record: &Record) -> Record {
    let mut out = Record::new(record.model_arc().clone());
    for (name, value) in record.values() {
        out.set(name, value.clone());
    }
    out
}
