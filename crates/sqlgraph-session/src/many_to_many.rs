//! Join-table reconciliation for many-to-many edges.
//!
//! A [`ManyToMany`] collects, for every source key, the destination keys the
//! caller wants linked. [`ManyToMany::save_joins`] then brings the join table
//! in line: per source key it inserts missing rows, deletes rows that are no
//! longer wanted and updates kept rows whose extra columns changed. In
//! partial mode only the inserts happen.

use crate::diff::{detached, diff_records};
use crate::ops::{WriteOp, execute_ops};
use crate::paged::paged_by_keys;
use asupersync::{Cx, Outcome};
use serde::Serialize;
use sqlgraph_core::{
    Connection, Error, JoinKey, Key, ModelDef, Record, RelationshipErrorKind, Result, try_outcome,
};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// One side of a join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSide {
    /// Field of the join model holding the key
    pub field: String,
    /// Column of the join table
    pub column: String,
    /// Key field on the owning model
    pub assoc_field: String,
    pub assoc_column: String,
}

impl JoinSide {
    fn resolve(join_model: &ModelDef, key: &JoinKey) -> Result<Self> {
        let field = join_model.field_for_column(&key.join_column).ok_or_else(|| {
            Error::relationship(
                RelationshipErrorKind::UnresolvedAssociation,
                join_model.name(),
                None,
                format!(
                    "Join table {} has no column {}",
                    join_model.table_name(),
                    key.join_column
                ),
            )
        })?;
        Ok(Self {
            field: field.name.clone(),
            column: key.join_column.clone(),
            assoc_field: key.key.field.clone(),
            assoc_column: key.key.column.clone(),
        })
    }
}

/// A wanted join row: the destination key and, when the caller saved join
/// records directly, the full record.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRec {
    pub destination: Key,
    pub record: Option<Record>,
}

/// Counters reported by [`ManyToMany::save_joins`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Aggregate of wanted join rows for one join table.
#[derive(Debug, Clone)]
pub struct ManyToMany {
    join_model: Arc<ModelDef>,
    source: JoinSide,
    destination: JoinSide,
    values: BTreeMap<Key, Vec<JoinRec>>,
}

impl ManyToMany {
    /// Build an empty aggregate over `join_model`, whose table must hold both
    /// join columns.
    pub fn new(join_model: Arc<ModelDef>, source: &JoinKey, destination: &JoinKey) -> Result<Self> {
        let source = JoinSide::resolve(&join_model, source)?;
        let destination = JoinSide::resolve(&join_model, destination)?;
        Ok(Self {
            join_model,
            source,
            destination,
            values: BTreeMap::new(),
        })
    }

    pub fn join_table(&self) -> &str {
        self.join_model.table_name()
    }

    pub fn join_model(&self) -> &Arc<ModelDef> {
        &self.join_model
    }

    pub fn source(&self) -> &JoinSide {
        &self.source
    }

    pub fn destination(&self) -> &JoinSide {
        &self.destination
    }

    /// Wanted rows by source key.
    pub fn values(&self) -> &BTreeMap<Key, Vec<JoinRec>> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A copy with the same join shape and no wanted rows.
    pub fn cleared(&self) -> Self {
        Self {
            values: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Mark `source` as touched, so it is reconciled even with no
    /// destinations. Returns false when the source has no key.
    pub fn touch(&mut self, source: &Record) -> bool {
        match source.key_of(&self.source.assoc_field) {
            Some(key) => {
                self.values.entry(key).or_default();
                true
            }
            None => false,
        }
    }

    /// Want a row linking `source` to `destination`. Records without a key
    /// are skipped; returns whether the pair was added.
    pub fn add(&mut self, source: &Record, destination: &Record) -> bool {
        let (Some(s), Some(d)) = (
            source.key_of(&self.source.assoc_field),
            destination.key_of(&self.destination.assoc_field),
        ) else {
            tracing::debug!(
                join_table = %self.join_table(),
                "Skipping join row: record without key"
            );
            return false;
        };
        self.add_keys(s, d, None);
        true
    }

    pub fn add_keys(&mut self, source: Key, destination: Key, record: Option<Record>) {
        self.values
            .entry(source)
            .or_default()
            .push(JoinRec {
                destination,
                record,
            });
    }

    fn join_record(&self, source: &Key, rec: &JoinRec) -> Record {
        let base = match &rec.record {
            Some(record) => detached(record),
            None => Record::new(Arc::clone(&self.join_model)),
        };
        base.with(self.source.field.clone(), source.to_value())
            .with(self.destination.field.clone(), rec.destination.to_value())
    }

    /// Reconcile the join table with the wanted rows.
    pub async fn save_joins<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        partial: bool,
        page_size: usize,
    ) -> Outcome<JoinStats, Error> {
        let mut stats = JoinStats::default();
        if self.values.is_empty() {
            return Outcome::Ok(stats);
        }

        let source_keys: Vec<Key> = self.values.keys().cloned().collect();
        let existing = try_outcome!(
            paged_by_keys(
                cx,
                conn,
                &self.join_model,
                &self.source.column,
                &source_keys,
                None,
                page_size,
            )
            .await
        );

        let mut current: BTreeMap<Key, BTreeMap<Key, Record>> = BTreeMap::new();
        for record in existing {
            let (Some(s), Some(d)) = (
                record.key_of(&self.source.field),
                record.key_of(&self.destination.field),
            ) else {
                continue;
            };
            current.entry(s).or_default().insert(d, record);
        }

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for (source, wanted) in &self.values {
            let have = current.get(source);
            let mut seen = HashSet::with_capacity(wanted.len());
            for rec in wanted {
                if !seen.insert(&rec.destination) {
                    continue;
                }
                let existing = have.and_then(|h| h.get(&rec.destination));
                match existing {
                    None => inserts.push(WriteOp::insert(&self.join_record(source, rec))),
                    Some(_) if partial => {}
                    // Rows wanted by key only have nothing beyond the key to update.
                    Some(_) if rec.record.is_none() => {}
                    Some(existing) => {
                        let changed = diff_records(&self.join_record(source, rec), existing);
                        if changed.is_empty() {
                            continue;
                        }
                        let (set_columns, set_values) = changed
                            .into_iter()
                            .map(|(field, value)| (self.column_of(&field), value))
                            .unzip();
                        updates.push(WriteOp::Update {
                            table: self.join_table().to_string(),
                            key_columns: vec![
                                self.source.column.clone(),
                                self.destination.column.clone(),
                            ],
                            key_values: vec![source.to_value(), rec.destination.to_value()],
                            set_columns,
                            set_values,
                        });
                    }
                }
            }

            if partial {
                continue;
            }
            let stale: Vec<_> = have
                .into_iter()
                .flat_map(|h| h.keys())
                .filter(|d| !seen.contains(d))
                .map(Key::to_value)
                .collect();
            // At most `page_size` destination keys per statement.
            for chunk in stale.chunks(page_size.max(1)) {
                deletes.push(WriteOp::DeleteIn {
                    table: self.join_table().to_string(),
                    key_column: self.source.column.clone(),
                    key_value: source.to_value(),
                    in_column: self.destination.column.clone(),
                    in_values: chunk.to_vec(),
                });
            }
        }

        stats.inserted = inserts.len();
        stats.updated = updates.len();
        stats.deleted = deletes
            .iter()
            .map(|op| match op {
                WriteOp::DeleteIn { in_values, .. } => in_values.len(),
                _ => 0,
            })
            .sum();
        tracing::debug!(
            join_table = %self.join_table(),
            partial,
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            "Reconciled join table"
        );

        try_outcome!(execute_ops(cx, conn, &inserts).await);
        try_outcome!(execute_ops(cx, conn, &updates).await);
        try_outcome!(execute_ops(cx, conn, &deletes).await);
        Outcome::Ok(stats)
    }

    fn column_of(&self, field: &str) -> String {
        self.join_model
            .persisted_field(field)
            .map_or_else(|| field.to_string(), |f| f.db_name.clone())
    }
}

impl fmt::Display for ManyToMany {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "JoinTable: {}", self.join_table())?;
        writeln!(
            f,
            "SourceForeignKey: {} / {}",
            self.source.field, self.source.assoc_field
        )?;
        write!(
            f,
            "DestinForeignKey: {} / {}",
            self.destination.field, self.destination.assoc_field
        )?;
        for (source, joins) in &self.values {
            write!(f, "\nSourceKey {}", source)?;
            for join in joins {
                write!(f, "\n  - DestinKey {}", join.destination)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use sqlgraph_core::{FieldDef, FieldType, KeyRef, Row, Value};

    fn language_word() -> Arc<ModelDef> {
        Arc::new(
            ModelDef::new("LanguageWord")
                .field(FieldDef::new("LanguageID", FieldType::Int64).primary_key().no_auto_increment())
                .field(FieldDef::new("WordID", FieldType::Text).primary_key())
                .field(FieldDef::new("Weight", FieldType::Int64)),
        )
    }

    fn aggregate() -> ManyToMany {
        ManyToMany::new(
            language_word(),
            &JoinKey {
                join_column: "language_id".into(),
                key: KeyRef::new("ID", "id"),
            },
            &JoinKey {
                join_column: "word_id".into(),
                key: KeyRef::new("ID", "id"),
            },
        )
        .unwrap()
    }

    fn existing(language: i64, word: &str, weight: i64) -> Row {
        Row::new(
            vec!["language_id".into(), "word_id".into(), "weight".into()],
            vec![
                Value::BigInt(language),
                Value::Text(word.into()),
                Value::BigInt(weight),
            ],
        )
    }

    #[test]
    fn test_full_replace_inserts_and_deletes() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.respond(
            "SELECT * FROM \"language_words\"",
            vec![existing(1, "a", 0), existing(1, "b", 0)],
        );
        let mut mtm = aggregate();
        mtm.add_keys(Key::Int(1), Key::Text("b".into()), None);
        mtm.add_keys(Key::Int(1), Key::Text("c".into()), None);

        rt.block_on(async {
            let stats = unwrap_outcome(mtm.save_joins(&cx, &conn, false, 100).await);
            assert_eq!(
                stats,
                JoinStats {
                    inserted: 1,
                    updated: 0,
                    deleted: 1
                }
            );
        });

        let executed = conn.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(
            executed[0].0,
            "INSERT INTO \"language_words\" (\"language_id\", \"word_id\", \"weight\") VALUES (?, ?, ?)"
        );
        assert_eq!(
            executed[0].1,
            vec![Value::BigInt(1), Value::Text("c".into()), Value::Null]
        );
        assert_eq!(
            executed[1].0,
            "DELETE FROM \"language_words\" WHERE \"language_id\" = ? AND \"word_id\" IN (?)"
        );
        assert_eq!(executed[1].1, vec![Value::BigInt(1), Value::Text("a".into())]);
    }

    #[test]
    fn test_partial_only_inserts() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.respond("SELECT * FROM \"language_words\"", vec![existing(1, "a", 0)]);
        let mut mtm = aggregate();
        mtm.add_keys(Key::Int(1), Key::Text("c".into()), None);

        rt.block_on(async {
            let stats = unwrap_outcome(mtm.save_joins(&cx, &conn, true, 100).await);
            assert_eq!(stats.inserted, 1);
            assert_eq!(stats.deleted, 0);
        });
        assert_eq!(conn.executed_sql().len(), 1);
        assert!(conn.executed_sql()[0].starts_with("INSERT INTO"));
    }

    #[test]
    fn test_kept_rows_update_extra_columns() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.respond("SELECT * FROM \"language_words\"", vec![existing(1, "a", 0)]);
        let mut mtm = aggregate();
        let record = Record::new(language_word())
            .with("LanguageID", 1)
            .with("WordID", "a")
            .with("Weight", 5);
        mtm.add_keys(Key::Int(1), Key::Text("a".into()), Some(record));

        rt.block_on(async {
            let stats = unwrap_outcome(mtm.save_joins(&cx, &conn, false, 100).await);
            assert_eq!(stats.updated, 1);
        });
        let executed = conn.executed();
        assert_eq!(
            executed[0].0,
            "UPDATE \"language_words\" SET \"weight\" = ? WHERE \"language_id\" = ? AND \"word_id\" = ?"
        );
        assert_eq!(
            executed[0].1,
            vec![Value::BigInt(5), Value::BigInt(1), Value::Text("a".into())]
        );
    }

    #[test]
    fn test_touched_source_with_no_rows_deletes_all() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.respond(
            "SELECT * FROM \"language_words\"",
            vec![existing(1, "a", 0), existing(1, "b", 0)],
        );
        let mut mtm = aggregate();
        let language = Arc::new(
            ModelDef::new("Language").field(FieldDef::new("ID", FieldType::Int64).primary_key()),
        );
        assert!(mtm.touch(&Record::new(language).with("ID", 1)));

        rt.block_on(async {
            let stats = unwrap_outcome(mtm.save_joins(&cx, &conn, false, 100).await);
            assert_eq!(stats.deleted, 2);
        });
        assert_eq!(conn.executed()[0].1.len(), 3);
    }

    #[test]
    fn test_stale_rows_deleted_in_pages() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        conn.respond(
            "SELECT * FROM \"language_words\"",
            ["a", "b", "c", "d", "e"]
                .iter()
                .map(|w| existing(1, w, 0))
                .collect(),
        );
        let mut mtm = aggregate();
        let language = Arc::new(
            ModelDef::new("Language").field(FieldDef::new("ID", FieldType::Int64).primary_key()),
        );
        assert!(mtm.touch(&Record::new(language).with("ID", 1)));

        rt.block_on(async {
            let stats = unwrap_outcome(mtm.save_joins(&cx, &conn, false, 2).await);
            assert_eq!(stats.deleted, 5);
        });
        let executed = conn.executed();
        assert_eq!(executed.len(), 3);
        assert!(executed.iter().all(|(sql, _)| sql.starts_with("DELETE FROM")));
        let bound: Vec<usize> = executed.iter().map(|(_, params)| params.len()).collect();
        assert_eq!(bound, vec![3, 3, 2]);
        assert_eq!(
            executed[2].1,
            vec![Value::BigInt(1), Value::Text("e".into())]
        );
    }

    #[test]
    fn test_display() {
        let mut mtm = aggregate();
        mtm.add_keys(Key::Int(1), Key::Text("a".into()), None);
        assert_eq!(
            mtm.to_string(),
            "JoinTable: language_words\nSourceForeignKey: LanguageID / ID\n\
             DestinForeignKey: WordID / ID\nSourceKey 1\n  - DestinKey a"
        );
    }
}
