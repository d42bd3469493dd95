//! Diff-based saving of record batches and record graphs.
//!
//! [`SaveEngine::save_rows`] persists one homogeneous batch: it fetches the
//! rows already stored under the batch's keys, then inserts what is missing
//! and updates only the fields that changed. Batches of two-primary-key
//! join rows go through the many-to-many reconciler instead.
//!
//! [`SaveEngine::save`] persists a record graph: it walks the relationship
//! tree, inserts records whose auto-increment key is still unset so their
//! keys exist, copies keys along every edge, saves each node's batch and
//! reconciles every many-to-many edge.

use crate::diff::{detached, diff_records};
use crate::many_to_many::ManyToMany;
use crate::ops::{WriteOp, execute_ops};
use crate::paged::{DEFAULT_PAGE_SIZE, paged_by_keys};
use crate::walker::{NodeId, RecordInfo, RelationshipWalker};
use asupersync::{Cx, Outcome};
use serde::Serialize;
use sqlgraph_core::{
    Connection, Error, FieldDef, JoinKey, Key, KeyRef, ModelDef, ModelRegistry, Record,
    Relationship, RelationshipErrorKind, Result, to_db_name, try_outcome, try_result,
};
use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::pin::Pin;
use std::sync::Arc;

/// What to save.
#[derive(Debug)]
pub struct SaveParams<'r> {
    /// Root records, all of one model. Keys copied along relationships are
    /// written back into this graph.
    pub records: &'r mut [Record],
    /// When non-empty, save only these root associations (and what hangs
    /// below them), not the root records themselves.
    pub assocs: Vec<String>,
    /// Join relations (by name, e.g. `"LanguageWords"`, or join table name)
    /// whose rows are only added, never replaced.
    pub partial_joins: Vec<String>,
}

impl<'r> SaveParams<'r> {
    pub fn new(records: &'r mut [Record]) -> Self {
        Self {
            records,
            assocs: Vec::new(),
            partial_joins: Vec::new(),
        }
    }

    pub fn assocs<I, S>(mut self, assocs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assocs = assocs.into_iter().map(Into::into).collect();
        self
    }

    pub fn partial_joins<I, S>(mut self, joins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partial_joins = joins.into_iter().map(Into::into).collect();
        self
    }
}

/// Whether `join_table` is listed in `partial_joins`.
pub fn is_partial_join(partial_joins: &[String], join_table: &str) -> bool {
    partial_joins
        .iter()
        .any(|name| name == join_table || to_db_name(name) == join_table)
}

/// Running save counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    pub inserts: usize,
    pub updates: usize,
    /// Records that needed no write.
    pub current: usize,
}

impl AddAssign for SaveStats {
    fn add_assign(&mut self, other: Self) {
        self.inserts += other.inserts;
        self.updates += other.updates;
        self.current += other.current;
    }
}

/// Saves batches and graphs of records.
#[derive(Debug, Clone, Copy)]
pub struct SaveEngine<'a> {
    registry: &'a ModelRegistry,
    page_size: usize,
}

impl<'a> SaveEngine<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self {
            registry,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Maximum number of keys bound per existence query.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Save a record graph.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, params), fields(records = params.records.len()))]
    pub async fn save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        params: SaveParams<'_>,
    ) -> Outcome<SaveStats, Error> {
        let SaveParams {
            records,
            assocs,
            partial_joins,
        } = params;
        let Some(first) = records.first() else {
            return Outcome::Ok(SaveStats::default());
        };
        let root = first.model_name().to_string();
        try_result!(check_homogeneous("Save", records.iter()));

        let info = try_result!(RelationshipWalker::new(self.registry).walk(&root, &assocs));
        let save_root = assocs.is_empty();
        let mut assigned: Vec<HashSet<Key>> = vec![HashSet::new(); info.len()];
        let mut stats = SaveStats::default();
        for record in records.iter_mut() {
            stats.inserts += try_outcome!(
                assign_keys(cx, conn, &info, RecordInfo::ROOT, record, save_root, &mut assigned)
                    .await
            );
        }

        let mut batches: Vec<Vec<Record>> = vec![Vec::new(); info.len()];
        let mut joins: Vec<Option<ManyToMany>> = info
            .nodes()
            .iter()
            .map(|n| n.many_to_many.as_ref().map(ManyToMany::cleared))
            .collect();
        for record in records.iter_mut() {
            collect(&info, RecordInfo::ROOT, record, &mut batches, &mut joins);
        }

        for (id, batch) in batches.iter_mut().enumerate() {
            if id == RecordInfo::ROOT && !save_root {
                continue;
            }
            // Rows inserted while assigning keys are already complete.
            batch.retain(|r| r.primary_key().is_none_or(|k| !assigned[id].contains(&k)));
            if batch.is_empty() {
                continue;
            }
            tracing::debug!(
                node = %info.node(id).name,
                model = %info.node(id).model.name(),
                records = batch.len(),
                "Saving batch"
            );
            stats += try_outcome!(self.save_rows(cx, conn, batch, &partial_joins).await);
        }
        for mtm in joins.iter().flatten() {
            let partial = is_partial_join(&partial_joins, mtm.join_table());
            try_outcome!(mtm.save_joins(cx, conn, partial, self.page_size).await);
        }
        Outcome::Ok(stats)
    }

    /// Save one homogeneous batch without following relationships.
    ///
    /// Keys the store assigns to keyless auto-increment records are written
    /// back into `batch`.
    pub async fn save_rows<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        batch: &mut [Record],
        partial_joins: &[String],
    ) -> Outcome<SaveStats, Error> {
        let Some(first) = batch.first() else {
            return Outcome::Ok(SaveStats::default());
        };
        try_result!(check_homogeneous("save_rows", batch.iter()));
        let model = Arc::clone(first.model_arc());
        let pks: Vec<FieldDef> = model.primary_keys().into_iter().cloned().collect();

        match pks.as_slice() {
            [pk] => self.save_single(cx, conn, &model, pk, batch).await,
            [a, b] => {
                let mtm = try_result!(self.join_aggregate(&model, a, b, batch));
                let partial = is_partial_join(partial_joins, model.table_name());
                let joined = try_outcome!(mtm.save_joins(cx, conn, partial, self.page_size).await);
                let written = joined.inserted + joined.updated;
                Outcome::Ok(SaveStats {
                    inserts: joined.inserted,
                    updates: joined.updated,
                    current: batch.len().saturating_sub(written),
                })
            }
            pks => Outcome::Err(Error::relationship(
                RelationshipErrorKind::PrimaryKeyArity,
                model.name(),
                None,
                format!(
                    "Have {} primary keys for {}, don't know what to do",
                    pks.len(),
                    model.name()
                ),
            )),
        }
    }

    async fn save_single<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &Arc<ModelDef>,
        pk: &FieldDef,
        batch: &mut [Record],
    ) -> Outcome<SaveStats, Error> {
        let keys: Vec<Key> = batch.iter().filter_map(|r| r.key_of(&pk.name)).collect();
        let cached = try_outcome!(
            paged_by_keys(cx, conn, model, &pk.db_name, &keys, None, self.page_size).await
        );
        let cache_by_pk: HashMap<Key, Record> = cached
            .into_iter()
            .filter_map(|r| r.key_of(&pk.name).map(|k| (k, r)))
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut generated = Vec::new();
        let mut done = HashSet::with_capacity(batch.len());
        for (i, fresh) in batch.iter().enumerate() {
            let Some(key) = fresh.key_of(&pk.name) else {
                if !pk.auto_increment {
                    return Outcome::Err(Error::shape(format!(
                        "{} record without {} and the key is not auto-increment",
                        model.name(),
                        pk.name
                    )));
                }
                generated.push(i);
                continue;
            };
            // First occurrence of a key wins.
            if !done.insert(key.clone()) {
                continue;
            }
            match cache_by_pk.get(&key) {
                None => inserts.push(WriteOp::insert(fresh)),
                Some(cached) => {
                    let changed = diff_records(fresh, cached);
                    if changed.is_empty() {
                        continue;
                    }
                    let (set_columns, set_values) = changed
                        .into_iter()
                        .map(|(field, value)| (column_of(model, &field), value))
                        .unzip();
                    updates.push(WriteOp::Update {
                        table: model.table_name().to_string(),
                        key_columns: vec![pk.db_name.clone()],
                        key_values: vec![key.to_value()],
                        set_columns,
                        set_values,
                    });
                }
            }
        }

        let inserted = inserts.len() + generated.len();
        let stats = SaveStats {
            inserts: inserted,
            updates: updates.len(),
            current: batch.len() - inserted - updates.len(),
        };
        tracing::debug!(
            table = %model.table_name(),
            inserts = stats.inserts,
            updates = stats.updates,
            current = stats.current,
            "Diffed batch"
        );

        try_outcome!(execute_ops(cx, conn, &inserts).await);
        for i in generated {
            try_outcome!(insert_generated(cx, conn, &mut batch[i], pk).await);
        }
        try_outcome!(execute_ops(cx, conn, &updates).await);
        Outcome::Ok(stats)
    }

    /// Aggregate a batch of join rows. The key with fewer distinct values
    /// becomes the source; each key field minus its `ID` suffix must name a
    /// relationship to a model with a single primary key.
    fn join_aggregate(
        &self,
        model: &Arc<ModelDef>,
        a: &FieldDef,
        b: &FieldDef,
        batch: &[Record],
    ) -> Result<ManyToMany> {
        let distinct = |pk: &FieldDef| {
            batch
                .iter()
                .map(|r| r.key_of(&pk.name))
                .collect::<HashSet<_>>()
                .len()
        };
        let (source, destination) = if distinct(b) < distinct(a) {
            (b, a)
        } else {
            (a, b)
        };

        let source_key = self.join_key(model, source, "Source")?;
        let destination_key = self.join_key(model, destination, "Destin")?;
        let mut mtm = ManyToMany::new(Arc::clone(model), &source_key, &destination_key)?;
        for record in batch {
            if let (Some(s), Some(d)) = (record.key_of(&source.name), record.key_of(&destination.name)) {
                mtm.add_keys(s, d, Some(detached(record)));
            }
        }
        Ok(mtm)
    }

    fn join_key(&self, model: &ModelDef, pk: &FieldDef, side: &str) -> Result<JoinKey> {
        let assoc = pk.name.strip_suffix("ID").unwrap_or(&pk.name);
        let target = model
            .field_named(assoc)
            .and_then(FieldDef::relationship)
            .map(Relationship::target)
            .and_then(|t| self.registry.get(t))
            .ok_or_else(|| {
                Error::relationship(
                    RelationshipErrorKind::UnresolvedAssociation,
                    model.name(),
                    Some(&pk.name),
                    format!("Could not find assoc for {}.{}", model.name(), pk.name),
                )
            })?;
        match target.primary_keys().as_slice() {
            [target_pk] => Ok(JoinKey {
                join_column: pk.db_name.clone(),
                key: KeyRef::new(&target_pk.name, &target_pk.db_name),
            }),
            pks => Err(Error::relationship(
                RelationshipErrorKind::PrimaryKeyArity,
                model.name(),
                Some(&pk.name),
                format!(
                    "Expected {} model {} to have 1 primary field, but it has {}",
                    side,
                    target.name(),
                    pks.len()
                ),
            )),
        }
    }
}

/// Insert `record` without its key column and write back the key the store
/// assigned.
async fn insert_generated<C: Connection>(
    cx: &Cx,
    conn: &C,
    record: &mut Record,
    pk: &FieldDef,
) -> Outcome<Key, Error> {
    let (sql, params) = WriteOp::insert_generated(record, &pk.db_name).to_sql();
    tracing::trace!(sql = %sql, params = params.len(), "write");
    let id = try_outcome!(conn.insert(cx, &sql, &params).await);
    record.set(pk.name.clone(), id);
    Outcome::Ok(Key::Int(id))
}

/// The auto-increment primary key of `record`, when still unset.
fn generated_key(record: &Record) -> Option<FieldDef> {
    match record.model().primary_keys().as_slice() {
        [pk] if pk.auto_increment && record.key_of(&pk.name).is_none() => Some((*pk).clone()),
        _ => None,
    }
}

type AssignFuture<'f> = Pin<Box<dyn Future<Output = Outcome<usize, Error>> + Send + 'f>>;

/// Insert the keyless auto-increment records of the graph below `id` so
/// their keys exist before they are copied along edges. Belongs-to targets
/// go before their owner and the owner before its has_one/has_many
/// children. Assigned keys are recorded per node; returns the rows inserted.
fn assign_keys<'f, C: Connection>(
    cx: &'f Cx,
    conn: &'f C,
    info: &'f RecordInfo,
    id: NodeId,
    record: &'f mut Record,
    insert_self: bool,
    assigned: &'f mut [HashSet<Key>],
) -> AssignFuture<'f> {
    Box::pin(async move {
        let mut inserted = 0;
        let children = &info.node(id).children;

        for &child_id in children {
            let child = info.node(child_id);
            let Some(Relationship::BelongsTo {
                foreign_key,
                association_key,
                ..
            }) = &child.relationship
            else {
                continue;
            };
            let Some(target) = record.one_mut(&child.name) else {
                continue;
            };
            inserted +=
                try_outcome!(assign_keys(cx, conn, info, child_id, target, true, assigned).await);
            let value = target.get(&association_key.field).clone();
            record.set(foreign_key.field.clone(), value);
        }

        if insert_self {
            if let Some(pk) = generated_key(record) {
                let key = try_outcome!(insert_generated(cx, conn, record, &pk).await);
                tracing::debug!(
                    model = %record.model_name(),
                    key = %key,
                    "Inserted record with generated key"
                );
                assigned[id].insert(key);
                inserted += 1;
            }
        }

        for &child_id in children {
            let child = info.node(child_id);
            let copy_key = match &child.relationship {
                Some(
                    Relationship::HasOne {
                        foreign_key,
                        association_key,
                        ..
                    }
                    | Relationship::HasMany {
                        foreign_key,
                        association_key,
                        ..
                    },
                ) => Some((&foreign_key.field, record.get(&association_key.field).clone())),
                Some(Relationship::ManyToMany { .. }) => None,
                Some(Relationship::BelongsTo { .. }) | None => continue,
            };
            let Some(related) = record.related_mut(&child.name) else {
                continue;
            };
            let targets: Vec<&mut Record> = related.records_mut().collect();
            for target in targets {
                if let Some((field, value)) = &copy_key {
                    target.set((*field).clone(), value.clone());
                }
                inserted += try_outcome!(
                    assign_keys(cx, conn, info, child_id, target, true, assigned).await
                );
            }
        }
        Outcome::Ok(inserted)
    })
}

fn column_of(model: &ModelDef, field: &str) -> String {
    model
        .persisted_field(field)
        .map_or_else(|| to_db_name(field), |f| f.db_name.clone())
}

/// Fail unless every record is of the same model.
pub(crate) fn check_homogeneous<'r>(
    operation: &str,
    mut records: impl Iterator<Item = &'r Record>,
) -> Result<()> {
    let Some(first) = records.next() else {
        return Ok(());
    };
    match records.find(|r| r.model_name() != first.model_name()) {
        Some(other) => Err(Error::shape(format!(
            "{} expects records of a single model, got {} and {}",
            operation,
            first.model_name(),
            other.model_name()
        ))),
        None => Ok(()),
    }
}

/// Copy keys along every edge below `id` and gather records per node.
fn collect(
    info: &RecordInfo,
    id: NodeId,
    record: &mut Record,
    batches: &mut [Vec<Record>],
    joins: &mut [Option<ManyToMany>],
) {
    for &child_id in &info.node(id).children {
        let child = info.node(child_id);
        let Some(rel) = &child.relationship else {
            continue;
        };
        match rel {
            Relationship::HasOne {
                foreign_key,
                association_key,
                ..
            }
            | Relationship::HasMany {
                foreign_key,
                association_key,
                ..
            } => {
                let value = record.get(&association_key.field).clone();
                if let Some(related) = record.related_mut(&child.name) {
                    for target in related.records_mut() {
                        target.set(foreign_key.field.clone(), value.clone());
                        collect(info, child_id, target, batches, joins);
                    }
                }
            }
            Relationship::BelongsTo {
                foreign_key,
                association_key,
                ..
            } => {
                let mut value = None;
                if let Some(target) = record.one_mut(&child.name) {
                    collect(info, child_id, target, batches, joins);
                    value = Some(target.get(&association_key.field).clone());
                }
                if let Some(value) = value {
                    record.set(foreign_key.field.clone(), value);
                }
            }
            Relationship::ManyToMany { .. } => {
                let source = detached(record);
                if let Some(related) = record.related_mut(&child.name) {
                    if let Some(mtm) = joins[child_id].as_mut() {
                        mtm.touch(&source);
                    }
                    for target in related.records_mut() {
                        collect(info, child_id, target, batches, joins);
                        if let Some(mtm) = joins[child_id].as_mut() {
                            mtm.add(&source, target);
                        }
                    }
                }
            }
        }
    }
    batches[id].push(detached(record));
}
