//! Auto-migration: bring every registered table in line with its model.
//!
//! Tables are never altered in place. A diverged table is snapshotted into a
//! scratch table, dropped, recreated from the model and refilled with the
//! columns both shapes share, all inside one savepoint so that a failure
//! leaves the original table untouched.

use crate::create::{
    copy_back_sql, copy_table_sql, create_table_sql, drop_table_sql, migration_table_name,
};
use crate::introspect::{TableState, inspect};
use asupersync::{Cx, Outcome};
use serde::Serialize;
use sqlgraph_core::{
    Connection, Error, ModelDef, ModelRegistry, SchemaError, SchemaErrorKind, try_outcome,
    try_result,
};
use std::fmt;

const SAVEPOINT: &str = "sqlgraph_auto_migrate";

/// What happened to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    Created,
    Migrated,
    Current,
}

/// Counters reported by an auto-migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoMigrateStats {
    /// Tables that did not exist and were created.
    pub created: usize,
    /// Tables that were rebuilt because their columns changed.
    pub migrated: usize,
    /// Tables already matching their model.
    pub current: usize,
}

impl AutoMigrateStats {
    pub fn record(&mut self, action: TableAction) {
        match action {
            TableAction::Created => self.created += 1,
            TableAction::Migrated => self.migrated += 1,
            TableAction::Current => self.current += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.migrated + self.current
    }
}

impl fmt::Display for AutoMigrateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} migrated, {} current",
            self.created, self.migrated, self.current
        )
    }
}

/// Synchronizes the tables of every model in a registry.
#[derive(Debug, Clone, Copy)]
pub struct SchemaSynchronizer<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> SchemaSynchronizer<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Synchronize every registered model, in registration order.
    ///
    /// Stops at the first failing table; tables handled before it keep
    /// their changes.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn sync_all<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<AutoMigrateStats, Error> {
        let mut stats = AutoMigrateStats::default();
        for model in self.registry.models() {
            let action = try_outcome!(self.sync_table(cx, conn, model).await);
            stats.record(action);
        }
        tracing::info!(
            created = stats.created,
            migrated = stats.migrated,
            current = stats.current,
            "Auto-migration finished"
        );
        Outcome::Ok(stats)
    }

    /// Synchronize the table of one model.
    pub async fn sync_table<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &ModelDef,
    ) -> Outcome<TableAction, Error> {
        let table = model.table_name();
        match try_outcome!(inspect(cx, conn, model).await) {
            TableState::Absent => {
                let sql = try_result!(create_table_sql(model));
                tracing::debug!(table = %table, "Creating table");
                try_outcome!(conn.execute(cx, &sql, &[]).await);
                Outcome::Ok(TableAction::Created)
            }
            TableState::Current => {
                tracing::trace!(table = %table, "Table is current");
                Outcome::Ok(TableAction::Current)
            }
            TableState::Diverged { common } => {
                tracing::debug!(table = %table, kept = common.len(), "Rebuilding table");
                match self.migrate_table(cx, conn, model, &common).await {
                    Outcome::Ok(()) => Outcome::Ok(TableAction::Migrated),
                    Outcome::Err(e) => Outcome::Err(migration_error(table, e)),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
        }
    }

    async fn migrate_table<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &ModelDef,
        common: &[String],
    ) -> Outcome<(), Error> {
        // Validate the new shape before anything is touched.
        let create = try_result!(create_table_sql(model));

        // SQLite ignores this pragma inside a transaction, so it brackets the savepoint.
        let foreign_keys = try_outcome!(foreign_keys_enabled(cx, conn).await);
        if foreign_keys {
            try_outcome!(conn.set_foreign_keys(cx, false).await);
        }

        let mut outcome = conn.savepoint(cx, SAVEPOINT).await;
        if matches!(outcome, Outcome::Ok(())) {
            outcome = match rebuild(cx, conn, model.table_name(), &create, common).await {
                Outcome::Ok(()) => conn.release(cx, SAVEPOINT).await,
                failed => {
                    if let Outcome::Err(e) = conn.rollback_to(cx, SAVEPOINT).await {
                        tracing::warn!(error = %e, "Rolling back failed migration failed");
                    }
                    failed
                }
            };
        }

        if foreign_keys {
            let restored = conn.set_foreign_keys(cx, true).await;
            if matches!(outcome, Outcome::Ok(())) {
                return restored;
            }
        }
        outcome
    }
}

async fn rebuild<C: Connection>(
    cx: &Cx,
    conn: &C,
    table: &str,
    create: &str,
    common: &[String],
) -> Outcome<(), Error> {
    let temp = migration_table_name(table);
    let mut statements = vec![
        copy_table_sql(table, &temp),
        drop_table_sql(table),
        create.to_string(),
    ];
    if !common.is_empty() {
        statements.push(copy_back_sql(table, &temp, common));
    }
    statements.push(drop_table_sql(&temp));

    for sql in &statements {
        tracing::trace!(sql = %sql, "migration step");
        try_outcome!(conn.execute(cx, sql, &[]).await);
    }
    Outcome::Ok(())
}

async fn foreign_keys_enabled<C: Connection>(cx: &Cx, conn: &C) -> Outcome<bool, Error> {
    let row = try_outcome!(conn.query_one(cx, "PRAGMA foreign_keys", &[]).await);
    Outcome::Ok(
        row.and_then(|r| r.get(0).and_then(sqlgraph_core::Value::as_i64))
            .is_some_and(|v| v != 0),
    )
}

fn migration_error(table: &str, e: Error) -> Error {
    Error::Schema(SchemaError {
        kind: SchemaErrorKind::Migration,
        message: format!("Failed to migrate table {}: {}", table, e),
        source: Some(Box::new(e)),
    })
}
