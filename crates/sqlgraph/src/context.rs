//! The `Context`: a model registry plus configuration, and the entry point
//! for every graph operation.

use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use sqlgraph_core::{
    Connection, Error, ModelDef, ModelRegistry, Record, Result, Row, TableColumn, Value,
    quote_ident, try_outcome, try_result,
};
use sqlgraph_schema::{AutoMigrateStats, SchemaSynchronizer};
use sqlgraph_session::{
    DEFAULT_PAGE_SIZE, Filter, PreloadEngine, PreloadParams, SaveEngine, SaveParams, SaveStats,
    Search,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Context configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of keys bound per `IN (...)` fetch.
    pub page_size: usize,
    /// Log every statement at debug level.
    pub log_sql: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            log_sql: false,
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }
}

/// Registry, configuration and running save statistics.
///
/// A `Context` holds no connection. Every operation borrows the caller's
/// connection for its duration and runs its statements on it in order.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = Context::new(registry);
/// ctx.auto_migrate(&cx, &conn).await;
/// ctx.save(&cx, &conn, SaveParams::new(&mut users)).await;
/// ```
#[derive(Debug)]
pub struct Context {
    registry: Arc<ModelRegistry>,
    config: ContextConfig,
    stats: Mutex<SaveStats>,
}

impl Context {
    pub fn new(registry: impl Into<Arc<ModelRegistry>>) -> Self {
        Self::with_config(registry, ContextConfig::default())
    }

    pub fn with_config(registry: impl Into<Arc<ModelRegistry>>, config: ContextConfig) -> Self {
        Self {
            registry: registry.into(),
            config,
            stats: Mutex::new(SaveStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Save counters accumulated since creation or the last reset.
    pub fn stats(&self) -> SaveStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = SaveStats::default();
    }

    /// A new, empty record of `model`.
    pub fn record(&self, model: &str) -> Result<Record> {
        self.registry.record(model)
    }

    fn model(&self, name: &str) -> Result<&Arc<ModelDef>> {
        self.registry.model(name)
    }

    fn traced<'c, C: Connection>(&self, conn: &'c C) -> Traced<'c, C> {
        Traced {
            inner: conn,
            log_sql: self.config.log_sql,
        }
    }

    fn record_stats(&self, stats: SaveStats) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) += stats;
    }

    // ==================== Schema ====================

    /// Create or migrate the table of every registered model.
    pub async fn auto_migrate<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<AutoMigrateStats, Error> {
        let mut stats = AutoMigrateStats::default();
        try_outcome!(self.auto_migrate_ex(cx, conn, &mut stats).await);
        Outcome::Ok(stats)
    }

    /// Like [`auto_migrate`](Self::auto_migrate), counting into `stats`.
    ///
    /// Tables are handled in registration order. On failure `stats` still
    /// reflects the tables handled before the failing one.
    pub async fn auto_migrate_ex<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        stats: &mut AutoMigrateStats,
    ) -> Outcome<(), Error> {
        let conn = self.traced(conn);
        let synchronizer = SchemaSynchronizer::new(&self.registry);
        for model in self.registry.models() {
            let action = try_outcome!(synchronizer.sync_table(cx, &conn, model).await);
            stats.record(action);
        }
        tracing::info!(%stats, "Auto-migrated");
        Outcome::Ok(())
    }

    // ==================== Graph operations ====================

    /// Save a record graph, see [`SaveEngine::save`].
    pub async fn save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        params: SaveParams<'_>,
    ) -> Outcome<SaveStats, Error> {
        let conn = self.traced(conn);
        let stats = try_outcome!(
            SaveEngine::new(&self.registry)
                .page_size(self.config.page_size)
                .save(cx, &conn, params)
                .await
        );
        self.record_stats(stats);
        Outcome::Ok(stats)
    }

    /// Save a single record, ignoring its associations.
    pub async fn save_one<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        record: &mut Record,
    ) -> Outcome<SaveStats, Error> {
        let conn = self.traced(conn);
        let stats = try_outcome!(
            SaveEngine::new(&self.registry)
                .page_size(self.config.page_size)
                .save_rows(cx, &conn, std::slice::from_mut(record), &[])
                .await
        );
        self.record_stats(stats);
        Outcome::Ok(stats)
    }

    /// Load associations into records, see [`PreloadEngine::preload`].
    pub async fn preload<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        params: PreloadParams<'_>,
    ) -> Outcome<(), Error> {
        let conn = self.traced(conn);
        PreloadEngine::new(&self.registry)
            .page_size(self.config.page_size)
            .preload(cx, &conn, params)
            .await
    }

    // ==================== Queries ====================

    /// Records of `model` matching `filter`, shaped by `search`.
    pub async fn select<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &str,
        filter: Option<&Filter>,
        search: Option<&Search>,
    ) -> Outcome<Vec<Record>, Error> {
        let model = try_result!(self.model(model));
        let (mut sql, params) = where_clause(
            format!("SELECT * FROM {}", quote_ident(model.table_name())),
            filter,
        );
        if let Some(search) = search {
            sql = search.apply(&sql);
        }
        let rows = try_outcome!(self.traced(conn).query(cx, &sql, &params).await);
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(try_result!(Record::from_row(Arc::clone(model), row)));
        }
        Outcome::Ok(records)
    }

    /// The first record of `model` matching `filter`, if any.
    pub async fn select_one<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &str,
        filter: Option<&Filter>,
        search: Option<&Search>,
    ) -> Outcome<Option<Record>, Error> {
        let search = search.cloned().unwrap_or_default().limit(1);
        let records = try_outcome!(self.select(cx, conn, model, filter, Some(&search)).await);
        Outcome::Ok(records.into_iter().next())
    }

    /// Number of rows of `model` matching `filter`.
    pub async fn count<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &str,
        filter: Option<&Filter>,
    ) -> Outcome<i64, Error> {
        let model = try_result!(self.model(model));
        let (sql, params) = where_clause(
            format!("SELECT COUNT(*) FROM {}", quote_ident(model.table_name())),
            filter,
        );
        let row = try_outcome!(self.traced(conn).query_one(cx, &sql, &params).await);
        match row {
            Some(row) => Outcome::Ok(try_result!(row.get_as::<i64>(0))),
            None => Outcome::Ok(0),
        }
    }

    /// Delete the rows of `model` matching `filter`; returns rows affected.
    pub async fn delete<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        model: &str,
        filter: Option<&Filter>,
    ) -> Outcome<u64, Error> {
        let model = try_result!(self.model(model));
        let (sql, params) = where_clause(
            format!("DELETE FROM {}", quote_ident(model.table_name())),
            filter,
        );
        self.traced(conn).execute(cx, &sql, &params).await
    }

    /// Execute a raw statement.
    pub async fn exec<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        sql: &str,
        params: &[Value],
    ) -> Outcome<u64, Error> {
        self.traced(conn).execute(cx, sql, params).await
    }

    /// Run a raw query.
    pub async fn query<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Row>, Error> {
        self.traced(conn).query(cx, sql, params).await
    }
}

fn where_clause(mut sql: String, filter: Option<&Filter>) -> (String, Vec<Value>) {
    match filter {
        Some(filter) => {
            let (clause, params) = filter.to_sql();
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            (sql, params)
        }
        None => (sql, Vec::new()),
    }
}

/// Connection wrapper that logs statements when `log_sql` is set.
struct Traced<'c, C> {
    inner: &'c C,
    log_sql: bool,
}

impl<C: Connection> Connection for Traced<'_, C> {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", sql = %sql, params = ?params, "query");
        }
        self.inner.query(cx, sql, params)
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", sql = %sql, params = ?params, "execute");
        }
        self.inner.execute(cx, sql, params)
    }

    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", sql = %sql, params = ?params, "insert");
        }
        self.inner.insert(cx, sql, params)
    }

    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", sql = %sql, params = ?params, "query_one");
        }
        self.inner.query_one(cx, sql, params)
    }

    fn table_columns(
        &self,
        cx: &Cx,
        table: &str,
    ) -> impl Future<Output = Outcome<Vec<TableColumn>, Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", table = %table, "table_columns");
        }
        self.inner.table_columns(cx, table)
    }

    fn set_foreign_keys(
        &self,
        cx: &Cx,
        enabled: bool,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", enabled, "set_foreign_keys");
        }
        self.inner.set_foreign_keys(cx, enabled)
    }

    fn savepoint(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", name = %name, "savepoint");
        }
        self.inner.savepoint(cx, name)
    }

    fn release(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", name = %name, "release");
        }
        self.inner.release(cx, name)
    }

    fn rollback_to(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        if self.log_sql {
            tracing::debug!(target: "sqlgraph::sql", name = %name, "rollback_to");
        }
        self.inner.rollback_to(cx, name)
    }
}
