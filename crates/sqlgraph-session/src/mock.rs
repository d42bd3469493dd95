//! Recording connection used by the engine tests.

use asupersync::{Cx, Outcome};
use sqlgraph_core::{
    Connection, Error, FieldDef, FieldType, ModelDef, ModelRegistry, QueryError, QueryErrorKind,
    Row, Value,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    /// (sql prefix, rows returned to matching queries)
    responses: Vec<(String, Vec<Row>)>,
    queries: Vec<(String, Vec<Value>)>,
    executed: Vec<(String, Vec<Value>)>,
    /// Statements starting with this prefix fail.
    fail_on: Option<String>,
    /// Last key handed out by `insert`.
    last_id: i64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queries whose SQL starts with `prefix` return `rows`.
    pub(crate) fn respond(&self, prefix: &str, rows: Vec<Row>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .responses
            .push((prefix.to_string(), rows));
    }

    pub(crate) fn fail_on(&self, prefix: &str) {
        self.state.lock().expect("lock poisoned").fail_on = Some(prefix.to_string());
    }

    pub(crate) fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").queries.clone()
    }

    pub(crate) fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").executed.clone()
    }

    pub(crate) fn executed_sql(&self) -> Vec<String> {
        self.executed().into_iter().map(|(sql, _)| sql).collect()
    }

    fn failure(state: &MockState, sql: &str) -> Option<Error> {
        state
            .fail_on
            .as_deref()
            .filter(|prefix| sql.starts_with(prefix))
            .map(|_| {
                Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(sql.to_string()),
                    message: "mock failure".to_string(),
                    source: None,
                })
            })
    }
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let mut state = self.state.lock().expect("lock poisoned");
        state.queries.push((sql.to_string(), params.to_vec()));
        let result = match Self::failure(&state, sql) {
            Some(e) => Err(e),
            None => Ok(state
                .responses
                .iter()
                .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default()),
        };
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let mut state = self.state.lock().expect("lock poisoned");
        state.executed.push((sql.to_string(), params.to_vec()));
        let result = match Self::failure(&state, sql) {
            Some(e) => Err(e),
            None => Ok(1),
        };
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let mut state = self.state.lock().expect("lock poisoned");
        state.executed.push((sql.to_string(), params.to_vec()));
        let result = match Self::failure(&state, sql) {
            Some(e) => Err(e),
            None => {
                state.last_id += 1;
                Ok(state.last_id)
            }
        };
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}

pub(crate) fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub(crate) fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn id() -> FieldDef {
    FieldDef::new("ID", FieldType::Int64).primary_key()
}

/// Models shared by the engine tests.
pub(crate) fn registry() -> ModelRegistry {
    ModelRegistry::builder()
        .model(
            ModelDef::new("Programmer")
                .field(id())
                .field(FieldDef::new("Name", FieldType::Text))
                .field(FieldDef::has_many("Qualities", "Quality")),
        )
        .model(
            ModelDef::new("Quality")
                .field(id())
                .field(FieldDef::new("ProgrammerID", FieldType::Int64))
                .field(FieldDef::new("Position", FieldType::Int64))
                .field(FieldDef::new("Label", FieldType::Text))
                .field(FieldDef::belongs_to("Programmer", "Programmer")),
        )
        .model(
            ModelDef::new("Language")
                .field(id())
                .field(FieldDef::new("Name", FieldType::Text))
                .field(FieldDef::many_to_many("Words", "Word", "language_words")),
        )
        .model(
            ModelDef::new("Word")
                .field(FieldDef::new("ID", FieldType::Text).primary_key())
                .field(FieldDef::new("Comment", FieldType::Text)),
        )
        .model(
            ModelDef::new("LanguageWord")
                .field(FieldDef::new("LanguageID", FieldType::Int64).primary_key().no_auto_increment())
                .field(FieldDef::new("WordID", FieldType::Text).primary_key())
                .field(FieldDef::belongs_to("Language", "Language"))
                .field(FieldDef::belongs_to("Word", "Word")),
        )
        .model(
            ModelDef::new("Country")
                .field(id())
                .field(FieldDef::new("Name", FieldType::Text))
                .field(FieldDef::has_one("Specialty", "Specialty")),
        )
        .model(
            ModelDef::new("Specialty")
                .field(id())
                .field(FieldDef::new("CountryID", FieldType::Int64))
                .field(FieldDef::new("Name", FieldType::Text)),
        )
        .build()
        .expect("build test registry")
}
