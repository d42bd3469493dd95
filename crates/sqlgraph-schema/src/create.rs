//! DDL generation for model tables.

use sqlgraph_core::{Error, ModelDef, Result, SchemaErrorKind, quote_ident, quote_list};

/// `CREATE TABLE` statement for a model.
///
/// One column per persisted field (squashed fields flattened), primary-key
/// columns marked `NOT NULL`, and a table-level `PRIMARY KEY` over every key
/// column. Fails for unsupported field types and for models without keys.
pub fn create_table_sql(model: &ModelDef) -> Result<String> {
    let fields = model.persisted_fields();
    let mut columns = Vec::with_capacity(fields.len() + 1);
    let mut pks = Vec::new();

    for field in fields {
        let sql_type = field.ty.sql_type().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnsupportedFieldType,
                format!(
                    "Unsupported model field type: {} (field {} in model {})",
                    field.ty.name(),
                    field.name,
                    model.name()
                ),
            )
        })?;
        let modifier = if field.primary_key {
            pks.push(field.db_name.as_str());
            " NOT NULL"
        } else {
            ""
        };
        columns.push(format!(
            "{} {}{}",
            quote_ident(&field.db_name),
            sql_type,
            modifier
        ));
    }

    if pks.is_empty() {
        return Err(Error::schema(
            SchemaErrorKind::NoPrimaryKey,
            format!("Model {} has no primary keys", model.name()),
        ));
    }
    columns.push(format!("PRIMARY KEY ({})", quote_list(&pks)));

    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_ident(model.table_name()),
        columns.join(", ")
    ))
}

/// `DROP TABLE` statement.
pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE {}", quote_ident(table))
}

/// Name of the scratch table a migration copies rows through.
pub fn migration_table_name(table: &str) -> String {
    format!("__hades_migrate__{}__", table)
}

/// Snapshot `table` into `temp`, columns and rows.
pub fn copy_table_sql(table: &str, temp: &str) -> String {
    format!(
        "CREATE TABLE {} AS SELECT * FROM {}",
        quote_ident(temp),
        quote_ident(table)
    )
}

/// Copy `columns` back from `temp` into the recreated `table`.
pub fn copy_back_sql<S: AsRef<str>>(table: &str, temp: &str, columns: &[S]) -> String {
    let list = quote_list(columns);
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(table),
        list,
        list,
        quote_ident(temp)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgraph_core::{FieldDef, FieldType};

    #[test]
    fn test_create_table_sql() {
        let model = ModelDef::new("User")
            .field(FieldDef::new("ID", FieldType::Int64).primary_key())
            .field(FieldDef::new("FirstName", FieldType::Text))
            .field(FieldDef::new("Alive", FieldType::Bool))
            .field(FieldDef::new("HeartRate", FieldType::Float64))
            .field(FieldDef::new("BornAt", FieldType::Timestamp))
            .field(FieldDef::new("Ignored", FieldType::Other("map".into())).ignore());
        assert_eq!(
            create_table_sql(&model).unwrap(),
            "CREATE TABLE \"users\" (\"id\" INTEGER NOT NULL, \"first_name\" TEXT, \
             \"alive\" BOOLEAN, \"heart_rate\" REAL, \"born_at\" DATETIME, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_composite_key_and_squash() {
        let model = ModelDef::new("ProfileGame")
            .field(FieldDef::new("ProfileID", FieldType::Int64).primary_key().no_auto_increment())
            .field(FieldDef::new("GameID", FieldType::Int64).primary_key().no_auto_increment())
            .field(FieldDef::squash(
                "Stats",
                vec![FieldDef::new("Order", FieldType::Int64)],
            ));
        let sql = create_table_sql(&model).unwrap();
        assert!(sql.starts_with("CREATE TABLE \"profile_games\" ("));
        assert!(sql.contains("\"order\" INTEGER,"));
        assert!(sql.ends_with("PRIMARY KEY (\"profile_id\", \"game_id\"))"));
    }

    #[test]
    fn test_create_table_errors() {
        let no_pk = ModelDef::new("NoPk").field(FieldDef::new("Name", FieldType::Text));
        let err = create_table_sql(&no_pk).unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::NoPrimaryKey));
        assert!(err.to_string().contains("Model NoPk has no primary keys"));

        let bad = ModelDef::new("Bad")
            .field(FieldDef::new("ID", FieldType::Int64).primary_key())
            .field(FieldDef::new("Tags", FieldType::Other("map".into())));
        let err = create_table_sql(&bad).unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::UnsupportedFieldType));
    }

    #[test]
    fn test_migration_statements() {
        let temp = migration_table_name("users");
        assert_eq!(temp, "__hades_migrate__users__");
        assert_eq!(
            copy_table_sql("users", &temp),
            "CREATE TABLE \"__hades_migrate__users__\" AS SELECT * FROM \"users\""
        );
        assert_eq!(
            copy_back_sql("users", &temp, &["id", "first_name"]),
            "INSERT INTO \"users\" (\"id\", \"first_name\") SELECT \"id\", \"first_name\" FROM \"__hades_migrate__users__\""
        );
        assert_eq!(drop_table_sql("users"), "DROP TABLE \"users\"");
    }
}
