//! Model definitions and the dynamic records that instantiate them.
//!
//! A [`ModelDef`] is the explicit, declared field list of one model. A
//! [`Record`] holds field values by field name plus loaded associations by
//! relationship field name; it is what every engine reads and writes.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::field::FieldDef;
use crate::identifiers::table_name_for;
use crate::row::Row;
use crate::value::{Key, Value};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Declared shape of one model.
#[derive(Debug, Clone)]
pub struct ModelDef {
    name: String,
    table: String,
    pub(crate) fields: Vec<FieldDef>,
}

impl ModelDef {
    /// Start a model; the table defaults to the pluralized snake_case name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: table_name_for(&name),
            name,
            fields: Vec::new(),
        }
    }

    /// Override the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Append a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Top-level declared fields in order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a top-level field by name.
    pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Persisted columns in declaration order, squashed fields flattened.
    pub fn persisted_fields(&self) -> Vec<&FieldDef> {
        fn collect<'a>(fields: &'a [FieldDef], out: &mut Vec<&'a FieldDef>) {
            for field in fields {
                if field.is_squashed() {
                    collect(&field.squashed, out);
                } else if field.is_normal() {
                    out.push(field);
                }
            }
        }
        let mut out = Vec::with_capacity(self.fields.len());
        collect(&self.fields, &mut out);
        out
    }

    /// Persisted field by field name.
    pub fn persisted_field(&self, name: &str) -> Option<&FieldDef> {
        self.persisted_fields().into_iter().find(|f| f.name == name)
    }

    /// Persisted field by column name.
    pub fn field_for_column(&self, column: &str) -> Option<&FieldDef> {
        self.persisted_fields()
            .into_iter()
            .find(|f| f.db_name == column)
    }

    pub fn primary_keys(&self) -> Vec<&FieldDef> {
        self.persisted_fields()
            .into_iter()
            .filter(|f| f.primary_key)
            .collect()
    }

    /// Fields carrying a resolved relationship.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.relationship().is_some())
    }

    /// Column names of every persisted field.
    pub fn column_names(&self) -> Vec<String> {
        self.persisted_fields()
            .into_iter()
            .map(|f| f.db_name.clone())
            .collect()
    }
}

/// Loaded association slot of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Related {
    /// Iterate the records held, whatever the arity.
    pub fn records(&self) -> Box<dyn Iterator<Item = &Record> + '_> {
        match self {
            Related::One(one) => Box::new(one.iter().map(|r| &**r)),
            Related::Many(many) => Box::new(many.iter()),
        }
    }

    pub fn records_mut(&mut self) -> Box<dyn Iterator<Item = &mut Record> + '_> {
        match self {
            Related::One(one) => Box::new(one.iter_mut().map(|r| &mut **r)),
            Related::Many(many) => Box::new(many.iter_mut()),
        }
    }
}

static NULL: Value = Value::Null;

/// An instance of a model: field values plus loaded associations.
#[derive(Clone)]
pub struct Record {
    model: Arc<ModelDef>,
    values: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl Record {
    /// Create an empty record; unset fields read as NULL.
    pub fn new(model: Arc<ModelDef>) -> Self {
        Self {
            model,
            values: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Hydrate a record from a result row, coercing each column to its field type.
    pub fn from_row(model: Arc<ModelDef>, row: &Row) -> Result<Self> {
        let mut values = BTreeMap::new();
        for field in model.persisted_fields() {
            let Some(value) = row.get_by_name(&field.db_name) else {
                continue;
            };
            let value = field.ty.coerce(value.clone()).map_err(|e| match e {
                Error::Type(te) => Error::Type(TypeError {
                    column: Some(format!("{}.{}", model.table_name(), field.db_name)),
                    ..te
                }),
                e => e,
            })?;
            values.insert(field.name.clone(), value);
        }
        Ok(Self {
            model,
            values,
            relations: BTreeMap::new(),
        })
    }

    pub fn model(&self) -> &ModelDef {
        &self.model
    }

    pub fn model_arc(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Field value, NULL when unset.
    pub fn get(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set field values explicitly held by this record.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field value normalized through its declared type.
    pub fn normalized(&self, field: &str) -> Value {
        let value = self.get(field);
        match self.model.persisted_field(field) {
            Some(def) => def.ty.normalize(value),
            None => value.clone(),
        }
    }

    /// Hashable key of any field.
    pub fn key_of(&self, field: &str) -> Option<Key> {
        self.normalized(field).key()
    }

    /// Key of a single-primary-key model.
    pub fn primary_key(&self) -> Option<Key> {
        match self.model.primary_keys().as_slice() {
            [pk] => self.key_of(&pk.name),
            _ => None,
        }
    }

    /// Loaded association slot, if any.
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn related_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    /// The associated record of a single-valued relation.
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name) {
            Some(Related::One(Some(r))) => Some(&**r),
            _ => None,
        }
    }

    pub fn one_mut(&mut self, name: &str) -> Option<&mut Record> {
        match self.relations.get_mut(name) {
            Some(Related::One(Some(r))) => Some(&mut **r),
            _ => None,
        }
    }

    /// The associated records of a collection relation (empty when unloaded).
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(Related::Many(v)) => v,
            _ => &[],
        }
    }

    pub fn many_mut(&mut self, name: &str) -> Option<&mut Vec<Record>> {
        match self.relations.get_mut(name) {
            Some(Related::Many(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_one(&mut self, name: impl Into<String>, record: Option<Record>) {
        self.relations
            .insert(name.into(), Related::One(record.map(Box::new)));
    }

    pub fn set_many(&mut self, name: impl Into<String>, records: Vec<Record>) {
        self.relations.insert(name.into(), Related::Many(records));
    }

    pub fn with_one(mut self, name: impl Into<String>, record: Record) -> Self {
        self.set_one(name, Some(record));
        self
    }

    pub fn with_many(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.set_many(name, records);
        self
    }

    /// Render the record graph as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for field in self.model.persisted_fields() {
            map.insert(field.name.clone(), value_to_json(self.get(&field.name)));
        }
        for (name, related) in &self.relations {
            let json = match related {
                Related::One(None) => serde_json::Value::Null,
                Related::One(Some(r)) => r.to_json(),
                Related::Many(v) => v.iter().map(Record::to_json).collect(),
            };
            map.insert(name.clone(), json);
        }
        serde_json::Value::Object(map)
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Float(_) | Value::Double(_) => value
            .as_f64()
            .map_or(serde_json::Value::Null, serde_json::Value::from),
        Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => value
            .as_i64()
            .map_or(serde_json::Value::Null, serde_json::Value::from),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => b.iter().copied().collect(),
        Value::Timestamp(_) => value
            .as_datetime()
            .map_or(serde_json::Value::Null, |dt| {
                serde_json::Value::String(dt.to_rfc3339())
            }),
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.model.name() == other.model.name()
            && self.values == other.values
            && self.relations == other.relations
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model.name())
            .field("values", &self.values)
            .field("relations", &self.relations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    fn user() -> Arc<ModelDef> {
        Arc::new(
            ModelDef::new("User")
                .field(FieldDef::new("ID", FieldType::Int64).primary_key())
                .field(FieldDef::new("FirstName", FieldType::Text))
                .field(FieldDef::squash(
                    "Meta",
                    vec![FieldDef::new("Nickname", FieldType::Text)],
                ))
                .field(FieldDef::new("Scratch", FieldType::Text).ignore())
                .field(FieldDef::has_many("Posts", "Post")),
        )
    }

    #[test]
    fn test_persisted_fields_flatten_squashed() {
        let model = user();
        let names: Vec<_> = model
            .persisted_fields()
            .into_iter()
            .map(|f| f.db_name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "first_name", "nickname"]);
        assert_eq!(model.table_name(), "users");
        assert_eq!(model.primary_keys().len(), 1);
    }

    #[test]
    fn test_unset_fields_read_null() {
        let record = Record::new(user()).with("ID", 3);
        assert_eq!(record.get("FirstName"), &Value::Null);
        assert_eq!(record.primary_key(), Some(Key::Int(3)));
        assert!(record.many("Posts").is_empty());
    }

    #[test]
    fn test_from_row_coerces_by_field_type() {
        let row = Row::new(
            vec!["id".into(), "first_name".into(), "unknown".into()],
            vec![Value::Int(9), Value::Text("Ann".into()), Value::Null],
        );
        let record = Record::from_row(user(), &row).unwrap();
        assert_eq!(record.get("ID"), &Value::BigInt(9));
        assert_eq!(record.get("FirstName"), &Value::Text("Ann".into()));
        assert_eq!(record.get("Nickname"), &Value::Null);
    }

    #[test]
    fn test_relations_and_json() {
        let model = user();
        let mut record = Record::new(Arc::clone(&model)).with("ID", 1).with("FirstName", "Ann");
        record.set_many("Posts", vec![]);
        let json = record.to_json();
        assert_eq!(json["ID"], serde_json::json!(1));
        assert_eq!(json["FirstName"], serde_json::json!("Ann"));
        assert_eq!(json["Posts"], serde_json::json!([]));
        assert!(json.get("Scratch").is_none());
    }
}
