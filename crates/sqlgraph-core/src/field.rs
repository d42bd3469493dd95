//! Field descriptors and semantic field types.

use crate::error::{Error, Result, TypeError};
use crate::identifiers::to_db_name;
use crate::relationship::{RelationKind, RelationSpec, Relationship};
use crate::value::Value;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Semantic type of a persisted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    Float32,
    Float64,
    Text,
    Timestamp,
    /// A type with no column mapping (maps, slices of scalars, ...).
    Other(String),
}

impl FieldType {
    /// Column type used when creating a table, or `None` when unsupported.
    pub fn sql_type(&self) -> Option<&'static str> {
        match self {
            FieldType::Int8
            | FieldType::Int16
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt8
            | FieldType::UInt16
            | FieldType::UInt32
            | FieldType::UInt64 => Some("INTEGER"),
            FieldType::Bool => Some("BOOLEAN"),
            FieldType::Float32 | FieldType::Float64 => Some("REAL"),
            FieldType::Text => Some("TEXT"),
            FieldType::Timestamp => Some("DATETIME"),
            FieldType::Other(_) => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.sql_type() == Some("INTEGER")
    }

    pub fn name(&self) -> &str {
        match self {
            FieldType::Int8 => "i8",
            FieldType::Int16 => "i16",
            FieldType::Int32 => "i32",
            FieldType::Int64 => "i64",
            FieldType::UInt8 => "u8",
            FieldType::UInt16 => "u16",
            FieldType::UInt32 => "u32",
            FieldType::UInt64 => "u64",
            FieldType::Bool => "bool",
            FieldType::Float32 => "f32",
            FieldType::Float64 => "f64",
            FieldType::Text => "string",
            FieldType::Timestamp => "timestamp",
            FieldType::Other(name) => name,
        }
    }

    /// Convert a value read from the store into this field's canonical form.
    ///
    /// Integers become `BigInt`, floats `Double`, DATETIME text is parsed into
    /// `Timestamp`. NULL stays NULL for every type.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |expected: &'static str, value: &Value| {
            Error::Type(TypeError {
                expected,
                actual: value.type_name().to_string(),
                column: None,
            })
        };
        match self {
            FieldType::Int8
            | FieldType::Int16
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt8
            | FieldType::UInt16
            | FieldType::UInt32
            | FieldType::UInt64 => match value.as_i64() {
                Some(v) => Ok(Value::BigInt(v)),
                None => match value.key() {
                    Some(crate::Key::Int(v)) => Ok(Value::BigInt(v)),
                    _ => Err(mismatch("integer", &value)),
                },
            },
            FieldType::Bool => value
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| mismatch("bool", &value)),
            FieldType::Float32 | FieldType::Float64 => value
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| mismatch("float", &value)),
            FieldType::Text => match value {
                Value::Text(_) => Ok(value),
                Value::Bytes(b) => String::from_utf8(b)
                    .map(Value::Text)
                    .map_err(|e| Error::Type(TypeError {
                        expected: "utf-8 text",
                        actual: e.to_string(),
                        column: None,
                    })),
                other => Ok(Value::Text(other.to_string())),
            },
            FieldType::Timestamp => match &value {
                Value::Timestamp(_) => Ok(value),
                Value::Text(s) => parse_timestamp(s)
                    .map(Value::timestamp)
                    .ok_or_else(|| mismatch("timestamp", &value)),
                other => other
                    .as_i64()
                    .map(Value::Timestamp)
                    .ok_or_else(|| mismatch("timestamp", &value)),
            },
            FieldType::Other(_) => Ok(value),
        }
    }

    /// Best-effort canonical form, used when comparing values.
    pub fn normalize(&self, value: &Value) -> Value {
        self.coerce(value.clone())
            .unwrap_or_else(|_| value.clone())
    }
}

/// Parse the textual DATETIME forms SQLite hands back.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Render a timestamp the way it is stored in DATETIME columns.
pub fn format_timestamp(micros: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
}

/// Descriptor of one model field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name as used in records (`FirstName`)
    pub name: String,
    /// Column name (`first_name`)
    pub db_name: String,
    pub ty: FieldType,
    pub primary_key: bool,
    /// Integer primary keys are auto-increment unless opted out.
    pub auto_increment: bool,
    /// Ignored fields are neither persisted nor walked.
    pub ignored: bool,
    /// Nested fields of an embedded struct flattened into the parent.
    pub squashed: Vec<FieldDef>,
    pub(crate) relation: Option<RelationSpec>,
    pub(crate) relationship: Option<Relationship>,
}

impl FieldDef {
    /// A persisted scalar field.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            db_name: to_db_name(&name),
            name,
            ty,
            primary_key: false,
            auto_increment: false,
            ignored: false,
            squashed: Vec::new(),
            relation: None,
            relationship: None,
        }
    }

    /// An embedded struct whose fields are stored in the parent's table.
    pub fn squash(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let mut field = Self::new(name, FieldType::Other("struct".to_string()));
        field.squashed = fields;
        field
    }

    fn relation(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        let mut field = Self::new(name, FieldType::Other("relation".to_string()));
        field.relation = Some(RelationSpec {
            kind,
            target: target.into(),
            foreign_key: None,
            association_key: None,
        });
        field
    }

    /// The parent holds `<name>ID` pointing at one `target`.
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::relation(name, RelationKind::BelongsTo, target)
    }

    /// One `target` holds `<Parent>ID` pointing back at the parent.
    pub fn has_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::relation(name, RelationKind::HasOne, target)
    }

    /// Many `target`s hold `<Parent>ID` pointing back at the parent.
    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::relation(name, RelationKind::HasMany, target)
    }

    /// Parent and `target` are linked through rows of `join_table`.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        Self::relation(
            name,
            RelationKind::ManyToMany {
                join_table: join_table.into(),
            },
            target,
        )
    }

    /// Mark as (part of) the primary key. Integer keys become auto-increment.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.auto_increment = self.ty.is_integer();
        self
    }

    /// Opt out of auto-increment for an integer primary key.
    pub fn no_auto_increment(mut self) -> Self {
        self.auto_increment = false;
        self
    }

    /// Exclude from persistence and walking.
    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Override the column name.
    pub fn column(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// Override the foreign key field of a relationship.
    pub fn foreign_key(mut self, field: impl Into<String>) -> Self {
        if let Some(spec) = self.relation.as_mut() {
            spec.foreign_key = Some(field.into());
        }
        self
    }

    /// Override the association key field of a relationship.
    pub fn association_key(mut self, field: impl Into<String>) -> Self {
        if let Some(spec) = self.relation.as_mut() {
            spec.association_key = Some(field.into());
        }
        self
    }

    /// A plain column: not ignored, not squashed, not a relationship.
    pub fn is_normal(&self) -> bool {
        !self.ignored && self.squashed.is_empty() && self.relation.is_none()
    }

    pub fn is_squashed(&self) -> bool {
        !self.ignored && !self.squashed.is_empty()
    }

    /// The declared relationship, before resolution.
    pub fn relation_spec(&self) -> Option<&RelationSpec> {
        self.relation.as_ref()
    }

    /// The resolved relationship, once the registry is built.
    pub fn relationship(&self) -> Option<&Relationship> {
        if self.ignored {
            return None;
        }
        self.relationship.as_ref()
    }
}
