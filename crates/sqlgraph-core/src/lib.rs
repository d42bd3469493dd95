//! Core types and traits for sqlgraph.
//!
//! This crate provides the vocabulary shared by every other sqlgraph crate:
//!
//! - `Value`/`Key` dynamic values and the hashable keys derived from them
//! - `FieldDef`/`ModelDef` explicit model declarations
//! - `Relationship` the resolved relationship sum type
//! - `ModelRegistry` the immutable model metadata provider
//! - `Record` dynamic model instances with loaded associations
//! - `Connection` the async statement execution boundary
//! - `Outcome`/`Cx` re-exports from asupersync for cancel-correct operations

pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod model;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod value;

pub use connection::{Connection, TableColumn};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind,
    RelationshipError, RelationshipErrorKind, Result, SchemaError, SchemaErrorKind, ShapeError,
    TransactionError, TransactionErrorKind, TypeError,
};
pub use field::{FieldDef, FieldType, format_timestamp, parse_timestamp};
pub use identifiers::{is_valid_identifier, quote_ident, quote_list, table_name_for, to_db_name};
pub use model::{ModelDef, Record, Related};
pub use registry::{ModelRegistry, RegistryBuilder};
pub use relationship::{JoinKey, KeyRef, RelationKind, RelationSpec, Relationship};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{Key, Value};

/// Unwrap `Outcome::Ok`, or return any other outcome from the enclosing
/// function (or async block) unchanged.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(v) => v,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}

/// Unwrap `Ok`, or return `Outcome::Err` from the enclosing function.
#[macro_export]
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            ::core::result::Result::Ok(v) => v,
            ::core::result::Result::Err(e) => return $crate::Outcome::Err(e.into()),
        }
    };
}
