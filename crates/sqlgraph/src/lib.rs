//! sqlgraph - object-graph persistence for relational stores.
//!
//! sqlgraph maps in-memory record graphs onto tables and adds what a bare
//! driver lacks:
//!
//! - Schema auto-migration that evolves live tables without losing rows
//! - Diff-based bulk saves that insert or update only what changed
//! - Many-to-many join-table reconciliation (full replace or add-only)
//! - Hierarchical preloading, one paged fetch per relationship level
//!
//! Models are declared explicitly through [`ModelDef`] and [`FieldDef`]
//! builders and collected in an immutable [`ModelRegistry`].
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlgraph::prelude::*;
//!
//! let registry = ModelRegistry::builder()
//!     .model(
//!         ModelDef::new("Programmer")
//!             .field(FieldDef::new("ID", FieldType::Int64).primary_key())
//!             .field(FieldDef::new("Name", FieldType::Text))
//!             .field(FieldDef::has_many("Qualities", "Quality")),
//!     )
//!     .model(
//!         ModelDef::new("Quality")
//!             .field(FieldDef::new("ID", FieldType::Int64).primary_key())
//!             .field(FieldDef::new("ProgrammerID", FieldType::Int64))
//!             .field(FieldDef::new("Label", FieldType::Text)),
//!     )
//!     .build()?;
//!
//! let ctx = Context::new(registry);
//! ctx.auto_migrate(&cx, &conn).await;
//!
//! let mut programmers = vec![
//!     ctx.record("Programmer")?
//!         .with("ID", 1)
//!         .with("Name", "Ann")
//!         .with_many("Qualities", vec![ctx.record("Quality")?.with("ID", 1).with("Label", "Kind")]),
//! ];
//! ctx.save(&cx, &conn, SaveParams::new(&mut programmers)).await;
//!
//! ctx.preload(&cx, &conn, PreloadParams::new(&mut programmers).field("Qualities")).await;
//! ```

pub mod context;

pub use context::{Context, ContextConfig};

pub use sqlgraph_core::{
    Connection, Cx, Error, FieldDef, FieldType, JoinKey, Key, KeyRef, ModelDef, ModelRegistry,
    Outcome, Record, Related, RelationKind, Relationship, RelationshipErrorKind, Result, Row,
    SchemaErrorKind, TableColumn, Value,
};

pub use sqlgraph_schema::{AutoMigrateStats, SchemaSynchronizer, TableAction};

pub use sqlgraph_session::{
    Filter, JoinStats, ManyToMany, Node, PreloadEngine, PreloadField, PreloadParams, RecordInfo,
    RelationshipWalker, SaveEngine, SaveParams, SaveStats, Search, paged_by_keys,
};

/// Everything needed to declare models and run graph operations.
pub mod prelude {
    pub use crate::{
        AutoMigrateStats,
        // Core
        Connection,
        Context,
        ContextConfig,
        Cx,
        Error,
        // Model declaration
        FieldDef,
        FieldType,
        // Clauses
        Filter,
        Key,
        ModelDef,
        ModelRegistry,
        Outcome,
        PreloadField,
        PreloadParams,
        Record,
        Result,
        Row,
        SaveParams,
        SaveStats,
        Search,
        Value,
    };
}
