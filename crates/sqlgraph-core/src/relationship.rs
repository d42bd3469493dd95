//! Relationship declarations and their resolved form.
//!
//! A field declares a relationship with [`RelationSpec`] (kind, target and
//! optional key overrides). Building the [`ModelRegistry`](crate::ModelRegistry)
//! resolves every declaration into a [`Relationship`], which carries exactly the
//! field and column names its kind needs.

use std::fmt;

/// Declared kind of a relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany { join_table: String },
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::ManyToMany { .. } => "many_to_many",
        }
    }

    /// Whether the field holds a collection.
    pub fn is_many(&self) -> bool {
        matches!(
            self,
            RelationKind::HasMany | RelationKind::ManyToMany { .. }
        )
    }
}

/// Relationship as declared on a field, before key resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    pub kind: RelationKind,
    /// Target model name
    pub target: String,
    pub foreign_key: Option<String>,
    pub association_key: Option<String>,
}

/// A field on some model together with its column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub field: String,
    pub column: String,
}

impl KeyRef {
    pub fn new(field: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            column: column.into(),
        }
    }
}

/// One side of a join table: the join column and the key it mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    /// Column on the join table (`language_id`)
    pub join_column: String,
    /// Key on the joined model (`ID` / `id`)
    pub key: KeyRef,
}

/// A resolved relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship {
    /// `foreign_key` lives on the target and references `association_key` on the parent.
    HasOne {
        target: String,
        foreign_key: KeyRef,
        association_key: KeyRef,
    },
    /// Like `HasOne`, with any number of targets per parent.
    HasMany {
        target: String,
        foreign_key: KeyRef,
        association_key: KeyRef,
    },
    /// `foreign_key` lives on the parent and references `association_key` on the target.
    BelongsTo {
        target: String,
        foreign_key: KeyRef,
        association_key: KeyRef,
    },
    /// Rows of `join_table` pair a source key with a destination key.
    ManyToMany {
        target: String,
        join_table: String,
        source: JoinKey,
        destination: JoinKey,
    },
}

impl Relationship {
    /// Target model name.
    pub fn target(&self) -> &str {
        match self {
            Relationship::HasOne { target, .. }
            | Relationship::HasMany { target, .. }
            | Relationship::BelongsTo { target, .. }
            | Relationship::ManyToMany { target, .. } => target,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Relationship::HasOne { .. } => "has_one",
            Relationship::HasMany { .. } => "has_many",
            Relationship::BelongsTo { .. } => "belongs_to",
            Relationship::ManyToMany { .. } => "many_to_many",
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(
            self,
            Relationship::HasMany { .. } | Relationship::ManyToMany { .. }
        )
    }

    pub fn join_table(&self) -> Option<&str> {
        match self {
            Relationship::ManyToMany { join_table, .. } => Some(join_table),
            _ => None,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::HasOne {
                target,
                foreign_key,
                ..
            }
            | Relationship::HasMany {
                target,
                foreign_key,
                ..
            } => write!(
                f,
                "{} {} via {}.{}",
                self.kind_name(),
                target,
                target,
                foreign_key.field
            ),
            Relationship::BelongsTo {
                target,
                foreign_key,
                ..
            } => write!(f, "belongs_to {} via {}", target, foreign_key.field),
            Relationship::ManyToMany {
                target,
                join_table,
                ..
            } => write!(f, "many_to_many {} via {}", target, join_table),
        }
    }
}
