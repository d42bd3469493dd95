//! The model registry: every model's declared fields plus resolved relationships.
//!
//! The registry is built once and is read-only afterwards; engines share it
//! through an `Arc`.

use crate::Result;
use crate::error::{Error, RelationshipErrorKind, SchemaErrorKind};
use crate::field::FieldDef;
use crate::identifiers::{is_valid_identifier, to_db_name};
use crate::model::{ModelDef, Record};
use crate::relationship::{JoinKey, KeyRef, RelationKind, RelationSpec, Relationship};
use std::collections::HashMap;
use std::sync::Arc;

/// Collects model definitions before resolution.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelDef>,
}

impl RegistryBuilder {
    /// Register a model.
    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    /// Validate names and resolve every declared relationship.
    pub fn build(self) -> Result<ModelRegistry> {
        let mut by_name = HashMap::new();
        let mut by_table = HashMap::new();
        for (i, model) in self.models.iter().enumerate() {
            validate_model(model)?;
            if by_name.insert(model.name().to_string(), i).is_some() {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("Model {} is registered twice", model.name()),
                ));
            }
            if by_table.insert(model.table_name().to_string(), i).is_some() {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("Table {} is used by two models", model.table_name()),
                ));
            }
        }

        let mut resolved = Vec::new();
        for (mi, model) in self.models.iter().enumerate() {
            for (fi, field) in model.fields.iter().enumerate() {
                if field.ignored {
                    continue;
                }
                if let Some(spec) = &field.relation {
                    let rel = resolve(&self.models, &by_name, model, field, spec)?;
                    resolved.push((mi, fi, rel));
                }
            }
        }

        let mut models = self.models;
        for (mi, fi, rel) in resolved {
            tracing::trace!(
                model = %models[mi].name(),
                field = %models[mi].fields[fi].name,
                relationship = %rel,
                "Resolved relationship"
            );
            models[mi].fields[fi].relationship = Some(rel);
        }

        tracing::debug!(count = models.len(), "Built model registry");
        Ok(ModelRegistry {
            models: models.into_iter().map(Arc::new).collect(),
            by_name,
            by_table,
        })
    }
}

fn validate_model(model: &ModelDef) -> Result<()> {
    if !is_valid_identifier(model.name()) {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("Invalid model name '{}'", model.name()),
        ));
    }
    fn check(model: &ModelDef, fields: &[FieldDef]) -> Result<()> {
        for field in fields {
            if !is_valid_identifier(&field.name) {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("Invalid field name '{}' in {}", field.name, model.name()),
                ));
            }
            check(model, &field.squashed)?;
        }
        Ok(())
    }
    check(model, model.fields())
}

fn single_pk<'a>(model: &'a ModelDef, field: &FieldDef) -> Result<&'a FieldDef> {
    match model.primary_keys().as_slice() {
        [pk] => Ok(pk),
        pks => Err(Error::relationship(
            RelationshipErrorKind::PrimaryKeyArity,
            model.name(),
            Some(&field.name),
            format!(
                "{} has {} primary keys, relationship {} needs exactly one",
                model.name(),
                pks.len(),
                field.name
            ),
        )),
    }
}

fn key_ref(owner: &ModelDef, name: &str, parent: &ModelDef, field: &FieldDef) -> Result<KeyRef> {
    owner
        .persisted_field(name)
        .map(|f| KeyRef::new(&f.name, &f.db_name))
        .ok_or_else(|| {
            Error::relationship(
                RelationshipErrorKind::UnresolvedAssociation,
                parent.name(),
                Some(&field.name),
                format!(
                    "{}.{}: no field {} in {}",
                    parent.name(),
                    field.name,
                    name,
                    owner.name()
                ),
            )
        })
}

fn resolve(
    models: &[ModelDef],
    by_name: &HashMap<String, usize>,
    parent: &ModelDef,
    field: &FieldDef,
    spec: &RelationSpec,
) -> Result<Relationship> {
    let target = by_name
        .get(&spec.target)
        .map(|&i| &models[i])
        .ok_or_else(|| {
            Error::relationship(
                RelationshipErrorKind::UnresolvedAssociation,
                parent.name(),
                Some(&field.name),
                format!(
                    "{}.{} refers to unregistered model {}",
                    parent.name(),
                    field.name,
                    spec.target
                ),
            )
        })?;

    let rel = match &spec.kind {
        RelationKind::BelongsTo => {
            let fk = spec
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}ID", field.name));
            let assoc = match &spec.association_key {
                Some(name) => name.clone(),
                None => single_pk(target, field)?.name.clone(),
            };
            Relationship::BelongsTo {
                target: target.name().to_string(),
                foreign_key: key_ref(parent, &fk, parent, field)?,
                association_key: key_ref(target, &assoc, parent, field)?,
            }
        }
        RelationKind::HasOne | RelationKind::HasMany => {
            let fk = spec
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}ID", parent.name()));
            let assoc = match &spec.association_key {
                Some(name) => name.clone(),
                None => single_pk(parent, field)?.name.clone(),
            };
            let foreign_key = key_ref(target, &fk, parent, field)?;
            let association_key = key_ref(parent, &assoc, parent, field)?;
            let target = target.name().to_string();
            if spec.kind == RelationKind::HasOne {
                Relationship::HasOne {
                    target,
                    foreign_key,
                    association_key,
                }
            } else {
                Relationship::HasMany {
                    target,
                    foreign_key,
                    association_key,
                }
            }
        }
        RelationKind::ManyToMany { join_table } => {
            let source_pk = single_pk(parent, field)?;
            let destination_pk = single_pk(target, field)?;
            Relationship::ManyToMany {
                target: target.name().to_string(),
                join_table: join_table.clone(),
                source: JoinKey {
                    join_column: spec
                        .foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", to_db_name(parent.name()))),
                    key: KeyRef::new(&source_pk.name, &source_pk.db_name),
                },
                destination: JoinKey {
                    join_column: spec
                        .association_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", to_db_name(target.name()))),
                    key: KeyRef::new(&destination_pk.name, &destination_pk.db_name),
                },
            }
        }
    };
    Ok(rel)
}

/// Immutable set of registered models.
#[derive(Debug)]
pub struct ModelRegistry {
    models: Vec<Arc<ModelDef>>,
    by_name: HashMap<String, usize>,
    by_table: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a model by name.
    pub fn get(&self, name: &str) -> Option<&Arc<ModelDef>> {
        self.by_name.get(name).map(|&i| &self.models[i])
    }

    /// Look up a model by name, failing for unregistered names.
    pub fn model(&self, name: &str) -> Result<&Arc<ModelDef>> {
        self.get(name).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownModel,
                format!("{} is not a registered model", name),
            )
        })
    }

    /// Look up a model by table name.
    pub fn by_table(&self, table: &str) -> Option<&Arc<ModelDef>> {
        self.by_table.get(table).map(|&i| &self.models[i])
    }

    /// Models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.models.iter()
    }

    /// A fresh, empty record of a registered model.
    pub fn record(&self, name: &str) -> Result<Record> {
        self.model(name).map(|m| Record::new(Arc::clone(m)))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
