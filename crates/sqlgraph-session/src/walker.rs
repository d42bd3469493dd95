//! Relationship tree construction.
//!
//! [`RelationshipWalker::walk`] turns a root model into a [`RecordInfo`]: an
//! arena of nodes, one per reachable relationship, each annotated with its
//! resolved [`Relationship`] and, for many-to-many edges, an empty
//! [`ManyToMany`] aggregate ready to be filled by a save.
//!
//! A model already on the current descent path is pruned instead of walked
//! again. The path set is copied per branch, so the same model may still
//! appear under different siblings.

use crate::many_to_many::ManyToMany;
use sqlgraph_core::{
    Error, ModelDef, ModelRegistry, Relationship, RelationshipErrorKind, Result,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Index of a node inside a [`RecordInfo`].
pub type NodeId = usize;

/// One node of a relationship tree.
#[derive(Debug, Clone)]
pub struct InfoNode {
    /// Field name on the parent (the model name for the root)
    pub name: String,
    pub model: Arc<ModelDef>,
    /// How the parent reaches this node; `None` for the root
    pub relationship: Option<Relationship>,
    pub many_to_many: Option<ManyToMany>,
    pub children: Vec<NodeId>,
}

/// An immutable relationship tree. Node 0 is the root.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    nodes: Vec<InfoNode>,
    by_model: HashMap<String, NodeId>,
}

impl RecordInfo {
    pub const ROOT: NodeId = 0;

    pub fn root(&self) -> &InfoNode {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, id: NodeId) -> &InfoNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[InfoNode] {
        &self.nodes
    }

    /// Child of `parent` reached through the field `name`.
    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }

    /// Node last built for `model` during the walk.
    pub fn by_model(&self, model: &str) -> Option<&InfoNode> {
        self.by_model.get(model).map(|&id| &self.nodes[id])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let node = &self.nodes[id];
        write!(f, "{:indent$}- {}: {}", "", node.name, node.model.name(), indent = depth * 2)?;
        for &child in &node.children {
            writeln!(f)?;
            self.fmt_node(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for RecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, Self::ROOT, 0)
    }
}

/// Builds relationship trees from a registry.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipWalker<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> RelationshipWalker<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Walk `root`, following every relationship, or only the root-level
    /// fields named in `assocs` when it is non-empty.
    pub fn walk<S: AsRef<str>>(&self, root: &str, assocs: &[S]) -> Result<RecordInfo> {
        let model = self.registry.model(root)?;
        let mut info = RecordInfo {
            nodes: Vec::new(),
            by_model: HashMap::new(),
        };
        let assocs: Vec<&str> = assocs.iter().map(AsRef::as_ref).collect();
        self.visit(&mut info, root.to_string(), model, &HashSet::new(), &assocs)?;
        tracing::trace!(root = %root, nodes = info.len(), "Walked relationship tree");
        Ok(info)
    }

    fn visit(
        &self,
        info: &mut RecordInfo,
        name: String,
        model: &Arc<ModelDef>,
        visited: &HashSet<String>,
        assocs: &[&str],
    ) -> Result<Option<NodeId>> {
        if visited.contains(model.name()) {
            return Ok(None);
        }
        let mut visited = visited.clone();
        visited.insert(model.name().to_string());

        let id = info.nodes.len();
        info.nodes.push(InfoNode {
            name,
            model: Arc::clone(model),
            relationship: None,
            many_to_many: None,
            children: Vec::new(),
        });

        let mut children = Vec::new();
        if assocs.is_empty() {
            for field in model.fields() {
                if let Some(rel) = field.relationship() {
                    if let Some(child) = self.visit_relation(info, &field.name, rel, &visited)? {
                        children.push(child);
                    }
                }
            }
        } else {
            for &assoc in assocs {
                let field = model.field_named(assoc).ok_or_else(|| {
                    Error::relationship(
                        RelationshipErrorKind::UnknownField,
                        model.name(),
                        Some(assoc),
                        format!("No field '{}' in {}", assoc, model.name()),
                    )
                })?;
                let rel = field.relationship().ok_or_else(|| {
                    Error::relationship(
                        RelationshipErrorKind::NotARelationship,
                        model.name(),
                        Some(assoc),
                        format!("{}.{} does not describe a relationship", model.name(), assoc),
                    )
                })?;
                if let Some(child) = self.visit_relation(info, &field.name, rel, &visited)? {
                    children.push(child);
                }
            }
        }

        info.nodes[id].children = children;
        info.by_model.insert(model.name().to_string(), id);
        Ok(Some(id))
    }

    fn visit_relation(
        &self,
        info: &mut RecordInfo,
        field: &str,
        rel: &Relationship,
        visited: &HashSet<String>,
    ) -> Result<Option<NodeId>> {
        let target = self.registry.model(rel.target())?;
        let Some(child) = self.visit(info, field.to_string(), target, visited, &[])? else {
            return Ok(None);
        };

        if let Relationship::ManyToMany {
            join_table,
            source,
            destination,
            ..
        } = rel
        {
            let join_model = self.registry.by_table(join_table).ok_or_else(|| {
                Error::relationship(
                    RelationshipErrorKind::UnregisteredJoinTable,
                    target.name(),
                    Some(field),
                    format!(
                        "Could not find model struct for {}: list it explicitly in Models",
                        join_table
                    ),
                )
            })?;
            info.nodes[child].many_to_many =
                Some(ManyToMany::new(Arc::clone(join_model), source, destination)?);
        }
        info.nodes[child].relationship = Some(rel.clone());
        Ok(Some(child))
    }
}
