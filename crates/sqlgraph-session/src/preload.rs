//! Hierarchical association loading.
//!
//! Requested dotted paths (`"Qualities"`, `"Qualities.Tags"`) are folded into
//! a [`Node`] tree, then matched level by level against the model's full
//! relationship tree. Each level costs one paged fetch of the related table;
//! fetched rows are stitched back onto their parents by key.

use crate::clause::Search;
use crate::paged::{DEFAULT_PAGE_SIZE, paged_by_keys};
use crate::save::check_homogeneous;
use crate::walker::{NodeId, RecordInfo, RelationshipWalker};
use asupersync::{Cx, Outcome};
use sqlgraph_core::{
    Connection, Error, Key, ModelRegistry, Record, Relationship, RelationshipErrorKind,
    try_outcome, try_result,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// One requested path, with optional ordering for its own fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadField {
    /// Dotted path from the root model, e.g. `"Qualities.Tags"`
    pub name: String,
    pub search: Option<Search>,
}

impl PreloadField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search: None,
        }
    }

    /// Order the rows fetched for the last segment of this path.
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.search = Some(self.search.take().unwrap_or_default().order_by(order));
        self
    }

    pub fn search(mut self, search: Search) -> Self {
        self.search = Some(search);
        self
    }
}

impl From<&str> for PreloadField {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PreloadField {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Requested paths folded into a tree keyed by segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: String,
    search: Option<Search>,
    children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search: None,
            children: Vec::new(),
        }
    }

    /// Fold `fields` under a root named `root`.
    pub fn from_fields(root: impl Into<String>, fields: &[PreloadField]) -> Self {
        let mut node = Self::new(root);
        for field in fields {
            node.add(field);
        }
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn search(&self) -> Option<&Search> {
        self.search.as_ref()
    }

    /// Children in first-mention order.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Add one dotted path. A path mentioned again replaces the ordering of
    /// its last segment.
    pub fn add(&mut self, field: &PreloadField) {
        let mut node = self;
        let mut segments = field.name.split('.').peekable();
        while let Some(segment) = segments.next() {
            let index = match node.children.iter().position(|c| c.name == segment) {
                Some(index) => index,
                None => {
                    node.children.push(Node::new(segment));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
            if segments.peek().is_none() {
                node.search.clone_from(&field.search);
            }
        }
    }

    fn fmt_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}- {}", "", self.name, indent = depth * 2)?;
        if let Some(search) = self.search.as_ref().filter(|s| !s.is_empty()) {
            write!(f, " {}", search)?;
        }
        for child in &self.children {
            writeln!(f)?;
            child.fmt_depth(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_depth(f, 0)
    }
}

/// What to preload.
#[derive(Debug)]
pub struct PreloadParams<'r> {
    /// Records of a single model; loaded associations are written into them.
    pub records: &'r mut [Record],
    /// Must not be empty.
    pub fields: Vec<PreloadField>,
}

impl<'r> PreloadParams<'r> {
    pub fn new(records: &'r mut [Record]) -> Self {
        Self {
            records,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: impl Into<PreloadField>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<PreloadField>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }
}

type LevelFuture<'f> = Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'f>>;

/// Loads associations into records already in memory.
#[derive(Debug, Clone, Copy)]
pub struct PreloadEngine<'a> {
    registry: &'a ModelRegistry,
    page_size: usize,
}

impl<'a> PreloadEngine<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self {
            registry,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Load every requested path into `params.records`.
    ///
    /// Collections are replaced, never appended to, so preloading twice
    /// yields the same graph.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, params), fields(records = params.records.len()))]
    pub async fn preload<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        params: PreloadParams<'_>,
    ) -> Outcome<(), Error> {
        let PreloadParams { records, fields } = params;
        if fields.is_empty() {
            return Outcome::Err(Error::shape("Preload expects a non-empty list in Fields"));
        }
        let Some(first) = records.first() else {
            return Outcome::Ok(());
        };
        let root = first.model_name().to_string();
        try_result!(check_homogeneous("Preload", records.iter()));

        let info = try_result!(RelationshipWalker::new(self.registry).walk::<&str>(&root, &[]));
        let tree = Node::from_fields(root.as_str(), &fields);
        tracing::trace!(tree = %tree, "Preload tree");
        self.level(cx, conn, &info, RecordInfo::ROOT, &tree, records, root)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn level<'f, C: Connection>(
        &'f self,
        cx: &'f Cx,
        conn: &'f C,
        info: &'f RecordInfo,
        id: NodeId,
        tree: &'f Node,
        records: &'f mut [Record],
        path: String,
    ) -> LevelFuture<'f> {
        Box::pin(async move {
            for field in tree.children() {
                let Some(child_id) = info.child_named(id, field.name()) else {
                    return Outcome::Err(Error::relationship(
                        RelationshipErrorKind::UnknownField,
                        info.node(id).model.name(),
                        Some(field.name()),
                        format!("Relation not found: {}.{}", path, field.name()),
                    ));
                };
                let child = info.node(child_id);
                let Some(rel) = &child.relationship else {
                    continue;
                };

                let (fetch_column, parent_key) = match rel {
                    Relationship::HasOne {
                        foreign_key,
                        association_key,
                        ..
                    }
                    | Relationship::HasMany {
                        foreign_key,
                        association_key,
                        ..
                    } => (&foreign_key.column, &association_key.field),
                    Relationship::BelongsTo {
                        foreign_key,
                        association_key,
                        ..
                    } => (&association_key.column, &foreign_key.field),
                    Relationship::ManyToMany { .. } => {
                        return Outcome::Err(Error::relationship(
                            RelationshipErrorKind::UnsupportedKind,
                            info.node(id).model.name(),
                            Some(field.name()),
                            format!(
                                "Preload doesn't know how to handle {} relationships",
                                rel.kind_name()
                            ),
                        ));
                    }
                };

                let keys: Vec<Key> = records.iter().filter_map(|r| r.key_of(parent_key)).collect();
                let mut fetched = try_outcome!(
                    paged_by_keys(
                        cx,
                        conn,
                        &child.model,
                        fetch_column,
                        &keys,
                        field.search(),
                        self.page_size,
                    )
                    .await
                );
                tracing::debug!(
                    path = %path,
                    field = %field.name(),
                    kind = rel.kind_name(),
                    keys = keys.len(),
                    fetched = fetched.len(),
                    "Preloaded level"
                );

                if !field.children().is_empty() {
                    let child_path = format!("{}.{}", path, field.name());
                    try_outcome!(
                        self.level(cx, conn, info, child_id, field, &mut fetched, child_path)
                            .await
                    );
                }
                distribute(rel, field.name(), records, fetched);
            }
            Outcome::Ok(())
        })
    }
}

/// Attach `fetched` rows to the parents they belong to.
fn distribute(rel: &Relationship, name: &str, parents: &mut [Record], fetched: Vec<Record>) {
    match rel {
        Relationship::HasMany {
            foreign_key,
            association_key,
            ..
        } => {
            let mut by_key: HashMap<Key, Vec<Record>> = HashMap::new();
            for child in fetched {
                if let Some(key) = child.key_of(&foreign_key.field) {
                    by_key.entry(key).or_default().push(child);
                }
            }
            for parent in parents {
                let children = parent
                    .key_of(&association_key.field)
                    .and_then(|k| by_key.get(&k).cloned())
                    .unwrap_or_default();
                parent.set_many(name, children);
            }
        }
        Relationship::HasOne {
            foreign_key,
            association_key,
            ..
        } => {
            let by_key = first_by_key(fetched, &foreign_key.field);
            for parent in parents {
                let child = parent
                    .key_of(&association_key.field)
                    .and_then(|k| by_key.get(&k).cloned());
                parent.set_one(name, child);
            }
        }
        Relationship::BelongsTo {
            foreign_key,
            association_key,
            ..
        } => {
            let by_key = first_by_key(fetched, &association_key.field);
            for parent in parents {
                let target = parent
                    .key_of(&foreign_key.field)
                    .and_then(|k| by_key.get(&k).cloned());
                parent.set_one(name, target);
            }
        }
        Relationship::ManyToMany { .. } => {}
    }
}

fn first_by_key(records: Vec<Record>, field: &str) -> HashMap<Key, Record> {
    let mut by_key = HashMap::with_capacity(records.len());
    for record in records {
        if let Some(key) = record.key_of(field) {
            by_key.entry(key).or_insert(record);
        }
    }
    by_key
}
