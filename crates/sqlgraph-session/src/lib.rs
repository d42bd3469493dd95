//! Relationship walking, diff-based saves and preloading for sqlgraph.
//!
//! `sqlgraph-session` is the **object-graph layer**. It takes records that
//! live in memory, works out how they relate through the registry, and
//! moves them to and from the store with as few statements as it can.
//!
//! # Role In The Architecture
//!
//! - **Relationship walker**: turns a root model into a [`RecordInfo`] tree.
//! - **Save engine**: fetches what is stored under a batch's keys, inserts the
//!   missing rows and updates only the changed columns of the rest.
//! - **Many-to-many reconciler**: replaces (or only extends) join-table rows.
//! - **Preload engine**: fills associations one paged fetch per level.
//!
//! Every operation takes the caller's `Cx` and returns an `Outcome`, and
//! runs its statements sequentially on the connection it is given. Nothing
//! here opens a transaction of its own.
//!
//! # Example
//!
//! ```ignore
//! let stats = SaveEngine::new(&registry)
//!     .save(&cx, &conn, SaveParams::new(&mut programmers))
//!     .await;
//!
//! PreloadEngine::new(&registry)
//!     .preload(
//!         &cx,
//!         &conn,
//!         PreloadParams::new(&mut programmers)
//!             .field(PreloadField::new("Qualities").order_by("position desc")),
//!     )
//!     .await;
//! ```

pub mod clause;
pub mod diff;
pub mod many_to_many;
pub mod ops;
pub mod paged;
pub mod preload;
pub mod save;
pub mod walker;

#[cfg(test)]
mod mock;

pub use clause::{Filter, Search, placeholders};
pub use diff::{ChangedFields, diff_records};
pub use many_to_many::{JoinRec, JoinSide, JoinStats, ManyToMany};
pub use ops::{WriteOp, execute_ops};
pub use paged::{DEFAULT_PAGE_SIZE, paged_by_keys};
pub use preload::{Node, PreloadEngine, PreloadField, PreloadParams};
pub use save::{SaveEngine, SaveParams, SaveStats, is_partial_join};
pub use walker::{InfoNode, NodeId, RecordInfo, RelationshipWalker};
