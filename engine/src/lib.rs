//! Lazily-populated client mirror of a server-owned entity hierarchy
//!
//! The backend owns a forest of entities linked only by `parent_id`. A
//! [`Tree`] mirrors the part of it the UI has seen so far, keeps it ordered,
//! and carries the interaction state explorer panes need: expansion,
//! selection, loading and drag validity.
//!
//! # Core Components
//!
//! - **[`Tree`]** - the mirror; one per UI surface, never shared
//! - **[`TreeStrategy`]** - per-kind projection and loader injected at construction
//! - **[`Node`]** - snapshot of one mirrored entity plus its transient state
//! - **[`Relay`]** - fan-out of events and changes to subscribers
//! - **[`TokioLocalSpawner`]** - default executor for fetch tasks
//! - **[`kinds`]** - the note, material and memo trees
//!
//! # Example
//!
//! ```rust
//! use entity_tree::kinds::NoteProjection;
//! use entity_tree::{InMemoryLoader, Tree, TreeSettings, TreeStrategy};
//! use futures::executor::LocalPool;
//! use shared::NoteEntity;
//!
//! let note = |id, parent_id, title: &str| NoteEntity {
//!     id,
//!     parent_id,
//!     title: title.to_string(),
//!     icon: None,
//!     child_count: None,
//!     created_at: 0,
//!     updated_at: 0,
//! };
//! let loader = InMemoryLoader::from_entities([note(1, None, "B"), note(2, None, "A")]);
//! let mut pool = LocalPool::new();
//! let strategy = TreeStrategy::new(NoteProjection, loader).with_spawner(pool.spawner());
//! let tree = Tree::with_settings(strategy, TreeSettings::default());
//!
//! pool.run_until(tree.load_children(None)).unwrap();
//! let titles: Vec<_> = tree
//!     .get_children(None)
//!     .unwrap()
//!     .iter()
//!     .map(|node| node.title().to_string())
//!     .collect();
//! assert_eq!(titles, ["A", "B"]);
//! ```

pub mod drag;
pub mod entity;
pub mod error;
pub mod events;
pub mod kinds;
pub mod loader;
pub mod memory;
pub mod node;
pub mod relay;
pub mod sort;
pub mod spawn;
pub mod tree;

pub use drag::{DragGesture, invalid_drop_targets};
pub use entity::{Entity, EntityId, NodeKey};
pub use error::{LoadError, Result, TreeError};
pub use events::{ChangeKind, SelectReason, SelectionEvent, TreeChange, TreeEvent};
pub use loader::{EntityLoader, TreeStrategy, ViewProjection};
pub use memory::InMemoryLoader;
pub use node::{LoadState, Node, NodeView, VisibleNode};
pub use relay::Relay;
pub use shared::{SortBy, SortOptions, SortOrder};
pub use spawn::TokioLocalSpawner;
pub use tree::{SelectOptions, Tree, TreeSettings};
