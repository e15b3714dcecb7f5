//! The note, material and memo trees.
//!
//! Each kind is an [`Entity`] impl plus a projection; everything else is the
//! generic [`Tree`].

use std::rc::Rc;

use shared::{MaterialEntity, MemoEntity, NoteEntity, memo_title};

use crate::entity::Entity;
use crate::loader::{EntityLoader, TreeStrategy, ViewProjection};
use crate::node::NodeView;
use crate::tree::{Tree, TreeSettings};

/// Id the backend uses for its own synthetic root record.
pub const ROOT_ID: u64 = 0;

pub type NoteTree = Tree<NoteEntity>;
pub type MaterialTree = Tree<MaterialEntity>;
pub type MemoTree = Tree<MemoEntity>;

impl Entity for NoteEntity {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }

    fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    fn is_reserved_root(id: &u64) -> bool {
        *id == ROOT_ID
    }
}

impl Entity for MaterialEntity {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }

    fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    fn is_reserved_root(id: &u64) -> bool {
        *id == ROOT_ID
    }
}

impl Entity for MemoEntity {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }

    fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    fn is_reserved_root(id: &u64) -> bool {
        *id == ROOT_ID
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoteProjection;

impl ViewProjection<NoteEntity> for NoteProjection {
    fn project_view(&self, note: &NoteEntity) -> NodeView {
        let title = note.title.trim();
        NodeView {
            title: if title.is_empty() { "Untitled".to_string() } else { title.to_string() },
            icon: Some(note.icon.clone().unwrap_or_else(|| "note".to_string())),
            is_leaf: note.child_count == Some(0),
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

/// Files are always leaves; folders are leaves only when known empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaterialProjection;

impl ViewProjection<MaterialEntity> for MaterialProjection {
    fn project_view(&self, material: &MaterialEntity) -> NodeView {
        NodeView {
            title: material.name.clone(),
            icon: Some(material.kind.icon().to_string()),
            is_leaf: !material.kind.is_folder() || material.child_count == Some(0),
            created_at: material.created_at,
            updated_at: material.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoProjection;

impl ViewProjection<MemoEntity> for MemoProjection {
    fn project_view(&self, memo: &MemoEntity) -> NodeView {
        let title = memo_title(&memo.content);
        let is_group = memo.child_count.is_some_and(|count| count > 0);
        NodeView {
            title: if title.is_empty() { "Empty memo".to_string() } else { title },
            icon: Some(if is_group { "folder" } else { "memo" }.to_string()),
            is_leaf: !is_group,
            created_at: memo.created_at,
            updated_at: memo.updated_at,
        }
    }
}

pub fn note_tree(
    loader: impl EntityLoader<NoteEntity> + 'static,
    settings: TreeSettings,
) -> NoteTree {
    Tree::with_settings(TreeStrategy::new(NoteProjection, loader), settings)
}

pub fn material_tree(
    loader: impl EntityLoader<MaterialEntity> + 'static,
    settings: TreeSettings,
) -> MaterialTree {
    Tree::with_settings(TreeStrategy::new(MaterialProjection, loader), settings)
}

pub fn memo_tree(
    loader: impl EntityLoader<MemoEntity> + 'static,
    settings: TreeSettings,
) -> MemoTree {
    Tree::with_settings(TreeStrategy::new(MemoProjection, loader), settings)
}

/// A note tree for the "move to" dialog reusing the explorer's loader.
/// The two trees fetch through the same adapter but never share nodes.
pub fn note_tree_sharing(
    loader: Rc<dyn EntityLoader<NoteEntity>>,
    settings: TreeSettings,
) -> NoteTree {
    Tree::with_settings(TreeStrategy::from_shared(Rc::new(NoteProjection), loader), settings)
}
