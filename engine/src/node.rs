use shared::Timestamp;

use crate::entity::{Entity, NodeKey};

/// View fields derived from an entity by a tree's projection.
///
/// Recomputed on every upsert; never edited by the tree itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeView {
    pub title: String,
    pub icon: Option<String>,
    /// The entity itself says it has no children (e.g. a zero child count).
    pub is_leaf: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// How much of a node's child list has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    NotLoaded,
    /// Some children arrived through a fragment; siblings may be missing.
    Partial,
    /// A direct-children fetch completed.
    Loaded,
}

/// Local, UI-facing representation of one entity.
///
/// Structural fields are only ever written by the owning tree. Values handed
/// out by `Tree` accessors are snapshots.
#[derive(Debug, Clone)]
pub struct Node<E: Entity> {
    pub(crate) key: NodeKey<E::Id>,
    pub(crate) entity: Option<E>,
    pub(crate) view: NodeView,
    pub(crate) is_leaf: bool,
    pub(crate) parent: Option<NodeKey<E::Id>>,
    pub(crate) children: Vec<E::Id>,
    pub(crate) is_expanded: bool,
    pub(crate) is_selected: bool,
    pub(crate) is_loading: bool,
    pub(crate) is_disabled: bool,
    pub(crate) load_state: LoadState,
    pub(crate) orphan: bool,
}

impl<E: Entity> Node<E> {
    pub(crate) fn root(title: &str) -> Self {
        Self {
            key: NodeKey::Root,
            entity: None,
            view: NodeView {
                title: title.to_string(),
                ..NodeView::default()
            },
            is_leaf: false,
            parent: None,
            children: Vec::new(),
            is_expanded: true,
            is_selected: false,
            is_loading: false,
            is_disabled: false,
            load_state: LoadState::NotLoaded,
            orphan: false,
        }
    }

    pub(crate) fn new(entity: E, view: NodeView) -> Self {
        let is_leaf = view.is_leaf;
        Self {
            key: NodeKey::Entity(entity.id()),
            entity: Some(entity),
            view,
            is_leaf,
            parent: None,
            children: Vec::new(),
            is_expanded: false,
            is_selected: false,
            is_loading: false,
            is_disabled: false,
            load_state: LoadState::NotLoaded,
            orphan: false,
        }
    }

    /// Swap in a fresh entity snapshot. Transient flags are untouched.
    pub(crate) fn replace_entity(&mut self, entity: E, view: NodeView) {
        self.entity = Some(entity);
        self.view = view;
        self.refresh_leaf();
    }

    /// Known children win over the entity's own claim; a completed fetch
    /// that found nothing makes the node a leaf.
    pub(crate) fn refresh_leaf(&mut self) {
        self.is_leaf = if !self.children.is_empty() {
            false
        } else if self.load_state == LoadState::Loaded {
            true
        } else {
            self.view.is_leaf
        };
    }

    pub fn key(&self) -> &NodeKey<E::Id> {
        &self.key
    }

    /// `None` for the virtual root.
    pub fn id(&self) -> Option<&E::Id> {
        self.key.entity_id()
    }

    pub fn is_root(&self) -> bool {
        self.key.is_root()
    }

    pub fn entity(&self) -> Option<&E> {
        self.entity.as_ref()
    }

    pub fn view(&self) -> &NodeView {
        &self.view
    }

    pub fn title(&self) -> &str {
        &self.view.title
    }

    pub fn icon(&self) -> Option<&str> {
        self.view.icon.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn parent(&self) -> Option<&NodeKey<E::Id>> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[E::Id] {
        &self.children
    }

    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    pub fn is_selected(&self) -> bool {
        self.is_selected
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_disabled(&self) -> bool {
        self.is_disabled
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// Parked at the top level because its declared parent is not loaded.
    pub fn is_orphan(&self) -> bool {
        self.orphan
    }
}

/// One row of the depth-first list of currently visible nodes.
#[derive(Debug, Clone)]
pub struct VisibleNode<E: Entity> {
    pub depth: usize,
    pub node: Node<E>,
}
