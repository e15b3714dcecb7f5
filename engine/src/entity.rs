use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// Identity of a backend entity.
///
/// Ids travel through event relays, so they must be `Send + Sync`.
pub trait EntityId: Clone + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static {}

impl<T> EntityId for T where T: Clone + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static {}

/// A backend-owned record. Hierarchy is expressed only through `parent_id`.
pub trait Entity: Clone + Debug + 'static {
    type Id: EntityId;

    fn id(&self) -> Self::Id;

    fn parent_id(&self) -> Option<Self::Id>;

    /// Ids the backend uses for its own synthetic root. Such records must
    /// never be upserted: the tree synthesizes its root separately.
    fn is_reserved_root(_id: &Self::Id) -> bool {
        false
    }
}

/// Addresses a node: either the virtual root or an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey<Id> {
    Root,
    Entity(Id),
}

impl<Id> NodeKey<Id> {
    /// `None` parent means top level, which is the virtual root.
    pub fn from_parent(parent_id: Option<Id>) -> Self {
        match parent_id {
            Some(id) => NodeKey::Entity(id),
            None => NodeKey::Root,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, NodeKey::Root)
    }

    pub fn entity_id(&self) -> Option<&Id> {
        match self {
            NodeKey::Root => None,
            NodeKey::Entity(id) => Some(id),
        }
    }

    /// Inverse of [`NodeKey::from_parent`].
    pub fn into_parent_id(self) -> Option<Id> {
        match self {
            NodeKey::Root => None,
            NodeKey::Entity(id) => Some(id),
        }
    }
}

impl<Id> From<Id> for NodeKey<Id> {
    fn from(id: Id) -> Self {
        NodeKey::Entity(id)
    }
}

impl<Id: Display> Display for NodeKey<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Root => write!(f, "<root>"),
            NodeKey::Entity(id) => write!(f, "{}", id),
        }
    }
}
