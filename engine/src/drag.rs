//! Drop validity for drag-and-drop moves.

use indexmap::{IndexMap, IndexSet};

use crate::entity::{Entity, EntityId, NodeKey};
use crate::error::{Result, TreeError};
use crate::node::Node;

/// Every node a dragged selection must not be dropped onto: the dragged
/// nodes themselves, their current parents (a no-op move) and all their
/// loaded descendants (a cycle).
pub fn invalid_drop_targets<E: Entity>(
    index: &IndexMap<E::Id, Node<E>>,
    dragged: &[E::Id],
) -> Result<IndexSet<NodeKey<E::Id>>> {
    let mut invalid = IndexSet::new();
    for id in dragged {
        let node = index.get(id).ok_or_else(|| TreeError::unknown(id))?;
        invalid.insert(NodeKey::Entity(id.clone()));
        if let Some(parent) = &node.parent {
            invalid.insert(parent.clone());
        }
        collect_descendants(index, node, &mut invalid);
    }
    Ok(invalid)
}

fn collect_descendants<E: Entity>(
    index: &IndexMap<E::Id, Node<E>>,
    node: &Node<E>,
    out: &mut IndexSet<NodeKey<E::Id>>,
) {
    for child_id in &node.children {
        out.insert(NodeKey::Entity(child_id.clone()));
        if let Some(child) = index.get(child_id) {
            collect_descendants(index, child, out);
        }
    }
}

/// Drop validity computed once when a drag starts. The tree is assumed
/// quiescent while the gesture lasts.
#[derive(Debug, Clone, PartialEq)]
pub struct DragGesture<Id: EntityId> {
    dragged: Vec<Id>,
    invalid: IndexSet<NodeKey<Id>>,
}

impl<Id: EntityId> DragGesture<Id> {
    pub(crate) fn new(dragged: Vec<Id>, invalid: IndexSet<NodeKey<Id>>) -> Self {
        Self { dragged, invalid }
    }

    pub fn dragged(&self) -> &[Id] {
        &self.dragged
    }

    pub fn invalid_targets(&self) -> &IndexSet<NodeKey<Id>> {
        &self.invalid
    }

    pub fn can_drop(&self, target: &NodeKey<Id>) -> bool {
        !self.invalid.contains(target)
    }
}
