//! Notifications a tree emits after it mutates.
//!
//! Two channels exist. [`TreeEvent`]s carry user intent that higher-level
//! services act on (fetching an expanded node's children, reacting to a
//! selection). [`TreeChange`]s are the subtree-scoped "something changed
//! under X" notifications UI layers use to refresh incrementally.

use futures::channel::mpsc::UnboundedReceiver;
use log::trace;

use crate::entity::{EntityId, NodeKey};
use crate::relay::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The node's child list changed (membership or order).
    Children,
    /// View fields were reprojected from a new entity snapshot.
    View,
    /// Transient state flipped: expanded, selected, loading or disabled.
    State,
    /// The node left the index.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeChange<Id> {
    pub key: NodeKey<Id>,
    pub kind: ChangeKind,
}

impl<Id> TreeChange<Id> {
    pub fn new(key: NodeKey<Id>, kind: ChangeKind) -> Self {
        Self { key, kind }
    }
}

/// Why a selection changed. Callers react differently to a click and to
/// the implicit selection made when a drag starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectReason {
    #[default]
    Click,
    Drag,
    Locate,
}

impl SelectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectReason::Click => "click",
            SelectReason::Drag => "drag",
            SelectReason::Locate => "locate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent<Id> {
    /// The node the user acted on; `None` when a whole set was replaced.
    pub toggled: Option<NodeKey<Id>>,
    /// Selection after the change, in selection order.
    pub selected: Vec<NodeKey<Id>>,
    pub reason: SelectReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent<Id> {
    /// The node was expanded; its children may now need fetching.
    NodeExpanded(NodeKey<Id>),
    NodeSelected(SelectionEvent<Id>),
}

/// Routes tree output to the two kinds of subscribers.
pub(crate) struct EventHub<Id: EntityId> {
    event_relay: Relay<TreeEvent<Id>>,
    change_relay: Relay<TreeChange<Id>, NodeKey<Id>>,
}

impl<Id: EntityId> EventHub<Id> {
    pub(crate) fn new() -> Self {
        Self {
            event_relay: Relay::default(),
            change_relay: Relay::default(),
        }
    }

    pub(crate) fn subscribe_events(&mut self) -> UnboundedReceiver<TreeEvent<Id>> {
        self.event_relay.subscribe()
    }

    pub(crate) fn subscribe_subtree(
        &mut self,
        scope: NodeKey<Id>,
    ) -> UnboundedReceiver<TreeChange<Id>> {
        self.change_relay.subscribe_scoped(scope)
    }

    pub(crate) fn has_subtree_subscribers(&self) -> bool {
        !self.change_relay.is_empty()
    }

    pub(crate) fn emit(&mut self, event: TreeEvent<Id>) {
        self.event_relay.send(event);
    }

    /// `chain` is the changed key followed by its ancestors up to the root;
    /// a subscriber hears the change when its scope is on that chain.
    pub(crate) fn publish(&mut self, change: &TreeChange<Id>, chain: &[NodeKey<Id>]) {
        let delivered = self.change_relay.send_scoped(change, |scope| chain.contains(scope));
        if delivered > 0 {
            trace!("Notified {delivered} subscribers about {:?} on {}", change.kind, change.key);
        }
    }
}
