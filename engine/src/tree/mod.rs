//! The tree handle.
//!
//! [`Tree`] wraps the synchronous structural state in an `Rc<RefCell<..>>`
//! and adds what needs the outside world: fetching through the loader,
//! coalescing concurrent child loads, and notifying subscribers after every
//! mutation. State borrows never span an `.await`.
//!
//! Every fetch runs as a task on the strategy's spawner and applies its
//! result when it completes, whether or not anyone still awaits it.

mod state;


use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::channel::mpsc::UnboundedReceiver;
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures::task::{LocalSpawn, LocalSpawnExt};
use indexmap::IndexSet;
use log::{debug, warn};
use shared::{SortOptions, TreeSection};

use crate::drag::DragGesture;
use crate::entity::{Entity, NodeKey};
use crate::error::{LoadError, Result, TreeError};
use crate::events::{EventHub, SelectReason, SelectionEvent, TreeChange, TreeEvent};
use crate::loader::{EntityLoader, TreeStrategy};
use crate::node::{LoadState, Node, VisibleNode};

use state::{ChangeSet, TreeState};

#[derive(Debug, Clone, PartialEq)]
pub struct TreeSettings {
    pub sort: SortOptions,
    /// Collapse a node when its last child leaves it.
    pub collapse_emptied_parents: bool,
    pub root_title: String,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            sort: SortOptions::default(),
            collapse_emptied_parents: true,
            root_title: "Root".to_string(),
        }
    }
}

impl From<&TreeSection> for TreeSettings {
    fn from(section: &TreeSection) -> Self {
        Self {
            sort: section.sort_options(),
            collapse_emptied_parents: section.collapse_emptied_parents,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectOptions {
    /// Flip just this node instead of replacing the selection.
    pub multiple: bool,
    pub reason: SelectReason,
}

impl SelectOptions {
    pub fn single() -> Self {
        Self::default()
    }

    pub fn multiple() -> Self {
        Self {
            multiple: true,
            ..Self::default()
        }
    }

    pub fn with_reason(self, reason: SelectReason) -> Self {
        Self { reason, ..self }
    }
}

type SharedLoad = Shared<LocalBoxFuture<'static, Result<()>>>;

struct TreeInner<E: Entity> {
    loader: Rc<dyn EntityLoader<E>>,
    spawner: Rc<dyn LocalSpawn>,
    state: RefCell<TreeState<E>>,
    hub: RefCell<EventHub<E::Id>>,
    loads: RefCell<HashMap<NodeKey<E::Id>, SharedLoad>>,
}

/// Client-side mirror of a server-owned entity hierarchy.
///
/// Cloning yields another handle to the same tree. Separate trees never
/// share nodes, even when they mirror the same entities.
pub struct Tree<E: Entity> {
    inner: Rc<TreeInner<E>>,
}

impl<E: Entity> Clone for Tree<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Entity> Tree<E> {
    pub fn new(strategy: TreeStrategy<E>) -> Self {
        Self::with_settings(strategy, TreeSettings::default())
    }

    pub fn with_settings(strategy: TreeStrategy<E>, settings: TreeSettings) -> Self {
        debug!("Creating tree '{}' sorted by {:?}", settings.root_title, settings.sort);
        Self {
            inner: Rc::new(TreeInner {
                loader: strategy.loader,
                spawner: strategy.spawner,
                state: RefCell::new(TreeState::new(strategy.projection, settings)),
                hub: RefCell::new(EventHub::new()),
                loads: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> TreeSettings {
        self.inner.state.borrow().settings().clone()
    }

    /// Number of entity nodes, not counting the virtual root.
    pub fn len(&self) -> usize {
        self.inner.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== STRUCTURE =====

    /// Create or update the node for `entity`, moving it if its parent changed.
    pub fn upsert(&self, entity: E) -> Result<()> {
        self.upsert_many(vec![entity])
    }

    /// Apply a batch; sibling lists are re-sorted once, after the last entity.
    pub fn upsert_many(&self, entities: Vec<E>) -> Result<()> {
        self.mutate(|state, changes| state.upsert_many(entities, changes))
    }

    /// Remove nodes (not their subtrees). Ids that are not loaded are ignored.
    pub fn remove(&self, ids: &[E::Id]) -> Result<()> {
        self.mutate(|state, changes| state.remove(ids, changes))
    }

    /// Move orphan placeholders under their declared parents where those are
    /// now loaded. Returns the ids that moved.
    pub fn reconcile_orphans(&self) -> Vec<E::Id> {
        self.mutate(|state, changes| state.reconcile_orphans(changes))
    }

    pub fn orphans(&self) -> Vec<E::Id> {
        self.inner.state.borrow().orphans()
    }

    // ===== READ ACCESS =====

    pub fn get_node(&self, id: &E::Id) -> Option<Node<E>> {
        self.node(&NodeKey::Entity(id.clone()))
    }

    pub fn node(&self, key: &NodeKey<E::Id>) -> Option<Node<E>> {
        self.inner.state.borrow().node(key).cloned()
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.inner.state.borrow().node(&NodeKey::Entity(id.clone())).is_some()
    }

    pub fn root(&self) -> Node<E> {
        self.inner.state.borrow().root().clone()
    }

    /// Ordered children of `parent_id`; `None` is the top level.
    pub fn get_children(&self, parent_id: Option<&E::Id>) -> Result<Vec<Node<E>>> {
        let key = NodeKey::from_parent(parent_id.cloned());
        self.inner.state.borrow().children_of(&key)
    }

    pub fn child_ids(&self, parent_id: Option<&E::Id>) -> Result<Vec<E::Id>> {
        let key = NodeKey::from_parent(parent_id.cloned());
        Ok(self.inner.state.borrow().require(&key)?.children.clone())
    }

    /// Other children of the node's parent.
    pub fn get_siblings(&self, id: &E::Id) -> Result<Vec<Node<E>>> {
        self.inner.state.borrow().siblings_of(id)
    }

    /// Loaded ancestors, nearest first. The virtual root is not included.
    pub fn get_ancestors(&self, id: &E::Id) -> Result<Vec<Node<E>>> {
        self.inner.state.borrow().ancestors_of(id)
    }

    pub fn load_state(&self, key: &NodeKey<E::Id>) -> Option<LoadState> {
        self.inner.state.borrow().load_state(key)
    }

    /// Whether a direct-children fetch for `id` has completed.
    pub fn is_loaded(&self, id: &E::Id) -> bool {
        self.load_state(&NodeKey::Entity(id.clone())) == Some(LoadState::Loaded)
    }

    /// Depth-first rows of every node currently visible.
    pub fn flatten_visible(&self) -> Vec<VisibleNode<E>> {
        self.inner.state.borrow().visible_rows()
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.inner.state.borrow().check_invariants()
    }

    // ===== LOADING =====

    /// Fetch and apply the direct children of `parent_id` (`None` for the
    /// top level). A call made while the same fetch is in flight awaits
    /// that fetch instead of starting another. Dropping the returned future
    /// does not cancel the fetch.
    pub async fn load_children(&self, parent_id: Option<E::Id>) -> Result<()> {
        let key = NodeKey::from_parent(parent_id);
        let load = self.children_load(&key)?;
        load.await
    }

    fn children_load(&self, key: &NodeKey<E::Id>) -> Result<SharedLoad> {
        if let Some(in_flight) = self.inner.loads.borrow().get(key) {
            debug!("Joining in-flight load of {key}");
            return Ok(in_flight.clone());
        }

        self.mutate(|state, changes| state.begin_load(key, changes))?;
        debug!("Fetching children of {key}");
        let fetch = self.inner.loader.fetch_children(key.clone().into_parent_id());
        let weak = Rc::downgrade(&self.inner);
        let load_key = key.clone();

        let task = async move {
            let outcome = fetch.await;
            match Self::upgrade(&weak) {
                Some(tree) => tree.finish_children_load(&load_key, outcome),
                None => Ok(()),
            }
        };
        let load = match self.run_detached(key.to_string(), task) {
            Ok(load) => load.shared(),
            Err(error) => {
                self.mutate(|state, changes| state.fail_load(key, changes));
                return Err(error);
            }
        };

        self.inner.loads.borrow_mut().insert(key.clone(), load.clone());
        Ok(load)
    }

    fn finish_children_load(
        &self,
        key: &NodeKey<E::Id>,
        outcome: Result<Vec<E>, LoadError>,
    ) -> Result<()> {
        self.inner.loads.borrow_mut().remove(key);
        match outcome {
            Ok(entities) => {
                self.mutate(|state, changes| state.finish_children_load(key, entities, changes))
            }
            Err(source) => {
                warn!("Loading children of {key} failed: {source}");
                self.mutate(|state, changes| state.fail_load(key, changes));
                Err(TreeError::LoadFailure {
                    target: key.to_string(),
                    source,
                })
            }
        }
    }

    /// Fetch the ancestor chain of `target_id` and merge it in one batch.
    pub async fn load_fragment(&self, target_id: E::Id) -> Result<()> {
        debug!("Fetching fragment for {target_id}");
        let target = target_id.to_string();
        let fetch = self.inner.loader.fetch_fragment(target_id);
        let weak = Rc::downgrade(&self.inner);
        let failed_target = target.clone();

        let task = async move {
            let entities = fetch.await.map_err(|source| {
                warn!("Loading fragment for {failed_target} failed: {source}");
                TreeError::LoadFailure {
                    target: failed_target,
                    source,
                }
            })?;
            match Self::upgrade(&weak) {
                Some(tree) => {
                    tree.mutate(|state, changes| state.finish_fragment_load(entities, changes))
                }
                None => Ok(()),
            }
        };
        self.run_detached(target, task)?.await
    }

    /// Bring `id` into view: fetch its fragment when it is not loaded yet,
    /// expand its ancestors and select it.
    pub async fn locate(&self, id: &E::Id) -> Result<()> {
        if !self.contains(id) {
            self.load_fragment(id.clone()).await?;
        }
        self.reveal_path(id)?;
        self.toggle_select(
            &NodeKey::Entity(id.clone()),
            SelectOptions::single().with_reason(SelectReason::Locate),
        )
    }

    // ===== EXPANSION =====

    /// Flip the expanded state of `id` and return the new state.
    ///
    /// With `should_load`, expanding a node whose children were never fully
    /// fetched loads them first; if it turns out to have none it stays
    /// collapsed. Without it, expansion is immediate and observers of
    /// [`TreeEvent::NodeExpanded`] are expected to fetch.
    pub async fn toggle_expand(&self, id: &E::Id, should_load: bool) -> Result<bool> {
        let key = NodeKey::Entity(id.clone());
        let (is_expanded, is_leaf, load_state) = {
            let state = self.inner.state.borrow();
            let node = state.require(&key)?;
            (node.is_expanded, node.is_leaf, node.load_state)
        };

        if is_expanded {
            self.mutate(|state, changes| state.set_expanded(&key, false, changes))?;
            return Ok(false);
        }
        if is_leaf {
            return Err(TreeError::invalid(format!("cannot expand leaf node {key}")));
        }

        if should_load && load_state != LoadState::Loaded {
            self.load_children(Some(id.clone())).await?;
            let now_leaf = self.node(&key).is_some_and(|node| node.is_leaf);
            if now_leaf {
                debug!("{key} has no children; leaving it collapsed");
                return Ok(false);
            }
        }

        self.mutate(|state, changes| state.set_expanded(&key, true, changes))?;
        self.emit(TreeEvent::NodeExpanded(key));
        Ok(true)
    }

    /// Expand every ancestor of `id` so it becomes visible.
    pub fn reveal_path(&self, id: &E::Id) -> Result<()> {
        self.mutate(|state, changes| state.reveal_path(id, changes))
    }

    pub fn collapse_all(&self) {
        self.mutate(|state, changes| state.collapse_all(changes));
    }

    pub fn expanded_ids(&self) -> Vec<E::Id> {
        self.inner.state.borrow().expanded_ids()
    }

    // ===== SELECTION =====

    /// Select `key`. [`NodeKey::Root`] is a valid target meaning "top level".
    pub fn toggle_select(&self, key: &NodeKey<E::Id>, options: SelectOptions) -> Result<()> {
        self.mutate(|state, changes| state.toggle_select(key, options.multiple, changes))?;
        self.emit_selection(Some(key.clone()), options.reason);
        Ok(())
    }

    pub fn clear_selection(&self) {
        self.mutate(|state, changes| state.clear_selection(changes));
    }

    /// Selected ids in selection order. A selected root maps to `None`
    /// when `include_root` is set and is skipped otherwise.
    pub fn get_selected_ids(&self, include_root: bool) -> Vec<Option<E::Id>> {
        self.inner.state.borrow().selected_ids(include_root)
    }

    pub fn selected_keys(&self) -> Vec<NodeKey<E::Id>> {
        self.inner.state.borrow().selected_keys()
    }

    // ===== DRAG & DROP =====

    pub fn invalid_drop_targets(
        &self,
        dragged: &[E::Id],
    ) -> Result<IndexSet<NodeKey<E::Id>>> {
        self.inner.state.borrow().invalid_drop_targets(dragged)
    }

    /// Start a drag: compute drop validity once, disable the invalid
    /// targets and select the dragged nodes.
    pub fn begin_drag(&self, dragged: &[E::Id]) -> Result<DragGesture<E::Id>> {
        let gesture = self.mutate(|state, changes| state.begin_drag(dragged, changes))?;
        self.emit_selection(None, SelectReason::Drag);
        Ok(gesture)
    }

    /// Re-enable the targets disabled by the running drag, if any.
    pub fn end_drag(&self) -> Option<DragGesture<E::Id>> {
        self.mutate(|state, changes| state.end_drag(changes))
    }

    pub fn active_drag(&self) -> Option<DragGesture<E::Id>> {
        self.inner.state.borrow().active_drag().cloned()
    }

    // ===== SORTING =====

    /// Re-sort the children of `parent_id` (`None` for the top level).
    pub fn sort(&self, parent_id: Option<&E::Id>, recursive: bool) -> Result<()> {
        let key = NodeKey::from_parent(parent_id.cloned());
        self.mutate(|state, changes| -> Result<()> {
            state.require(&key)?;
            state.sort_children(&key, recursive, changes);
            Ok(())
        })
    }

    /// Change the comparator and re-sort the whole loaded tree locally.
    pub fn set_sort_options(&self, options: SortOptions) {
        self.mutate(|state, changes| state.set_sort_options(options, changes));
    }

    pub fn sort_options(&self) -> SortOptions {
        self.inner.state.borrow().settings().sort
    }

    // ===== SUBSCRIPTIONS =====

    /// Changes anywhere in the subtree rooted at `scope`, including `scope`.
    pub fn subscribe(&self, scope: NodeKey<E::Id>) -> UnboundedReceiver<TreeChange<E::Id>> {
        self.inner.hub.borrow_mut().subscribe_subtree(scope)
    }

    pub fn events(&self) -> UnboundedReceiver<TreeEvent<E::Id>> {
        self.inner.hub.borrow_mut().subscribe_events()
    }

    // ===== INTERNALS =====

    fn upgrade(weak: &Weak<TreeInner<E>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Spawn `task` and return a future for its outcome. The task keeps
    /// running when that future is dropped.
    fn run_detached(
        &self,
        target: String,
        task: impl Future<Output = Result<()>> + 'static,
    ) -> Result<LocalBoxFuture<'static, Result<()>>> {
        let (done, outcome) = oneshot::channel();
        self.inner
            .spawner
            .spawn_local(async move {
                let _ = done.send(task.await);
            })
            .map_err(|error| TreeError::Executor {
                target: target.clone(),
                reason: error.to_string(),
            })?;

        Ok(async move {
            outcome.await.unwrap_or_else(|_| {
                Err(TreeError::Executor {
                    target,
                    reason: "fetch task was dropped".to_string(),
                })
            })
        }
        .boxed_local())
    }

    /// Run one synchronous mutation, then publish what it changed.
    ///
    /// Whatever `apply` returns is handed back, so a fallible mutation
    /// returns its `Result` to the caller.
    fn mutate<T>(&self, apply: impl FnOnce(&mut TreeState<E>, &mut ChangeSet<E::Id>) -> T) -> T {
        let mut changes = ChangeSet::new();
        let (result, notices) = {
            let mut state = self.inner.state.borrow_mut();
            let result = apply(&mut state, &mut changes);
            let notices: Vec<_> = if self.inner.hub.borrow().has_subtree_subscribers() {
                changes
                    .into_iter()
                    .map(|change| {
                        let chain = state.scope_chain(&change.key);
                        (change, chain)
                    })
                    .collect()
            } else {
                Vec::new()
            };
            (result, notices)
        };
        self.notify(notices);
        result
    }

    fn notify(&self, notices: Vec<(TreeChange<E::Id>, Vec<NodeKey<E::Id>>)>) {
        let mut hub = self.inner.hub.borrow_mut();
        for (change, chain) in &notices {
            hub.publish(change, chain);
        }
    }

    fn emit_selection(&self, toggled: Option<NodeKey<E::Id>>, reason: SelectReason) {
        let selected = self.selected_keys();
        self.emit(TreeEvent::NodeSelected(SelectionEvent {
            toggled,
            selected,
            reason,
        }));
    }

    fn emit(&self, event: TreeEvent<E::Id>) {
        self.inner.hub.borrow_mut().emit(event);
    }
}
