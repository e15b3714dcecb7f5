//! Synchronous structural state of a tree.
//!
//! Every mutator records what it touched into a [`ChangeSet`] and leaves the
//! mirror consistent before returning, even when it fails halfway through a
//! batch. The async orchestration and notification live in the parent module.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use shared::SortOptions;

use super::TreeSettings;
use crate::drag::{self, DragGesture};
use crate::entity::{Entity, NodeKey};
use crate::error::{Result, TreeError};
use crate::events::{ChangeKind, TreeChange};
use crate::loader::ViewProjection;
use crate::node::{LoadState, Node, VisibleNode};
use crate::sort;

pub(crate) type ChangeSet<Id> = IndexSet<TreeChange<Id>>;

type Key<E> = NodeKey<<E as Entity>::Id>;

pub(crate) struct TreeState<E: Entity> {
    projection: Rc<dyn ViewProjection<E>>,
    settings: TreeSettings,
    root: Node<E>,
    index: IndexMap<E::Id, Node<E>>,
    expanded: IndexSet<Key<E>>,
    selected: IndexSet<Key<E>>,
    orphans: IndexSet<E::Id>,
    drag: Option<DragGesture<E::Id>>,
}

impl<E: Entity> TreeState<E> {
    pub(crate) fn new(projection: Rc<dyn ViewProjection<E>>, settings: TreeSettings) -> Self {
        let root = Node::root(&settings.root_title);
        Self {
            projection,
            settings,
            root,
            index: IndexMap::new(),
            expanded: IndexSet::new(),
            selected: IndexSet::new(),
            orphans: IndexSet::new(),
            drag: None,
        }
    }

    // ===== LOOKUP =====

    pub(crate) fn settings(&self) -> &TreeSettings {
        &self.settings
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn root(&self) -> &Node<E> {
        &self.root
    }

    pub(crate) fn node(&self, key: &Key<E>) -> Option<&Node<E>> {
        match key {
            NodeKey::Root => Some(&self.root),
            NodeKey::Entity(id) => self.index.get(id),
        }
    }

    fn node_mut(&mut self, key: &Key<E>) -> Option<&mut Node<E>> {
        match key {
            NodeKey::Root => Some(&mut self.root),
            NodeKey::Entity(id) => self.index.get_mut(id),
        }
    }

    pub(crate) fn require(&self, key: &Key<E>) -> Result<&Node<E>> {
        self.node(key).ok_or_else(|| TreeError::unknown(key))
    }

    fn require_mut(&mut self, key: &Key<E>) -> Result<&mut Node<E>> {
        self.node_mut(key).ok_or_else(|| TreeError::unknown(key))
    }

    /// Parents of `key`, nearest first, ending at the root.
    pub(crate) fn ancestors(&self, key: &Key<E>) -> Vec<Key<E>> {
        let mut ancestors = Vec::new();
        let mut current = self.node(key).and_then(|node| node.parent.clone());
        while let Some(parent) = current {
            // A cycle would be a bug elsewhere; never spin on it
            if ancestors.len() > self.index.len() {
                warn!("Parent chain of {key} does not terminate");
                break;
            }
            current = self.node(&parent).and_then(|node| node.parent.clone());
            ancestors.push(parent);
        }
        ancestors
    }

    /// The key itself followed by its ancestors, for scoped notifications.
    pub(crate) fn scope_chain(&self, key: &Key<E>) -> Vec<Key<E>> {
        let mut chain = vec![key.clone()];
        chain.extend(self.ancestors(key));
        chain
    }

    /// Walks up from `candidate`; true when `ancestor` is met on the way.
    fn is_self_or_descendant(&self, candidate: &E::Id, ancestor: &E::Id) -> bool {
        let mut current = Some(NodeKey::Entity(candidate.clone()));
        let mut steps = 0;
        while let Some(NodeKey::Entity(id)) = current {
            if &id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.index.len() {
                return false;
            }
            current = self.index.get(&id).and_then(|node| node.parent.clone());
        }
        false
    }

    // ===== UPSERT & REPARENT =====

    pub(crate) fn upsert_many(
        &mut self,
        entities: Vec<E>,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        let mut dirty = IndexSet::new();
        let result = self.apply_batch(entities, &mut dirty, changes);
        self.sort_groups(&dirty, changes);
        result
    }

    /// Apply entities without sorting; touched sibling lists go into `dirty`.
    fn apply_batch(
        &mut self,
        entities: Vec<E>,
        dirty: &mut IndexSet<Key<E>>,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        for entity in &entities {
            validate_identity(entity)?;
        }
        for entity in parents_first(entities) {
            self.apply_one(entity, dirty, changes)?;
        }
        Ok(())
    }

    /// Where the entity belongs, and whether that is an orphan placement.
    fn resolve_parent(&self, parent_id: Option<E::Id>) -> (Key<E>, bool) {
        match declared_key::<E>(parent_id) {
            NodeKey::Root => (NodeKey::Root, false),
            NodeKey::Entity(parent) if self.index.contains_key(&parent) => {
                (NodeKey::Entity(parent), false)
            }
            NodeKey::Entity(_) => (NodeKey::Root, true),
        }
    }

    fn apply_one(
        &mut self,
        entity: E,
        dirty: &mut IndexSet<Key<E>>,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        let id = entity.id();
        let declared_parent = entity.parent_id();
        let (target, orphan) = self.resolve_parent(declared_parent.clone());
        let view = self.projection.project_view(&entity);

        let current = match self.index.get(&id) {
            Some(node) => node.parent.clone().unwrap_or(NodeKey::Root),
            None => {
                debug!("Inserting node {id} under {target}");
                let mut node = Node::new(entity, view);
                node.parent = Some(target.clone());
                self.index.insert(id.clone(), node);
                self.attach(&id, &target);
                self.set_orphan(&id, orphan, declared_parent.as_ref());
                dirty.insert(target.clone());
                changes.insert(TreeChange::new(target, ChangeKind::Children));
                return Ok(());
            }
        };

        if current != target {
            if let NodeKey::Entity(new_parent) = &target {
                if self.is_self_or_descendant(new_parent, &id) {
                    return Err(TreeError::invalid(format!(
                        "moving {id} under {new_parent} would make it its own ancestor"
                    )));
                }
            }
        }

        if let Some(node) = self.index.get_mut(&id) {
            let view_changed = node.view != view;
            let was_leaf = node.is_leaf;
            node.replace_entity(entity, view);
            if view_changed || was_leaf != node.is_leaf {
                trace!("Reprojected {id}");
                changes.insert(TreeChange::new(NodeKey::Entity(id.clone()), ChangeKind::View));
                dirty.insert(current.clone());
            }
        }

        if current != target {
            self.reparent(&id, current, target, dirty, changes);
        }
        self.set_orphan(&id, orphan, declared_parent.as_ref());
        Ok(())
    }

    fn reparent(
        &mut self,
        id: &E::Id,
        from: Key<E>,
        to: Key<E>,
        dirty: &mut IndexSet<Key<E>>,
        changes: &mut ChangeSet<E::Id>,
    ) {
        debug!("Reparenting {id}: {from} -> {to}");
        // Unlink and relink with no fallible step in between
        self.detach(id, &from, changes);
        self.attach(id, &to);
        if let Some(node) = self.index.get_mut(id) {
            node.parent = Some(to.clone());
        }
        changes.insert(TreeChange::new(to.clone(), ChangeKind::Children));
        dirty.insert(from);
        dirty.insert(to);
    }

    fn attach(&mut self, id: &E::Id, parent: &Key<E>) {
        if let Some(parent_node) = self.node_mut(parent) {
            if !parent_node.children.contains(id) {
                parent_node.children.push(id.clone());
            }
            parent_node.is_leaf = false;
        }
    }

    /// Unlink `id` from `parent`; an emptied parent becomes a leaf and,
    /// unless configured otherwise, collapses.
    fn detach(&mut self, id: &E::Id, parent: &Key<E>, changes: &mut ChangeSet<E::Id>) {
        let collapse = self.settings.collapse_emptied_parents && !parent.is_root();
        let mut collapsed = false;
        let Some(parent_node) = self.node_mut(parent) else {
            return;
        };
        parent_node.children.retain(|child| child != id);
        if parent_node.children.is_empty() {
            parent_node.is_leaf = true;
            if collapse && parent_node.is_expanded {
                parent_node.is_expanded = false;
                collapsed = true;
            }
        }
        if collapsed {
            debug!("Collapsing {parent}: its last child left");
            self.expanded.shift_remove(parent);
            changes.insert(TreeChange::new(parent.clone(), ChangeKind::State));
        }
        changes.insert(TreeChange::new(parent.clone(), ChangeKind::Children));
    }

    fn set_orphan(&mut self, id: &E::Id, orphan: bool, declared_parent: Option<&E::Id>) {
        let Some(node) = self.index.get_mut(id) else {
            return;
        };
        node.orphan = orphan;
        if orphan {
            if self.orphans.insert(id.clone()) {
                warn!(
                    "Parent {} of {id} is not loaded; parking it at the top level",
                    declared_parent.map(ToString::to_string).unwrap_or_default()
                );
            }
        } else {
            self.orphans.shift_remove(id);
        }
    }

    pub(crate) fn orphans(&self) -> Vec<E::Id> {
        self.orphans.iter().cloned().collect()
    }

    /// Move every orphan whose declared parent is now indexed under it.
    pub(crate) fn reconcile_orphans(&mut self, changes: &mut ChangeSet<E::Id>) -> Vec<E::Id> {
        let mut dirty = IndexSet::new();
        let mut adopted = Vec::new();
        let candidates: Vec<E::Id> = self.orphans.iter().cloned().collect();

        for id in candidates {
            let declared = self
                .index
                .get(&id)
                .and_then(|node| node.entity.as_ref())
                .and_then(|entity| entity.parent_id());
            let NodeKey::Entity(parent_id) = declared_key::<E>(declared) else {
                continue;
            };
            if !self.index.contains_key(&parent_id) {
                continue;
            }
            if self.is_self_or_descendant(&parent_id, &id) {
                warn!("Orphan {id} cannot move under its own descendant {parent_id}");
                continue;
            }
            let from = self
                .index
                .get(&id)
                .and_then(|node| node.parent.clone())
                .unwrap_or(NodeKey::Root);
            self.reparent(&id, from, NodeKey::Entity(parent_id.clone()), &mut dirty, changes);
            self.set_orphan(&id, false, Some(&parent_id));
            adopted.push(id);
        }

        self.sort_groups(&dirty, changes);
        adopted
    }

    // ===== REMOVAL =====

    pub(crate) fn remove(&mut self, ids: &[E::Id], changes: &mut ChangeSet<E::Id>) -> Result<()> {
        if let Some(id) = ids.iter().find(|id| E::is_reserved_root(id)) {
            return Err(TreeError::invalid(format!("the virtual root ({id}) cannot be removed")));
        }

        let doomed: IndexSet<E::Id> = ids
            .iter()
            .filter(|id| {
                let known = self.index.contains_key(*id);
                if !known {
                    debug!("Ignoring removal of {id}: not loaded");
                }
                known
            })
            .cloned()
            .collect();

        for id in &doomed {
            let parent = self
                .index
                .get(id)
                .and_then(|node| node.parent.clone())
                .unwrap_or(NodeKey::Root);
            self.detach(id, &parent, changes);
        }

        let mut stranded = Vec::new();
        for id in &doomed {
            let Some(node) = self.index.shift_remove(id) else {
                continue;
            };
            debug!("Removed node {id}");
            let key = NodeKey::Entity(id.clone());
            self.expanded.shift_remove(&key);
            self.selected.shift_remove(&key);
            self.orphans.shift_remove(id);
            stranded.extend(node.children.into_iter().filter(|child| !doomed.contains(child)));
            changes.insert(TreeChange::new(key, ChangeKind::Removed));
        }

        // Loaded children of a removed node that were not removed themselves
        if !stranded.is_empty() {
            for child in &stranded {
                self.attach(child, &NodeKey::Root);
                let declared = self.index.get_mut(child).and_then(|node| {
                    node.parent = Some(NodeKey::Root);
                    node.entity.as_ref().and_then(|entity| entity.parent_id())
                });
                self.set_orphan(child, declared.is_some(), declared.as_ref());
            }
            changes.insert(TreeChange::new(NodeKey::Root, ChangeKind::Children));
            self.sort_children(&NodeKey::Root, false, changes);
        }
        Ok(())
    }

    // ===== LOADING =====

    pub(crate) fn begin_load(
        &mut self,
        key: &Key<E>,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        let node = self.require_mut(key)?;
        node.is_loading = true;
        changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
        Ok(())
    }

    pub(crate) fn fail_load(&mut self, key: &Key<E>, changes: &mut ChangeSet<E::Id>) {
        if let Some(node) = self.node_mut(key) {
            node.is_loading = false;
            changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
        }
    }

    pub(crate) fn finish_children_load(
        &mut self,
        key: &Key<E>,
        entities: Vec<E>,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        debug!("Applying {} children of {key}", entities.len());
        let mut dirty = IndexSet::new();
        let result = self.apply_batch(entities, &mut dirty, changes);
        dirty.insert(key.clone());
        self.sort_groups(&dirty, changes);

        match self.node_mut(key) {
            Some(node) => {
                node.is_loading = false;
                if result.is_ok() {
                    node.load_state = LoadState::Loaded;
                }
                node.refresh_leaf();
                changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
            }
            None => debug!("{key} was removed while its children were loading"),
        }
        result
    }

    pub(crate) fn finish_fragment_load(
        &mut self,
        entities: Vec<E>,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        debug!("Applying fragment of {} entities", entities.len());
        let ids: Vec<E::Id> = entities.iter().map(Entity::id).collect();
        let mut dirty = IndexSet::new();
        let result = self.apply_batch(entities, &mut dirty, changes);
        // Interleaved parents: each touched sibling group is sorted exactly once
        self.sort_groups(&dirty, changes);

        let mut parents = IndexSet::new();
        for id in &ids {
            if let Some(node) = self.index.get(id) {
                if !node.orphan {
                    if let Some(parent) = &node.parent {
                        parents.insert(parent.clone());
                    }
                }
            }
        }
        for parent in parents {
            if let Some(node) = self.node_mut(&parent) {
                if node.load_state == LoadState::NotLoaded {
                    node.load_state = LoadState::Partial;
                }
                node.refresh_leaf();
            }
        }
        result
    }

    pub(crate) fn load_state(&self, key: &Key<E>) -> Option<LoadState> {
        self.node(key).map(|node| node.load_state)
    }

    // ===== EXPANSION =====

    pub(crate) fn set_expanded(
        &mut self,
        key: &Key<E>,
        expanded: bool,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        if key.is_root() {
            return Err(TreeError::invalid("the virtual root is always expanded"));
        }
        let node = self.require_mut(key)?;
        if expanded && node.is_leaf {
            return Err(TreeError::invalid(format!("cannot expand leaf node {key}")));
        }
        if node.is_expanded != expanded {
            node.is_expanded = expanded;
            changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
        }
        if expanded {
            self.expanded.insert(key.clone());
        } else {
            self.expanded.shift_remove(key);
        }
        Ok(())
    }

    pub(crate) fn reveal_path(&mut self, id: &E::Id, changes: &mut ChangeSet<E::Id>) -> Result<()> {
        let key = NodeKey::Entity(id.clone());
        self.require(&key)?;
        for ancestor in self.ancestors(&key) {
            if ancestor.is_root() {
                continue;
            }
            if let Some(node) = self.node_mut(&ancestor) {
                if !node.is_expanded {
                    node.is_expanded = true;
                    changes.insert(TreeChange::new(ancestor.clone(), ChangeKind::State));
                }
            }
            self.expanded.insert(ancestor);
        }
        Ok(())
    }

    pub(crate) fn collapse_all(&mut self, changes: &mut ChangeSet<E::Id>) {
        for key in std::mem::take(&mut self.expanded) {
            if let Some(node) = self.node_mut(&key) {
                node.is_expanded = false;
                changes.insert(TreeChange::new(key, ChangeKind::State));
            }
        }
    }

    pub(crate) fn expanded_ids(&self) -> Vec<E::Id> {
        self.expanded.iter().filter_map(|key| key.entity_id().cloned()).collect()
    }

    // ===== SELECTION =====

    pub(crate) fn toggle_select(
        &mut self,
        key: &Key<E>,
        multiple: bool,
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<()> {
        self.require(key)?;
        if multiple {
            let select = !self.selected.contains(key);
            self.set_selected(key, select, changes);
        } else {
            self.clear_selection(changes);
            self.set_selected(key, true, changes);
        }
        Ok(())
    }

    fn set_selected(&mut self, key: &Key<E>, selected: bool, changes: &mut ChangeSet<E::Id>) {
        if let Some(node) = self.node_mut(key) {
            if node.is_selected != selected {
                node.is_selected = selected;
                changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
            }
        }
        if selected {
            self.selected.insert(key.clone());
        } else {
            self.selected.shift_remove(key);
        }
    }

    pub(crate) fn clear_selection(&mut self, changes: &mut ChangeSet<E::Id>) {
        for key in std::mem::take(&mut self.selected) {
            if let Some(node) = self.node_mut(&key) {
                node.is_selected = false;
                changes.insert(TreeChange::new(key, ChangeKind::State));
            }
        }
    }

    pub(crate) fn selected_keys(&self) -> Vec<Key<E>> {
        self.selected.iter().cloned().collect()
    }

    /// The root has no entity id; it maps to `None` when included.
    pub(crate) fn selected_ids(&self, include_root: bool) -> Vec<Option<E::Id>> {
        self.selected
            .iter()
            .filter_map(|key| match key {
                NodeKey::Root => include_root.then_some(None),
                NodeKey::Entity(id) => Some(Some(id.clone())),
            })
            .collect()
    }

    // ===== DRAG =====

    pub(crate) fn invalid_drop_targets(&self, dragged: &[E::Id]) -> Result<IndexSet<Key<E>>> {
        drag::invalid_drop_targets(&self.index, dragged)
    }

    pub(crate) fn begin_drag(
        &mut self,
        dragged: &[E::Id],
        changes: &mut ChangeSet<E::Id>,
    ) -> Result<DragGesture<E::Id>> {
        let invalid = self.invalid_drop_targets(dragged)?;
        self.end_drag(changes);

        let gesture = DragGesture::new(dragged.to_vec(), invalid);
        for key in gesture.invalid_targets() {
            if let Some(node) = self.node_mut(key) {
                node.is_disabled = true;
                changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
            }
        }
        self.clear_selection(changes);
        for id in dragged {
            self.set_selected(&NodeKey::Entity(id.clone()), true, changes);
        }
        debug!(
            "Drag started with {} nodes, {} invalid targets",
            dragged.len(),
            gesture.invalid_targets().len()
        );
        self.drag = Some(gesture.clone());
        Ok(gesture)
    }

    pub(crate) fn end_drag(
        &mut self,
        changes: &mut ChangeSet<E::Id>,
    ) -> Option<DragGesture<E::Id>> {
        let gesture = self.drag.take()?;
        for key in gesture.invalid_targets() {
            if let Some(node) = self.node_mut(key) {
                node.is_disabled = false;
                changes.insert(TreeChange::new(key.clone(), ChangeKind::State));
            }
        }
        Some(gesture)
    }

    pub(crate) fn active_drag(&self) -> Option<&DragGesture<E::Id>> {
        self.drag.as_ref()
    }

    // ===== SORTING =====

    pub(crate) fn set_sort_options(
        &mut self,
        options: SortOptions,
        changes: &mut ChangeSet<E::Id>,
    ) {
        debug!("Sort options changed to {:?}", options);
        self.settings.sort = options;
        self.sort_children(&NodeKey::Root, true, changes);
    }

    pub(crate) fn sort_children(
        &mut self,
        key: &Key<E>,
        recursive: bool,
        changes: &mut ChangeSet<E::Id>,
    ) {
        let Some(node) = self.node_mut(key) else {
            return;
        };
        let mut children = std::mem::take(&mut node.children);
        let before = children.clone();
        sort::sort_siblings(&mut children, &self.index, self.settings.sort);
        if children != before {
            changes.insert(TreeChange::new(key.clone(), ChangeKind::Children));
        }
        let descend = if recursive { children.clone() } else { Vec::new() };
        if let Some(node) = self.node_mut(key) {
            node.children = children;
        }
        for child in descend {
            self.sort_children(&NodeKey::Entity(child), true, changes);
        }
    }

    fn sort_groups(&mut self, groups: &IndexSet<Key<E>>, changes: &mut ChangeSet<E::Id>) {
        for key in groups {
            self.sort_children(key, false, changes);
        }
    }

    // ===== QUERIES =====

    pub(crate) fn children_of(&self, key: &Key<E>) -> Result<Vec<Node<E>>> {
        let node = self.require(key)?;
        Ok(node
            .children
            .iter()
            .filter_map(|id| self.index.get(id).cloned())
            .collect())
    }

    pub(crate) fn siblings_of(&self, id: &E::Id) -> Result<Vec<Node<E>>> {
        let key = NodeKey::Entity(id.clone());
        let parent = self.require(&key)?.parent.clone().unwrap_or(NodeKey::Root);
        let mut siblings = self.children_of(&parent)?;
        siblings.retain(|node| node.id() != Some(id));
        Ok(siblings)
    }

    pub(crate) fn ancestors_of(&self, id: &E::Id) -> Result<Vec<Node<E>>> {
        let key = NodeKey::Entity(id.clone());
        self.require(&key)?;
        Ok(self
            .ancestors(&key)
            .iter()
            .filter_map(|ancestor| ancestor.entity_id())
            .filter_map(|ancestor| self.index.get(ancestor).cloned())
            .collect())
    }

    pub(crate) fn visible_rows(&self) -> Vec<VisibleNode<E>> {
        let mut rows = Vec::new();
        self.collect_visible(&self.root.children, 0, &mut rows);
        rows
    }

    fn collect_visible(&self, children: &[E::Id], depth: usize, rows: &mut Vec<VisibleNode<E>>) {
        for id in children {
            if let Some(node) = self.index.get(id) {
                rows.push(VisibleNode {
                    depth,
                    node: node.clone(),
                });
                if node.is_expanded {
                    self.collect_visible(&node.children, depth + 1, rows);
                }
            }
        }
    }

    /// Verify parent/child agreement, leaf flags, flag/set agreement and
    /// that the index and the structure reachable from the root coincide.
    pub(crate) fn check_invariants(&self) -> Result<()> {
        let fail = |message: String| Err(TreeError::Inconsistent(message));

        for (id, node) in &self.index {
            let key = NodeKey::Entity(id.clone());
            let Some(parent_key) = node.parent.as_ref() else {
                return fail(format!("node {id} has no parent link"));
            };
            let Some(parent) = self.node(parent_key) else {
                return fail(format!("node {id} points at missing parent {parent_key}"));
            };
            let listed = parent.children.iter().filter(|child| *child == id).count();
            if listed != 1 {
                return fail(format!("node {id} is listed {listed} times under {parent_key}"));
            }
            let declared =
                declared_key::<E>(node.entity.as_ref().and_then(|entity| entity.parent_id()));
            if node.orphan {
                if !parent_key.is_root() {
                    return fail(format!("orphan {id} is not at the top level"));
                }
                if !self.orphans.contains(id) {
                    return fail(format!("orphan {id} is not tracked"));
                }
            } else if &declared != parent_key {
                return fail(format!(
                    "node {id} declares parent {declared} but lives under {parent_key}"
                ));
            }
            if node.is_leaf && !node.children.is_empty() {
                return fail(format!("node {id} is a leaf with {} children", node.children.len()));
            }
            if node.is_expanded != self.expanded.contains(&key) {
                return fail(format!("expanded flag of {id} disagrees with the expanded set"));
            }
            if node.is_selected != self.selected.contains(&key) {
                return fail(format!("selected flag of {id} disagrees with the selection"));
            }
        }

        let mut seen = HashSet::new();
        let mut stack = vec![NodeKey::Root];
        while let Some(key) = stack.pop() {
            let Some(node) = self.node(&key) else {
                return fail(format!("{key} is reachable but not indexed"));
            };
            for child in &node.children {
                if !seen.insert(child.clone()) {
                    return fail(format!("node {child} is reachable twice"));
                }
                match self.index.get(child) {
                    Some(child_node) if child_node.parent.as_ref() == Some(&key) => {}
                    Some(_) => {
                        return fail(format!(
                            "node {child} is listed under {key} but points elsewhere"
                        ));
                    }
                    None => {
                        return fail(format!("node {child} is listed under {key} but not indexed"));
                    }
                }
                stack.push(NodeKey::Entity(child.clone()));
            }
        }
        if seen.len() != self.index.len() {
            return fail(format!(
                "{} indexed nodes are unreachable from the root",
                self.index.len() - seen.len()
            ));
        }
        Ok(())
    }
}

/// A parent pointing at the backend's own root record means top level.
fn declared_key<E: Entity>(parent_id: Option<E::Id>) -> Key<E> {
    match parent_id {
        Some(id) if !E::is_reserved_root(&id) => NodeKey::Entity(id),
        _ => NodeKey::Root,
    }
}

fn validate_identity<E: Entity>(entity: &E) -> Result<()> {
    let id = entity.id();
    if E::is_reserved_root(&id) {
        return Err(TreeError::invalid(format!("entity id {id} is reserved for the virtual root")));
    }
    if entity.parent_id().as_ref() == Some(&id) {
        return Err(TreeError::invalid(format!("entity {id} declares itself as its parent")));
    }
    Ok(())
}

/// Reorder a batch so that an entity whose parent is also in the batch comes
/// after that parent. Relative order is otherwise kept.
fn parents_first<E: Entity>(entities: Vec<E>) -> Vec<E> {
    let parents: HashMap<E::Id, Option<E::Id>> = entities
        .iter()
        .map(|entity| (entity.id(), entity.parent_id()))
        .collect();

    let depth_of = |id: &E::Id| {
        let mut depth = 0;
        let mut current = parents.get(id).cloned().flatten();
        while let Some(parent) = current {
            if depth > parents.len() {
                break;
            }
            match parents.get(&parent) {
                Some(next) => {
                    depth += 1;
                    current = next.clone();
                }
                None => break,
            }
        }
        depth
    };

    let mut ranked: Vec<(usize, E)> = entities
        .into_iter()
        .map(|entity| (depth_of(&entity.id()), entity))
        .collect();
    ranked.sort_by_key(|(depth, _)| *depth);
    ranked.into_iter().map(|(_, entity)| entity).collect()
}
