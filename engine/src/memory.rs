//! A loader backed by an in-memory entity table.
//!
//! Used by the `tree-inspect` tool to serve a JSON dump, and by tests, which
//! additionally count fetches, hold fetches open and inject failures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use log::trace;

use crate::entity::Entity;
use crate::error::LoadError;
use crate::loader::EntityLoader;

struct Store<E: Entity> {
    entities: IndexMap<E::Id, E>,
    children_calls: usize,
    fragment_calls: usize,
    failures: VecDeque<LoadError>,
    paused: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Cloning shares the table, so a test can keep a handle after giving
/// one to a tree.
pub struct InMemoryLoader<E: Entity> {
    store: Rc<RefCell<Store<E>>>,
}

impl<E: Entity> Clone for InMemoryLoader<E> {
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl<E: Entity> Default for InMemoryLoader<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> InMemoryLoader<E> {
    pub fn new() -> Self {
        Self {
            store: Rc::new(RefCell::new(Store {
                entities: IndexMap::new(),
                children_calls: 0,
                fragment_calls: 0,
                failures: VecDeque::new(),
                paused: false,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn from_entities(entities: impl IntoIterator<Item = E>) -> Self {
        let loader = Self::new();
        for entity in entities {
            loader.insert(entity);
        }
        loader
    }

    /// Insert or replace the stored record.
    pub fn insert(&self, entity: E) {
        self.store.borrow_mut().entities.insert(entity.id(), entity);
    }

    pub fn remove(&self, id: &E::Id) -> Option<E> {
        self.store.borrow_mut().entities.shift_remove(id)
    }

    pub fn get(&self, id: &E::Id) -> Option<E> {
        self.store.borrow().entities.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.borrow().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored records whose parent is `parent_id`, in insertion order.
    pub fn children_of(&self, parent_id: Option<&E::Id>) -> Vec<E> {
        let store = self.store.borrow();
        store
            .entities
            .values()
            .filter(|entity| entity.parent_id().as_ref() == parent_id)
            .cloned()
            .collect()
    }

    /// Ancestor chain of `target_id` with the siblings at every level,
    /// top level first.
    pub fn fragment_of(&self, target_id: &E::Id) -> Result<Vec<E>, LoadError> {
        let mut chain = Vec::new();
        {
            let store = self.store.borrow();
            let mut current = store.entities.get(target_id);
            if current.is_none() {
                return Err(LoadError::NotFound(target_id.to_string()));
            }
            while let Some(entity) = current {
                if chain.len() > store.entities.len() {
                    return Err(LoadError::Validation(format!("parent chain of {target_id} loops")));
                }
                chain.push(entity.parent_id());
                current = entity.parent_id().and_then(|parent| store.entities.get(&parent));
            }
        }

        let mut fragment = Vec::new();
        for parent in chain.iter().rev() {
            fragment.extend(self.children_of(parent.as_ref()));
        }
        Ok(fragment)
    }

    pub fn children_calls(&self) -> usize {
        self.store.borrow().children_calls
    }

    pub fn fragment_calls(&self) -> usize {
        self.store.borrow().fragment_calls
    }

    /// Make the next fetch fail with `error`. Calls queue up.
    pub fn fail_next(&self, error: LoadError) {
        self.store.borrow_mut().failures.push_back(error);
    }

    /// Hold every fetch started from now on until [`InMemoryLoader::resume`].
    pub fn pause(&self) {
        self.store.borrow_mut().paused = true;
    }

    pub fn resume(&self) {
        let waiters = {
            let mut store = self.store.borrow_mut();
            store.paused = false;
            std::mem::take(&mut store.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Counts the call and resolves the outcome now; the returned future
    /// only waits for the gate.
    fn respond(
        &self,
        outcome: impl FnOnce(&Self) -> Result<Vec<E>, LoadError>,
    ) -> LocalBoxFuture<'static, Result<Vec<E>, LoadError>> {
        let injected = self.store.borrow_mut().failures.pop_front();
        let result = match injected {
            Some(error) => Err(error),
            None => outcome(self),
        };
        let gate = {
            let mut store = self.store.borrow_mut();
            if store.paused {
                let (open, gate) = oneshot::channel();
                store.waiters.push(open);
                Some(gate)
            } else {
                None
            }
        };
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }
        .boxed_local()
    }
}

impl<E: Entity> EntityLoader<E> for InMemoryLoader<E> {
    fn fetch_children(
        &self,
        parent_id: Option<E::Id>,
    ) -> LocalBoxFuture<'static, Result<Vec<E>, LoadError>> {
        trace!("In-memory fetch of children of {:?}", parent_id);
        self.store.borrow_mut().children_calls += 1;
        self.respond(|loader| Ok(loader.children_of(parent_id.as_ref())))
    }

    fn fetch_fragment(
        &self,
        target_id: E::Id,
    ) -> LocalBoxFuture<'static, Result<Vec<E>, LoadError>> {
        trace!("In-memory fetch of fragment for {target_id}");
        self.store.borrow_mut().fragment_calls += 1;
        self.respond(|loader| loader.fragment_of(&target_id))
    }
}
