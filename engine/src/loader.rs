use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::task::LocalSpawn;

use crate::entity::Entity;
use crate::error::LoadError;
use crate::node::NodeView;
use crate::spawn::TokioLocalSpawner;

/// Fetch side of a tree, implemented by the backend-facing service layer.
///
/// Futures are `'static` so a fetch can outlive the call that started it and
/// be shared by every caller that asks for the same children meanwhile.
pub trait EntityLoader<E: Entity> {
    /// Direct children of `parent_id`; `None` asks for the top level.
    fn fetch_children(
        &self,
        parent_id: Option<E::Id>,
    ) -> LocalBoxFuture<'static, Result<Vec<E>, LoadError>>;

    /// A flat batch spanning from some ancestor down to `target_id`,
    /// possibly including siblings along the way, in any order.
    fn fetch_fragment(
        &self,
        target_id: E::Id,
    ) -> LocalBoxFuture<'static, Result<Vec<E>, LoadError>>;
}

/// Derives a node's view fields from its entity.
pub trait ViewProjection<E: Entity> {
    fn project_view(&self, entity: &E) -> NodeView;
}

impl<E, F> ViewProjection<E> for F
where
    E: Entity,
    F: Fn(&E) -> NodeView,
{
    fn project_view(&self, entity: &E) -> NodeView {
        self(entity)
    }
}

/// Everything that differs between the note, material and memo trees,
/// plus the spawner fetches run on.
pub struct TreeStrategy<E: Entity> {
    pub(crate) projection: Rc<dyn ViewProjection<E>>,
    pub(crate) loader: Rc<dyn EntityLoader<E>>,
    pub(crate) spawner: Rc<dyn LocalSpawn>,
}

impl<E: Entity> TreeStrategy<E> {
    pub fn new(
        projection: impl ViewProjection<E> + 'static,
        loader: impl EntityLoader<E> + 'static,
    ) -> Self {
        Self::from_shared(Rc::new(projection), Rc::new(loader))
    }

    /// Build from parts already shared with other trees.
    pub fn from_shared(
        projection: Rc<dyn ViewProjection<E>>,
        loader: Rc<dyn EntityLoader<E>>,
    ) -> Self {
        Self {
            projection,
            loader,
            spawner: Rc::new(TokioLocalSpawner),
        }
    }

    /// Run fetches on `spawner` instead of the tokio local runtime.
    pub fn with_spawner(self, spawner: impl LocalSpawn + 'static) -> Self {
        Self {
            spawner: Rc::new(spawner),
            ..self
        }
    }
}

impl<E: Entity> Clone for TreeStrategy<E> {
    fn clone(&self) -> Self {
        Self {
            projection: Rc::clone(&self.projection),
            loader: Rc::clone(&self.loader),
            spawner: Rc::clone(&self.spawner),
        }
    }
}
