//! Sibling ordering.
//!
//! The primary key comes from the tree's [`SortOptions`]; title breaks ties,
//! and nodes equal on both keep their current relative order (the sort is
//! stable), so repeated sorts never shuffle equal siblings.

use std::cmp::Ordering;

use indexmap::IndexMap;
use log::trace;
use shared::{SortBy, SortOptions, SortOrder};

use crate::entity::Entity;
use crate::node::{Node, NodeView};

pub fn compare_views(a: &NodeView, b: &NodeView, options: SortOptions) -> Ordering {
    let primary = match options.by {
        SortBy::Title => compare_titles(a, b),
        SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
        SortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    };
    let directed = match options.order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    directed.then_with(|| compare_titles(a, b))
}

// Case-insensitive first so "apple" and "Banana" interleave naturally
fn compare_titles(a: &NodeView, b: &NodeView) -> Ordering {
    a.title
        .to_lowercase()
        .cmp(&b.title.to_lowercase())
        .then_with(|| a.title.cmp(&b.title))
}

/// Sort sibling ids by looking their views up in the index.
/// Ids missing from the index sink to the end.
pub(crate) fn sort_siblings<E: Entity>(
    siblings: &mut [E::Id],
    index: &IndexMap<E::Id, Node<E>>,
    options: SortOptions,
) {
    trace!("Sorting {} siblings by {:?}", siblings.len(), options);
    siblings.sort_by(|a, b| match (index.get(a), index.get(b)) {
        (Some(a), Some(b)) => compare_views(&a.view, &b.view, options),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
