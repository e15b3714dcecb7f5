//! Tree operations behind each subcommand, generic over the entity kind.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use entity_tree::{
    Entity, InMemoryLoader, NodeKey, Tree, TreeSettings, TreeStrategy, ViewProjection,
};
use log::{debug, info};
use serde::de::DeserializeOwned;

pub fn read_entities<E: DeserializeOwned>(path: &Path) -> Result<Vec<E>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read entity dump: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entity dump: {}", path.display()))
}

/// Serve `entities` through an in-memory loader and fetch the top level.
pub async fn open<E: Entity>(
    entities: Vec<E>,
    projection: impl ViewProjection<E> + 'static,
    settings: TreeSettings,
) -> Result<Tree<E>> {
    info!("Serving {} entities", entities.len());
    let loader = InMemoryLoader::from_entities(entities);
    let tree = Tree::with_settings(TreeStrategy::new(projection, loader), settings);
    tree.load_children(None).await.context("Failed to load the top level")?;
    Ok(tree)
}

/// Expand every branch, fetching children level by level.
pub async fn expand_all<E: Entity>(tree: &Tree<E>) -> Result<()> {
    let mut pending: VecDeque<E::Id> = tree.child_ids(None)?.into();
    while let Some(id) = pending.pop_front() {
        let Some(node) = tree.get_node(&id) else {
            continue;
        };
        if node.is_leaf() || node.is_expanded() {
            continue;
        }
        if tree
            .toggle_expand(&id, true)
            .await
            .with_context(|| format!("Failed to expand {id}"))?
        {
            pending.extend(tree.child_ids(Some(&id))?);
        }
    }
    debug!("Expanded {} nodes", tree.expanded_ids().len());
    Ok(())
}

/// Indented outline of the visible rows.
pub fn render<E: Entity>(tree: &Tree<E>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", tree.root().title());
    for row in tree.flatten_visible() {
        let node = &row.node;
        let marker = if node.is_leaf() {
            "•"
        } else if node.is_expanded() {
            "▾"
        } else {
            "▸"
        };
        let id = node.id().map(ToString::to_string).unwrap_or_default();
        let _ = write!(out, "{}{marker} {} [{id}]", "  ".repeat(row.depth + 1), node.title());
        if node.is_orphan() {
            out.push_str(" (orphan)");
        }
        out.push('\n');
    }
    out
}

/// Locate `id` and describe the path from the top level down to it.
pub async fn locate<E: Entity>(tree: &Tree<E>, id: &E::Id) -> Result<String> {
    tree.locate(id).await.with_context(|| format!("Failed to locate {id}"))?;
    let mut path: Vec<String> = tree
        .get_ancestors(id)?
        .iter()
        .map(|node| node.title().to_string())
        .collect();
    path.reverse();
    if let Some(node) = tree.get_node(id) {
        path.push(node.title().to_string());
    }
    Ok(path.join(" / "))
}

/// Invalid drop targets for dragging `ids`, fetching any that are not loaded.
pub async fn drop_targets<E: Entity>(tree: &Tree<E>, ids: &[E::Id]) -> Result<Vec<String>> {
    for id in ids {
        if !tree.contains(id) {
            tree.load_fragment(id.clone())
                .await
                .with_context(|| format!("Failed to load {id}"))?;
        }
    }
    let targets = tree.invalid_drop_targets(ids)?;
    Ok(targets
        .iter()
        .map(|key| match key {
            NodeKey::Root => tree.root().title().to_string(),
            NodeKey::Entity(id) => {
                let title = tree
                    .get_node(id)
                    .map(|node| node.title().to_string())
                    .unwrap_or_default();
                format!("{title} [{id}]")
            }
        })
        .collect())
}
