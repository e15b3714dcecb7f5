use entity_tree::kinds::{self, NoteTree};
use entity_tree::{
    EntityLoader, InMemoryLoader, LoadError, LoadState, NodeKey, SelectOptions, SortBy,
    SortOptions, SortOrder, TreeError, TreeSettings,
};
use futures::FutureExt;
use shared::NoteEntity;
use std::rc::Rc;

fn note(id: u64, parent_id: Option<u64>, title: &str) -> NoteEntity {
    NoteEntity {
        id,
        parent_id,
        title: title.to_string(),
        icon: None,
        child_count: None,
        created_at: 0,
        updated_at: 0,
    }
}

fn setup(entities: Vec<NoteEntity>) -> (NoteTree, InMemoryLoader<NoteEntity>) {
    let loader = InMemoryLoader::from_entities(entities);
    let tree = kinds::note_tree(loader.clone(), TreeSettings::default());
    (tree, loader)
}

fn ids(tree: &NoteTree, parent: Option<u64>) -> Vec<u64> {
    tree.get_children(parent.as_ref())
        .unwrap()
        .iter()
        .filter_map(|node| node.id().copied())
        .collect()
}

fn titles(tree: &NoteTree, parent: Option<u64>) -> Vec<String> {
    tree.get_children(parent.as_ref())
        .unwrap()
        .iter()
        .map(|node| node.title().to_string())
        .collect()
}

#[test]
fn invariants_hold_after_every_structural_call() {
    let (tree, _) = setup(Vec::new());
    let steps: Vec<Box<dyn Fn(&NoteTree) -> Result<(), TreeError>>> = vec![
        Box::new(|t: &NoteTree| t.upsert(note(1, None, "A"))),
        Box::new(|t: &NoteTree| t.upsert(note(2, Some(1), "B"))),
        Box::new(|t: &NoteTree| t.upsert(note(3, Some(2), "C"))),
        Box::new(|t: &NoteTree| t.upsert(note(4, Some(8), "orphan"))),
        Box::new(|t: &NoteTree| t.upsert(note(3, Some(1), "C"))),
        Box::new(|t: &NoteTree| t.upsert(note(8, Some(3), "late parent"))),
        Box::new(|t: &NoteTree| t.upsert(note(4, Some(8), "orphan"))),
        Box::new(|t: &NoteTree| t.remove(&[1])),
        Box::new(|t: &NoteTree| t.upsert(note(1, None, "A again"))),
        Box::new(|t: &NoteTree| t.upsert(note(2, Some(1), "B"))),
        Box::new(|t: &NoteTree| t.remove(&[3, 2])),
        Box::new(|t: &NoteTree| {
            t.upsert_many(vec![note(9, Some(10), "x"), note(10, Some(8), "y")])
        }),
    ];

    for (step, apply) in steps.iter().enumerate() {
        apply(&tree).unwrap_or_else(|error| panic!("step {step} failed: {error}"));
        tree.check_invariants()
            .unwrap_or_else(|error| panic!("step {step} broke the tree: {error}"));
    }
}

#[test]
fn upsert_is_idempotent() {
    let (tree, _) = setup(Vec::new());
    tree.upsert_many(vec![note(1, None, "A"), note(2, Some(1), "B")]).unwrap();
    tree.reveal_path(&2).unwrap();
    let mut changes = tree.subscribe(NodeKey::Root);

    let before: Vec<_> = [1, 2].iter().map(|id| format!("{:?}", tree.get_node(id))).collect();
    tree.upsert(note(2, Some(1), "B")).unwrap();
    tree.upsert(note(2, Some(1), "B")).unwrap();
    let after: Vec<_> = [1, 2].iter().map(|id| format!("{:?}", tree.get_node(id))).collect();

    assert_eq!(before, after);
    assert_eq!(ids(&tree, Some(1)), [2]);
    assert!(changes.try_next().is_err(), "an unchanged snapshot must not notify");
}

#[test]
fn reparent_moves_node_and_leaf_flags_the_old_parent() {
    let (tree, _) = setup(Vec::new());
    tree.upsert_many(vec![note(10, None, "P1"), note(20, None, "B"), note(1, Some(10), "A")])
        .unwrap();

    tree.upsert(note(1, Some(20), "A")).unwrap();

    assert!(ids(&tree, Some(20)).contains(&1));
    assert!(!ids(&tree, Some(10)).contains(&1));
    assert!(tree.get_node(&10).unwrap().is_leaf());
    assert_eq!(tree.get_node(&1).unwrap().parent(), Some(&NodeKey::Entity(20)));
}

#[test]
fn drag_validity_covers_self_parent_and_descendants() {
    // root -> A(1) -> (A1(2), A2(3) -> A2a(4))
    let (tree, _) = setup(Vec::new());
    tree.upsert_many(vec![
        note(1, None, "A"),
        note(2, Some(1), "A1"),
        note(3, Some(1), "A2"),
        note(4, Some(3), "A2a"),
    ])
    .unwrap();

    let invalid = tree.invalid_drop_targets(&[1]).unwrap();
    let mut expected = vec![
        NodeKey::Entity(1),
        NodeKey::Root,
        NodeKey::Entity(2),
        NodeKey::Entity(3),
        NodeKey::Entity(4),
    ];
    let mut actual: Vec<_> = invalid.into_iter().collect();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);

    let gesture = tree.begin_drag(&[1]).unwrap();
    assert!(!gesture.can_drop(&NodeKey::Entity(4)));
    tree.end_drag();
}

#[tokio::test(flavor = "local")]
async fn fragment_then_children_load_merges_without_duplicates() {
    // C(1) -> D(2) -> E(3)
    let (tree, loader) = setup(vec![
        note(1, None, "C"),
        note(2, Some(1), "D"),
        note(3, Some(2), "E"),
    ]);
    tree.load_fragment(3).await.unwrap();
    assert_eq!(tree.load_state(&NodeKey::Entity(1)), Some(LoadState::Partial));
    let d_before = tree.get_node(&2).unwrap();

    loader.insert(note(4, Some(1), "D2"));
    tree.load_children(Some(1)).await.unwrap();

    assert_eq!(ids(&tree, Some(1)), [2, 4]);
    assert_eq!(ids(&tree, Some(2)), [3]);
    assert_eq!(tree.get_node(&2).unwrap().view(), d_before.view());
    assert!(tree.is_loaded(&1));
    assert_eq!(loader.children_calls(), 1);
    tree.check_invariants().unwrap();
}

#[tokio::test(flavor = "local")]
async fn fragment_load_marks_parents_partial() {
    let (tree, loader) = setup(vec![
        note(1, None, "C"),
        note(5, None, "Other"),
        note(2, Some(1), "D"),
        note(4, Some(1), "D2"),
        note(3, Some(2), "E"),
    ]);

    tree.load_fragment(3).await.unwrap();

    assert_eq!(loader.fragment_calls(), 1);
    assert_eq!(ids(&tree, None), [1, 5]);
    assert_eq!(ids(&tree, Some(1)), [2, 4]);
    assert_eq!(ids(&tree, Some(2)), [3]);
    assert_eq!(tree.load_state(&NodeKey::Entity(1)), Some(LoadState::Partial));
    assert_eq!(tree.load_state(&NodeKey::Entity(3)), Some(LoadState::NotLoaded));

    // A partially loaded node still fetches its full child list on expand
    assert!(tree.toggle_expand(&2, true).await.unwrap());
    assert_eq!(loader.children_calls(), 1);
    assert!(tree.is_loaded(&2));
    tree.check_invariants().unwrap();
}

#[tokio::test(flavor = "local")]
async fn locate_reveals_and_selects_a_deep_node() {
    let (tree, loader) = setup(vec![
        note(1, None, "C"),
        note(2, Some(1), "D"),
        note(3, Some(2), "E"),
    ]);

    tree.locate(&3).await.unwrap();

    assert_eq!(tree.expanded_ids(), [2, 1]);
    assert_eq!(tree.get_selected_ids(false), [Some(3)]);
    assert_eq!(loader.fragment_calls(), 1);

    tree.locate(&3).await.unwrap();
    assert_eq!(loader.fragment_calls(), 1);

    let missing = tree.locate(&99).await;
    assert!(matches!(missing, Err(TreeError::LoadFailure { source: LoadError::NotFound(_), .. })));
}

#[test]
fn changing_sort_order_resorts_locally() {
    let (tree, loader) = setup(Vec::new());
    tree.upsert_many(vec![note(1, None, "b"), note(2, None, "a"), note(3, None, "c")])
        .unwrap();

    tree.set_sort_options(SortOptions::new(SortBy::Title, SortOrder::Asc));
    assert_eq!(titles(&tree, None), ["a", "b", "c"]);

    tree.set_sort_options(tree.sort_options().with_order(SortOrder::Desc));
    assert_eq!(titles(&tree, None), ["c", "b", "a"]);
    assert_eq!(loader.children_calls(), 0);
}

#[test]
fn single_selection_replaces_the_previous_one() {
    let (tree, _) = setup(Vec::new());
    tree.upsert_many(vec![note(1, None, "x"), note(2, None, "y"), note(3, None, "z")])
        .unwrap();
    tree.toggle_select(&NodeKey::Entity(2), SelectOptions::multiple()).unwrap();
    tree.toggle_select(&NodeKey::Entity(3), SelectOptions::multiple()).unwrap();

    tree.toggle_select(&NodeKey::Entity(1), SelectOptions::single()).unwrap();

    assert_eq!(tree.get_selected_ids(false), [Some(1)]);
    assert!(!tree.get_node(&2).unwrap().is_selected());
    assert!(!tree.get_node(&3).unwrap().is_selected());
}

#[tokio::test(flavor = "local")]
async fn two_top_level_entities_then_reparent() {
    let (tree, _) = setup(vec![note(1, None, "A"), note(2, None, "B")]);

    tree.load_children(None).await.unwrap();
    assert_eq!(ids(&tree, None), [1, 2]);

    tree.upsert(note(1, Some(2), "A")).unwrap();
    assert_eq!(ids(&tree, None), [2]);
    assert_eq!(ids(&tree, Some(2)), [1]);
    tree.check_invariants().unwrap();
}

#[tokio::test(flavor = "local")]
async fn concurrent_loads_of_the_same_node_share_one_fetch() {
    let (tree, loader) = setup(vec![note(1, None, "A"), note(2, Some(1), "B")]);
    tree.upsert(note(1, None, "A")).unwrap();
    loader.pause();

    let mut first = Box::pin(tree.load_children(Some(1)));
    let mut second = Box::pin(tree.load_children(Some(1)));
    assert!((&mut first).now_or_never().is_none());
    assert!((&mut second).now_or_never().is_none());
    assert!(tree.get_node(&1).unwrap().is_loading());

    loader.resume();
    let (first, second) = futures::join!(first, second);
    first.unwrap();
    second.unwrap();

    assert_eq!(loader.children_calls(), 1);
    assert_eq!(ids(&tree, Some(1)), [2]);
    assert!(!tree.get_node(&1).unwrap().is_loading());
}

#[tokio::test(flavor = "local")]
async fn failed_load_applies_nothing_and_can_be_retried() {
    let (tree, loader) = setup(vec![note(1, None, "A"), note(2, Some(1), "B")]);
    tree.load_children(None).await.unwrap();
    loader.fail_next(LoadError::Network("connection reset".to_string()));

    let error = tree.toggle_expand(&1, true).await.unwrap_err();
    assert!(error.is_recoverable());
    let node = tree.get_node(&1).unwrap();
    assert!(!node.is_loading());
    assert!(!node.is_expanded());
    assert_eq!(node.load_state(), LoadState::NotLoaded);
    assert!(node.children().is_empty());

    assert!(tree.toggle_expand(&1, true).await.unwrap());
    assert_eq!(ids(&tree, Some(1)), [2]);
}

#[tokio::test(flavor = "local")]
async fn trees_sharing_a_loader_never_share_nodes() {
    let loader: Rc<dyn EntityLoader<NoteEntity>> =
        Rc::new(InMemoryLoader::from_entities([note(1, None, "A")]));
    let explorer = kinds::note_tree_sharing(Rc::clone(&loader), TreeSettings::default());
    let dialog = kinds::note_tree_sharing(loader, TreeSettings::default());

    explorer.load_children(None).await.unwrap();
    explorer.toggle_select(&NodeKey::Entity(1), SelectOptions::single()).unwrap();
    assert!(dialog.get_node(&1).is_none());

    dialog.load_children(None).await.unwrap();
    assert!(!dialog.get_node(&1).unwrap().is_selected());
    assert!(explorer.get_node(&1).unwrap().is_selected());
}
