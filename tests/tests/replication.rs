use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;

use libcanopy::{
    reconstruct::is_consistent, ClientTreeStore, Collation, SortConfig, SortKey, StoreEvent,
};

use crate::canopy_test::workspace::{PullKind, TestWorkspace};

fn child_names(descriptor: &libcanopy::Descriptor) -> Vec<String> {
    descriptor
        .children()
        .iter()
        .map(|child| child.name.clone())
        .collect()
}

#[tokio::test]
async fn windows_converge_with_the_host_tree() {
    let workspace = TestWorkspace::new(100);
    let mut early = workspace.window(SortConfig::default());
    early.sync().await;

    workspace.create_dir("docs");
    workspace.write("docs/intro.md", "intro");
    workspace.write("docs/setup.md", "setup");
    workspace.write("main.rs", "fn main() {}");
    workspace.rename("docs/setup.md", "docs/install.md");
    workspace.remove("main.rs");
    workspace.write("docs/intro.md", "a longer intro");

    let mut late = workspace.window(SortConfig::default());
    early.sync().await;
    late.sync().await;

    let canonical = workspace.host().root_tree(workspace.root());
    for window in [&early, &late] {
        let replica = window.store.get_dir(workspace.root());
        assert_eq!(replica, canonical);
        assert!(is_consistent(replica.as_ref().unwrap()));
        assert_eq!(window.store.version(workspace.root()), Some(workspace.version()));
    }

    assert_eq!(late.source.pulls(), vec![(None, PullKind::Snapshot)]);
}

#[tokio::test]
async fn nested_creation_arrives_as_one_subtree() {
    let workspace = TestWorkspace::new(100);
    let mut window = workspace.window(SortConfig::default());
    window.sync().await;

    // Only the deepest file is reported, as a watcher coalescing events might.
    std::fs::create_dir_all(workspace.path("a/b")).unwrap();
    workspace.write("a/b/c.md", "c");

    window.sync().await;

    let directory = window.store.get_dir(&workspace.path("a/b")).unwrap();
    assert_eq!(directory.parent, Some(workspace.path("a")));
    assert!(window.store.get_file(&workspace.path("a/b/c.md")).is_some());
    assert_eq!(workspace.version(), 1);
}

#[tokio::test]
async fn ignored_paths_never_reach_windows() {
    let workspace = TestWorkspace::new(100);
    let mut window = workspace.window(SortConfig::default());
    window.sync().await;

    workspace.create_dir(".git");
    workspace.write(".git/HEAD", "ref: refs/heads/main");
    window.sync().await;

    assert_eq!(workspace.version(), 0);
    assert_eq!(window.store.get_dir(&workspace.path(".git")), None);
}

#[tokio::test]
async fn replicas_follow_their_own_sort_order() {
    let workspace = TestWorkspace::new(100);
    workspace.write("note10.md", "x");
    workspace.write("note2.md", "x");
    workspace.create_dir("zeta");
    workspace.create_dir("alpha");

    let mut natural = workspace.window(SortConfig::default());
    let mut raw = workspace.window(SortConfig {
        collation: Collation::Raw,
        directories_first: false,
        ..SortConfig::default()
    });
    natural.sync().await;
    raw.sync().await;

    let natural_root = natural.store.get_dir(workspace.root()).unwrap();
    let raw_root = raw.store.get_dir(workspace.root()).unwrap();
    assert_eq!(
        child_names(&natural_root),
        vec!["alpha", "zeta", "note2.md", "note10.md"]
    );
    assert_eq!(
        child_names(&raw_root),
        vec!["note10.md", "note2.md", "alpha", "zeta"]
    );

    raw.store.set_sort_config(SortConfig {
        key: SortKey::Name,
        ..SortConfig::default()
    });
    raw.store.wait_idle().await;

    assert_eq!(
        child_names(&raw.store.get_dir(workspace.root()).unwrap()),
        child_names(&natural_root)
    );
}

#[tokio::test]
async fn listening_store_publishes_tree_updates() {
    let workspace = TestWorkspace::new(100);
    let window = workspace.window(SortConfig::default());
    let store: Arc<ClientTreeStore> = Arc::new(window.store);
    store.wait_idle().await;

    let mut updates = store.subscribe();
    let listener = tokio::spawn({
        let store = Arc::clone(&store);
        let notifications = workspace.host().subscribe();
        async move { store.listen(notifications).await }
    });

    workspace.write("fresh.md", "fresh");

    let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("no tree update within five seconds")
        .unwrap();

    assert_eq!(
        update,
        StoreEvent::TreeUpdated {
            root_path: workspace.root().to_path_buf(),
            version: 1,
        }
    );
    assert!(store.get_file(&workspace.path("fresh.md")).is_some());

    listener.abort();
}
