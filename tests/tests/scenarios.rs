use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use futures::future::{self, BoxFuture};
use pretty_assertions::assert_eq;

use libcanopy::{
    ChangeDescriptor, ChangesResponse, ClientTreeStore, DeltaBatch, Descriptor, FetchError,
    FullSnapshot, HostNotification, SortConfig, TreeSource,
};

use crate::canopy_test::workspace::{PullKind, TestWorkspace};

#[tokio::test]
async fn delta_pull_brings_window_up_to_date() {
    let workspace = TestWorkspace::new(100);
    for index in 0..4 {
        workspace.write(&format!("draft{}.md", index), "draft");
    }
    workspace.write("old.md", "# Old title");
    assert_eq!(workspace.version(), 5);

    let mut window = workspace.window(SortConfig::default());
    window.sync().await;
    assert_eq!(window.store.version(workspace.root()), Some(5));
    window.source.clear();

    workspace.write("note.md", "# Note");
    workspace.write("old.md", "# A much longer new title");
    assert_eq!(workspace.version(), 7);

    window.sync().await;

    assert_eq!(
        window.source.pulls(),
        vec![(Some(5), PullKind::Delta), (Some(7), PullKind::Delta)]
    );
    assert_eq!(window.store.version(workspace.root()), Some(7));
    assert!(window.store.get_file(&workspace.path("note.md")).is_some());

    let old = window.store.get_file(&workspace.path("old.md")).unwrap();
    assert_eq!(old.size(), Some("# A much longer new title".len() as u64));
    assert_eq!(
        Some(old),
        workspace
            .host()
            .root_tree(workspace.root())
            .unwrap()
            .find(&workspace.path("old.md"))
            .cloned()
    );
}

#[tokio::test]
async fn compacted_log_falls_back_to_full_snapshot() {
    let workspace = TestWorkspace::new(6);
    workspace.write("a.md", "a");
    workspace.write("b.md", "b");

    let mut window = workspace.window(SortConfig::default());
    window.sync().await;
    assert_eq!(window.store.version(workspace.root()), Some(2));
    window.source.clear();

    for index in 0..8 {
        workspace.write("a.md", &"a".repeat(index + 2));
    }
    assert_eq!(workspace.version(), 10);

    window.sync().await;

    let pulls = window.source.pulls();
    assert_eq!(pulls[0], (Some(2), PullKind::Snapshot));
    assert!(pulls[1..]
        .iter()
        .all(|pull| *pull == (Some(10), PullKind::Delta)));

    assert_eq!(window.store.version(workspace.root()), Some(10));
    assert_eq!(
        window.store.get_dir(workspace.root()),
        workspace.host().root_tree(workspace.root())
    );
}

/// Answers a first pull with a snapshot at version 1 and the next one with
/// `delta`. Anything after that is an empty batch at version 2.
struct OneDeltaSource {
    snapshot: Descriptor,
    delta: Mutex<Option<DeltaBatch>>,
}

impl TreeSource for OneDeltaSource {
    fn changes_since<'a>(
        &'a self,
        _root_path: &'a Path,
        since: Option<u64>,
    ) -> BoxFuture<'a, Result<ChangesResponse, FetchError>> {
        let response = match since {
            None => ChangesResponse::Snapshot(FullSnapshot {
                descriptor: self.snapshot.clone(),
                current_version: 1,
            }),
            Some(_) => match self.delta.lock().unwrap().take() {
                Some(batch) => ChangesResponse::Delta(batch),
                None => ChangesResponse::Delta(DeltaBatch {
                    changes: Vec::new(),
                    current_version: 2,
                }),
            },
        };

        Box::pin(future::ready(Ok::<_, FetchError>(response)))
    }
}

#[tokio::test]
async fn add_under_unknown_directory_is_skipped() {
    let source = Arc::new(OneDeltaSource {
        snapshot: Descriptor::directory(
            "/a",
            vec![Descriptor::markdown_file("/a/readme.md", 10)],
        ),
        delta: Mutex::new(Some(DeltaBatch {
            changes: vec![
                ChangeDescriptor::add(Descriptor::markdown_file("/a/b/c.md", 1), 2),
            ],
            current_version: 2,
        })),
    });
    let store = ClientTreeStore::new(source, SortConfig::default());

    store.handle_notification(HostNotification::WorkspaceAdded {
        root_path: "/a".into(),
    });
    store.wait_idle().await;
    let before = store.get_dir(Path::new("/a")).unwrap();

    store.handle_notification(HostNotification::WorkspaceChanged {
        root_path: "/a".into(),
    });
    store.wait_idle().await;

    assert_eq!(store.get_file(Path::new("/a/b/c.md")), None);
    assert_eq!(store.get_dir(Path::new("/a")), Some(before));
    assert_eq!(store.version(Path::new("/a")), Some(2));
}

#[tokio::test]
async fn deleted_root_disappears_from_every_window() {
    let workspace = TestWorkspace::new(100);
    workspace.create_dir("notes");
    workspace.write("notes/today.md", "today");

    let mut first = workspace.window(SortConfig::default());
    let mut second = workspace.window(SortConfig::default());
    first.sync().await;
    second.sync().await;
    assert!(first.store.get_file(&workspace.path("notes/today.md")).is_some());

    workspace.delete_root();
    first.sync().await;
    second.sync().await;

    assert!(workspace.host().root_paths().is_empty());
    for window in [&first, &second] {
        assert!(window.store.root_paths().is_empty());
        assert_eq!(window.store.get_dir(&workspace.path("notes")), None);
        assert_eq!(window.store.get_file(&workspace.path("notes/today.md")), None);
    }
}
