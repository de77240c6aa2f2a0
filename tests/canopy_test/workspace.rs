use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use fs_err as fs;
use futures::future::BoxFuture;
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast;

use libcanopy::{
    scan::ScanRules, ChangesResponse, ClientTreeStore, FetchError, Host, HostNotification,
    RawEvent, SortConfig, TreeSource,
};

/// What a pull got back from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullKind {
    Snapshot,
    Delta,
}

/// A `TreeSource` that forwards to a host and remembers what it answered.
pub struct RecordingSource {
    host: Arc<Host>,
    pulls: Mutex<Vec<(Option<u64>, PullKind)>>,
}

impl RecordingSource {
    pub fn pulls(&self) -> Vec<(Option<u64>, PullKind)> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.pulls.lock().unwrap().clear();
    }
}

impl TreeSource for RecordingSource {
    fn changes_since<'a>(
        &'a self,
        root_path: &'a Path,
        since: Option<u64>,
    ) -> BoxFuture<'a, Result<ChangesResponse, FetchError>> {
        Box::pin(async move {
            let response = self.host.changes_since(root_path, since)?;
            let kind = match &response {
                ChangesResponse::Snapshot(_) => PullKind::Snapshot,
                ChangesResponse::Delta(_) => PullKind::Delta,
            };
            self.pulls.lock().unwrap().push((since, kind));
            Ok::<_, FetchError>(response)
        })
    }
}

/// A temporary directory served by an in-process host. Every filesystem
/// helper also reports the matching raw event and waits for it to be
/// recorded.
pub struct TestWorkspace {
    // Dropped last.
    _dir: TempDir,
    root: PathBuf,
    host: Arc<Host>,
}

impl TestWorkspace {
    pub fn new(log_capacity: usize) -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().join("workspace");
        fs::create_dir_all(&root).unwrap();

        let rules = ScanRules::new([".git"], &HashMap::new()).unwrap();
        let host = Arc::new(Host::new(rules, log_capacity));
        host.add_root(&root).unwrap();

        Self {
            _dir: dir,
            root,
            host,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn version(&self) -> u64 {
        self.host
            .root_infos()
            .into_iter()
            .find(|info| info.root_path == self.root)
            .map(|info| info.version)
            .unwrap()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        let existed = path.exists();
        fs::write(&path, contents).unwrap();

        self.send(if existed {
            RawEvent::Write { path }
        } else {
            RawEvent::Create { path }
        });
    }

    pub fn create_dir(&self, relative: &str) {
        let path = self.path(relative);
        fs::create_dir_all(&path).unwrap();
        self.send(RawEvent::Create { path });
    }

    pub fn remove(&self, relative: &str) {
        let path = self.path(relative);
        if path.is_dir() {
            fs::remove_dir_all(&path).unwrap();
        } else {
            fs::remove_file(&path).unwrap();
        }
        self.send(RawEvent::Remove { path });
    }

    pub fn rename(&self, from: &str, to: &str) {
        let from = self.path(from);
        let to = self.path(to);
        fs::rename(&from, &to).unwrap();
        self.send(RawEvent::Rename { from, to });
    }

    /// Deletes the root directory itself from disk.
    pub fn delete_root(&self) {
        fs::remove_dir_all(&self.root).unwrap();
        self.send(RawEvent::Remove {
            path: self.root.clone(),
        });
    }

    fn send(&self, event: RawEvent) {
        self.host.send_event(event);
        self.host.flush();
    }

    /// Opens a client window that already knows about every open root.
    pub fn window(&self, sort: SortConfig) -> TestWindow {
        let source = Arc::new(RecordingSource {
            host: Arc::clone(&self.host),
            pulls: Mutex::new(Vec::new()),
        });
        let notifications = self.host.subscribe();
        let store = ClientTreeStore::new(source.clone(), sort);

        for root_path in self.host.root_paths() {
            store.open_root(&root_path);
        }

        TestWindow {
            store,
            source,
            notifications,
        }
    }
}

/// One client window, driven by hand so tests decide when it catches up.
pub struct TestWindow {
    pub store: ClientTreeStore,
    pub source: Arc<RecordingSource>,
    notifications: broadcast::Receiver<HostNotification>,
}

impl TestWindow {
    /// Delivers every notification the host has sent so far and waits until
    /// the resulting pulls have been merged.
    pub async fn sync(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            self.store.handle_notification(notification);
        }

        self.store.wait_idle().await;
    }
}
