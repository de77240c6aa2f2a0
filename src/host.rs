use std::{
    collections::{hash_map::Entry, HashMap},
    env, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use crossbeam_channel::Sender;
use futures::future::{self, BoxFuture};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    change_log::ChangeLogRoot,
    change_processor::{ChangeProcessor, ProcessorMessage},
    descriptor::Descriptor,
    interface::{ChangesResponse, FetchError, HostNotification, RawEvent, RootInfo, TreeSource},
    scan::{ScanError, ScanRules},
};

/// Pushes that a slow listener can fall behind by before it starts missing
/// some. Missing a push is harmless since listeners always re-pull.
const NOTIFICATION_CAPACITY: usize = 256;

/// The privileged side of the system: owns the canonical tree and change log
/// of every open root and fans out notifications to client windows.
///
/// Nothing in here knows about HTTP. The web server and in-process windows
/// both talk to a `Host` directly.
pub struct Host {
    /// Must be dropped first, before the channels it reads from go away.
    #[allow(unused)]
    change_processor: ChangeProcessor,

    roots: Arc<Mutex<HashMap<PathBuf, ChangeLogRoot>>>,

    message_sender: Sender<ProcessorMessage>,

    notifier: broadcast::Sender<HostNotification>,

    rules: Arc<ScanRules>,

    log_capacity: usize,
}

impl Host {
    pub fn new(rules: ScanRules, log_capacity: usize) -> Self {
        let roots = Arc::new(Mutex::new(HashMap::new()));
        let (message_sender, message_receiver) = crossbeam_channel::unbounded();
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let change_processor =
            ChangeProcessor::start(Arc::clone(&roots), message_receiver, notifier.clone());

        Self {
            change_processor,
            roots,
            message_sender,
            notifier,
            rules: Arc::new(rules),
            log_capacity,
        }
    }

    /// Scans `path` and starts serving it as a root. Relative paths are taken
    /// from the current directory.
    pub fn add_root(&self, path: &Path) -> Result<PathBuf, HostError> {
        let root_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()?.join(path)
        };

        if self.roots().contains_key(&root_path) {
            return Err(HostError::AlreadyOpen(root_path));
        }

        let root = ChangeLogRoot::open(&root_path, Arc::clone(&self.rules), self.log_capacity)?;
        let entries = root.tree().descendants().count();

        // Another caller may have opened the same root while we were scanning.
        match self.roots().entry(root_path.clone()) {
            Entry::Occupied(_) => return Err(HostError::AlreadyOpen(root_path)),
            Entry::Vacant(entry) => {
                entry.insert(root);
            }
        }

        log::info!("Opened root {} with {} entries", root_path.display(), entries);

        self.notify(HostNotification::WorkspaceAdded {
            root_path: root_path.clone(),
        });

        Ok(root_path)
    }

    pub fn remove_root(&self, root_path: &Path) -> Result<(), HostError> {
        if self.roots().remove(root_path).is_none() {
            return Err(HostError::UnknownRoot(root_path.to_path_buf()));
        }

        log::info!("Closed root {}", root_path.display());
        self.notify(HostNotification::WorkspaceRemoved {
            root_path: root_path.to_path_buf(),
        });

        Ok(())
    }

    /// Queues a raw filesystem event for the processor thread.
    pub fn send_event(&self, event: RawEvent) {
        // Only fails once the processor is gone, at which point nobody can
        // observe the event anyway.
        let _ = self.message_sender.send(ProcessorMessage::Event(event));
    }

    /// A handle for feeding events from another thread, such as a watcher.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            sender: self.message_sender.clone(),
        }
    }

    /// Blocks until every event sent before this call has been recorded.
    pub fn flush(&self) {
        let (done_sender, done_receiver) = crossbeam_channel::bounded(1);

        if self
            .message_sender
            .send(ProcessorMessage::Flush(done_sender))
            .is_ok()
        {
            let _ = done_receiver.recv();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostNotification> {
        self.notifier.subscribe()
    }

    pub fn root_infos(&self) -> Vec<RootInfo> {
        let mut infos: Vec<_> = self.roots().values().map(ChangeLogRoot::info).collect();
        infos.sort_by(|a, b| a.root_path.cmp(&b.root_path));
        infos
    }

    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.root_infos()
            .into_iter()
            .map(|info| info.root_path)
            .collect()
    }

    /// A copy of the canonical tree of a root.
    pub fn root_tree(&self, root_path: &Path) -> Option<Descriptor> {
        self.roots().get(root_path).map(|root| root.tree().clone())
    }

    pub fn changes_since(
        &self,
        root_path: &Path,
        since: Option<u64>,
    ) -> Result<ChangesResponse, FetchError> {
        self.roots()
            .get(root_path)
            .map(|root| root.changes_since(since))
            .ok_or_else(|| FetchError::UnknownRoot(root_path.to_path_buf()))
    }

    fn roots(&self) -> MutexGuard<'_, HashMap<PathBuf, ChangeLogRoot>> {
        self.roots.lock().unwrap()
    }

    fn notify(&self, notification: HostNotification) {
        let _ = self.notifier.send(notification);
    }
}

impl TreeSource for Host {
    fn changes_since<'a>(
        &'a self,
        root_path: &'a Path,
        since: Option<u64>,
    ) -> BoxFuture<'a, Result<ChangesResponse, FetchError>> {
        Box::pin(future::ready(Host::changes_since(self, root_path, since)))
    }
}

/// Cloneable handle that feeds raw events into a [`Host`].
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<ProcessorMessage>,
}

impl EventSender {
    /// Returns `false` once the host has shut down.
    pub fn send(&self, event: RawEvent) -> bool {
        self.sender.send(ProcessorMessage::Event(event)).is_ok()
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Root {} is already open", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("Root {} is not open", .0.display())]
    UnknownRoot(PathBuf),

    #[error(transparent)]
    Scan {
        #[from]
        source: ScanError,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: io::Error,
    },
}
