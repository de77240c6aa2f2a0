//! A client window's replicas of the host's roots.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{runtime::Handle, sync::broadcast};

use crate::{
    descriptor::Descriptor,
    dispatcher::UpdateDispatcher,
    interface::{
        ChangesResponse, DeltaBatch, FetchError, FullSnapshot, HostNotification, TreeSource,
    },
    merge::merge_changes,
    reconstruct::reconstruct,
    sorting::{sort_recursive, SortConfig},
};

const EVENT_CAPACITY: usize = 64;

/// One replicated root. `version` never goes down for as long as the record
/// lives. A root whose host history starts over gets a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRecord {
    pub root_path: PathBuf,
    pub version: u64,
    pub descriptor: Descriptor,
}

/// Published by a [`ClientTreeStore`] whenever its replicas change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    TreeUpdated { root_path: PathBuf, version: u64 },
    RootDropped { root_path: PathBuf },
}

#[derive(Debug)]
enum RootSlot {
    /// Announced, first snapshot not applied yet.
    Loading,
    Loaded(RootRecord),
}

struct StoreState {
    source: Arc<dyn TreeSource>,
    slots: Mutex<HashMap<PathBuf, RootSlot>>,
    sort: Mutex<SortConfig>,
    events: broadcast::Sender<StoreEvent>,
}

/// Keeps one window's replicas in sync with the host.
///
/// Host notifications only ever cause pulls, and every pull and merge goes
/// through a single [`UpdateDispatcher`], so the replicas are written by one
/// task at a time and each record's version only moves forward.
pub struct ClientTreeStore {
    state: Arc<StoreState>,
    dispatcher: UpdateDispatcher,
}

impl ClientTreeStore {
    /// Must be called inside a tokio runtime. Elsewhere, use
    /// [`ClientTreeStore::with_handle`].
    pub fn new(source: Arc<dyn TreeSource>, sort: SortConfig) -> Self {
        Self::with_handle(source, sort, &Handle::current())
    }

    /// Runs the store's updates on the runtime behind `handle`.
    pub fn with_handle(source: Arc<dyn TreeSource>, sort: SortConfig, handle: &Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Arc::new(StoreState {
                source,
                slots: Mutex::new(HashMap::new()),
                sort: Mutex::new(sort),
                events,
            }),
            dispatcher: UpdateDispatcher::with_handle(handle),
        }
    }

    /// Starts replicating a root the window learned about some other way than
    /// a notification, such as the host's root listing.
    pub fn open_root(&self, root_path: &Path) {
        self.state
            .slots()
            .entry(root_path.to_path_buf())
            .or_insert(RootSlot::Loading);

        self.enqueue_pull(root_path.to_path_buf());
    }

    pub fn handle_notification(&self, notification: HostNotification) {
        log::debug!("Host notification: {:?}", notification);

        match notification {
            HostNotification::WorkspaceAdded { root_path } => self.open_root(&root_path),
            HostNotification::WorkspaceChanged { root_path } => {
                if self.state.slots().contains_key(&root_path) {
                    self.enqueue_pull(root_path);
                } else {
                    log::debug!("Change for unknown root {}, ignoring", root_path.display());
                }
            }
            HostNotification::WorkspaceRemoved { root_path } => {
                if self.state.slots().remove(&root_path).is_some() {
                    self.state.publish(StoreEvent::RootDropped { root_path });
                }
            }
        }
    }

    /// Feeds host notifications into the store until the stream closes.
    pub async fn listen(&self, mut notifications: broadcast::Receiver<HostNotification>) {
        loop {
            match notifications.recv().await {
                Ok(notification) => self.handle_notification(notification),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("Missed {} host notifications, pulling every root", missed);
                    for root_path in self.known_roots() {
                        self.enqueue_pull(root_path);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::debug!("Host notification stream closed");
                    return;
                }
            }
        }
    }

    /// Changes how replicas are ordered. Takes effect once queued updates
    /// have been applied; see [`ClientTreeStore::wait_idle`].
    pub fn set_sort_config(&self, config: SortConfig) {
        let state = Arc::clone(&self.state);

        self.dispatcher.enqueue(async move {
            *state.sort.lock().unwrap() = config;

            let mut slots = state.slots();
            for slot in slots.values_mut() {
                if let RootSlot::Loaded(record) = slot {
                    sort_recursive(&mut record.descriptor, &config);
                }
            }
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.state.events.subscribe()
    }

    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    pub fn sort_config(&self) -> SortConfig {
        *self.state.sort.lock().unwrap()
    }

    /// Looks up a file in whichever replica contains `path`.
    pub fn get_file(&self, path: &Path) -> Option<Descriptor> {
        self.find(path).filter(Descriptor::is_file)
    }

    /// Looks up a directory in whichever replica contains `path`.
    pub fn get_dir(&self, path: &Path) -> Option<Descriptor> {
        self.find(path).filter(Descriptor::is_dir)
    }

    /// Every loaded replica, ordered by root path.
    pub fn roots(&self) -> Vec<RootRecord> {
        let mut records: Vec<_> = self
            .state
            .slots()
            .values()
            .filter_map(|slot| match slot {
                RootSlot::Loaded(record) => Some(record.clone()),
                RootSlot::Loading => None,
            })
            .collect();

        records.sort_by(|a, b| a.root_path.cmp(&b.root_path));
        records
    }

    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.roots()
            .into_iter()
            .map(|record| record.root_path)
            .collect()
    }

    pub fn version(&self, root_path: &Path) -> Option<u64> {
        match self.state.slots().get(root_path) {
            Some(RootSlot::Loaded(record)) => Some(record.version),
            _ => None,
        }
    }

    fn find(&self, path: &Path) -> Option<Descriptor> {
        self.state.slots().values().find_map(|slot| match slot {
            RootSlot::Loaded(record) => record.descriptor.find(path).cloned(),
            RootSlot::Loading => None,
        })
    }

    fn known_roots(&self) -> Vec<PathBuf> {
        self.state.slots().keys().cloned().collect()
    }

    fn enqueue_pull(&self, root_path: PathBuf) {
        let state = Arc::clone(&self.state);
        self.dispatcher.enqueue(async move { state.pull(root_path).await });
    }
}

impl StoreState {
    fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, RootSlot>> {
        self.slots.lock().unwrap()
    }

    fn publish(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Fetches whatever the replica of `root_path` is missing and merges it.
    async fn pull(&self, root_path: PathBuf) {
        let since = match self.slots().get(&root_path) {
            None => {
                log::debug!("{} was removed before its pull ran", root_path.display());
                return;
            }
            Some(RootSlot::Loading) => None,
            Some(RootSlot::Loaded(record)) => Some(record.version),
        };

        let response = match self.source.changes_since(&root_path, since).await {
            Ok(response) => response,
            Err(FetchError::UnknownRoot(_)) => {
                log::info!("{} is no longer open on the host", root_path.display());
                if self.slots().remove(&root_path).is_some() {
                    self.publish(StoreEvent::RootDropped { root_path });
                }
                return;
            }
            Err(err) => {
                log::warn!("Could not fetch changes for {}: {}", root_path.display(), err);
                return;
            }
        };

        let sort = *self.sort.lock().unwrap();
        let mut slots = self.slots();

        let Some(slot) = slots.get_mut(&root_path) else {
            log::debug!("{} was removed while fetching, discarding", root_path.display());
            return;
        };

        // Pulls run one at a time, so a snapshot older than the replica means
        // the host's history of this root started over.
        let restarted = match (&*slot, &response) {
            (RootSlot::Loaded(record), ChangesResponse::Snapshot(snapshot)) => {
                snapshot.current_version < record.version
            }
            _ => false,
        };

        let event = match (slot, response) {
            (slot, ChangesResponse::Snapshot(snapshot)) => {
                apply_snapshot(slot, &root_path, snapshot, &sort)
            }
            (RootSlot::Loaded(record), ChangesResponse::Delta(batch)) => {
                apply_delta(record, batch, &sort)
            }
            (RootSlot::Loading, ChangesResponse::Delta(_)) => {
                log::warn!(
                    "Got a delta for {} before any snapshot, discarding",
                    root_path.display()
                );
                None
            }
        };

        match event {
            Some(StoreEvent::RootDropped { root_path }) => {
                slots.remove(&root_path);
                drop(slots);
                self.publish(StoreEvent::RootDropped { root_path });
            }
            Some(event) => {
                drop(slots);
                if restarted {
                    self.publish(StoreEvent::RootDropped {
                        root_path: root_path.clone(),
                    });
                }
                self.publish(event);
            }
            None => {}
        }
    }
}

fn apply_snapshot(
    slot: &mut RootSlot,
    root_path: &Path,
    snapshot: FullSnapshot,
    sort: &SortConfig,
) -> Option<StoreEvent> {
    if let RootSlot::Loaded(record) = slot {
        if snapshot.current_version < record.version {
            log::info!(
                "Host restarted {} at v{} (replica was at v{}), replacing the replica",
                root_path.display(),
                snapshot.current_version,
                record.version
            );
        }
    }

    let mut descriptor = snapshot.descriptor;
    reconstruct(&mut descriptor);
    sort_recursive(&mut descriptor, sort);

    *slot = RootSlot::Loaded(RootRecord {
        root_path: root_path.to_path_buf(),
        version: snapshot.current_version,
        descriptor,
    });

    Some(StoreEvent::TreeUpdated {
        root_path: root_path.to_path_buf(),
        version: snapshot.current_version,
    })
}

fn apply_delta(
    record: &mut RootRecord,
    batch: DeltaBatch,
    sort: &SortConfig,
) -> Option<StoreEvent> {
    if batch.current_version < record.version {
        log::debug!(
            "Discarding stale delta for {} (v{} < v{})",
            record.root_path.display(),
            batch.current_version,
            record.version
        );
        return None;
    }

    // A batch can overlap what an earlier pull already applied.
    let fresh: Vec<_> = batch
        .changes
        .into_iter()
        .filter(|change| change.version > record.version)
        .collect();

    if fresh.is_empty() && batch.current_version == record.version {
        return None;
    }

    let outcome = merge_changes(&fresh, &record.descriptor, sort);
    if outcome.skipped > 0 {
        log::warn!(
            "{} of {} changes for {} could not be applied",
            outcome.skipped,
            fresh.len(),
            record.root_path.display()
        );
    }

    if outcome.root_removed {
        return Some(StoreEvent::RootDropped {
            root_path: record.root_path.clone(),
        });
    }

    record.descriptor = outcome.tree;
    record.version = batch.current_version;

    Some(StoreEvent::TreeUpdated {
        root_path: record.root_path.clone(),
        version: record.version,
    })
}
