use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crossbeam_channel::{select, Receiver, RecvError, Sender};
use jod_thread::JoinHandle;
use tokio::sync::broadcast;

use crate::{
    change_log::ChangeLogRoot,
    interface::{ChangeEvent, HostNotification, RawEvent},
};

/// Messages accepted by the processor thread. Both kinds travel through the
/// same channel so a flush is only answered after every event queued before
/// it has been recorded.
#[derive(Debug)]
pub enum ProcessorMessage {
    Event(RawEvent),
    Flush(Sender<()>),
}

/// Records raw filesystem events into the open roots and tells everyone who
/// listens which roots changed.
///
/// Owns the processing thread. It is the only writer to the roots after they
/// have been opened, which is what keeps version numbers gapless.
pub struct ChangeProcessor {
    /// Signaled on drop so the thread leaves its loop.
    shutdown_sender: Sender<()>,

    /// Joined on drop.
    #[allow(unused)]
    job_thread: JoinHandle<Result<(), RecvError>>,
}

impl ChangeProcessor {
    pub fn start(
        roots: Arc<Mutex<HashMap<PathBuf, ChangeLogRoot>>>,
        message_receiver: Receiver<ProcessorMessage>,
        notifier: broadcast::Sender<HostNotification>,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let task = JobThreadContext { roots, notifier };

        let job_thread = jod_thread::Builder::new()
            .name("ChangeProcessor thread".to_owned())
            .spawn(move || {
                log::trace!("ChangeProcessor thread started");

                loop {
                    select! {
                        recv(message_receiver) -> message => {
                            match message? {
                                ProcessorMessage::Event(event) => task.handle_raw_event(&event),
                                ProcessorMessage::Flush(done) => {
                                    let _ = done.send(());
                                }
                            }
                        },
                        recv(shutdown_receiver) -> _ => {
                            log::trace!("ChangeProcessor shutdown signal received...");
                            return Ok(());
                        },
                    }
                }
            })
            .expect("Could not start ChangeProcessor thread");

        Self {
            shutdown_sender,
            job_thread,
        }
    }
}

impl Drop for ChangeProcessor {
    fn drop(&mut self) {
        let _ = self.shutdown_sender.send(());
    }
}

struct JobThreadContext {
    roots: Arc<Mutex<HashMap<PathBuf, ChangeLogRoot>>>,
    notifier: broadcast::Sender<HostNotification>,
}

impl JobThreadContext {
    fn handle_raw_event(&self, event: &RawEvent) {
        log::debug!("Raw event: {:?}", event);

        let mut notifications = Vec::new();

        {
            let mut roots = self.roots.lock().unwrap();
            let mut removed_roots = Vec::new();

            for (root_path, root) in roots.iter_mut() {
                if !event.paths().iter().any(|path| path.starts_with(root_path)) {
                    continue;
                }

                let recorded = root.record(event);
                if recorded.is_empty() {
                    continue;
                }

                let root_gone = recorded.iter().any(|change| {
                    change.event == ChangeEvent::Remove && &change.path == root_path
                });

                if root_gone {
                    log::info!("Root {} was deleted from disk", root_path.display());
                    removed_roots.push(root_path.clone());
                } else {
                    notifications.push(HostNotification::WorkspaceChanged {
                        root_path: root_path.clone(),
                    });
                }
            }

            for root_path in removed_roots {
                roots.remove(&root_path);
                notifications.push(HostNotification::WorkspaceRemoved { root_path });
            }
        }

        for notification in notifications {
            // Nobody listening is fine; windows pull on connect anyway.
            let _ = self.notifier.send(notification);
        }
    }
}
