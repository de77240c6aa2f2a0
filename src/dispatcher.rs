//! Serializes the updates a client window applies to its replicas.

use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
};

type Task = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Working,
}

/// A FIFO queue of async tasks drained by a single worker.
///
/// Tasks run one at a time in the order they were enqueued, so two updates of
/// the same replica never interleave.
#[derive(Debug)]
pub struct UpdateDispatcher {
    queue: mpsc::UnboundedSender<Task>,
    /// Number of tasks enqueued and not yet finished.
    pending: Arc<watch::Sender<usize>>,
}

impl UpdateDispatcher {
    /// Spawns the worker on the current tokio runtime. Panics outside of one;
    /// use [`UpdateDispatcher::with_handle`] there.
    pub fn new() -> Self {
        Self::with_handle(&Handle::current())
    }

    pub fn with_handle(handle: &Handle) -> Self {
        let (queue, mut receiver) = mpsc::unbounded_channel::<Task>();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        let worker_pending = Arc::clone(&pending);
        handle.spawn(async move {
            while let Some(task) = receiver.recv().await {
                task.await;
                worker_pending.send_modify(|count| *count -= 1);
            }

            log::trace!("Update dispatcher worker stopped");
        });

        Self { queue, pending }
    }

    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.send_modify(|count| *count += 1);

        if self.queue.send(Box::pin(task)).is_err() {
            log::warn!("Update dispatcher worker is gone, dropping task");
            self.pending.send_modify(|count| *count -= 1);
        }
    }

    pub fn state(&self) -> DispatcherState {
        if *self.pending.borrow() == 0 {
            DispatcherState::Idle
        } else {
            DispatcherState::Working
        }
    }

    /// Resolves once every task enqueued so far, and any enqueued while
    /// waiting, has finished.
    pub async fn wait_idle(&self) {
        let mut receiver = self.pending.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

impl Default for UpdateDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
