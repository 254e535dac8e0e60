//! Per-world task queues.
//!
//! Each world owns a single consumer of an unbounded tokio channel. Anything
//! that must mutate a world's entities from outside that world's tick is
//! boxed as a [`WorldTask`] and sent through its [`WorldHandle`]. Tasks run
//! exactly once, in submission order, on the world's owning thread, either
//! drained synchronously by the host's tick ([`WorldThread::run_pending`])
//! or by an async loop ([`WorldThread::run`]).
//!
//! A task that never runs (its world shut down first) is simply dropped,
//! which drops everything it captured. Operations that hold a
//! [`PendingGuard`](vispet_core::ownership::PendingGuard) rely on that to
//! release the owner.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vispet_core::error::{Result, VisPetError};
use vispet_core::types::WorldId;

use crate::host::EntityStore;

/// Work to run on a world's owning thread.
pub type WorldTask = Box<dyn FnOnce(&mut dyn EntityStore) -> Result<()> + Send + 'static>;

struct QueuedTask {
    label: &'static str,
    task: WorldTask,
}

// ---------------------------------------------------------------------------
// Handle (producer side)
// ---------------------------------------------------------------------------

/// Cloneable submission side of a world queue.
#[derive(Clone)]
pub struct WorldHandle {
    id: WorldId,
    tx: mpsc::UnboundedSender<QueuedTask>,
}

impl std::fmt::Debug for WorldHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldHandle")
            .field("id", &self.id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WorldHandle {
    /// The world this handle submits to.
    #[must_use]
    pub fn id(&self) -> &WorldId {
        &self.id
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue a task. Never blocks.
    ///
    /// # Errors
    /// [`VisPetError::WorldClosed`] if the world has shut down. The task is
    /// dropped without running.
    pub fn execute<F>(&self, label: &'static str, task: F) -> Result<()>
    where
        F: FnOnce(&mut dyn EntityStore) -> Result<()> + Send + 'static,
    {
        self.tx
            .send(QueuedTask {
                label,
                task: Box::new(task),
            })
            .map_err(|_| VisPetError::WorldClosed(self.id.clone()))
    }
}

// ---------------------------------------------------------------------------
// Thread (consumer side)
// ---------------------------------------------------------------------------

/// Receiving side of a world queue. Owned by whatever drives the world.
pub struct WorldThread {
    id: WorldId,
    rx: mpsc::UnboundedReceiver<QueuedTask>,
}

impl std::fmt::Debug for WorldThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldThread")
            .field("id", &self.id)
            .field("queued", &self.rx.len())
            .finish()
    }
}

/// Create a connected handle/thread pair for a world.
#[must_use]
pub fn channel(id: WorldId) -> (WorldHandle, WorldThread) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorldHandle { id: id.clone(), tx }, WorldThread { id, rx })
}

impl WorldThread {
    /// The world this queue belongs to.
    #[must_use]
    pub fn id(&self) -> &WorldId {
        &self.id
    }

    /// Number of tasks waiting.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Run every task currently queued, including tasks enqueued by the
    /// tasks themselves. Returns how many ran.
    pub fn run_pending(&mut self, store: &mut dyn EntityStore) -> usize {
        let mut ran = 0;
        while let Ok(queued) = self.rx.try_recv() {
            run_one(&self.id, store, queued);
            ran += 1;
        }
        ran
    }

    /// Drive the queue until every handle is dropped.
    pub async fn run<S: EntityStore>(mut self, mut store: S) -> S {
        info!(world = %self.id, "World task loop started");
        while let Some(queued) = self.rx.recv().await {
            run_one(&self.id, &mut store, queued);
        }
        info!(world = %self.id, "World task loop stopped");
        store
    }
}

fn run_one(world: &WorldId, store: &mut dyn EntityStore, queued: QueuedTask) {
    let start = Instant::now();
    let label = queued.label;
    match (queued.task)(store) {
        Ok(()) => debug!(
            world = %world,
            task = label,
            elapsed_us = start.elapsed().as_micros(),
            "World task completed"
        ),
        Err(e) => warn!(world = %world, task = label, error = %e, "World task failed"),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Every live world's submission handle.
#[derive(Debug, Default)]
pub struct WorldRegistry {
    worlds: DashMap<WorldId, WorldHandle>,
}

impl WorldRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a queue for a world and register its handle. The caller
    /// drives the returned thread.
    pub fn open(&self, id: WorldId) -> WorldThread {
        let (handle, thread) = channel(id.clone());
        if self.worlds.insert(id.clone(), handle).is_some() {
            warn!(world = %id, "World reopened, previous queue detached");
        } else {
            info!(world = %id, "World registered");
        }
        thread
    }

    /// Forget a world. Tasks still queued on its thread run only if that
    /// thread keeps being driven.
    pub fn close(&self, id: &WorldId) -> bool {
        let removed = self.worlds.remove(id).is_some();
        if removed {
            info!(world = %id, "World unregistered");
        }
        removed
    }

    /// Handle for a world.
    #[must_use]
    pub fn get(&self, id: &WorldId) -> Option<WorldHandle> {
        self.worlds.get(id).map(|h| h.clone())
    }

    /// Handle for a world, as an error when missing.
    ///
    /// # Errors
    /// [`VisPetError::WorldNotRegistered`].
    pub fn require(&self, id: &WorldId) -> Result<WorldHandle> {
        self.get(id).ok_or_else(|| VisPetError::WorldNotRegistered(id.clone()))
    }

    /// Registered world IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<WorldId> {
        self.worlds.iter().map(|e| e.key().clone()).collect()
    }
}
