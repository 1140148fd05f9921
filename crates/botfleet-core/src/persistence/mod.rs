// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable session storage.
//!
//! A session is the instance list plus the trailing console log. The
//! [`SessionStore`] trait abstracts the backing store; [`SqliteStore`] is
//! the bundled implementation. Saves go through [`Writeback`], a
//! write-behind task that debounces bursts of save intents and flushes
//! the latest snapshot once the burst settles.

mod sqlite;

pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lifecycle::LogBuffer;
use crate::registry::InstanceRegistry;
use crate::types::{Instance, LogEntry};

/// Backing store for the session: instances plus the console log tail.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted instance list. An empty store yields an empty
    /// list, not an error.
    async fn load_instances(&self) -> Result<Vec<Instance>>;

    /// Replace the persisted instance list with a snapshot.
    async fn save_instances(&self, instances: &[Instance]) -> Result<()>;

    /// Load the persisted console log tail, oldest first.
    async fn load_log(&self) -> Result<Vec<LogEntry>>;

    /// Replace the persisted console log tail with a snapshot.
    async fn save_log(&self, entries: &[LogEntry]) -> Result<()>;
}

/// Cheap, clonable handle for requesting a session save.
///
/// Requests are intents, not writes: the write-behind task coalesces
/// them and persists the state as it is at flush time.
#[derive(Debug, Clone)]
pub struct SaveHandle {
    tx: Option<mpsc::UnboundedSender<()>>,
}

impl SaveHandle {
    /// A handle with no write-behind task attached. Save requests are
    /// silently dropped; used when running without durable storage.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Ask the write-behind task to persist the session soon.
    pub fn request_save(&self) {
        if let Some(tx) = &self.tx {
            // A closed channel means the task already shut down and
            // flushed; nothing to do.
            let _ = tx.send(());
        }
    }
}

/// Write-behind persistence task.
///
/// Lifecycle mutations fire save intents far faster than a store should
/// be written; the task waits out the debounce window, drains whatever
/// piled up, and writes one snapshot.
pub struct Writeback {
    handle: SaveHandle,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Writeback {
    /// Spawn the write-behind task over the shared session state.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        registry: InstanceRegistry,
        logs: LogBuffer,
        debounce: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        // Final flush covers any intent still in flight.
                        flush(store.as_ref(), &registry, &logs).await;
                        break;
                    }
                    intent = rx.recv() => {
                        if intent.is_none() {
                            break;
                        }
                        // Shutdown cuts the debounce wait short; the
                        // pending intent is flushed either way.
                        let stopping = tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => true,
                            _ = tokio::time::sleep(debounce) => false,
                        };
                        // Coalesce everything that arrived while waiting.
                        while rx.try_recv().is_ok() {}
                        flush(store.as_ref(), &registry, &logs).await;
                        if stopping {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            handle: SaveHandle { tx: Some(tx) },
            shutdown_tx,
            task,
        }
    }

    /// Handle for requesting saves.
    pub fn handle(&self) -> SaveHandle {
        self.handle.clone()
    }

    /// Stop the task after one final flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Snapshot the session and write it out. Store failures are logged and
/// swallowed; a broken store must not take the engine down.
async fn flush(store: &dyn SessionStore, registry: &InstanceRegistry, logs: &LogBuffer) {
    let instances = registry.snapshot().await;
    if let Err(err) = store.save_instances(&instances).await {
        warn!(%err, "failed to persist instances");
    }
    let tail = logs.tail().await;
    if let Err(err) = store.save_log(&tail).await {
        warn!(%err, "failed to persist console log");
    }
    debug!(
        instances = instances.len(),
        log_entries = tail.len(),
        "session flushed"
    );
}
