use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::aggregator;
use super::backend::{FolderContentSync, StorageBackend};
use super::expander::{Entry, expand};
use super::item::{ItemId, UploadItem, UploadStatus};
use super::queue::{Cancellation, UploadQueue};
use super::registry::{Snapshot, SubscriptionId, UploadRegistry};
use crate::config::UploadConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("unknown upload item: {0}")]
    UnknownItem(ItemId),
    #[error("upload item {id} cannot be retried while {status:?}")]
    NotRetryable { id: ItemId, status: UploadStatus },
    #[error("upload item {0} has nothing in flight")]
    NotInFlight(ItemId),
}

pub(crate) struct State {
    pub(crate) registry: UploadRegistry,
    pub(crate) queue: UploadQueue,
    /// Cancellation handles of every running network call, folders included.
    pub(crate) inflight: HashMap<ItemId, CancellationToken>,
    pub(crate) next_id: ItemId,
    pub(crate) next_generation: u64,
}

impl State {
    pub(crate) fn is_idle(&self) -> bool {
        self.inflight.is_empty() && self.queue.waiting_len() == 0
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) sync: Arc<dyn FolderContentSync>,
    pub(crate) idle: Notify,
}

/// Schedules uploads of files and folder trees into remote storage.
///
/// All bookkeeping happens synchronously under one lock; only the network calls
/// run as spawned tasks, so the command methods must be called from within a
/// Tokio runtime. Registry subscribers run under that lock and must not call back
/// into the manager.
#[derive(Clone)]
pub struct UploadManager {
    pub(crate) shared: Arc<Shared>,
}

impl UploadManager {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        sync: Arc<dyn FolderContentSync>,
        config: UploadConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    registry: UploadRegistry::new(),
                    queue: UploadQueue::new(config.concurrency_limit),
                    inflight: HashMap::new(),
                    next_id: 1,
                    next_generation: 1,
                }),
                backend,
                sync,
                idle: Notify::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Expands each entry into the registry and submits the new top-level items.
    pub fn add_entries(
        &self,
        entries: impl IntoIterator<Item = Entry>,
        destination_node_id: &str,
    ) -> Vec<ItemId> {
        let mut state = self.lock();
        let mut roots = Vec::new();
        let mut items = Vec::new();
        for entry in entries {
            let expansion = expand(entry, destination_node_id, &mut state.next_id);
            roots.push(expansion.root);
            items.extend(expansion.items);
        }
        info!(
            "upload batch added: destination={} top_level={} items={}",
            destination_node_id,
            roots.len(),
            items.len()
        );

        state.registry.begin_batch();
        state.registry.upsert(items);
        for root in &roots {
            self.submit(&mut state, *root);
        }
        state.registry.end_batch();
        roots
    }

    /// Removes each item with its whole subtree, cancelling anything in flight.
    /// Returns the number of items deleted from the registry.
    pub fn remove(&self, ids: &[ItemId]) -> usize {
        let mut state = self.lock();
        let removed = self.remove_locked(&mut state, ids);
        self.notify_if_idle(&state);
        removed
    }

    /// Removes top-level items whose whole tree has completed.
    pub fn remove_all_completed(&self) -> usize {
        let mut state = self.lock();
        let completed: Vec<ItemId> = state
            .registry
            .snapshot()
            .top_level()
            .filter(|item| item.status() == UploadStatus::Completed)
            .map(UploadItem::id)
            .collect();
        self.remove_locked(&mut state, &completed)
    }

    /// Aborts an in-flight or waiting item and drops it (and its subtree).
    pub fn abort(&self, id: ItemId) -> Result<(), ManagerError> {
        let mut state = self.lock();
        if !state.registry.contains(id) {
            return Err(ManagerError::UnknownItem(id));
        }
        let busy = state
            .registry
            .subtree_ids(id)
            .into_iter()
            .any(|item| state.inflight.contains_key(&item) || state.queue.is_waiting(item));
        if !busy {
            return Err(ManagerError::NotInFlight(id));
        }
        info!("upload aborted: id={id}");
        self.remove_locked(&mut state, &[id]);
        self.notify_if_idle(&state);
        Ok(())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Snapshot<'_>) + Send + Sync + 'static,
    {
        self.lock().registry.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().registry.unsubscribe(id)
    }

    pub fn get(&self, id: ItemId) -> Option<UploadItem> {
        self.lock().registry.get(id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<ItemId, UploadItem> {
        self.lock().registry.snapshot().to_map()
    }

    pub fn with_snapshot<R>(&self, read: impl FnOnce(&Snapshot<'_>) -> R) -> R {
        let state = self.lock();
        read(&state.registry.snapshot())
    }

    /// Number of file transfers currently holding a slot.
    pub fn active_transfers(&self) -> usize {
        self.lock().queue.in_flight()
    }

    /// Resolves once nothing is running and nothing waits for a slot.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn notify_if_idle(&self, state: &State) {
        if state.is_idle() {
            self.shared.idle.notify_waiters();
        }
    }

    fn remove_locked(&self, state: &mut State, ids: &[ItemId]) -> usize {
        let mut doomed = HashSet::new();
        let mut roots = Vec::new();
        for id in ids {
            if doomed.contains(id) || !state.registry.contains(*id) {
                continue;
            }
            let subtree = state.registry.subtree_ids(*id);
            doomed.extend(subtree);
            roots.push(*id);
        }
        // A root nested under another requested root goes with its ancestor.
        roots.retain(|root| {
            !state
                .registry
                .ancestor_ids(*root)
                .iter()
                .any(|ancestor| doomed.contains(ancestor))
        });
        if doomed.is_empty() {
            return 0;
        }

        state.registry.begin_batch();
        for id in &doomed {
            if state.queue.cancel(*id) == Cancellation::Dequeued {
                debug!("queued upload dropped: id={id}");
            }
        }
        let mut promotions = Vec::new();
        for id in &doomed {
            if let Some(token) = state.inflight.remove(id) {
                token.cancel();
                debug!("in-flight upload cancelled: id={id}");
            }
            if let Some(next) = state.queue.release(*id) {
                promotions.push(next);
            }
        }
        for root in &roots {
            aggregator::detach_subtree(&mut state.registry, *root);
        }
        let removed = state.registry.remove(&doomed);
        for next in promotions {
            debug!("upload promoted after removal: id={next}");
            self.submit(state, next);
        }
        state.registry.end_batch();
        info!("upload items removed: roots={} items={removed}", roots.len());
        removed
    }
}
