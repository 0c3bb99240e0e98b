use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stratus_core::{Node, NodeKind, ProgressFn, StatusCode, StratusError, UploadSource};
use tokio::sync::oneshot;

use super::backend::{FolderContentSync, StorageBackend};
use super::item::{ItemId, UploadItem, UploadStatus};
use super::manager::UploadManager;
use super::registry::Snapshot;
use crate::config::UploadConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub kind: NodeKind,
    pub name: String,
    pub parent: String,
}

#[derive(Default)]
struct FakeState {
    held: HashSet<String>,
    failures: HashMap<String, StatusCode>,
    panics: HashSet<String>,
    gates: HashMap<String, oneshot::Sender<Result<(), StatusCode>>>,
    calls: Vec<Call>,
}

/// In-process storage backend. Calls succeed immediately unless the name was
/// marked to fail or to be held until released by the test.
#[derive(Default)]
pub(crate) struct FakeStorage {
    state: Mutex<FakeState>,
    active_uploads: AtomicUsize,
    peak_uploads: AtomicUsize,
    next_node: AtomicU64,
}

impl FakeStorage {
    pub fn hold(&self, name: &str) {
        self.state.lock().unwrap().held.insert(name.to_string());
    }

    pub fn fail(&self, name: &str, status: StatusCode) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), status);
    }

    /// Makes the next call for `name` panic inside the backend.
    pub fn panic_on(&self, name: &str) {
        self.state.lock().unwrap().panics.insert(name.to_string());
    }

    pub fn clear_failure(&self, name: &str) {
        self.state.lock().unwrap().failures.remove(name);
    }

    /// Lets a held call succeed; false if nothing is waiting under that name.
    pub fn release(&self, name: &str) -> bool {
        self.finish_held(name, Ok(()))
    }

    pub fn release_with(&self, name: &str, status: StatusCode) -> bool {
        self.finish_held(name, Err(status))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| call.name == name).count()
    }

    pub fn peak_uploads(&self) -> usize {
        self.peak_uploads.load(Ordering::SeqCst)
    }

    fn finish_held(&self, name: &str, result: Result<(), StatusCode>) -> bool {
        let gate = self.state.lock().unwrap().gates.remove(name);
        gate.is_some_and(|gate| gate.send(result).is_ok())
    }

    async fn respond(&self, kind: NodeKind, name: &str, parent: &str) -> Result<Node, StratusError> {
        let waiter = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                kind,
                name: name.to_string(),
                parent: parent.to_string(),
            });
            if state.panics.remove(name) {
                drop(state);
                panic!("storage backend blew up on {name}");
            }
            if let Some(status) = state.failures.get(name) {
                return Err(api_error(*status));
            }
            if state.held.remove(name) {
                let (tx, rx) = oneshot::channel();
                state.gates.insert(name.to_string(), tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(waiter) = waiter {
            match waiter.await {
                Ok(Ok(())) => {}
                Ok(Err(status)) => return Err(api_error(status)),
                Err(_) => return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR)),
            }
        }
        let n = self.next_node.fetch_add(1, Ordering::SeqCst);
        Ok(Node {
            id: format!("node-{n}"),
            name: name.to_string(),
            kind,
            size: None,
            modified: None,
        })
    }
}

struct ActiveUpload<'a>(&'a AtomicUsize);

impl Drop for ActiveUpload<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for FakeStorage {
    async fn create_folder(&self, name: &str, parent_node_id: &str) -> Result<Node, StratusError> {
        self.respond(NodeKind::Folder, name, parent_node_id).await
    }

    async fn upload_file(
        &self,
        name: &str,
        parent_node_id: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<Node, StratusError> {
        let now = self.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_uploads.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveUpload(&self.active_uploads);

        let total = source.len().await.unwrap_or(0);
        progress(total / 2, total);
        let node = self.respond(NodeKind::File, name, parent_node_id).await?;
        progress(total, total);
        Ok(node)
    }
}

fn api_error(status: StatusCode) -> StratusError {
    StratusError::Api {
        status,
        body: String::new(),
    }
}

/// Listing cache stand-in that records every insertion.
#[derive(Default)]
pub(crate) struct RecordingSync {
    listings: Mutex<HashSet<String>>,
    inserted: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingSync {
    pub fn with_listing(folder_node_id: &str) -> Self {
        let sync = Self::default();
        sync.listings
            .lock()
            .unwrap()
            .insert(folder_node_id.to_string());
        sync
    }

    pub fn inserted(&self) -> Vec<(String, String, bool)> {
        self.inserted.lock().unwrap().clone()
    }
}

impl FolderContentSync for RecordingSync {
    fn has_listing(&self, folder_node_id: &str) -> bool {
        self.listings.lock().unwrap().contains(folder_node_id)
    }

    fn insert_node(&self, created: &Node, destination_node_id: &str, is_last: bool) {
        self.inserted.lock().unwrap().push((
            created.name.clone(),
            destination_node_id.to_string(),
            is_last,
        ));
    }
}

pub(crate) fn manager_with(
    storage: &Arc<FakeStorage>,
    sync: &Arc<RecordingSync>,
    limit: usize,
) -> UploadManager {
    UploadManager::new(storage.clone(), sync.clone(), UploadConfig::with_limit(limit))
}

/// Lets spawned tasks run until `done` holds for the registry.
pub(crate) async fn settle_until<F>(manager: &UploadManager, done: F)
where
    F: Fn(&Snapshot<'_>) -> bool,
{
    for _ in 0..500 {
        if manager.with_snapshot(&done) {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("upload state did not settle");
}

pub(crate) fn id_named(manager: &UploadManager, name: &str) -> ItemId {
    manager.with_snapshot(|snapshot| {
        snapshot
            .items()
            .find(|item| item.base().name == name)
            .map(UploadItem::id)
            .unwrap_or_else(|| panic!("no item named {name}"))
    })
}

pub(crate) fn status_of(manager: &UploadManager, name: &str) -> UploadStatus {
    let id = id_named(manager, name);
    manager.get(id).unwrap().status()
}

pub(crate) fn counts_of(manager: &UploadManager, name: &str) -> (usize, usize, usize) {
    let id = id_named(manager, name);
    manager.get(id).unwrap().subtree_counts()
}

/// Recomputes every folder's counters from scratch and compares them with the
/// incrementally maintained ones.
pub(crate) fn assert_counters_consistent(manager: &UploadManager) {
    manager.with_snapshot(|snapshot| {
        for item in snapshot.items() {
            let UploadItem::Folder(folder) = item else {
                continue;
            };
            let mut expected = (0, 0, 0);
            let mut stack = vec![item.id()];
            while let Some(id) = stack.pop() {
                let node = snapshot.get(id).unwrap();
                expected.0 += 1;
                match node.unit_status() {
                    UploadStatus::Completed => expected.1 += 1,
                    UploadStatus::Failed => expected.2 += 1,
                    _ => {}
                }
                stack.extend(node.children());
            }
            assert_eq!(
                (folder.content_count, folder.completed_count, folder.failed_count),
                expected,
                "counters drifted for {}",
                folder.base.full_path
            );
        }
    });
}
