use std::io;
use std::sync::Arc;

use stratus_core::{Node, ProgressFn, StratusError, UploadSource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator;
use super::item::{FailureCode, ItemId, UploadItem, UploadStatus};
use super::manager::{State, UploadManager};
use super::queue::{Admission, SlotKind};

/// Everything a spawned task needs, copied out of the registry at admission.
struct Job {
    id: ItemId,
    generation: u64,
    name: String,
    parent_node_id: String,
    work: Work,
}

enum Work {
    File { source: UploadSource },
    Folder,
}

impl UploadManager {
    /// Hands `id` to the queue and starts it if a slot is free.
    ///
    /// Items whose own unit is already loading or completed are left alone.
    pub(crate) fn submit(&self, state: &mut State, id: ItemId) {
        let Some(item) = state.registry.get(id) else {
            return;
        };
        if matches!(
            item.unit_status(),
            UploadStatus::Loading | UploadStatus::Completed
        ) {
            return;
        }
        let kind = match item {
            UploadItem::File(_) => SlotKind::Transfer,
            UploadItem::Folder(_) => SlotKind::Metadata,
        };
        match state.queue.submit(id, kind) {
            Admission::Start => self.start(state, id),
            Admission::Wait => {
                debug!(
                    "upload waiting for a slot: id={id} limit={}",
                    state.queue.limit()
                );
                aggregator::transition(&mut state.registry, id, UploadStatus::Queued, None);
            }
            Admission::Ignored => {}
        }
    }

    fn start(&self, state: &mut State, id: ItemId) {
        let generation = state.next_generation;
        state.next_generation += 1;
        let Some(item) = state.registry.get(id) else {
            return;
        };
        let Some(parent_node_id) = item.base().parent_node_id.clone() else {
            // Children are only submitted after their parent exists remotely.
            warn!("upload admitted without a destination: id={id}");
            aggregator::transition(
                &mut state.registry,
                id,
                UploadStatus::Failed,
                Some(FailureCode::ParentFailed),
            );
            self.release_slot(state, id);
            return;
        };
        let work = match item {
            UploadItem::File(file) => Work::File {
                source: file.source.clone(),
            },
            UploadItem::Folder(_) => Work::Folder,
        };
        let job = Job {
            id,
            generation,
            name: item.base().name.clone(),
            parent_node_id,
            work,
        };

        state.registry.begin_batch();
        state.registry.update(id, |item| {
            item.base_mut().generation = generation;
            if let UploadItem::File(file) = item {
                file.progress = 0;
            }
        });
        aggregator::transition(&mut state.registry, id, UploadStatus::Loading, None);
        state.registry.end_batch();

        let token = CancellationToken::new();
        state.inflight.insert(id, token.clone());
        debug!(
            "upload started: id={id} name={} parent={}",
            job.name, job.parent_node_id
        );
        let task = tokio::spawn(self.clone().run(job, token));
        tokio::spawn(self.clone().supervise(id, generation, task));
    }

    /// Turns a panicking backend call into an ordinary failure so the slot and
    /// the in-flight entry are released.
    async fn supervise(self, id: ItemId, generation: u64, task: JoinHandle<()>) {
        if let Err(err) = task.await
            && err.is_panic()
        {
            warn!("upload task panicked: id={id}");
            let err = StratusError::Io(io::Error::other("upload task panicked"));
            self.finish(id, generation, Err(err));
        }
    }

    async fn run(self, job: Job, token: CancellationToken) {
        let backend = self.shared.backend.clone();
        let outcome = match &job.work {
            Work::File { source } => {
                let manager = self.clone();
                let (id, generation) = (job.id, job.generation);
                let progress: ProgressFn = Arc::new(move |sent, total| {
                    manager.record_progress(id, generation, sent, total);
                });
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    result = backend.upload_file(&job.name, &job.parent_node_id, source.clone(), progress) => result,
                }
            }
            Work::Folder => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    result = backend.create_folder(&job.name, &job.parent_node_id) => result,
                }
            }
        };
        self.finish(job.id, job.generation, outcome);
    }

    /// Applies a transfer progress event unless it belongs to a stale attempt.
    pub(crate) fn record_progress(&self, id: ItemId, generation: u64, sent: u64, total: u64) {
        let mut state = self.lock();
        let percent = if total == 0 {
            0
        } else {
            (sent.min(total) * 100 / total) as u8
        };
        state.registry.update(id, |item| {
            if let UploadItem::File(file) = item
                && file.base.generation == generation
                && file.base.status == UploadStatus::Loading
            {
                file.progress = file.progress.max(percent);
            }
        });
    }

    /// Completes one network call. Callbacks for removed items or superseded
    /// attempts are dropped.
    pub(crate) fn finish(
        &self,
        id: ItemId,
        generation: u64,
        outcome: Result<Node, StratusError>,
    ) {
        let mut state = self.lock();
        let current = state.registry.get(id).is_some_and(|item| {
            item.base().generation == generation && item.unit_status() == UploadStatus::Loading
        });
        if !current {
            debug!("stale upload callback ignored: id={id} generation={generation}");
            return;
        }
        state.inflight.remove(&id);

        state.registry.begin_batch();
        let is_folder = matches!(state.registry.get(id), Some(UploadItem::Folder(_)));
        match (is_folder, outcome) {
            (false, Ok(node)) => self.complete_file(&mut state, id, node),
            (false, Err(err)) => self.fail_file(&mut state, id, &err),
            (true, Ok(node)) => self.complete_folder(&mut state, id, node),
            (true, Err(err)) => self.fail_folder(&mut state, id, &err),
        }
        state.registry.end_batch();
        self.notify_if_idle(&state);
    }

    fn complete_file(&self, state: &mut State, id: ItemId, node: Node) {
        info!("upload completed: id={id} node={}", node.id);
        state.registry.update(id, |item| {
            item.base_mut().node_id = Some(node.id.clone());
            if let UploadItem::File(file) = item {
                file.progress = 100;
            }
        });
        aggregator::transition(&mut state.registry, id, UploadStatus::Completed, None);
        self.sync_created_node(state, id, &node);
        self.release_slot(state, id);
    }

    fn fail_file(&self, state: &mut State, id: ItemId, err: &StratusError) {
        let code = FailureCode::from_error(err);
        warn!("upload failed: id={id} code={code:?} err={err}");
        aggregator::transition(&mut state.registry, id, UploadStatus::Failed, Some(code));
        self.release_slot(state, id);
    }

    fn complete_folder(&self, state: &mut State, id: ItemId, node: Node) {
        info!("folder created: id={id} node={}", node.id);
        state
            .registry
            .update(id, |item| item.base_mut().node_id = Some(node.id.clone()));
        aggregator::transition(&mut state.registry, id, UploadStatus::Completed, None);
        self.sync_created_node(state, id, &node);

        let children = state
            .registry
            .get(id)
            .map(|item| item.children().to_vec())
            .unwrap_or_default();
        for child in children {
            state
                .registry
                .update(child, |item| item.base_mut().parent_node_id = Some(node.id.clone()));
            self.submit(state, child);
        }
    }

    fn fail_folder(&self, state: &mut State, id: ItemId, err: &StratusError) {
        let code = FailureCode::from_error(err);
        warn!("folder creation failed: id={id} code={code:?} err={err}");
        aggregator::transition(&mut state.registry, id, UploadStatus::Failed, Some(code));
        // Nothing below was ever submitted; report the whole subtree as failed.
        for descendant in state.registry.subtree_ids(id).into_iter().skip(1) {
            aggregator::transition(
                &mut state.registry,
                descendant,
                UploadStatus::Failed,
                Some(FailureCode::ParentFailed),
            );
        }
    }

    fn release_slot(&self, state: &mut State, id: ItemId) {
        if let Some(next) = state.queue.release(id) {
            debug!("upload promoted: id={next}");
            self.submit(state, next);
        }
    }

    fn sync_created_node(&self, state: &State, id: ItemId, node: &Node) {
        let Some(destination) = state
            .registry
            .get(id)
            .and_then(|item| item.base().parent_node_id.clone())
        else {
            return;
        };
        if !self.shared.sync.has_listing(&destination) {
            return;
        }
        let is_last = !state.registry.snapshot().items().any(|item| {
            item.id() != id
                && item.unit_status().is_pending()
                && item.base().parent_node_id.as_deref() == Some(destination.as_str())
        });
        self.shared.sync.insert_node(node, &destination, is_last);
    }
}
