use tracing::info;

use super::aggregator;
use super::item::{FailureCode, ItemId, UploadItem, UploadStatus};
use super::manager::{ManagerError, State, UploadManager};

impl UploadManager {
    /// Re-arms a failed item and resubmits it.
    ///
    /// A folder that exists remotely only retries its failed descendants. A folder
    /// whose creation failed is re-created and then resubmits its whole subtree.
    /// Items that were never attempted because their folder failed escalate to
    /// that folder.
    pub fn retry(&self, id: ItemId) -> Result<(), ManagerError> {
        let mut state = self.lock();
        let item = state
            .registry
            .get(id)
            .ok_or(ManagerError::UnknownItem(id))?;
        if item.status() != UploadStatus::Failed {
            return Err(ManagerError::NotRetryable {
                id,
                status: item.status(),
            });
        }

        let never_attempted = item.base().status_code == Some(FailureCode::ParentFailed);

        state.registry.begin_batch();
        if never_attempted {
            let origin = failed_origin(&state, id).unwrap_or(id);
            info!("retry escalated to failed folder: id={id} folder={origin}");
            self.rearm_folder(&mut state, origin);
        } else {
            info!("upload retry: id={id}");
            self.retry_failed(&mut state, id);
        }
        state.registry.end_batch();
        Ok(())
    }

    fn retry_failed(&self, state: &mut State, id: ItemId) {
        match state.registry.get(id) {
            Some(UploadItem::File(file)) if file.base.status == UploadStatus::Failed => {
                aggregator::transition(&mut state.registry, id, UploadStatus::Queued, None);
                state.registry.update(id, |item| {
                    if let UploadItem::File(file) = item {
                        file.progress = 0;
                    }
                });
                self.submit(state, id);
            }
            Some(UploadItem::Folder(folder)) if folder.creation == UploadStatus::Failed => {
                self.rearm_folder(state, id);
            }
            Some(UploadItem::Folder(folder)) if folder.failed_count > 0 => {
                for child in folder.children.clone() {
                    self.retry_failed(state, child);
                }
            }
            _ => {}
        }
    }

    /// Resets a folder whose creation failed, and everything below it, to queued.
    fn rearm_folder(&self, state: &mut State, id: ItemId) {
        for descendant in state.registry.subtree_ids(id).into_iter().skip(1) {
            state.registry.update(descendant, |item| {
                item.base_mut().parent_node_id = None;
                if let UploadItem::File(file) = item {
                    file.progress = 0;
                }
            });
            if state
                .registry
                .get(descendant)
                .is_some_and(|item| item.unit_status() == UploadStatus::Failed)
            {
                aggregator::transition(&mut state.registry, descendant, UploadStatus::Queued, None);
            }
        }
        aggregator::transition(&mut state.registry, id, UploadStatus::Queued, None);
        self.submit(state, id);
    }
}

/// Nearest ancestor whose own creation failed for a reason other than its parent.
fn failed_origin(state: &State, id: ItemId) -> Option<ItemId> {
    state.registry.ancestor_ids(id).into_iter().find(|ancestor| {
        state.registry.get(*ancestor).is_some_and(|item| {
            item.unit_status() == UploadStatus::Failed
                && item.base().status_code != Some(FailureCode::ParentFailed)
        })
    })
}
