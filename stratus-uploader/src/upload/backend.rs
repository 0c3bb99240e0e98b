use async_trait::async_trait;
use stratus_core::{Node, ProgressFn, StratusClient, StratusError, UploadSource};

/// Remote operations the manager needs from the storage service.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_folder(&self, name: &str, parent_node_id: &str) -> Result<Node, StratusError>;

    /// Dropping the returned future must abort the transfer.
    async fn upload_file(
        &self,
        name: &str,
        parent_node_id: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<Node, StratusError>;
}

#[async_trait]
impl StorageBackend for StratusClient {
    async fn create_folder(&self, name: &str, parent_node_id: &str) -> Result<Node, StratusError> {
        StratusClient::create_folder(self, name, parent_node_id).await
    }

    async fn upload_file(
        &self,
        name: &str,
        parent_node_id: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<Node, StratusError> {
        StratusClient::upload_file(self, parent_node_id, name, source, progress).await
    }
}

/// Keeps already-open folder listings in step with newly created nodes.
///
/// Called from inside the manager's critical section: implementations must not
/// call back into the manager.
pub trait FolderContentSync: Send + Sync {
    fn has_listing(&self, folder_node_id: &str) -> bool;

    fn insert_node(&self, created: &Node, destination_node_id: &str, is_last_in_current_page: bool);
}

/// For hosts that keep no listing cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoListingCache;

impl FolderContentSync for NoListingCache {
    fn has_listing(&self, _folder_node_id: &str) -> bool {
        false
    }

    fn insert_node(&self, _created: &Node, _destination_node_id: &str, _is_last: bool) {}
}
