use serde::Serialize;
use stratus_core::{ApiErrorClass, StratusError, UploadSource};

/// Process-local identifier of an upload item, distinct from remote node ids.
pub type ItemId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Queued,
    Loading,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }

    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }
}

/// Machine-readable failure reason attached to `Failed` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCode {
    Network,
    QuotaExceeded,
    NameConflict,
    PayloadTooLarge,
    Unauthorized,
    /// The containing folder could not be created, so this item was never attempted.
    ParentFailed,
    Generic,
}

impl FailureCode {
    pub fn from_error(err: &StratusError) -> Self {
        match err.classification() {
            ApiErrorClass::Auth => FailureCode::Unauthorized,
            ApiErrorClass::QuotaExceeded => FailureCode::QuotaExceeded,
            ApiErrorClass::NameConflict => FailureCode::NameConflict,
            ApiErrorClass::PayloadTooLarge => FailureCode::PayloadTooLarge,
            ApiErrorClass::Transient => FailureCode::Network,
            ApiErrorClass::Permanent => FailureCode::Generic,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemBase {
    pub id: ItemId,
    pub name: String,
    pub full_path: String,
    pub parent_id: Option<ItemId>,
    pub parent_node_id: Option<String>,
    pub node_id: Option<String>,
    pub status: UploadStatus,
    pub status_code: Option<FailureCode>,
    /// Bumped on every admission; callbacks from older attempts are dropped.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl ItemBase {
    pub(crate) fn new(
        id: ItemId,
        name: String,
        full_path: String,
        parent_id: Option<ItemId>,
        parent_node_id: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            full_path,
            parent_id,
            parent_node_id,
            node_id: None,
            status: UploadStatus::Queued,
            status_code: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileItem {
    #[serde(flatten)]
    pub base: ItemBase,
    #[serde(skip)]
    pub source: UploadSource,
    pub size: u64,
    /// Percent of bytes transferred, 0..=100.
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderItem {
    #[serde(flatten)]
    pub base: ItemBase,
    pub children: Vec<ItemId>,
    /// Items in the subtree, the folder itself included.
    pub content_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// State of the folder's own remote creation, one unit of `content_count`.
    pub creation: UploadStatus,
}

impl FolderItem {
    pub fn pending_count(&self) -> usize {
        self.content_count
            .saturating_sub(self.completed_count)
            .saturating_sub(self.failed_count)
    }

    /// Aggregate status derived from the subtree counters.
    pub fn derive_status(&self) -> UploadStatus {
        if self.completed_count == self.content_count {
            UploadStatus::Completed
        } else if self.failed_count > 0 && self.pending_count() == 0 {
            UploadStatus::Failed
        } else if self.creation == UploadStatus::Queued {
            UploadStatus::Queued
        } else {
            UploadStatus::Loading
        }
    }

    pub(crate) fn apply(&mut self, delta: CountDelta) {
        self.content_count = self.content_count.saturating_add_signed(delta.content);
        self.completed_count = self.completed_count.saturating_add_signed(delta.completed);
        self.failed_count = self.failed_count.saturating_add_signed(delta.failed);
        debug_assert!(self.completed_count <= self.content_count);
        debug_assert!(self.failed_count <= self.content_count);
        self.base.status = self.derive_status();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UploadItem {
    File(FileItem),
    Folder(FolderItem),
}

impl UploadItem {
    pub fn base(&self) -> &ItemBase {
        match self {
            UploadItem::File(file) => &file.base,
            UploadItem::Folder(folder) => &folder.base,
        }
    }

    pub(crate) fn base_mut(&mut self) -> &mut ItemBase {
        match self {
            UploadItem::File(file) => &mut file.base,
            UploadItem::Folder(folder) => &mut folder.base,
        }
    }

    pub fn id(&self) -> ItemId {
        self.base().id
    }

    pub fn parent_id(&self) -> Option<ItemId> {
        self.base().parent_id
    }

    /// Status shown to the user: the file's own status, or a folder's aggregate.
    pub fn status(&self) -> UploadStatus {
        self.base().status
    }

    /// Status of this item's own network unit (file transfer or folder creation).
    pub fn unit_status(&self) -> UploadStatus {
        match self {
            UploadItem::File(file) => file.base.status,
            UploadItem::Folder(folder) => folder.creation,
        }
    }

    pub fn as_folder(&self) -> Option<&FolderItem> {
        match self {
            UploadItem::Folder(folder) => Some(folder),
            UploadItem::File(_) => None,
        }
    }

    pub fn children(&self) -> &[ItemId] {
        match self {
            UploadItem::Folder(folder) => &folder.children,
            UploadItem::File(_) => &[],
        }
    }

    /// `(items, completed, failed)` for the subtree rooted at this item.
    pub fn subtree_counts(&self) -> (usize, usize, usize) {
        match self {
            UploadItem::Folder(folder) => (
                folder.content_count,
                folder.completed_count,
                folder.failed_count,
            ),
            UploadItem::File(file) => (
                1,
                usize::from(file.base.status == UploadStatus::Completed),
                usize::from(file.base.status == UploadStatus::Failed),
            ),
        }
    }
}

/// Signed adjustment of a folder's subtree counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CountDelta {
    pub content: isize,
    pub completed: isize,
    pub failed: isize,
}

impl CountDelta {
    pub fn between(previous: UploadStatus, next: UploadStatus) -> Self {
        let score = |status: UploadStatus| {
            (
                isize::from(status == UploadStatus::Completed),
                isize::from(status == UploadStatus::Failed),
            )
        };
        let (prev_completed, prev_failed) = score(previous);
        let (next_completed, next_failed) = score(next);
        Self {
            content: 0,
            completed: next_completed - prev_completed,
            failed: next_failed - prev_failed,
        }
    }

    pub fn removal(counts: (usize, usize, usize)) -> Self {
        let (content, completed, failed) = counts;
        Self {
            content: -(content as isize),
            completed: -(completed as isize),
            failed: -(failed as isize),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}
