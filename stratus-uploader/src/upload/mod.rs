mod aggregator;
pub mod backend;
mod executor;
pub mod expander;
pub mod item;
pub mod manager;
pub mod queue;
pub mod registry;
mod retry;

#[cfg(test)]
mod testing;


pub use backend::{FolderContentSync, NoListingCache, StorageBackend};
pub use expander::{Entry, Expansion, expand};
pub use item::{FailureCode, FileItem, FolderItem, ItemBase, ItemId, UploadItem, UploadStatus};
pub use manager::{ManagerError, UploadManager};
pub use queue::{Admission, Cancellation, SlotKind, UploadQueue};
pub use registry::{Snapshot, SubscriptionId, Summary, UploadRegistry};
