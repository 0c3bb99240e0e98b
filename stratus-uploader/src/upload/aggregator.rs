use super::item::{CountDelta, FailureCode, ItemId, UploadItem, UploadStatus};
use super::registry::UploadRegistry;

/// Moves an item's own unit (file transfer or folder creation) to `next` and
/// propagates the counter change to the folder itself and every ancestor.
///
/// Returns the previous unit status, or `None` if the item does not exist.
pub(crate) fn transition(
    registry: &mut UploadRegistry,
    id: ItemId,
    next: UploadStatus,
    code: Option<FailureCode>,
) -> Option<UploadStatus> {
    let previous = registry.get(id)?.unit_status();
    let delta = CountDelta::between(previous, next);
    let code = if next == UploadStatus::Failed { code } else { None };

    registry.begin_batch();
    registry.update(id, |item| match item {
        UploadItem::File(file) => {
            file.base.status = next;
            file.base.status_code = code;
        }
        UploadItem::Folder(folder) => {
            folder.creation = next;
            folder.base.status_code = code;
            folder.apply(delta);
        }
    });
    if !delta.is_zero() {
        apply_to_ancestors(registry, id, delta);
    }
    registry.end_batch();
    Some(previous)
}

/// Subtracts the subtree rooted at `root` from every strict ancestor and
/// detaches it from its parent's child list. The caller deletes the subtree.
pub(crate) fn detach_subtree(registry: &mut UploadRegistry, root: ItemId) -> Option<(usize, usize, usize)> {
    let item = registry.get(root)?;
    let counts = item.subtree_counts();
    let parent = item.parent_id();

    registry.begin_batch();
    apply_to_ancestors(registry, root, CountDelta::removal(counts));
    if let Some(parent) = parent {
        registry.update(parent, |item| {
            if let UploadItem::Folder(folder) = item {
                folder.children.retain(|child| *child != root);
            }
        });
    }
    registry.end_batch();
    Some(counts)
}

fn apply_to_ancestors(registry: &mut UploadRegistry, id: ItemId, delta: CountDelta) {
    for ancestor in registry.ancestor_ids(id) {
        registry.update(ancestor, |item| {
            if let UploadItem::Folder(folder) = item {
                folder.apply(delta);
            }
        });
    }
}
