use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::item::{FailureCode, ItemId, UploadItem, UploadStatus};

pub type SubscriptionId = u64;

type Subscriber = Box<dyn Fn(&Snapshot<'_>) + Send + Sync>;

/// Single source of truth for every upload item, keyed by id.
///
/// Subscribers are invoked synchronously after each mutating call with the full
/// current snapshot. Mutations issued between [`UploadRegistry::begin_batch`] and
/// [`UploadRegistry::end_batch`] produce one notification at the end.
#[derive(Default)]
pub struct UploadRegistry {
    items: BTreeMap<ItemId, UploadItem>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
    batch_depth: usize,
    dirty: bool,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn upsert(&mut self, items: impl IntoIterator<Item = UploadItem>) {
        for item in items {
            self.items.insert(item.id(), item);
        }
        self.changed();
    }

    /// Applies `patch` to the item, returning false when it does not exist.
    pub fn update<F>(&mut self, id: ItemId, patch: F) -> bool
    where
        F: FnOnce(&mut UploadItem),
    {
        let Some(item) = self.items.get_mut(&id) else {
            return false;
        };
        patch(item);
        self.changed();
        true
    }

    /// Drops the given ids; returns how many existed.
    pub fn remove(&mut self, ids: &HashSet<ItemId>) -> usize {
        let before = self.items.len();
        self.items.retain(|id, _| !ids.contains(id));
        let removed = before - self.items.len();
        if removed > 0 {
            self.changed();
        }
        removed
    }

    /// The item and every item below it, parent before children.
    pub fn subtree_ids(&self, root: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(item) = self.items.get(&id) else {
                continue;
            };
            out.push(id);
            stack.extend(item.children().iter().rev().copied());
        }
        out
    }

    /// Strict ancestors of `id`, nearest first, resolved through `parent_id`.
    pub fn ancestor_ids(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let mut cursor = self.items.get(&id).and_then(UploadItem::parent_id);
        while let Some(ancestor) = cursor {
            out.push(ancestor);
            cursor = self.items.get(&ancestor).and_then(UploadItem::parent_id);
        }
        out
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&Snapshot<'_>) + Send + Sync + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        before != self.subscribers.len()
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot { items: &self.items }
    }

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 && self.dirty {
            self.dirty = false;
            self.notify();
        }
    }

    fn changed(&mut self) {
        if self.batch_depth > 0 {
            self.dirty = true;
        } else {
            self.notify();
        }
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        for (_, subscriber) in &self.subscribers {
            subscriber(&snapshot);
        }
    }
}

/// Read-only view of the registry, with the projections the UI layer needs.
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    items: &'a BTreeMap<ItemId, UploadItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub queued: usize,
    pub loading: usize,
    pub completed: usize,
    pub failed: usize,
}

impl<'a> Snapshot<'a> {
    pub fn get(&self, id: ItemId) -> Option<&'a UploadItem> {
        self.items.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(self) -> impl Iterator<Item = &'a UploadItem> {
        self.items.values()
    }

    /// Items dropped directly at a destination, in submission order.
    pub fn top_level(self) -> impl Iterator<Item = &'a UploadItem> {
        self.items.values().filter(|item| item.parent_id().is_none())
    }

    pub fn children_of(&self, id: ItemId) -> Vec<&'a UploadItem> {
        self.items
            .get(&id)
            .map(|item| {
                item.children()
                    .iter()
                    .filter_map(|child| self.items.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_quota_failure(&self) -> bool {
        self.items.values().any(|item| {
            item.base().status_code == Some(FailureCode::QuotaExceeded)
                && item.unit_status() == UploadStatus::Failed
        })
    }

    /// Counts of top-level items by their displayed status.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for item in self.top_level() {
            match item.status() {
                UploadStatus::Queued => summary.queued += 1,
                UploadStatus::Loading => summary.loading += 1,
                UploadStatus::Completed => summary.completed += 1,
                UploadStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn to_map(&self) -> BTreeMap<ItemId, UploadItem> {
        self.items.clone()
    }
}

impl Serialize for Snapshot<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.values())
    }
}
