use std::collections::{HashSet, VecDeque};

use super::item::ItemId;

/// Whether an admitted item occupies one of the transfer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// File byte transfer, bounded by the concurrency limit.
    Transfer,
    /// Folder creation; a metadata call that never waits for a slot.
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Start,
    Wait,
    /// Already admitted or already waiting.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// Removed from the wait-list; no slot was held.
    Dequeued,
    /// Holds a slot; the caller must abort it and then call `release`.
    Active,
    NotTracked,
}

/// FIFO admission control with a fixed ceiling on concurrent transfers.
#[derive(Debug)]
pub struct UploadQueue {
    limit: usize,
    active: HashSet<ItemId>,
    waiting: VecDeque<ItemId>,
}

impl UploadQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            active: HashSet::new(),
            waiting: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn submit(&mut self, id: ItemId, kind: SlotKind) -> Admission {
        if self.active.contains(&id) || self.waiting.contains(&id) {
            return Admission::Ignored;
        }
        match kind {
            SlotKind::Metadata => Admission::Start,
            SlotKind::Transfer if self.active.len() < self.limit => {
                self.active.insert(id);
                Admission::Start
            }
            SlotKind::Transfer => {
                self.waiting.push_back(id);
                Admission::Wait
            }
        }
    }

    /// Frees the slot held by `id` and pops the oldest waiting item, if any.
    ///
    /// Ids that never acquired a slot leave the queue untouched.
    pub fn release(&mut self, id: ItemId) -> Option<ItemId> {
        if !self.active.remove(&id) {
            return None;
        }
        self.waiting.pop_front()
    }

    pub fn cancel(&mut self, id: ItemId) -> Cancellation {
        if let Some(position) = self.waiting.iter().position(|waiting| *waiting == id) {
            self.waiting.remove(position);
            Cancellation::Dequeued
        } else if self.active.contains(&id) {
            Cancellation::Active
        } else {
            Cancellation::NotTracked
        }
    }

    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_waiting(&self, id: ItemId) -> bool {
        self.waiting.contains(&id)
    }
}
