//! Bounded holding area for updates that arrive before the registry is
//! populated.
//!
//! The channel never buffers unboundedly: identical `(entity, delta)` pairs
//! collapse to one entry, so a flood of repeated stale samples costs one
//! application on flush, and overflow drops the oldest entry (most-recent
//! state wins).

use std::collections::VecDeque;

use tracing::{debug, warn};
use twinlink_engine::Delta;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub name: String,
    pub delta: Delta,
}

#[derive(Debug)]
pub struct PendingQueue {
    items: VecDeque<PendingUpdate>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Enqueue an update; returns `false` when an identical entry was
    /// already queued (deduplicated).
    pub fn push(&mut self, name: String, delta: Delta) -> bool {
        let update = PendingUpdate { name, delta };
        if self.items.contains(&update) {
            debug!(entity = %update.name, "dropping duplicate queued update");
            return false;
        }
        if self.items.len() == self.capacity {
            if let Some(dropped) = self.items.pop_front() {
                warn!(entity = %dropped.name, "pending queue full; dropping oldest update");
            }
        }
        self.items.push_back(update);
        true
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<PendingUpdate> {
        self.items.drain(..).collect()
    }
}
