//! Storage-backed task queue.
//!
//! Queue items move through the life cycle described on [`QueueItemStatus`].
//! Only one item per queue name is in progress at a time: the runner asks
//! [`QueueItemRepository::find_oldest_queued_items`] for work, which skips queues
//! that already have a running item. Every status change is written with
//! [`QueueItemRepository::save_with_condition`] so two writers racing on the
//! same item cannot both win.

use crate::error::PacklinkResult;
use crate::orm::{Condition, Repository};
use async_trait::async_trait;

pub mod item;
pub mod memory;
pub mod service;

pub use item::{Priority, QueueItem, QueueItemStatus};
pub use service::QueueService;

/// Number of queue items per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting items
    pub queued: u64,
    /// Running items
    pub in_progress: u64,
    /// Completed items
    pub completed: u64,
    /// Failed items
    pub failed: u64,
    /// Aborted items
    pub aborted: u64,
}

impl QueueStats {
    /// Items that still have work ahead of them.
    pub fn active(&self) -> u64 {
        self.queued + self.in_progress
    }
}

/// Queue-specific storage operations on top of plain CRUD.
#[async_trait]
pub trait QueueItemRepository: Repository<QueueItem> {
    /// Oldest queued item of each queue with the given priority, skipping
    /// queues that have an item in progress, ordered by queue time.
    async fn find_oldest_queued_items(
        &self,
        priority: Priority,
        limit: usize,
    ) -> PacklinkResult<Vec<QueueItem>>;

    /// Insert the item if it has no id; otherwise overwrite the stored row only
    /// if it still satisfies every condition. Fails with
    /// [`PacklinkError::QueueItemSave`](crate::error::PacklinkError::QueueItemSave)
    /// when it does not.
    async fn save_with_condition(
        &self,
        item: &mut QueueItem,
        conditions: &[Condition],
    ) -> PacklinkResult<i64>;
}
