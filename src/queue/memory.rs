//! In-memory queue storage.
//!
//! Adds the queue-specific queries to [`MemoryRepository<QueueItem>`]. Both
//! operations run under the repository's write lock, which is what makes the
//! conditional save atomic.

use super::{Priority, QueueItem, QueueItemRepository, QueueItemStatus};
use crate::error::{PacklinkError, PacklinkResult};
use crate::orm::{Condition, MemoryRepository};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// In-memory queue storage.
pub type InMemoryQueueStorage = MemoryRepository<QueueItem>;

#[async_trait]
impl QueueItemRepository for MemoryRepository<QueueItem> {
    async fn find_oldest_queued_items(
        &self,
        priority: Priority,
        limit: usize,
    ) -> PacklinkResult<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let documents = self.documents().read().await;
        let mut busy_queues = HashSet::new();
        let mut oldest: HashMap<String, QueueItem> = HashMap::new();

        for document in documents.values() {
            let item: QueueItem = serde_json::from_value(document.clone())?;
            match item.status {
                QueueItemStatus::InProgress => {
                    busy_queues.insert(item.queue_name.clone());
                }
                QueueItemStatus::Queued if item.priority == priority => {
                    let replace = oldest
                        .get(&item.queue_name)
                        .is_none_or(|current| queue_order(&item) < queue_order(current));
                    if replace {
                        oldest.insert(item.queue_name.clone(), item);
                    }
                }
                _ => {}
            }
        }

        let mut items: Vec<QueueItem> = oldest
            .into_values()
            .filter(|item| !busy_queues.contains(&item.queue_name))
            .collect();
        items.sort_by_key(queue_order);
        items.truncate(limit);

        Ok(items)
    }

    async fn save_with_condition(
        &self,
        item: &mut QueueItem,
        conditions: &[Condition],
    ) -> PacklinkResult<i64> {
        let mut documents = self.documents().write().await;

        let id = match item.id {
            Some(id) => {
                let stored = documents.get(&id).ok_or_else(|| PacklinkError::QueueItemSave {
                    message: format!("queue item {} no longer exists", id),
                })?;

                if let Some(failed) = conditions.iter().find(|c| !c.evaluate(stored)) {
                    return Err(PacklinkError::QueueItemSave {
                        message: format!(
                            "queue item {} changed concurrently ({} {:?} {})",
                            id, failed.field, failed.operator, failed.value
                        ),
                    });
                }
                id
            }
            None => {
                let id = self.allocate_id();
                item.id = Some(id);
                id
            }
        };

        documents.insert(id, Self::to_document(item)?);
        Ok(id)
    }
}

fn queue_order(item: &QueueItem) -> (i64, i64) {
    (
        item.queue_timestamp.map(|t| t.timestamp()).unwrap_or(i64::MAX),
        item.id.unwrap_or(i64::MAX),
    )
}
