//! Queue service: enqueues tasks and drives queue item state transitions.

use super::{Priority, QueueItem, QueueItemRepository, QueueItemStatus, QueueStats};
use crate::core::registry::get_registry;
use crate::error::{PacklinkError, PacklinkResult};
use crate::orm::{Condition, Direction, Operator, QueryFilter, Repository};
use crate::task::Task;
use crate::time::TimeProvider;
use crate::utils::{MAX_PROGRESS_BASE_POINTS, percent_to_base_points};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Notify;

/// Entry point for putting work on the queue and reporting on it.
///
/// Every mutating method takes the item as the caller last read it, applies
/// the transition to a copy and writes it with a condition on the previous
/// status and last update time. The caller's copy is only replaced when the
/// write wins.
#[derive(Clone)]
pub struct QueueService {
    repository: Arc<dyn QueueItemRepository>,
    time: Arc<dyn TimeProvider>,
    max_retries: u32,
    wakeup: Arc<Notify>,
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl QueueService {
    /// Create a queue service over the given storage.
    pub fn new(
        repository: Arc<dyn QueueItemRepository>,
        time: Arc<dyn TimeProvider>,
        max_retries: u32,
    ) -> Self {
        Self {
            repository,
            time,
            max_retries,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Signal the runner listens on for new work.
    pub fn wakeup_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Underlying storage.
    pub fn repository(&self) -> &Arc<dyn QueueItemRepository> {
        &self.repository
    }

    /// Configured retry limit.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Enqueue a typed task.
    pub async fn enqueue<T: Task>(
        &self,
        queue_name: &str,
        task: &T,
        context: &str,
        priority: Priority,
    ) -> PacklinkResult<QueueItem> {
        self.enqueue_raw(
            queue_name,
            T::TYPE,
            serde_json::to_value(task)?,
            context,
            priority,
        )
        .await
    }

    /// Enqueue a task given by type name and serialized state.
    ///
    /// The type must be registered so the runner can rebuild it later.
    pub async fn enqueue_raw(
        &self,
        queue_name: &str,
        task_type: &str,
        payload: Value,
        context: &str,
        priority: Priority,
    ) -> PacklinkResult<QueueItem> {
        if !get_registry().is_registered(task_type) {
            return Err(PacklinkError::TaskNotRegistered {
                task_type: task_type.to_string(),
            });
        }

        let now = self.time.now();
        let mut item = QueueItem::new(queue_name, task_type, payload, context, priority, now);
        item.transition(QueueItemStatus::Queued)?;
        item.queue_timestamp = Some(now);
        item.last_update_timestamp = Some(now);

        self.repository.save_with_condition(&mut item, &[]).await?;
        self.wakeup.notify_one();

        tracing::debug!(
            item_id = ?item.id,
            queue = queue_name,
            task_type,
            context,
            "Enqueued task"
        );
        Ok(item)
    }

    /// Mark a queued item as started.
    pub async fn start(&self, item: &mut QueueItem) -> PacklinkResult<()> {
        let now = self.time.now();
        self.apply(item, |next| {
            next.transition(QueueItemStatus::InProgress)?;
            next.start_timestamp = Some(now);
            next.last_update_timestamp = Some(now);
            next.last_execution_progress_base_points = next.progress_base_points;
            Ok(())
        })
        .await?;

        tracing::debug!(item_id = ?item.id, task_type = %item.task_type, "Started queue item");
        Ok(())
    }

    /// Mark a running item as completed.
    pub async fn finish(&self, item: &mut QueueItem) -> PacklinkResult<()> {
        let now = self.time.now();
        self.apply(item, |next| {
            next.transition(QueueItemStatus::Completed)?;
            next.progress_base_points = MAX_PROGRESS_BASE_POINTS;
            next.finish_timestamp = Some(now);
            next.last_update_timestamp = Some(now);
            Ok(())
        })
        .await?;

        tracing::debug!(item_id = ?item.id, task_type = %item.task_type, "Completed queue item");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// The item goes back to the queue while it has retries left and ends up
    /// `failed` otherwise.
    pub async fn fail(&self, item: &mut QueueItem, reason: &str) -> PacklinkResult<()> {
        let now = self.time.now();
        let max_retries = self.max_retries;
        self.apply(item, |next| {
            if next.status != QueueItemStatus::InProgress {
                return Err(PacklinkError::IllegalTransition {
                    from: next.status.to_string(),
                    to: QueueItemStatus::Failed.to_string(),
                });
            }

            next.retries += 1;
            next.record_failure(reason);
            next.last_update_timestamp = Some(now);

            if next.retries > max_retries {
                next.transition(QueueItemStatus::Failed)?;
                next.fail_timestamp = Some(now);
            } else {
                next.transition(QueueItemStatus::Queued)?;
                next.last_execution_progress_base_points = next.progress_base_points;
            }
            Ok(())
        })
        .await?;

        if item.status == QueueItemStatus::Failed {
            tracing::error!(
                item_id = ?item.id,
                task_type = %item.task_type,
                retries = item.retries,
                "Queue item permanently failed: {}",
                reason
            );
        } else {
            tracing::warn!(
                item_id = ?item.id,
                task_type = %item.task_type,
                "Queue item failed (retry {}/{}): {}",
                item.retries,
                self.max_retries,
                reason
            );
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Stop an item for good; it will not be retried.
    pub async fn abort(&self, item: &mut QueueItem, reason: &str) -> PacklinkResult<()> {
        let now = self.time.now();
        self.apply(item, |next| {
            next.transition(QueueItemStatus::Aborted)?;
            next.record_failure(reason);
            next.fail_timestamp = Some(now);
            next.last_update_timestamp = Some(now);
            Ok(())
        })
        .await?;

        tracing::warn!(item_id = ?item.id, task_type = %item.task_type, "Aborted queue item: {}", reason);
        Ok(())
    }

    /// Put a running item back in the queue without counting a retry, keeping
    /// its progress so the next execution can continue from there.
    pub async fn requeue(&self, item: &mut QueueItem) -> PacklinkResult<()> {
        let now = self.time.now();
        self.apply(item, |next| {
            next.transition(QueueItemStatus::Queued)?;
            next.last_execution_progress_base_points = next.progress_base_points;
            next.last_update_timestamp = Some(now);
            Ok(())
        })
        .await?;

        tracing::debug!(item_id = ?item.id, task_type = %item.task_type, "Requeued queue item");
        self.wakeup.notify_one();
        Ok(())
    }

    /// Store execution progress (percent). Progress never moves backwards.
    pub async fn update_progress(&self, item: &mut QueueItem, percent: f64) -> PacklinkResult<()> {
        let now = self.time.now();
        let progress = percent_to_base_points(percent);
        self.apply(item, |next| {
            Self::require_running(next)?;
            next.progress_base_points = next.progress_base_points.max(progress);
            next.last_update_timestamp = Some(now);
            Ok(())
        })
        .await
    }

    /// Refresh the last update time so the runner does not treat the item as
    /// stuck.
    pub async fn keep_alive(&self, item: &mut QueueItem) -> PacklinkResult<()> {
        let now = self.time.now();
        self.apply(item, |next| {
            Self::require_running(next)?;
            next.last_update_timestamp = Some(now);
            Ok(())
        })
        .await
    }

    /// Persist the task state of a running item.
    pub async fn store_task_state(&self, item: &mut QueueItem, payload: Value) -> PacklinkResult<()> {
        let now = self.time.now();
        self.apply(item, |next| {
            Self::require_running(next)?;
            next.serialized_task = payload;
            next.last_update_timestamp = Some(now);
            Ok(())
        })
        .await
    }

    /// Queue item by id.
    pub async fn find(&self, id: i64) -> PacklinkResult<Option<QueueItem>> {
        self.repository.find_by_id(id).await
    }

    /// All items currently in progress.
    pub async fn find_running_items(&self) -> PacklinkResult<Vec<QueueItem>> {
        self.repository
            .select(&QueryFilter::new().eq("status", QueueItemStatus::InProgress.as_str()))
            .await
    }

    /// Most recently enqueued item of a task type, optionally within a context.
    pub async fn find_latest_by_type(
        &self,
        task_type: &str,
        context: Option<&str>,
    ) -> PacklinkResult<Option<QueueItem>> {
        let mut filter = QueryFilter::new().eq("task_type", task_type);
        if let Some(context) = context {
            filter = filter.eq("context", context);
        }
        self.repository
            .select_one(&filter.order_by("id", Direction::Desc))
            .await
    }

    /// Oldest queued item per idle queue for one priority.
    pub async fn find_oldest_queued_items(
        &self,
        priority: Priority,
        limit: usize,
    ) -> PacklinkResult<Vec<QueueItem>> {
        self.repository.find_oldest_queued_items(priority, limit).await
    }

    /// Delete finished items of a task type queued before `older_than`.
    ///
    /// Statuses that are not terminal are ignored so live work is never lost.
    pub async fn remove_finished(
        &self,
        task_type: &str,
        statuses: &[QueueItemStatus],
        older_than: DateTime<Utc>,
    ) -> PacklinkResult<u64> {
        let statuses: Vec<&str> = statuses
            .iter()
            .filter(|status| status.is_finished())
            .map(QueueItemStatus::as_str)
            .collect();
        if statuses.is_empty() {
            return Ok(0);
        }

        let filter = QueryFilter::new()
            .eq("task_type", task_type)
            .and_where("status", Operator::In, statuses)
            .and_where("queue_timestamp", Operator::LessThan, older_than.timestamp());
        self.repository.delete_where(&filter).await
    }

    /// Number of items per status.
    pub async fn stats(&self) -> PacklinkResult<QueueStats> {
        let count = |status: QueueItemStatus| {
            let repository = Arc::clone(&self.repository);
            async move {
                repository
                    .count(&QueryFilter::new().eq("status", status.as_str()))
                    .await
            }
        };

        let (queued, in_progress, completed, failed, aborted) = futures::try_join!(
            count(QueueItemStatus::Queued),
            count(QueueItemStatus::InProgress),
            count(QueueItemStatus::Completed),
            count(QueueItemStatus::Failed),
            count(QueueItemStatus::Aborted),
        )?;

        Ok(QueueStats {
            queued,
            in_progress,
            completed,
            failed,
            aborted,
        })
    }

    fn require_running(item: &QueueItem) -> PacklinkResult<()> {
        if item.status != QueueItemStatus::InProgress {
            return Err(PacklinkError::IllegalTransition {
                from: item.status.to_string(),
                to: QueueItemStatus::InProgress.to_string(),
            });
        }
        Ok(())
    }

    /// Apply `change` to a copy of `item`, save it guarded by the state the
    /// caller read, then publish the copy back.
    async fn apply<F>(&self, item: &mut QueueItem, change: F) -> PacklinkResult<()>
    where
        F: FnOnce(&mut QueueItem) -> PacklinkResult<()>,
    {
        if item.id.is_none() {
            return Err(PacklinkError::QueueItemSave {
                message: "queue item has not been enqueued".to_string(),
            });
        }

        let guard = Self::guard(item);
        let mut next = item.clone();
        change(&mut next)?;

        self.repository.save_with_condition(&mut next, &guard).await?;
        *item = next;
        Ok(())
    }

    fn guard(item: &QueueItem) -> Vec<Condition> {
        let last_update = match item.last_update_timestamp {
            Some(at) => Condition::new("last_update_timestamp", Operator::Equals, at.timestamp()),
            None => Condition::new("last_update_timestamp", Operator::IsNull, Value::Null),
        };
        vec![
            Condition::new("status", Operator::Equals, item.status.as_str()),
            last_update,
        ]
    }
}
