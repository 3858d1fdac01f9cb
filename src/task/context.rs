//! Execution context handed to a running task.

use super::Task;
use crate::core::Services;
use crate::error::PacklinkResult;
use crate::queue::QueueItem;
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a task sees while it runs: the queue item it belongs to, the shared
/// services and the tenant context.
///
/// A context covers a slice of the item's progress range. The root context
/// covers 0..100%; [`scoped`](TaskContext::scoped) derives a child that maps a
/// sub-task's own 0..100% into part of that range.
#[derive(Clone)]
pub struct TaskContext {
    item: Arc<Mutex<QueueItem>>,
    services: Arc<Services>,
    context: String,
    offset: f64,
    share: f64,
    root: bool,
}

impl TaskContext {
    /// Root context for a started item.
    pub fn new(item: QueueItem, services: Arc<Services>) -> Self {
        let context = item.context.clone();
        Self {
            item: Arc::new(Mutex::new(item)),
            services,
            context,
            offset: 0.0,
            share: 100.0,
            root: true,
        }
    }

    /// Tenant context the item was enqueued for.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Shared services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Shared services, owned.
    pub fn services_arc(&self) -> Arc<Services> {
        Arc::clone(&self.services)
    }

    /// Persisted settings of this task's context.
    pub fn settings(&self) -> Settings {
        self.services.settings(&self.context)
    }

    /// Current time from the configured time provider.
    pub fn now(&self) -> DateTime<Utc> {
        self.services.now()
    }

    /// Snapshot of the queue item as last saved.
    pub async fn item(&self) -> QueueItem {
        self.item.lock().await.clone()
    }

    pub(crate) fn shared_item(&self) -> Arc<Mutex<QueueItem>> {
        Arc::clone(&self.item)
    }

    /// Report progress (0..=100) within this context's range.
    pub async fn report_progress(&self, percent: f64) -> PacklinkResult<()> {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        let overall = self.offset + percent * self.share / 100.0;

        let mut item = self.item.lock().await;
        self.services.queue().update_progress(&mut item, overall).await
    }

    /// Tell the runner the task is still alive without reporting progress.
    pub async fn report_alive(&self) -> PacklinkResult<()> {
        let mut item = self.item.lock().await;
        self.services.queue().keep_alive(&mut item).await
    }

    /// Persist the task's current state so a later execution resumes from it.
    ///
    /// Only the root context writes; in a scoped context the owning
    /// composite checkpoints itself.
    pub async fn checkpoint<T: Task>(&self, task: &T) -> PacklinkResult<()> {
        if !self.root {
            return Ok(());
        }
        self.store_state(serde_json::to_value(task)?).await
    }

    async fn store_state(&self, payload: Value) -> PacklinkResult<()> {
        let mut item = self.item.lock().await;
        self.services.queue().store_task_state(&mut item, payload).await
    }

    /// Child context covering `share` percent of this context's range,
    /// starting `from` percent into it.
    pub fn scoped(&self, from: f64, share: f64) -> TaskContext {
        let from = from.clamp(0.0, 100.0);
        let share = share.clamp(0.0, 100.0 - from);
        Self {
            item: Arc::clone(&self.item),
            services: Arc::clone(&self.services),
            context: self.context.clone(),
            offset: self.offset + from * self.share / 100.0,
            share: share * self.share / 100.0,
            root: false,
        }
    }

    /// Whether this is the item's root context.
    pub fn is_root(&self) -> bool {
        self.root
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("context", &self.context)
            .field("offset", &self.offset)
            .field("share", &self.share)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PacklinkCore;
    use crate::queue::{Priority, QueueItemStatus};
    use crate::scheduler::ScheduleCheckTask;

    async fn started_context() -> TaskContext {
        let core = PacklinkCore::builder().build().unwrap();
        let services = core.services();
        let mut item = services
            .queue()
            .enqueue("ctx-test", &ScheduleCheckTask::default(), "shop-1", Priority::Normal)
            .await
            .unwrap();
        services.queue().start(&mut item).await.unwrap();
        TaskContext::new(item, services)
    }

    #[tokio::test]
    async fn test_scoped_progress_maps_into_parent_range() {
        let ctx = started_context().await;
        assert_eq!(ctx.context(), "shop-1");

        let second_half = ctx.scoped(50.0, 50.0);
        second_half.report_progress(50.0).await.unwrap();
        assert_eq!(ctx.item().await.progress_base_points, 7500);

        let nested = second_half.scoped(0.0, 20.0);
        nested.report_progress(100.0).await.unwrap();
        // 50% + 20% of the upper half, but progress never goes backwards.
        assert_eq!(ctx.item().await.progress_base_points, 7500);

        ctx.report_progress(150.0).await.unwrap();
        assert_eq!(ctx.item().await.progress_base_points, 10_000);
    }

    #[tokio::test]
    async fn test_checkpoint_only_writes_from_root() {
        let ctx = started_context().await;
        let child = ctx.scoped(0.0, 50.0);
        assert!(!child.is_root());

        child.checkpoint(&ScheduleCheckTask::default()).await.unwrap();
        ctx.checkpoint(&ScheduleCheckTask::default()).await.unwrap();
        ctx.report_alive().await.unwrap();

        let item = ctx.item().await;
        assert_eq!(item.status, QueueItemStatus::InProgress);
        assert!(item.serialized_task.is_object());
    }
}
