//! Task that fires due schedules.

use crate::error::{PacklinkError, PacklinkResult};
use crate::task::{Task, TaskContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Enqueues the task of every due schedule and moves each schedule on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleCheckTask {}

#[async_trait]
impl Task for ScheduleCheckTask {
    const TYPE: &'static str = "ScheduleCheckTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let services = ctx.services();
        let scheduler = services.scheduler();
        let now = ctx.now();

        let mut due = scheduler.due(now).await?;
        let total = due.len();
        tracing::debug!("{} schedules due", total);

        for (index, schedule) in due.iter_mut().enumerate() {
            let enqueued = services
                .queue()
                .enqueue_raw(
                    &schedule.queue_name,
                    &schedule.task_type,
                    schedule.payload.clone(),
                    &schedule.context,
                    schedule.priority,
                )
                .await;

            match enqueued {
                Ok(_) => {}
                // Moving on keeps a schedule for an unknown task from firing
                // on every check.
                Err(err @ PacklinkError::TaskNotRegistered { .. }) => {
                    tracing::error!(
                        context = %schedule.context,
                        "Skipping schedule {:?}: {}",
                        schedule.id,
                        err
                    );
                }
                Err(err) => return Err(err),
            }

            scheduler.advance(schedule, now).await?;
            ctx.report_progress((index + 1) as f64 * 100.0 / total as f64)
                .await?;
        }

        if total == 0 {
            ctx.report_progress(100.0).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PacklinkCore;
    use crate::packlink::tasks::TaskCleanupTask;
    use crate::queue::{Priority, QueueItemStatus};
    use crate::scheduler::{Schedule, ScheduleKind};
    use crate::time::TestTimeProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_due_schedules_are_enqueued_and_advanced() {
        let clock = Arc::new(TestTimeProvider::at_timestamp(1_700_000_000));
        let core = PacklinkCore::builder()
            .time_provider(clock.clone())
            .build()
            .unwrap();
        let services = core.services();
        let scheduler = services.scheduler();

        let cleanup = TaskCleanupTask::default();
        scheduler
            .add(
                Schedule::new(
                    "maintenance",
                    &cleanup,
                    "shop-1",
                    ScheduleKind::EveryMinutes { interval: 1 },
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let mut unknown = Schedule::new(
            "maintenance",
            &cleanup,
            "shop-1",
            ScheduleKind::EveryMinutes { interval: 1 },
        )
        .unwrap()
        .once();
        unknown.task_type = "RemovedTask".to_string();
        scheduler.add(unknown).await.unwrap();

        clock.advance(chrono::Duration::minutes(2));

        let mut item = services
            .queue()
            .enqueue("scheduler", &ScheduleCheckTask::default(), "", Priority::Normal)
            .await
            .unwrap();
        services.queue().start(&mut item).await.unwrap();
        let ctx = TaskContext::new(item, services.clone());
        ScheduleCheckTask::default().execute(&ctx).await.unwrap();

        let enqueued = services
            .queue()
            .find_latest_by_type(TaskCleanupTask::TYPE, Some("shop-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enqueued.status, QueueItemStatus::Queued);
        assert_eq!(enqueued.queue_name, "maintenance");

        let remaining = scheduler.list("shop-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].next_schedule.unwrap() > ctx.now());
        assert_eq!(ctx.item().await.progress_base_points, 10_000);
    }
}
