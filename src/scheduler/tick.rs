//! Runner tick hook that keeps the schedule check going.

use super::ScheduleCheckTask;
use crate::core::Services;
use crate::error::PacklinkResult;
use crate::queue::{Priority, QueueItemStatus};
use crate::settings::SYSTEM_CONTEXT;
use crate::task::Task;
use chrono::Duration;

/// Enqueues a [`ScheduleCheckTask`] on runner ticks.
///
/// Nothing is enqueued while a check is queued or running, or when the last
/// one was queued less than the configured threshold ago.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleTickHandler;

impl ScheduleTickHandler {
    /// Handle one runner tick. Returns whether a check was enqueued.
    pub async fn handle(&self, services: &Services) -> PacklinkResult<bool> {
        let config = &services.config().scheduler;
        if !config.enabled {
            return Ok(false);
        }

        let now = services.now();
        let threshold = Duration::seconds(config.check_threshold_secs as i64);

        if let Some(latest) = services
            .queue()
            .find_latest_by_type(ScheduleCheckTask::TYPE, Some(SYSTEM_CONTEXT))
            .await?
        {
            if matches!(
                latest.status,
                QueueItemStatus::Queued | QueueItemStatus::InProgress
            ) {
                return Ok(false);
            }
            if latest.queue_timestamp.is_some_and(|at| at + threshold > now) {
                return Ok(false);
            }
        }

        services
            .queue()
            .enqueue(
                &config.queue_name,
                &ScheduleCheckTask::default(),
                SYSTEM_CONTEXT,
                Priority::High,
            )
            .await?;
        tracing::trace!("Enqueued schedule check");
        Ok(true)
    }
}
