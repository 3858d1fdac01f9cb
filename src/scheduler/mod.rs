//! Recurring task scheduling.
//!
//! Schedules are stored rows that say which task to enqueue and when. On
//! every runner tick the [`ScheduleTickHandler`] makes sure a
//! [`ScheduleCheckTask`] is on the scheduler queue; that task enqueues every
//! due schedule's task and moves the schedule to its next run.

use crate::error::PacklinkResult;
use crate::orm::{Direction, Operator, QueryFilter, Repository};
use crate::time::TimeProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod check;
pub mod schedule;
pub mod tick;

pub use check::ScheduleCheckTask;
pub use schedule::{Schedule, ScheduleKind};
pub use tick::ScheduleTickHandler;

/// Stores and looks up schedules.
#[derive(Clone)]
pub struct Scheduler {
    repository: Arc<dyn Repository<Schedule>>,
    time: Arc<dyn TimeProvider>,
}

impl Scheduler {
    /// Scheduler over `repository`.
    pub fn new(repository: Arc<dyn Repository<Schedule>>, time: Arc<dyn TimeProvider>) -> Self {
        Self { repository, time }
    }

    /// Store a schedule with its first run computed from now.
    pub async fn add(&self, mut schedule: Schedule) -> PacklinkResult<Schedule> {
        let now = self.time.now();
        schedule.next_schedule = Some(schedule.kind.next_after(now)?);
        self.repository.save(&mut schedule).await?;

        tracing::info!(
            context = %schedule.context,
            "Scheduled {} ({:?}), first run at {:?}",
            schedule.task_type,
            schedule.kind,
            schedule.next_schedule
        );
        Ok(schedule)
    }

    /// Schedules whose next run is at or before `now`, earliest first.
    pub async fn due(&self, now: DateTime<Utc>) -> PacklinkResult<Vec<Schedule>> {
        self.repository
            .select(
                &QueryFilter::new()
                    .and_where("next_schedule", Operator::LessOrEqual, now.timestamp())
                    .order_by("next_schedule", Direction::Asc),
            )
            .await
    }

    /// Record that `schedule` fired at `now`: recurring schedules move to
    /// their next run, one-shot schedules are deleted.
    pub async fn advance(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> PacklinkResult<()> {
        if !schedule.recurring {
            self.repository.delete(schedule).await?;
            return Ok(());
        }

        schedule.next_schedule = Some(schedule.kind.next_after(now)?);
        schedule.last_update = Some(now);
        self.repository.update(schedule).await?;
        Ok(())
    }

    /// Schedules of one context.
    pub async fn list(&self, context: &str) -> PacklinkResult<Vec<Schedule>> {
        self.repository
            .select(
                &QueryFilter::new()
                    .eq("context", context)
                    .order_by("next_schedule", Direction::Asc),
            )
            .await
    }

    /// Delete the schedules of a task type in one context.
    pub async fn remove_for_task_type(&self, task_type: &str, context: &str) -> PacklinkResult<u64> {
        self.repository
            .delete_where(&QueryFilter::new().eq("task_type", task_type).eq("context", context))
            .await
    }

    /// Delete every schedule of a context.
    pub async fn remove_for_context(&self, context: &str) -> PacklinkResult<u64> {
        self.repository
            .delete_where(&QueryFilter::new().eq("context", context))
            .await
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}
