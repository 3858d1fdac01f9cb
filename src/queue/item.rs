//! Queue item: the persisted record of one task execution request.

use crate::core::registry::TaskRegistry;
use crate::error::{PacklinkError, PacklinkResult};
use crate::orm::Entity;
use crate::task::{AnyTask, Task};
use crate::utils::base_points_to_percent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Life cycle state of a queue item.
///
/// ```text
/// created -> queued -> in_progress -> completed
///              ^            |  |----> failed
///              |____________|  '----> aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Built but not yet handed to the queue
    Created,
    /// Waiting for the runner
    Queued,
    /// Being executed
    InProgress,
    /// Finished successfully
    Completed,
    /// Gave up after exhausting retries
    Failed,
    /// Stopped on request, never retried
    Aborted,
}

impl QueueItemStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Terminal states.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Whether the life cycle allows moving to `next`.
    pub fn can_transition_to(&self, next: QueueItemStatus) -> bool {
        use QueueItemStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Queued, InProgress)
                | (Queued, Aborted)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Aborted)
                | (InProgress, Queued)
        )
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority. Higher priorities are started first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background housekeeping
    Low,
    /// Default
    #[default]
    Normal,
    /// User-facing work
    High,
}

impl Priority {
    /// Order in which the runner looks for work.
    pub const DISPATCH_ORDER: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// A task execution request and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Storage id
    pub id: Option<i64>,
    /// Life cycle state
    pub status: QueueItemStatus,
    /// Tenant / shop context the task runs for
    pub context: String,
    /// Registered task type name
    pub task_type: String,
    /// Serialized task state
    pub serialized_task: Value,
    /// Items sharing a queue name run one at a time
    pub queue_name: String,
    /// Dispatch priority
    pub priority: Priority,
    /// Current progress, 10000 = done
    pub progress_base_points: u32,
    /// Progress reached when the current execution started
    pub last_execution_progress_base_points: u32,
    /// Number of failed attempts
    pub retries: u32,
    /// One line per failed attempt
    pub failure_description: Option<String>,
    /// When the item was built
    #[serde(with = "chrono::serde::ts_seconds")]
    pub create_timestamp: DateTime<Utc>,
    /// When the item entered the queue
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub queue_timestamp: Option<DateTime<Utc>>,
    /// When the last execution started
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub start_timestamp: Option<DateTime<Utc>>,
    /// When the item completed
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub finish_timestamp: Option<DateTime<Utc>>,
    /// When the item failed or was aborted
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub fail_timestamp: Option<DateTime<Utc>>,
    /// Last status change, progress report or keep-alive
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_update_timestamp: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Build a `created` item for a typed task.
    pub fn for_task<T: Task>(
        queue_name: impl Into<String>,
        task: &T,
        context: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> PacklinkResult<Self> {
        Ok(Self::new(
            queue_name,
            T::TYPE,
            serde_json::to_value(task)?,
            context,
            priority,
            now,
        ))
    }

    /// Build a `created` item from a task type name and payload.
    pub fn new(
        queue_name: impl Into<String>,
        task_type: impl Into<String>,
        serialized_task: Value,
        context: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            status: QueueItemStatus::Created,
            context: context.into(),
            task_type: task_type.into(),
            serialized_task,
            queue_name: queue_name.into(),
            priority,
            progress_base_points: 0,
            last_execution_progress_base_points: 0,
            retries: 0,
            failure_description: None,
            create_timestamp: now,
            queue_timestamp: None,
            start_timestamp: None,
            finish_timestamp: None,
            fail_timestamp: None,
            last_update_timestamp: None,
        }
    }

    /// Progress as a percentage.
    pub fn progress(&self) -> f64 {
        base_points_to_percent(self.progress_base_points)
    }

    /// Rebuild the task from its serialized state.
    pub fn task(&self, registry: &TaskRegistry) -> PacklinkResult<Box<dyn AnyTask>> {
        registry.create(&self.task_type, self.serialized_task.clone())
    }

    /// Store the current state of `task`.
    pub fn set_task(&mut self, task: &dyn AnyTask) -> PacklinkResult<()> {
        self.task_type = task.task_type().to_string();
        self.serialized_task = task.payload()?;
        Ok(())
    }

    /// Append a failed attempt to the failure description.
    pub(crate) fn record_failure(&mut self, reason: &str) {
        let line = format!("Attempt {}: {}", self.retries, reason);
        self.failure_description = Some(match self.failure_description.take() {
            Some(previous) if !previous.is_empty() => format!("{}\n{}", previous, line),
            _ => line,
        });
    }

    /// Move to `next` if the life cycle allows it.
    pub(crate) fn transition(&mut self, next: QueueItemStatus) -> PacklinkResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(PacklinkError::IllegalTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

impl Entity for QueueItem {
    const TYPE: &'static str = "QueueItem";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn indexes() -> &'static [&'static str] {
        &[
            "status",
            "context",
            "task_type",
            "queue_name",
            "priority",
            "create_timestamp",
            "queue_timestamp",
            "last_update_timestamp",
        ]
    }
}
