//! Task definition and execution traits.
//!
//! A task is a serializable unit of work. It is stored on a [`QueueItem`] as
//! its type name plus its serialized state, rebuilt through the
//! [`TaskRegistry`](crate::core::registry::TaskRegistry) when the runner picks
//! it up, and executed with a [`TaskContext`].
//!
//! Implement [`Task`] for your own types; the runner only ever sees them as
//! [`AnyTask`] trait objects.

use crate::core::Services;
use crate::error::PacklinkResult;
use crate::queue::QueueItem;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub mod composite;
pub mod context;

pub use composite::CompositeTask;
pub use context::TaskContext;

/// Trait that all queued tasks implement.
///
/// Returning [`PacklinkError::TaskAborted`](crate::error::PacklinkError::TaskAborted)
/// from [`execute`](Task::execute) stops the item without retrying it; any
/// other error counts as a failed attempt.
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name stored with the queue item.
    const TYPE: &'static str;

    /// Run the task.
    ///
    /// The task may be executed again after a failure or a requeue, starting
    /// from the state last stored with [`TaskContext::checkpoint`].
    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()>;

    /// How long the task may go without reporting progress or being kept
    /// alive before the runner considers it stuck. `None` uses the runner
    /// default.
    fn max_inactivity(&self) -> Option<Duration> {
        None
    }

    /// Whether [`reconfigure`](Task::reconfigure) should be called after the
    /// task expired without making progress.
    fn can_be_reconfigured(&self) -> bool {
        false
    }

    /// Adjust the task before its next attempt, typically to do less work per
    /// execution.
    fn reconfigure(&mut self) {}

    /// Called once the item has permanently failed.
    async fn on_fail(&self, _services: &Services, _item: &QueueItem) -> PacklinkResult<()> {
        Ok(())
    }

    /// Called once the item has been aborted.
    async fn on_abort(&self, _services: &Services, _item: &QueueItem) -> PacklinkResult<()> {
        Ok(())
    }
}

/// Object-safe view of a [`Task`], implemented for every task type.
#[async_trait]
pub trait AnyTask: Send + Sync {
    /// Registered type name
    fn task_type(&self) -> &'static str;

    /// Serialized task state
    fn payload(&self) -> PacklinkResult<Value>;

    /// Execute the task
    async fn run(&mut self, ctx: &TaskContext) -> PacklinkResult<()>;

    /// See [`Task::max_inactivity`]
    fn inactivity_limit(&self) -> Option<Duration>;

    /// See [`Task::can_be_reconfigured`]
    fn supports_reconfiguration(&self) -> bool;

    /// See [`Task::reconfigure`]
    fn apply_reconfiguration(&mut self);

    /// See [`Task::on_fail`]
    async fn notify_failed(&self, services: &Services, item: &QueueItem) -> PacklinkResult<()>;

    /// See [`Task::on_abort`]
    async fn notify_aborted(&self, services: &Services, item: &QueueItem) -> PacklinkResult<()>;
}

#[async_trait]
impl<T: Task> AnyTask for T {
    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    fn payload(&self) -> PacklinkResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    async fn run(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        Task::execute(self, ctx).await
    }

    fn inactivity_limit(&self) -> Option<Duration> {
        Task::max_inactivity(self)
    }

    fn supports_reconfiguration(&self) -> bool {
        Task::can_be_reconfigured(self)
    }

    fn apply_reconfiguration(&mut self) {
        Task::reconfigure(self)
    }

    async fn notify_failed(&self, services: &Services, item: &QueueItem) -> PacklinkResult<()> {
        Task::on_fail(self, services, item).await
    }

    async fn notify_aborted(&self, services: &Services, item: &QueueItem) -> PacklinkResult<()> {
        Task::on_abort(self, services, item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct BatchTask {
        batch_size: usize,
    }

    #[async_trait]
    impl Task for BatchTask {
        const TYPE: &'static str = "BatchTask";

        async fn execute(&mut self, _ctx: &TaskContext) -> PacklinkResult<()> {
            Ok(())
        }

        fn max_inactivity(&self) -> Option<Duration> {
            Some(Duration::from_secs(30))
        }

        fn can_be_reconfigured(&self) -> bool {
            self.batch_size > 1
        }

        fn reconfigure(&mut self) {
            self.batch_size /= 2;
        }
    }

    #[test]
    fn test_erased_task_forwards_to_typed_task() {
        let mut task: Box<dyn AnyTask> = Box::new(BatchTask { batch_size: 100 });

        assert_eq!(task.task_type(), "BatchTask");
        assert_eq!(task.inactivity_limit(), Some(Duration::from_secs(30)));
        assert!(task.supports_reconfiguration());

        task.apply_reconfiguration();
        assert_eq!(task.payload().unwrap()["batch_size"], 50);
    }
}
