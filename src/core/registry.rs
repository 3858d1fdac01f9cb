//! Task registry.
//!
//! Queue items store a task as its type name plus serialized state. The
//! registry maps each type name back to a factory that rebuilds the task, so
//! the runner can execute items without knowing their concrete types.
//!
//! The crate's own tasks are registered when the registry is first used.
//! Hosts register theirs before enqueueing:
//!
//! ```rust,ignore
//! use packlink_core::prelude::*;
//!
//! get_registry().register::<SyncProductsTask>();
//! // or several at once
//! register_tasks!(SyncProductsTask, ExportOrdersTask);
//! ```

use crate::error::{PacklinkError, PacklinkResult};
use crate::packlink::tasks::{
    GetDefaultParcelAndWarehouseTask, SendDraftTask, TaskCleanupTask, UpdateShipmentDataTask,
    UpdateShippingServicesTask,
};
use crate::scheduler::ScheduleCheckTask;
use crate::task::{AnyTask, CompositeTask, Task};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};
use std::time::Duration;

type TaskFactory = fn(Value) -> PacklinkResult<Box<dyn AnyTask>>;

fn build<T: Task>(payload: Value) -> PacklinkResult<Box<dyn AnyTask>> {
    let task: T = serde_json::from_value(payload)?;
    Ok(Box::new(task))
}

/// How an execution ended, for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Task returned `Ok`
    Completed,
    /// Task returned an error or panicked
    Failed,
    /// Task asked to be aborted
    Aborted,
}

/// Statistics for a registered task type.
#[derive(Debug, Clone, Default)]
pub struct TaskTypeStats {
    /// Total number of executions
    pub total_executed: u64,
    /// Executions that completed
    pub successful: u64,
    /// Executions that failed
    pub failed: u64,
    /// Executions that were aborted
    pub aborted: u64,
    /// Running average of execution time
    pub avg_duration: Option<Duration>,
    /// When the last execution finished
    pub last_executed: Option<DateTime<Utc>>,
}

/// Global registry for all task types.
pub struct TaskRegistry {
    factories: RwLock<HashMap<&'static str, TaskFactory>>,
    stats: RwLock<HashMap<String, TaskTypeStats>>,
}

impl TaskRegistry {
    fn new() -> Self {
        tracing::debug!("Creating new task registry");
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        };

        registry.register::<CompositeTask>();
        registry.register::<ScheduleCheckTask>();
        registry.register::<GetDefaultParcelAndWarehouseTask>();
        registry.register::<UpdateShippingServicesTask>();
        registry.register::<SendDraftTask>();
        registry.register::<UpdateShipmentDataTask>();
        registry.register::<TaskCleanupTask>();
        registry
    }

    /// Register a task type. Registering the same type again is a no-op.
    pub fn register<T: Task>(&self) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if factories.insert(T::TYPE, build::<T> as TaskFactory).is_none() {
            tracing::debug!("Registered task type: {}", T::TYPE);
        }
    }

    /// Whether `task_type` can be rebuilt.
    pub fn is_registered(&self, task_type: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_type)
    }

    /// Rebuild a task from its type name and serialized state.
    pub fn create(&self, task_type: &str, payload: Value) -> PacklinkResult<Box<dyn AnyTask>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .copied()
            .ok_or_else(|| PacklinkError::TaskNotRegistered {
                task_type: task_type.to_string(),
            })?;
        factory(payload)
    }

    /// All registered task type names, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        types.sort_unstable();
        types
    }

    /// Record one execution of `task_type`.
    pub fn record_execution(
        &self,
        task_type: &str,
        outcome: ExecutionOutcome,
        duration: Duration,
        finished_at: DateTime<Utc>,
    ) {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        let task_stats = stats.entry(task_type.to_string()).or_default();

        task_stats.total_executed += 1;
        match outcome {
            ExecutionOutcome::Completed => task_stats.successful += 1,
            ExecutionOutcome::Failed => task_stats.failed += 1,
            ExecutionOutcome::Aborted => task_stats.aborted += 1,
        }
        task_stats.last_executed = Some(finished_at);

        task_stats.avg_duration = Some(match task_stats.avg_duration {
            Some(avg) => (avg + duration) / 2,
            None => duration,
        });
    }

    /// Statistics for one task type.
    pub fn stats(&self, task_type: &str) -> Option<TaskTypeStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    /// Statistics for every task type that has run.
    pub fn all_stats(&self) -> HashMap<String, TaskTypeStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}

static TASK_REGISTRY: OnceLock<TaskRegistry> = OnceLock::new();

/// Get the global task registry instance.
pub fn get_registry() -> &'static TaskRegistry {
    TASK_REGISTRY.get_or_init(|| {
        tracing::debug!("Initializing global task registry");
        TaskRegistry::new()
    })
}

/// Register several task types with the global registry.
#[macro_export]
macro_rules! register_tasks {
    ($($task:ty),+ $(,)?) => {
        $( $crate::core::registry::get_registry().register::<$task>(); )+
    };
}
