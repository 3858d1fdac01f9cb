//! Sequential composition of tasks.

use super::{AnyTask, Task, TaskContext};
use crate::core::registry::get_registry;
use crate::error::PacklinkResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a [`CompositeTask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    /// Registered task type
    pub task_type: String,
    /// Serialized task state
    pub payload: Value,
    /// Relative share of the composite's progress
    pub weight: u32,
    /// Whether the step already ran to completion
    pub completed: bool,
}

/// Runs sub-tasks one after another as a single queue item.
///
/// Each sub-task reports progress into its weighted slice of the item's
/// range. The composite checkpoints after every finished step, so a retried
/// item continues with the first step that did not complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeTask {
    tasks: Vec<SubTask>,
}

impl CompositeTask {
    /// Empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step with the given progress weight.
    pub fn with<T: Task>(mut self, task: &T, weight: u32) -> PacklinkResult<Self> {
        self.tasks.push(SubTask {
            task_type: T::TYPE.to_string(),
            payload: serde_json::to_value(task)?,
            weight,
            completed: false,
        });
        Ok(self)
    }

    /// Steps in execution order.
    pub fn tasks(&self) -> &[SubTask] {
        &self.tasks
    }

    fn total_weight(&self) -> u32 {
        self.tasks.iter().map(|t| t.weight).sum()
    }
}

#[async_trait]
impl Task for CompositeTask {
    const TYPE: &'static str = "CompositeTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let total = self.total_weight().max(1) as f64;
        let mut offset = 0.0;

        for index in 0..self.tasks.len() {
            let share = self.tasks[index].weight as f64 * 100.0 / total;
            if self.tasks[index].completed {
                offset += share;
                continue;
            }

            let step = &self.tasks[index];
            let mut task = get_registry().create(&step.task_type, step.payload.clone())?;
            tracing::debug!(
                "Composite step {}/{}: {}",
                index + 1,
                self.tasks.len(),
                step.task_type
            );

            let child = ctx.scoped(offset, share);
            task.run(&child).await?;

            offset += share;
            let step = &mut self.tasks[index];
            step.payload = task.payload()?;
            step.completed = true;

            ctx.report_progress(offset).await?;
            ctx.checkpoint(&*self).await?;
        }

        Ok(())
    }
}
