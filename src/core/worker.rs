//! Queue item execution.
//!
//! The [`QueueItemStarter`] marks a queued item as started, runs its task on a
//! spawned tokio task and records how the execution ended.

use crate::core::Services;
use crate::core::registry::{ExecutionOutcome, get_registry};
use crate::error::{PacklinkError, PacklinkResult};
use crate::queue::{QueueItem, QueueItemStatus};
use crate::task::{AnyTask, TaskContext};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Statistics about executions started by this process
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Executions started
    pub started: u64,
    /// Executions that completed
    pub completed: u64,
    /// Executions that failed, including ones put back for a retry
    pub failed: u64,
    /// Executions that were aborted
    pub aborted: u64,
    /// Average execution time
    pub avg_duration: Option<Duration>,
}

/// Starts queue items and tracks their executions.
#[derive(Clone)]
pub struct QueueItemStarter {
    services: Arc<Services>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    in_flight: Arc<AtomicUsize>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl QueueItemStarter {
    /// Create a starter over the shared services.
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            handles: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    /// Start a queued item.
    ///
    /// The item is marked in progress before this returns; the task itself
    /// runs in the background. Returns `false` if the item could not be
    /// started, either because another runner got to it first or because its
    /// task cannot be rebuilt (the item is aborted then).
    pub async fn start(&self, mut item: QueueItem) -> PacklinkResult<bool> {
        let queue = self.services.queue();

        let task = match item.task(get_registry()) {
            Ok(task) => task,
            Err(err) => {
                let reason = format!("Task {} cannot be rebuilt: {}", item.task_type, err);
                tracing::error!(item_id = ?item.id, "{}", reason);
                queue.abort(&mut item, &reason).await?;
                return Ok(false);
            }
        };

        match queue.start(&mut item).await {
            Ok(()) => {}
            Err(PacklinkError::QueueItemSave { message }) => {
                tracing::debug!(item_id = ?item.id, "Item already taken: {}", message);
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        tracing::debug!(
            item_id = ?item.id,
            task_type = %item.task_type,
            context = %item.context,
            "Starting queue item"
        );

        self.stats.lock().await.started += 1;
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        let starter = self.clone();
        let handle = tokio::spawn(async move {
            starter.execute(item, task).await;
            starter.in_flight.fetch_sub(1, Ordering::AcqRel);
            starter.services.queue().wakeup_signal().notify_one();
        });

        let mut handles = self.handles.lock().await;
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
        Ok(true)
    }

    /// Run one execution and record its result
    async fn execute(&self, item: QueueItem, task: Box<dyn AnyTask>) {
        let services = Arc::clone(&self.services);
        let task_type = item.task_type.clone();
        let ctx = TaskContext::new(item, Arc::clone(&services));
        let started_at = Instant::now();

        // A panicking task must not take the bookkeeping below with it.
        let run_ctx = ctx.clone();
        let joined = tokio::spawn(async move {
            let mut task = task;
            let result = task.run(&run_ctx).await;
            (task, result)
        })
        .await;

        let (task, result) = match joined {
            Ok((task, result)) => (Some(task), result),
            Err(join_error) => (
                None,
                Err(PacklinkError::task_failed(format!(
                    "Task panicked: {}",
                    join_error
                ))),
            ),
        };
        let duration = started_at.elapsed();

        let shared = ctx.shared_item();
        let mut item = shared.lock().await;
        let task = match task {
            Some(task) => Some(task),
            None => item.task(get_registry()).ok(),
        };

        let outcome = match result {
            Ok(()) => {
                if let Err(err) = services.queue().finish(&mut item).await {
                    tracing::warn!(item_id = ?item.id, "Could not complete queue item: {}", err);
                }
                ExecutionOutcome::Completed
            }
            Err(PacklinkError::TaskAborted { reason }) => {
                match services.queue().abort(&mut item, &reason).await {
                    Ok(()) => {
                        if let Some(task) = &task {
                            if let Err(err) = task.notify_aborted(&services, &item).await {
                                tracing::error!(item_id = ?item.id, "Abort hook failed: {}", err);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(item_id = ?item.id, "Could not abort queue item: {}", err);
                    }
                }
                ExecutionOutcome::Aborted
            }
            Err(err) => {
                match services.queue().fail(&mut item, &err.to_string()).await {
                    Ok(()) if item.status == QueueItemStatus::Failed => {
                        if let Some(task) = &task {
                            if let Err(err) = task.notify_failed(&services, &item).await {
                                tracing::error!(item_id = ?item.id, "Failure hook failed: {}", err);
                            }
                        }
                    }
                    Ok(()) => {}
                    Err(err) => {
                        tracing::warn!(item_id = ?item.id, "Could not fail queue item: {}", err);
                    }
                }
                ExecutionOutcome::Failed
            }
        };
        drop(item);

        get_registry().record_execution(&task_type, outcome, duration, services.now());
        self.update_stats(outcome, duration).await;

        tracing::debug!(task_type = %task_type, ?outcome, "Execution finished in {:?}", duration);
    }

    /// Update execution statistics
    async fn update_stats(&self, outcome: ExecutionOutcome, duration: Duration) {
        let mut stats = self.stats.lock().await;

        match outcome {
            ExecutionOutcome::Completed => stats.completed += 1,
            ExecutionOutcome::Failed => stats.failed += 1,
            ExecutionOutcome::Aborted => stats.aborted += 1,
        }

        // Simple moving average
        stats.avg_duration = Some(match stats.avg_duration {
            Some(avg) => (avg + duration) / 2,
            None => duration,
        });
    }

    /// Current execution statistics.
    pub async fn stats(&self) -> WorkerStats {
        self.stats.lock().await.clone()
    }

    /// Number of executions still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait for every execution started so far.
    ///
    /// Fails with [`PacklinkError::Timeout`] if they do not all end within
    /// `timeout_duration`; the remaining executions keep running.
    pub async fn wait_for_executions(&self, timeout_duration: Duration) -> PacklinkResult<()> {
        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };

        if handles.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            "Waiting for {} executions with timeout {:?}",
            handles.len(),
            timeout_duration
        );

        match timeout(timeout_duration, join_all(handles)).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(Result::err) {
                    tracing::error!("Execution handle error: {}", result);
                }
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    "{} executions still running after {:?}",
                    self.in_flight(),
                    timeout_duration
                );
                Err(PacklinkError::Timeout {
                    timeout_secs: timeout_duration.as_secs(),
                })
            }
        }
    }
}

impl std::fmt::Debug for QueueItemStarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItemStarter")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, QueueConfig};
    use crate::core::PacklinkCore;
    use crate::queue::Priority;
    use crate::task::Task;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct CountingTask {
        fail: bool,
        abort: bool,
    }

    #[async_trait]
    impl Task for CountingTask {
        const TYPE: &'static str = "WorkerCountingTask";

        async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
            ctx.report_progress(40.0).await?;
            if self.abort {
                return Err(PacklinkError::abort("not wanted"));
            }
            if self.fail {
                return Err(PacklinkError::task_failed("boom"));
            }
            Ok(())
        }
    }

    static HOOK_CALLS: StdMutex<Vec<(String, &'static str)>> = StdMutex::new(Vec::new());

    fn hook_calls(id: &str) -> Vec<&'static str> {
        HOOK_CALLS
            .lock()
            .unwrap()
            .iter()
            .filter(|(task_id, _)| task_id == id)
            .map(|(_, hook)| *hook)
            .collect()
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct HookTask {
        id: String,
        abort: bool,
    }

    #[async_trait]
    impl Task for HookTask {
        const TYPE: &'static str = "WorkerHookTask";

        async fn execute(&mut self, _ctx: &TaskContext) -> PacklinkResult<()> {
            if self.abort {
                Err(PacklinkError::abort("order was cancelled"))
            } else {
                Err(PacklinkError::task_failed("carrier unavailable"))
            }
        }

        async fn on_fail(&self, _services: &Services, _item: &QueueItem) -> PacklinkResult<()> {
            HOOK_CALLS.lock().unwrap().push((self.id.clone(), "on_fail"));
            Ok(())
        }

        async fn on_abort(&self, _services: &Services, _item: &QueueItem) -> PacklinkResult<()> {
            HOOK_CALLS.lock().unwrap().push((self.id.clone(), "on_abort"));
            Ok(())
        }
    }

    async fn run_hook_task(task: HookTask, max_retries: u32) -> QueueItem {
        get_registry().register::<HookTask>();
        let config = CoreConfig {
            queue: QueueConfig::default().with_max_retries(max_retries),
            ..CoreConfig::testing()
        };
        let core = PacklinkCore::builder().config(config).build().unwrap();
        let services = core.services();
        let item = services
            .queue()
            .enqueue("worker-hooks", &task, "shop-1", Priority::Normal)
            .await
            .unwrap();
        let id = item.id.unwrap();

        let starter = QueueItemStarter::new(Arc::clone(&services));
        assert!(starter.start(item).await.unwrap());
        starter
            .wait_for_executions(Duration::from_secs(5))
            .await
            .unwrap();
        services.queue().find(id).await.unwrap().unwrap()
    }

    async fn run(task: CountingTask) -> (QueueItem, WorkerStats) {
        get_registry().register::<CountingTask>();
        let core = PacklinkCore::builder().build().unwrap();
        let services = core.services();
        let item = services
            .queue()
            .enqueue("worker-test", &task, "shop-1", Priority::Normal)
            .await
            .unwrap();
        let id = item.id.unwrap();

        let starter = QueueItemStarter::new(Arc::clone(&services));
        assert!(starter.start(item).await.unwrap());

        starter
            .wait_for_executions(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(starter.in_flight(), 0);

        let item = services.queue().find(id).await.unwrap().unwrap();
        (item, starter.stats().await)
    }

    #[tokio::test]
    async fn test_successful_execution_completes_item() {
        let (item, stats) = run(CountingTask::default()).await;
        assert_eq!(item.status, QueueItemStatus::Completed);
        assert_eq!(item.progress_base_points, 10_000);
        assert_eq!(stats.started, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_failed_execution_is_requeued() {
        let (item, stats) = run(CountingTask {
            fail: true,
            abort: false,
        })
        .await;
        assert_eq!(item.status, QueueItemStatus::Queued);
        assert_eq!(item.retries, 1);
        assert_eq!(item.progress_base_points, 4000);
        assert!(item.failure_description.unwrap().contains("boom"));
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_aborted_execution_is_not_retried() {
        let (item, stats) = run(CountingTask {
            fail: false,
            abort: true,
        })
        .await;
        assert_eq!(item.status, QueueItemStatus::Aborted);
        assert_eq!(item.retries, 0);
        assert_eq!(stats.aborted, 1);
    }

    #[tokio::test]
    async fn test_unknown_task_type_is_aborted() {
        get_registry().register::<CountingTask>();
        let core = PacklinkCore::builder().build().unwrap();
        let services = core.services();
        let mut item = services
            .queue()
            .enqueue("worker-test", &CountingTask::default(), "shop-1", Priority::Normal)
            .await
            .unwrap();
        item.task_type = "NoSuchTask".to_string();

        let starter = QueueItemStarter::new(Arc::clone(&services));
        assert!(!starter.start(item.clone()).await.unwrap());
        let stored = services.queue().find(item.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Aborted);
        assert_eq!(starter.stats().await.started, 0);
    }

    #[tokio::test]
    async fn test_on_fail_runs_once_retries_are_exhausted() {
        let item = run_hook_task(
            HookTask {
                id: "exhausted".to_string(),
                abort: false,
            },
            0,
        )
        .await;
        assert_eq!(item.status, QueueItemStatus::Failed);
        assert_eq!(hook_calls("exhausted"), vec!["on_fail"]);
    }

    #[tokio::test]
    async fn test_on_fail_waits_while_retries_remain() {
        let item = run_hook_task(
            HookTask {
                id: "retrying".to_string(),
                abort: false,
            },
            5,
        )
        .await;
        assert_eq!(item.status, QueueItemStatus::Queued);
        assert!(hook_calls("retrying").is_empty());
    }

    #[tokio::test]
    async fn test_on_abort_runs_on_abort() {
        let item = run_hook_task(
            HookTask {
                id: "aborted".to_string(),
                abort: true,
            },
            0,
        )
        .await;
        assert_eq!(item.status, QueueItemStatus::Aborted);
        assert_eq!(hook_calls("aborted"), vec!["on_abort"]);
    }
}
