//! The task runner - picks up queued work, watches running items and drives
//! the scheduler.
//!
//! On every tick the runner:
//! - claims (or refreshes) the runner status so only one runner works a storage
//! - fails or requeues running items that stopped reporting
//! - lets the [`ScheduleTickHandler`] enqueue a schedule check
//! - starts the oldest queued items, high priority first, up to the free slots
//!
//! Between ticks it sleeps until woken by new work, by the end of an
//! execution or by the wakeup delay.

use crate::core::Services;
use crate::core::registry::get_registry;
use crate::core::worker::{QueueItemStarter, WorkerStats};
use crate::error::{PacklinkError, PacklinkResult};
use crate::queue::{Priority, QueueItem, QueueItemStatus};
use crate::scheduler::ScheduleTickHandler;
use crate::settings::SYSTEM_CONTEXT;
use crate::task::AnyTask;
use crate::utils::calculate_backoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Which runner currently owns the queue, stored in the system settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunnerStatus {
    /// Identifier of the owning runner
    pub guid: String,
    /// When the owner last confirmed it is alive
    #[serde(with = "chrono::serde::ts_seconds")]
    pub alive_since: DateTime<Utc>,
}

impl TaskRunnerStatus {
    /// Status owned by `guid`, alive at `alive_since`.
    pub fn new(guid: impl Into<String>, alive_since: DateTime<Utc>) -> Self {
        Self {
            guid: guid.into(),
            alive_since,
        }
    }

    /// Whether the owner has not confirmed it is alive for longer than
    /// `max_alive_time`.
    pub fn is_expired(&self, now: DateTime<Utc>, max_alive_time: chrono::Duration) -> bool {
        self.alive_since
            .checked_add_signed(max_alive_time)
            .is_some_and(|deadline| deadline < now)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Another live runner owns the queue; nothing else was done
    pub standby: bool,
    /// Running items found inactive
    pub expired: usize,
    /// Items started
    pub started: usize,
}

/// Queue runner.
#[derive(Clone)]
pub struct TaskRunner {
    services: Arc<Services>,
    starter: QueueItemStarter,
    guid: String,
    backoff_seed: u64,
    is_running: Arc<AtomicBool>,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TaskRunner {
    /// Create a runner with a fresh identifier.
    pub fn new(services: Arc<Services>) -> Self {
        let id = uuid::Uuid::new_v4();
        Self {
            starter: QueueItemStarter::new(Arc::clone(&services)),
            services,
            guid: id.to_string(),
            backoff_seed: id.as_u128() as u64,
            is_running: Arc::new(AtomicBool::new(false)),
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Identifier stored in the runner status.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Executions of this runner still in progress.
    pub fn in_flight(&self) -> usize {
        self.starter.in_flight()
    }

    /// Execution statistics of this runner.
    pub async fn worker_stats(&self) -> WorkerStats {
        self.starter.stats().await
    }

    /// Start the background loop.
    pub async fn start(&self) -> PacklinkResult<()> {
        if self.is_running.swap(true, Ordering::AcqRel) {
            return Err(PacklinkError::AlreadyRunning);
        }

        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.run_loop().await });
        *self.loop_handle.lock().await = Some(handle);

        tracing::info!(
            runner = %self.guid,
            "Task runner started with {} slots",
            self.services.config().runner.max_started_tasks
        );
        Ok(())
    }

    /// Nudge the loop to tick now.
    pub fn wakeup(&self) {
        self.services.queue().wakeup_signal().notify_one();
    }

    /// Stop the loop, wait for running executions and release the runner
    /// status.
    pub async fn shutdown(&self) -> PacklinkResult<()> {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return Err(PacklinkError::NotRunning);
        }

        tracing::info!(runner = %self.guid, "Shutting down task runner...");
        // The loop re-checks the running flag whenever it wakes up.
        self.wakeup();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(err) = handle.await {
                tracing::error!("Runner loop ended abnormally: {}", err);
            }
        }

        let timeout = self.services.config().runner.shutdown_timeout();
        let drained = self.starter.wait_for_executions(timeout).await;
        self.release_status().await?;

        tracing::info!(runner = %self.guid, "Task runner stopped");
        drained
    }

    /// Wait for the executions started so far.
    pub async fn wait_for_executions(&self, timeout: Duration) -> PacklinkResult<()> {
        self.starter.wait_for_executions(timeout).await
    }

    /// Pause after `failures` consecutive failed ticks.
    fn backoff_after(&self, failures: u32) -> Duration {
        Duration::from_millis(calculate_backoff(failures, self.backoff_seed))
    }

    async fn run_loop(self) {
        let wakeup = self.services.queue().wakeup_signal();
        let delay = self.services.config().runner.wakeup_delay();
        let mut failures = 0u32;

        while self.is_running() {
            match self.tick().await {
                Ok(outcome) => {
                    failures = 0;
                    if outcome.standby {
                        tracing::trace!(runner = %self.guid, "Another runner is active");
                    } else if outcome.started > 0 || outcome.expired > 0 {
                        tracing::debug!(
                            runner = %self.guid,
                            "Tick started {} items, {} expired",
                            outcome.started,
                            outcome.expired
                        );
                    }
                }
                Err(err) => {
                    failures += 1;
                    let backoff = self.backoff_after(failures);
                    tracing::error!(
                        runner = %self.guid,
                        "Runner tick failed: {}; backing off {:?}",
                        err,
                        backoff
                    );
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = wakeup.notified() => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = wakeup.notified() => {}
                _ = sleep(delay) => {}
            }
        }

        tracing::debug!(runner = %self.guid, "Runner loop exited");
    }

    /// Run one tick.
    pub async fn tick(&self) -> PacklinkResult<TickOutcome> {
        if !self.claim_status().await? {
            return Ok(TickOutcome {
                standby: true,
                ..TickOutcome::default()
            });
        }

        let expired = self.expire_running_items().await?;

        if let Err(err) = ScheduleTickHandler.handle(&self.services).await {
            tracing::error!("Schedule tick failed: {}", err);
        }

        let started = self.start_queued_items().await?;
        Ok(TickOutcome {
            standby: false,
            expired,
            started,
        })
    }

    /// Take or refresh the runner status; `false` if a live runner owns it.
    async fn claim_status(&self) -> PacklinkResult<bool> {
        let settings = self.services.settings(SYSTEM_CONTEXT);
        let now = self.services.now();
        let max_alive = self.services.config().runner.max_alive_time();

        if let Some(status) = settings.task_runner_status().await? {
            if status.guid != self.guid {
                if !status.is_expired(now, max_alive) {
                    return Ok(false);
                }
                tracing::warn!(
                    runner = %self.guid,
                    "Taking over from expired runner {}",
                    status.guid
                );
            }
        }

        settings
            .set_task_runner_status(Some(&TaskRunnerStatus::new(self.guid.as_str(), now)))
            .await?;
        Ok(true)
    }

    async fn release_status(&self) -> PacklinkResult<()> {
        let settings = self.services.settings(SYSTEM_CONTEXT);
        if settings
            .task_runner_status()
            .await?
            .is_some_and(|status| status.guid == self.guid)
        {
            settings.set_task_runner_status(None).await?;
        }
        Ok(())
    }

    /// Handle running items that exceeded their inactivity period.
    ///
    /// Items that made progress since their execution started go back to the
    /// queue untouched; the others are reconfigured when the task supports it
    /// and counted as a failed attempt.
    async fn expire_running_items(&self) -> PacklinkResult<usize> {
        let now = self.services.now();
        let default_limit = self.services.config().runner.max_task_inactivity();
        let mut expired = 0;

        for mut item in self.services.queue().find_running_items().await? {
            let mut task = item.task(get_registry()).ok();
            let limit = task
                .as_ref()
                .and_then(|task| task.inactivity_limit())
                .unwrap_or(default_limit);
            let Some(last_seen) = item.last_update_timestamp.or(item.start_timestamp) else {
                continue;
            };
            if last_seen + chrono::Duration::seconds(limit.as_secs() as i64) > now {
                continue;
            }
            expired += 1;

            let result = if item.progress_base_points > item.last_execution_progress_base_points {
                tracing::info!(
                    item_id = ?item.id,
                    task_type = %item.task_type,
                    "Requeueing inactive item that made progress"
                );
                self.services.queue().requeue(&mut item).await
            } else {
                self.fail_expired(&mut item, task.as_mut()).await
            };

            match result {
                Ok(()) => {}
                Err(PacklinkError::QueueItemSave { message }) => {
                    tracing::debug!(item_id = ?item.id, "Expired item changed meanwhile: {}", message);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(expired)
    }

    async fn fail_expired(
        &self,
        item: &mut QueueItem,
        task: Option<&mut Box<dyn AnyTask>>,
    ) -> PacklinkResult<()> {
        let reason = format!(
            "Task {} failed due to extended inactivity period.",
            item.task_type
        );

        let Some(task) = task else {
            return self.services.queue().fail(item, &reason).await;
        };

        if task.supports_reconfiguration() {
            task.apply_reconfiguration();
            item.set_task(&**task)?;
            tracing::info!(item_id = ?item.id, "Reconfigured {} after inactivity", item.task_type);
        }

        self.services.queue().fail(item, &reason).await?;
        if item.status == QueueItemStatus::Failed {
            if let Err(err) = task.notify_failed(&self.services, item).await {
                tracing::error!(item_id = ?item.id, "Failure hook failed: {}", err);
            }
        }
        Ok(())
    }

    async fn start_queued_items(&self) -> PacklinkResult<usize> {
        let queue = self.services.queue();
        let running = queue.find_running_items().await?.len();
        let mut free = self
            .services
            .config()
            .runner
            .max_started_tasks
            .saturating_sub(running);
        let mut started = 0;

        for priority in Priority::DISPATCH_ORDER {
            if free == 0 {
                break;
            }
            for item in queue.find_oldest_queued_items(priority, free).await? {
                if self.starter.start(item).await? {
                    started += 1;
                    free -= 1;
                }
            }
        }

        Ok(started)
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("guid", &self.guid)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}
