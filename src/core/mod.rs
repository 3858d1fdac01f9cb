//! Core wiring: shared services, the task runner and the [`PacklinkCore`]
//! entry point.
//!
//! [`Services`] bundles configuration, the clock, storage and the host's
//! collaborators. Tasks reach it through their
//! [`TaskContext`](crate::task::TaskContext); domain services are built from
//! it per shop context.

use crate::config::CoreConfig;
use crate::error::{PacklinkError, PacklinkResult};
use crate::orm::{MemoryRepository, Repository};
use crate::packlink::{
    OrderSendDraftTaskMap, OrderShipmentDetails, OrderShipmentDetailsService, Proxy,
    ShipmentDraftService, ShippingMethod, ShippingMethodService, ShopOrderService,
    UserAccountService, WebhookHandler,
};
use crate::queue::memory::InMemoryQueueStorage;
use crate::queue::{Priority, QueueItem, QueueItemRepository, QueueService, QueueStats};
use crate::scheduler::{Schedule, Scheduler};
use crate::settings::{ConfigEntry, SYSTEM_CONTEXT, Settings};
use crate::task::Task;
use crate::time::{SystemTimeProvider, TimeProvider};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod engine;
pub mod registry;
pub mod worker;

pub use engine::{TaskRunner, TaskRunnerStatus, TickOutcome};
pub use registry::{ExecutionOutcome, TaskRegistry, TaskTypeStats, get_registry};
pub use worker::{QueueItemStarter, WorkerStats};

/// Everything tasks and domain services share.
pub struct Services {
    config: CoreConfig,
    time: Arc<dyn TimeProvider>,
    queue: QueueService,
    config_entries: Arc<dyn Repository<ConfigEntry>>,
    schedules: Arc<dyn Repository<Schedule>>,
    shipping_methods: Arc<dyn Repository<ShippingMethod>>,
    shipment_details: Arc<dyn Repository<OrderShipmentDetails>>,
    draft_tasks: Arc<dyn Repository<OrderSendDraftTaskMap>>,
    proxy: Option<Arc<dyn Proxy>>,
    shop_orders: Option<Arc<dyn ShopOrderService>>,
}

impl Services {
    /// Active configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Clock.
    pub fn time(&self) -> &Arc<dyn TimeProvider> {
        &self.time
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Task queue.
    pub fn queue(&self) -> &QueueService {
        &self.queue
    }

    /// Settings of a shop context.
    pub fn settings(&self, context: &str) -> Settings {
        Settings::new(Arc::clone(&self.config_entries), context)
    }

    /// Schedule storage.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.schedules), Arc::clone(&self.time))
    }

    /// Shipping methods of a shop context.
    pub fn shipping_methods(&self, context: &str) -> ShippingMethodService {
        ShippingMethodService::new(
            Arc::clone(&self.shipping_methods),
            Arc::clone(&self.time),
            context,
        )
    }

    /// Shipment details of a shop context.
    pub fn order_details(&self, context: &str) -> OrderShipmentDetailsService {
        OrderShipmentDetailsService::new(
            Arc::clone(&self.shipment_details),
            Arc::clone(&self.time),
            context,
        )
    }

    /// Order to send-draft execution links.
    pub fn draft_tasks(&self) -> &Arc<dyn Repository<OrderSendDraftTaskMap>> {
        &self.draft_tasks
    }

    /// Packlink API client.
    pub fn proxy(&self) -> PacklinkResult<Arc<dyn Proxy>> {
        self.proxy
            .clone()
            .ok_or(PacklinkError::MissingService { name: "Proxy" })
    }

    /// Shop platform adapter.
    pub fn shop_orders(&self) -> PacklinkResult<Arc<dyn ShopOrderService>> {
        self.shop_orders
            .clone()
            .ok_or(PacklinkError::MissingService {
                name: "ShopOrderService",
            })
    }

    /// Queue the tasks of a shop context run on. Each context gets its own
    /// queue so one shop's backlog does not hold up another's.
    pub fn queue_name_for(&self, context: &str) -> String {
        let base = &self.config.queue.default_queue_name;
        if context.is_empty() {
            base.clone()
        } else {
            format!("{}-{}", base, context)
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("proxy", &self.proxy.is_some())
            .field("shop_orders", &self.shop_orders.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PacklinkCore`].
///
/// Storage not provided explicitly is kept in memory.
#[derive(Default)]
pub struct PacklinkCoreBuilder {
    config: Option<CoreConfig>,
    time: Option<Arc<dyn TimeProvider>>,
    queue_storage: Option<Arc<dyn QueueItemRepository>>,
    config_storage: Option<Arc<dyn Repository<ConfigEntry>>>,
    schedule_storage: Option<Arc<dyn Repository<Schedule>>>,
    shipping_method_storage: Option<Arc<dyn Repository<ShippingMethod>>>,
    shipment_details_storage: Option<Arc<dyn Repository<OrderShipmentDetails>>>,
    draft_task_storage: Option<Arc<dyn Repository<OrderSendDraftTaskMap>>>,
    proxy: Option<Arc<dyn Proxy>>,
    shop_orders: Option<Arc<dyn ShopOrderService>>,
}

impl PacklinkCoreBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom clock.
    pub fn time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = Some(time);
        self
    }

    /// Queue item storage.
    pub fn queue_storage(mut self, storage: Arc<dyn QueueItemRepository>) -> Self {
        self.queue_storage = Some(storage);
        self
    }

    /// Settings storage.
    pub fn config_storage(mut self, storage: Arc<dyn Repository<ConfigEntry>>) -> Self {
        self.config_storage = Some(storage);
        self
    }

    /// Schedule storage.
    pub fn schedule_storage(mut self, storage: Arc<dyn Repository<Schedule>>) -> Self {
        self.schedule_storage = Some(storage);
        self
    }

    /// Shipping method storage.
    pub fn shipping_method_storage(mut self, storage: Arc<dyn Repository<ShippingMethod>>) -> Self {
        self.shipping_method_storage = Some(storage);
        self
    }

    /// Shipment details storage.
    pub fn shipment_details_storage(
        mut self,
        storage: Arc<dyn Repository<OrderShipmentDetails>>,
    ) -> Self {
        self.shipment_details_storage = Some(storage);
        self
    }

    /// Send-draft execution link storage.
    pub fn draft_task_storage(
        mut self,
        storage: Arc<dyn Repository<OrderSendDraftTaskMap>>,
    ) -> Self {
        self.draft_task_storage = Some(storage);
        self
    }

    /// Packlink API client.
    pub fn proxy(mut self, proxy: Arc<dyn Proxy>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Shop platform adapter.
    pub fn shop_orders(mut self, shop_orders: Arc<dyn ShopOrderService>) -> Self {
        self.shop_orders = Some(shop_orders);
        self
    }

    /// Validate the configuration and wire everything together.
    pub fn build(self) -> PacklinkResult<PacklinkCore> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|errors| PacklinkError::config(errors.join("; ")))?;

        let time = self
            .time
            .unwrap_or_else(|| Arc::new(SystemTimeProvider) as Arc<dyn TimeProvider>);
        let queue_storage = self
            .queue_storage
            .unwrap_or_else(|| Arc::new(InMemoryQueueStorage::new()) as Arc<dyn QueueItemRepository>);
        let queue = QueueService::new(queue_storage, Arc::clone(&time), config.queue.max_retries);

        let services = Services {
            queue,
            time,
            config_entries: self
                .config_storage
                .unwrap_or_else(|| Arc::new(MemoryRepository::<ConfigEntry>::new())),
            schedules: self
                .schedule_storage
                .unwrap_or_else(|| Arc::new(MemoryRepository::<Schedule>::new())),
            shipping_methods: self
                .shipping_method_storage
                .unwrap_or_else(|| Arc::new(MemoryRepository::<ShippingMethod>::new())),
            shipment_details: self
                .shipment_details_storage
                .unwrap_or_else(|| Arc::new(MemoryRepository::<OrderShipmentDetails>::new())),
            draft_tasks: self
                .draft_task_storage
                .unwrap_or_else(|| Arc::new(MemoryRepository::<OrderSendDraftTaskMap>::new())),
            proxy: self.proxy,
            shop_orders: self.shop_orders,
            config,
        };

        // Make sure the crate's own tasks can be rebuilt before anything runs.
        get_registry();

        let services = Arc::new(services);
        Ok(PacklinkCore {
            runner: TaskRunner::new(Arc::clone(&services)),
            services,
        })
    }
}

/// Health snapshot of a [`PacklinkCore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Whether this instance's runner loop is running
    pub running: bool,
    /// Runner that currently owns the queue, if any
    pub active_runner: Option<TaskRunnerStatus>,
    /// Whether the owning runner confirmed it is alive recently enough
    pub runner_alive: bool,
    /// Executions of this instance still in progress
    pub in_flight: usize,
    /// Queue item counts
    pub queue: QueueStats,
}

impl HealthReport {
    /// Healthy when some live runner owns the queue, or when there is no work.
    pub fn is_healthy(&self) -> bool {
        self.runner_alive || self.queue.active() == 0
    }
}

/// Entry point of the integration core.
///
/// # Examples
///
/// ```rust,no_run
/// use packlink_core::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> PacklinkResult<()> {
///     let core = PacklinkCore::builder()
///         .config(CoreConfig::production())
///         .build()?;
///     core.start().await?;
///     core.wait_for_shutdown().await
/// }
/// ```
pub struct PacklinkCore {
    services: Arc<Services>,
    runner: TaskRunner,
}

impl PacklinkCore {
    /// Start building a core.
    pub fn builder() -> PacklinkCoreBuilder {
        PacklinkCoreBuilder::default()
    }

    /// Shared services.
    pub fn services(&self) -> Arc<Services> {
        Arc::clone(&self.services)
    }

    /// This instance's task runner.
    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Start processing the queue.
    pub async fn start(&self) -> PacklinkResult<()> {
        self.runner.start().await
    }

    /// Stop processing and wait for running executions.
    pub async fn stop(&self) -> PacklinkResult<()> {
        self.runner.shutdown().await
    }

    /// Whether the runner loop is running.
    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Start the runner if it is not running, otherwise make it tick now.
    pub async fn wakeup(&self) -> PacklinkResult<()> {
        if self.runner.is_running() {
            self.runner.wakeup();
            return Ok(());
        }
        match self.runner.start().await {
            Ok(()) | Err(PacklinkError::AlreadyRunning) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Enqueue a task on the queue of its context.
    pub async fn enqueue<T: Task>(
        &self,
        task: &T,
        context: &str,
        priority: Priority,
    ) -> PacklinkResult<QueueItem> {
        let queue_name = self.services.queue_name_for(context);
        self.services
            .queue()
            .enqueue(&queue_name, task, context, priority)
            .await
    }

    /// Run a single runner tick without the background loop.
    pub async fn tick(&self) -> PacklinkResult<TickOutcome> {
        self.runner.tick().await
    }

    /// Current health.
    pub async fn health_check(&self) -> PacklinkResult<HealthReport> {
        let queue = self.services.queue().stats().await?;
        let active_runner = self
            .services
            .settings(SYSTEM_CONTEXT)
            .task_runner_status()
            .await?;
        let max_alive = self.services.config().runner.max_alive_time();
        let runner_alive = active_runner
            .as_ref()
            .is_some_and(|status| !status.is_expired(self.services.now(), max_alive));

        let report = HealthReport {
            running: self.runner.is_running(),
            active_runner,
            runner_alive,
            in_flight: self.runner.in_flight(),
            queue,
        };

        if !report.is_healthy() {
            tracing::warn!(
                "No live task runner while {} items wait",
                report.queue.active()
            );
        }
        Ok(report)
    }

    /// Block until Ctrl+C, then stop the runner.
    pub async fn wait_for_shutdown(&self) -> PacklinkResult<()> {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");

        match self.stop().await {
            Ok(()) | Err(PacklinkError::NotRunning) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Account service of a shop context.
    pub fn user_accounts(&self, context: &str) -> UserAccountService {
        UserAccountService::new(self.services(), context)
    }

    /// Draft service of a shop context.
    pub fn drafts(&self, context: &str) -> ShipmentDraftService {
        ShipmentDraftService::new(self.services(), context)
    }

    /// Webhook handler of a shop context.
    pub fn webhooks(&self, context: &str) -> WebhookHandler {
        WebhookHandler::new(self.services(), context)
    }

    /// Shipping methods of a shop context.
    pub fn shipping_methods(&self, context: &str) -> ShippingMethodService {
        self.services.shipping_methods(context)
    }

    /// Shipment details of a shop context.
    pub fn order_details(&self, context: &str) -> OrderShipmentDetailsService {
        self.services.order_details(context)
    }
}

impl std::fmt::Debug for PacklinkCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacklinkCore")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ScheduleCheckTask;

    #[tokio::test]
    async fn test_core_creation() {
        let core = PacklinkCore::builder().build().unwrap();
        assert!(!core.is_running());
        assert!(matches!(
            core.services().proxy(),
            Err(PacklinkError::MissingService { name: "Proxy" })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = CoreConfig::testing();
        config.runner.max_started_tasks = 0;
        assert!(matches!(
            PacklinkCore::builder().config(config).build(),
            Err(PacklinkError::ConfigError { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_name_per_context() {
        let core = PacklinkCore::builder().build().unwrap();
        let services = core.services();
        assert_eq!(services.queue_name_for(""), "packlink");
        assert_eq!(services.queue_name_for("shop-1"), "packlink-shop-1");

        let item = core
            .enqueue(&ScheduleCheckTask::default(), "shop-1", Priority::Low)
            .await
            .unwrap();
        assert_eq!(item.queue_name, "packlink-shop-1");
    }

    #[tokio::test]
    async fn test_core_lifecycle_and_health() {
        let core = PacklinkCore::builder()
            .config(CoreConfig::testing())
            .build()
            .unwrap();

        let idle = core.health_check().await.unwrap();
        assert!(!idle.running);
        assert!(idle.is_healthy());

        core.wakeup().await.unwrap();
        assert!(core.is_running());
        // Already running: only nudges the loop.
        core.wakeup().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let report = core.health_check().await.unwrap();
        assert!(report.running);
        assert!(report.runner_alive);
        assert_eq!(
            report.active_runner.map(|status| status.guid),
            Some(core.runner().guid().to_string())
        );

        core.stop().await.unwrap();
        assert!(!core.is_running());
    }
}
