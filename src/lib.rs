//! # Packlink core
//!
//! Business-logic core for Packlink PRO shipping integrations.
//!
//! ## Features
//!
//! - **Storage-backed task queue**: queue items survive restarts, one item per
//!   queue runs at a time and every status change is a conditional write
//! - **Task runner**: starts queued work by priority, detects stuck items,
//!   retries failures and hands over between processes through a shared status
//! - **Scheduler**: minute, hourly, daily, weekly and monthly schedules that
//!   enqueue tasks when due
//! - **Shipping services**: login, default parcel and warehouse, shipping
//!   method synchronization, shipment drafts, tracking updates and webhooks
//!
//! Storage, the Packlink HTTP client and the shop platform are plugged in
//! through traits; in-memory storage is used when nothing else is configured.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use packlink_core::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct ExportOrdersTask {
//!     since: i64,
//! }
//!
//! #[async_trait]
//! impl Task for ExportOrdersTask {
//!     const TYPE: &'static str = "ExportOrdersTask";
//!
//!     async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
//!         ctx.report_progress(100.0).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> PacklinkResult<()> {
//!     packlink_core::logging::init(&LoggingConfig::default());
//!     register_tasks!(ExportOrdersTask);
//!
//!     let core = PacklinkCore::builder().build()?;
//!     core.enqueue(&ExportOrdersTask { since: 0 }, "shop-1", Priority::Normal)
//!         .await?;
//!     core.start().await?;
//!     core.wait_for_shutdown().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod orm;
pub mod packlink;
pub mod queue;
pub mod scheduler;
pub mod settings;
pub mod task;
pub mod time;
pub mod utils;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::core::registry::get_registry;
    pub use crate::core::{HealthReport, PacklinkCore, PacklinkCoreBuilder, Services};
    pub use crate::error::{PacklinkError, PacklinkResult};
    pub use crate::orm::{Entity, MemoryRepository, QueryFilter, Repository};
    pub use crate::packlink::{Proxy, ShopOrderService};
    pub use crate::queue::{Priority, QueueItem, QueueItemStatus, QueueService};
    pub use crate::register_tasks;
    pub use crate::scheduler::{Schedule, ScheduleKind};
    pub use crate::task::{CompositeTask, Task, TaskContext};
    pub use crate::time::{SystemTimeProvider, TimeProvider};
    pub use async_trait::async_trait;
}

pub use crate::config::*;
pub use crate::core::PacklinkCore;
pub use crate::core::registry::get_registry;
pub use crate::error::{PacklinkError, PacklinkResult};
pub use crate::task::{Task, TaskContext};
pub use async_trait::async_trait;
