//! Sending shop orders to Packlink PRO as shipment drafts.

use super::tasks::SendDraftTask;
use crate::core::Services;
use crate::error::PacklinkResult;
use crate::orm::{Entity, QueryFilter, Repository};
use crate::queue::{Priority, QueueItemStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Links a shop order to the queue item that sends its draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSendDraftTaskMap {
    /// Storage id
    pub id: Option<i64>,
    /// Shop context
    pub context: String,
    /// Platform order id
    pub order_id: String,
    /// Queue item id of the latest send
    pub execution_id: Option<i64>,
}

impl Entity for OrderSendDraftTaskMap {
    const TYPE: &'static str = "OrderSendDraftTaskMap";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn indexes() -> &'static [&'static str] {
        &["context", "order_id", "execution_id"]
    }
}

/// Where the draft of an order stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DraftStatus {
    /// No draft requested
    NotQueued,
    /// Waiting in the queue
    Queued,
    /// Being sent
    Processing,
    /// Created in Packlink PRO
    Completed,
    /// Sending failed for good
    Failed {
        /// Last failure reasons
        message: String,
    },
    /// Sending was aborted
    Aborted,
}

/// Draft creation for one shop context.
#[derive(Clone)]
pub struct ShipmentDraftService {
    services: Arc<Services>,
    context: String,
}

impl ShipmentDraftService {
    /// Service for `context`.
    pub fn new(services: Arc<Services>, context: impl Into<String>) -> Self {
        Self {
            services,
            context: context.into(),
        }
    }

    async fn task_map(&self, order_id: &str) -> PacklinkResult<Option<OrderSendDraftTaskMap>> {
        self.services
            .draft_tasks()
            .select_one(
                &QueryFilter::new()
                    .eq("context", self.context.as_str())
                    .eq("order_id", order_id),
            )
            .await
    }

    /// Enqueue sending the draft of an order.
    ///
    /// Returns `false` without enqueueing when the order already has a
    /// shipment or an earlier send is queued, running or completed.
    pub async fn enqueue_send_draft(&self, order_id: &str) -> PacklinkResult<bool> {
        let details = self.services.order_details(&self.context);
        if details
            .get_by_order_id(order_id)
            .await?
            .is_some_and(|d| d.reference.is_some())
        {
            tracing::debug!(context = %self.context, "Order {} already has a draft", order_id);
            return Ok(false);
        }

        let mut map = match self.task_map(order_id).await? {
            Some(map) => {
                if let Some(status) = self.execution(&map).await? {
                    if matches!(
                        status,
                        QueueItemStatus::Queued | QueueItemStatus::InProgress | QueueItemStatus::Completed
                    ) {
                        tracing::debug!(
                            context = %self.context,
                            "Draft for order {} is already {}",
                            order_id,
                            status
                        );
                        return Ok(false);
                    }
                }
                map
            }
            None => OrderSendDraftTaskMap {
                id: None,
                context: self.context.clone(),
                order_id: order_id.to_string(),
                execution_id: None,
            },
        };

        let item = self
            .services
            .queue()
            .enqueue(
                &self.services.queue_name_for(&self.context),
                &SendDraftTask::new(order_id),
                &self.context,
                Priority::High,
            )
            .await?;
        map.execution_id = item.id;

        let repository = self.services.draft_tasks();
        if map.id.is_some() {
            repository.update(&map).await?;
        } else {
            repository.save(&mut map).await?;
        }

        tracing::info!(context = %self.context, "Enqueued draft for order {}", order_id);
        Ok(true)
    }

    async fn execution(&self, map: &OrderSendDraftTaskMap) -> PacklinkResult<Option<QueueItemStatus>> {
        let Some(id) = map.execution_id else {
            return Ok(None);
        };
        Ok(self.services.queue().find(id).await?.map(|item| item.status))
    }

    /// Current draft status of an order.
    pub async fn draft_status(&self, order_id: &str) -> PacklinkResult<DraftStatus> {
        if self
            .services
            .order_details(&self.context)
            .get_by_order_id(order_id)
            .await?
            .is_some_and(|d| d.reference.is_some())
        {
            return Ok(DraftStatus::Completed);
        }

        let Some(map) = self.task_map(order_id).await? else {
            return Ok(DraftStatus::NotQueued);
        };
        let Some(id) = map.execution_id else {
            return Ok(DraftStatus::NotQueued);
        };
        let Some(item) = self.services.queue().find(id).await? else {
            return Ok(DraftStatus::NotQueued);
        };

        Ok(match item.status {
            QueueItemStatus::Created | QueueItemStatus::Queued => DraftStatus::Queued,
            QueueItemStatus::InProgress => DraftStatus::Processing,
            QueueItemStatus::Completed => DraftStatus::Completed,
            QueueItemStatus::Failed => DraftStatus::Failed {
                message: item.failure_description.unwrap_or_default(),
            },
            QueueItemStatus::Aborted => DraftStatus::Aborted,
        })
    }
}

impl std::fmt::Debug for ShipmentDraftService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShipmentDraftService")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
