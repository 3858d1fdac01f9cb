//! Background tasks that synchronize with Packlink PRO.

use super::dto::{Draft, Package, ParcelInfo, ShipmentStatus, ShippingServiceSearch};
use crate::core::Services;
use crate::error::{PacklinkError, PacklinkResult};
use crate::queue::{QueueItem, QueueItemStatus};
use crate::task::{Task, TaskContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// API key of the task's context; a logged out context aborts the task.
async fn api_key(ctx: &TaskContext) -> PacklinkResult<String> {
    ctx.settings()
        .authorization_token()
        .await?
        .ok_or_else(|| PacklinkError::abort(format!("context '{}' is not logged in", ctx.context())))
}

/// Copies the account's default parcel and warehouse into the settings.
///
/// Values the merchant already configured are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetDefaultParcelAndWarehouseTask {}

#[async_trait]
impl Task for GetDefaultParcelAndWarehouseTask {
    const TYPE: &'static str = "GetDefaultParcelAndWarehouseTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let api_key = api_key(ctx).await?;
        let proxy = ctx.services().proxy()?;
        let settings = ctx.settings();

        if settings.default_parcel().await?.is_none() {
            let parcels = proxy.get_parcels(&api_key).await?;
            let parcel = parcels
                .iter()
                .find(|p| p.default)
                .or_else(|| parcels.first())
                .cloned();
            if let Some(parcel) = parcel {
                settings.set_default_parcel(&parcel).await?;
            }
        }
        ctx.report_progress(50.0).await?;

        if settings.default_warehouse().await?.is_none() {
            let warehouses = proxy.get_warehouses(&api_key).await?;
            let warehouse = warehouses
                .iter()
                .find(|w| w.default_warehouse)
                .or_else(|| warehouses.first())
                .cloned();
            if let Some(warehouse) = warehouse {
                settings.set_default_warehouse(&warehouse).await?;
            }
        }
        ctx.report_progress(100.0).await
    }
}

/// Refreshes the shop's shipping methods from the services Packlink offers
/// for every destination country.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateShippingServicesTask {}

#[async_trait]
impl Task for UpdateShippingServicesTask {
    const TYPE: &'static str = "UpdateShippingServicesTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let api_key = api_key(ctx).await?;
        let proxy = ctx.services().proxy()?;
        let settings = ctx.settings();

        let parcel = settings
            .default_parcel()
            .await?
            .unwrap_or_else(ParcelInfo::fallback);
        let warehouse = settings.default_warehouse().await?;
        let user_country = settings.user_info().await?.map(|user| user.country);

        let from_country = warehouse
            .as_ref()
            .map(|w| w.country.clone())
            .or(user_country.clone())
            .ok_or_else(|| PacklinkError::task_failed("no departure country configured"))?;
        let from_zip = warehouse
            .as_ref()
            .map(|w| w.postal_code.clone())
            .unwrap_or_default();

        let mut countries = settings.shipping_destination_countries().await?;
        if countries.is_empty() {
            countries.push(from_country.clone());
        }

        let mut services = Vec::new();
        for (index, country) in countries.iter().enumerate() {
            let search = ShippingServiceSearch {
                service_id: None,
                from_country: from_country.clone(),
                from_zip: from_zip.clone(),
                to_country: country.clone(),
                to_zip: String::new(),
                packages: vec![Package::from(&parcel)],
            };
            services.extend(proxy.search_shipping_services(&api_key, &search).await?);
            ctx.report_progress((index + 1) as f64 * 80.0 / countries.len() as f64)
                .await?;
        }

        let methods = ctx.services().shipping_methods(ctx.context());
        let offered = methods.upsert(&services).await?;
        methods.delete_obsolete(&offered).await?;

        tracing::info!(
            context = ctx.context(),
            "Synchronized {} shipping services for {} countries",
            offered.len(),
            countries.len()
        );
        ctx.report_progress(100.0).await
    }
}

/// Creates the Packlink PRO draft of a shop order.
///
/// Running it again for an order that already has a shipment reference does
/// nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDraftTask {
    /// Platform order id
    pub order_id: String,
}

impl SendDraftTask {
    /// Task for one order.
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
        }
    }
}

#[async_trait]
impl Task for SendDraftTask {
    const TYPE: &'static str = "SendDraftTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let details = ctx.services().order_details(ctx.context());
        if details
            .get_by_order_id(&self.order_id)
            .await?
            .is_some_and(|d| d.reference.is_some())
        {
            tracing::debug!(context = ctx.context(), "Order {} already sent", self.order_id);
            return ctx.report_progress(100.0).await;
        }

        let api_key = api_key(ctx).await?;
        let proxy = ctx.services().proxy()?;
        let shop = ctx.services().shop_orders()?;
        let settings = ctx.settings();

        let order = shop
            .get_order(ctx.context(), &self.order_id)
            .await?
            .ok_or_else(|| PacklinkError::abort(format!("order {} not found", self.order_id)))?;
        let warehouse = settings
            .default_warehouse()
            .await?
            .ok_or_else(|| PacklinkError::task_failed("default warehouse is not set"))?;
        let parcel = settings
            .default_parcel()
            .await?
            .unwrap_or_else(ParcelInfo::fallback);
        let platform_country = settings
            .user_info()
            .await?
            .map(|user| user.country)
            .unwrap_or_else(|| warehouse.country.clone());
        ctx.report_progress(25.0).await?;

        let draft = Draft::from_order(
            &order,
            &warehouse,
            &parcel,
            &platform_country,
            order.shipping_service_id,
        );
        let reference = proxy.send_draft(&api_key, &draft).await?;
        ctx.report_progress(75.0).await?;

        details.set_reference(&self.order_id, &reference).await?;
        shop.set_reference(ctx.context(), &self.order_id, &reference)
            .await?;

        tracing::info!(
            context = ctx.context(),
            "Draft {} created for order {}",
            reference,
            self.order_id
        );
        ctx.report_progress(100.0).await
    }

    async fn on_fail(&self, _services: &Services, item: &QueueItem) -> PacklinkResult<()> {
        tracing::error!(
            context = %item.context,
            "Giving up on draft for order {} after {} attempts",
            self.order_id,
            item.retries
        );
        Ok(())
    }
}

/// Pulls status, tracking and labels of unfinished shipments and pushes
/// them to the shop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateShipmentDataTask {
    /// Shipments to refresh; loaded on the first execution
    references: Option<Vec<String>>,
    /// How many of them are done
    processed: usize,
}

impl UpdateShipmentDataTask {
    /// Refresh only the given shipments.
    pub fn for_references(references: Vec<String>) -> Self {
        Self {
            references: Some(references),
            processed: 0,
        }
    }

    async fn refresh(&self, ctx: &TaskContext, api_key: &str, reference: &str) -> PacklinkResult<()> {
        let services = ctx.services();
        let proxy = services.proxy()?;
        let details = services.order_details(ctx.context());

        let Some(shipment) = proxy.get_shipment(api_key, reference).await? else {
            tracing::debug!(context = ctx.context(), "Shipment {} unknown to Packlink", reference);
            return Ok(());
        };
        let Some(updated) = details.update_from_shipment(&shipment).await? else {
            return Ok(());
        };

        let tracking = proxy.get_tracking_info(api_key, reference).await?;
        let updated = details
            .update_tracking(reference, tracking)
            .await?
            .unwrap_or(updated);

        let updated = if updated.labels.is_empty()
            && !matches!(updated.status, ShipmentStatus::Pending | ShipmentStatus::Cancelled)
        {
            let labels = proxy.get_labels(api_key, reference).await?;
            details.set_labels(reference, labels).await?.unwrap_or(updated)
        } else {
            updated
        };

        if let Ok(shop) = services.shop_orders() {
            shop.update_shipment_status(ctx.context(), &updated.order_id, updated.status)
                .await?;
            shop.update_tracking_info(
                ctx.context(),
                &updated.order_id,
                &updated.tracking_history,
                &updated.tracking_numbers,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Task for UpdateShipmentDataTask {
    const TYPE: &'static str = "UpdateShipmentDataTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let api_key = api_key(ctx).await?;

        let references = match &self.references {
            Some(references) => references.clone(),
            None => {
                let references: Vec<String> = ctx
                    .services()
                    .order_details(ctx.context())
                    .get_incomplete()
                    .await?
                    .into_iter()
                    .filter_map(|details| details.reference)
                    .collect();
                self.references = Some(references.clone());
                ctx.checkpoint(&*self).await?;
                references
            }
        };

        let total = references.len().max(1) as f64;
        while let Some(reference) = references.get(self.processed) {
            self.refresh(ctx, &api_key, reference).await?;
            self.processed += 1;
            ctx.report_progress(self.processed as f64 * 100.0 / total).await?;
            ctx.checkpoint(&*self).await?;
        }

        ctx.report_progress(100.0).await
    }

    fn max_inactivity(&self) -> Option<Duration> {
        Some(Duration::from_secs(600))
    }
}

/// Deletes finished queue items of one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCleanupTask {
    /// Task type to clean up
    pub task_type: String,
    /// Statuses to remove; only finished statuses are honored
    pub statuses: Vec<QueueItemStatus>,
    /// Minimum age of removed items, in seconds since queueing
    pub older_than_secs: i64,
}

impl Default for TaskCleanupTask {
    fn default() -> Self {
        Self {
            task_type: "ScheduleCheckTask".to_string(),
            statuses: vec![QueueItemStatus::Completed, QueueItemStatus::Failed],
            older_than_secs: 3600,
        }
    }
}

#[async_trait]
impl Task for TaskCleanupTask {
    const TYPE: &'static str = "TaskCleanupTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        let older_than = ctx.now() - chrono::Duration::seconds(self.older_than_secs);
        let removed = ctx
            .services()
            .queue()
            .remove_finished(&self.task_type, &self.statuses, older_than)
            .await?;

        if removed > 0 {
            tracing::debug!("Removed {} finished {} items", removed, self.task_type);
        }
        ctx.report_progress(100.0).await
    }
}
