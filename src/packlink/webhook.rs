//! Shipment event callbacks from Packlink PRO.

use super::dto::ShipmentStatus;
use super::order::OrderShipmentDetails;
use super::proxy::Proxy;
use crate::core::Services;
use crate::error::{PacklinkError, PacklinkResult};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct WebhookBody {
    event: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    shipment_reference: String,
}

/// Applies webhook events to the shipments of one shop context.
#[derive(Clone)]
pub struct WebhookHandler {
    services: Arc<Services>,
    context: String,
}

impl WebhookHandler {
    /// Handler for `context`.
    pub fn new(services: Arc<Services>, context: impl Into<String>) -> Self {
        Self {
            services,
            context: context.into(),
        }
    }

    /// Handle a raw webhook body.
    ///
    /// Returns whether a shipment was updated. Unknown events and references
    /// are ignored; a body that is not a webhook event is an error.
    pub async fn handle(&self, body: &str) -> PacklinkResult<bool> {
        let body: WebhookBody = serde_json::from_str(body)?;
        let reference = body.data.shipment_reference.as_str();
        let details = self.services.order_details(&self.context);

        let Some(current) = details.get_by_reference(reference).await? else {
            tracing::debug!(
                context = %self.context,
                "Ignoring {} for unknown shipment {}",
                body.event,
                reference
            );
            return Ok(false);
        };
        if current.status.is_final() {
            tracing::debug!(
                context = %self.context,
                "Ignoring {} for {} shipment {}",
                body.event,
                current.status.as_str(),
                reference
            );
            return Ok(false);
        }

        let updated = match body.event.as_str() {
            "shipment.carrier.success" => {
                details
                    .update_status(reference, ShipmentStatus::Processing)
                    .await?
            }
            "shipment.label.ready" => {
                let labels = self.with_api(|proxy, key| async move {
                    proxy.get_labels(&key, reference).await
                })
                .await?;
                details.set_labels(reference, labels).await?;
                details
                    .update_status(reference, ShipmentStatus::ReadyForShipping)
                    .await?
            }
            "shipment.tracking.update" => {
                let tracking = self.with_api(|proxy, key| async move {
                    proxy.get_tracking_info(&key, reference).await
                })
                .await?;
                details.update_tracking(reference, tracking).await?;
                details
                    .update_status(reference, ShipmentStatus::InTransit)
                    .await?
            }
            "shipment.delivered" => {
                details
                    .update_status(reference, ShipmentStatus::Delivered)
                    .await?
            }
            "shipment.carrier.fail" | "shipment.label.fail" => {
                tracing::warn!(
                    context = %self.context,
                    "Packlink reported {} for shipment {}",
                    body.event,
                    reference
                );
                return Ok(false);
            }
            other => {
                tracing::debug!(context = %self.context, "Unhandled webhook event {}", other);
                return Ok(false);
            }
        };

        let Some(updated) = updated else {
            return Ok(false);
        };
        self.push_to_shop(&updated).await?;

        tracing::info!(
            context = %self.context,
            "Shipment {} is now {}",
            reference,
            updated.status.as_str()
        );
        Ok(true)
    }

    async fn with_api<F, Fut, T>(&self, call: F) -> PacklinkResult<T>
    where
        F: FnOnce(Arc<dyn Proxy>, String) -> Fut,
        Fut: std::future::Future<Output = PacklinkResult<T>>,
    {
        let key = self
            .services
            .settings(&self.context)
            .authorization_token()
            .await?
            .ok_or_else(|| PacklinkError::Unauthorized {
                message: format!("context '{}' is not logged in", self.context),
            })?;
        call(self.services.proxy()?, key).await
    }

    async fn push_to_shop(&self, details: &OrderShipmentDetails) -> PacklinkResult<()> {
        let Ok(shop) = self.services.shop_orders() else {
            return Ok(());
        };
        shop.update_shipment_status(&self.context, &details.order_id, details.status)
            .await?;
        shop.update_tracking_info(
            &self.context,
            &details.order_id,
            &details.tracking_history,
            &details.tracking_numbers,
        )
        .await
    }
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
