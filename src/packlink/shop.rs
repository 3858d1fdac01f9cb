//! Shop platform adapter.

use super::dto::{Order, ShipmentStatus, TrackingEvent};
use crate::error::PacklinkResult;
use async_trait::async_trait;

/// Access to the orders of the shop platform the integration runs in.
#[async_trait]
pub trait ShopOrderService: Send + Sync {
    /// Order by platform id, `None` if it does not exist.
    async fn get_order(&self, context: &str, order_id: &str) -> PacklinkResult<Option<Order>>;

    /// Store the Packlink shipment reference on the order.
    async fn set_reference(&self, context: &str, order_id: &str, reference: &str)
    -> PacklinkResult<()>;

    /// Push tracking information to the order.
    async fn update_tracking_info(
        &self,
        context: &str,
        order_id: &str,
        tracking: &[TrackingEvent],
        tracking_numbers: &[String],
    ) -> PacklinkResult<()>;

    /// Push the shipment status to the order.
    async fn update_shipment_status(
        &self,
        context: &str,
        order_id: &str,
        status: ShipmentStatus,
    ) -> PacklinkResult<()>;
}
