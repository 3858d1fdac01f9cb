//! Remote Packlink PRO API.
//!
//! The HTTP client lives in the host; the core only talks to this trait.
//! Implementations map a rejected API key to
//! [`PacklinkError::Unauthorized`](crate::error::PacklinkError::Unauthorized)
//! and other remote failures to
//! [`PacklinkError::Proxy`](crate::error::PacklinkError::Proxy).

use super::dto::{
    Draft, ParcelInfo, Shipment, ShippingServiceDetails, ShippingServiceSearch, TrackingEvent,
    User, Warehouse,
};
use crate::error::PacklinkResult;
use async_trait::async_trait;

/// Packlink PRO API client.
#[async_trait]
pub trait Proxy: Send + Sync {
    /// Account the key belongs to.
    async fn get_user(&self, api_key: &str) -> PacklinkResult<User>;

    /// Parcels saved in the account.
    async fn get_parcels(&self, api_key: &str) -> PacklinkResult<Vec<ParcelInfo>>;

    /// Warehouses saved in the account.
    async fn get_warehouses(&self, api_key: &str) -> PacklinkResult<Vec<Warehouse>>;

    /// Register the URL Packlink calls back on shipment events.
    async fn register_webhook(&self, api_key: &str, url: &str) -> PacklinkResult<()>;

    /// Services and prices for a route.
    async fn search_shipping_services(
        &self,
        api_key: &str,
        search: &ShippingServiceSearch,
    ) -> PacklinkResult<Vec<ShippingServiceDetails>>;

    /// Create a draft; returns the shipment reference.
    async fn send_draft(&self, api_key: &str, draft: &Draft) -> PacklinkResult<String>;

    /// Shipment by reference, `None` if Packlink does not know it.
    async fn get_shipment(&self, api_key: &str, reference: &str)
    -> PacklinkResult<Option<Shipment>>;

    /// Carrier tracking history.
    async fn get_tracking_info(
        &self,
        api_key: &str,
        reference: &str,
    ) -> PacklinkResult<Vec<TrackingEvent>>;

    /// Label download links, empty until labels are ready.
    async fn get_labels(&self, api_key: &str, reference: &str) -> PacklinkResult<Vec<String>>;
}
