//! Packlink PRO integration: account, shipping methods, drafts and shipment
//! tracking.
//!
//! The remote API and the shop platform are reached through the [`Proxy`]
//! and [`ShopOrderService`] traits, which the host implements and hands to
//! [`PacklinkCoreBuilder`](crate::core::PacklinkCoreBuilder).

pub mod draft;
pub mod dto;
pub mod order;
pub mod proxy;
pub mod shipping_method;
pub mod shop;
pub mod tasks;
pub mod user;
pub mod webhook;

pub use draft::{DraftStatus, OrderSendDraftTaskMap, ShipmentDraftService};
pub use order::{OrderShipmentDetails, OrderShipmentDetailsService};
pub use proxy::Proxy;
pub use shipping_method::{ShippingMethod, ShippingMethodService, ShippingPrice};
pub use shop::ShopOrderService;
pub use tasks::{
    GetDefaultParcelAndWarehouseTask, SendDraftTask, TaskCleanupTask, UpdateShipmentDataTask,
    UpdateShippingServicesTask,
};
pub use user::UserAccountService;
pub use webhook::WebhookHandler;
