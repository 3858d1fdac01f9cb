//! Data exchanged with the Packlink API and the shop platform.

use serde::{Deserialize, Serialize};

/// Packlink PRO account owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Account e-mail
    pub email: String,
    /// Platform country code, e.g. `ES`
    pub country: String,
}

/// Parcel dimensions in kilograms and centimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelInfo {
    /// Packlink parcel id
    pub id: Option<String>,
    /// Display name
    pub name: String,
    /// Weight, kg
    pub weight: f64,
    /// Length, cm
    pub length: f64,
    /// Width, cm
    pub width: f64,
    /// Height, cm
    pub height: f64,
    /// Whether this is the account default
    #[serde(default)]
    pub default: bool,
}

impl ParcelInfo {
    /// Parcel used when the account has none configured.
    pub fn fallback() -> Self {
        Self {
            id: None,
            name: "Default parcel".to_string(),
            weight: 1.0,
            length: 10.0,
            width: 10.0,
            height: 10.0,
            default: true,
        }
    }
}

/// Pickup address registered in Packlink PRO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    /// Packlink warehouse id
    pub id: Option<String>,
    /// Short name shown to the merchant
    pub alias: String,
    /// Contact first name
    pub name: String,
    /// Contact last name
    pub surname: String,
    /// Company name
    pub company: Option<String>,
    /// Country code
    pub country: String,
    /// Postal code
    pub postal_code: String,
    /// City
    pub city: String,
    /// Street address
    pub address: String,
    /// Contact phone
    pub phone: String,
    /// Contact e-mail
    pub email: String,
    /// Whether this is the account default
    #[serde(default)]
    pub default_warehouse: bool,
}

/// Sender or recipient of a shipment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// First name
    pub name: String,
    /// Last name
    pub surname: String,
    /// Company name
    pub company: Option<String>,
    /// Street address
    pub street: String,
    /// City
    pub city: String,
    /// Postal code
    pub zip_code: String,
    /// Country code
    pub country: String,
    /// Phone
    pub phone: String,
    /// E-mail
    pub email: String,
}

impl From<&Warehouse> for Address {
    fn from(warehouse: &Warehouse) -> Self {
        Self {
            name: warehouse.name.clone(),
            surname: warehouse.surname.clone(),
            company: warehouse.company.clone(),
            street: warehouse.address.clone(),
            city: warehouse.city.clone(),
            zip_code: warehouse.postal_code.clone(),
            country: warehouse.country.clone(),
            phone: warehouse.phone.clone(),
            email: warehouse.email.clone(),
        }
    }
}

/// One package of a shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Weight, kg
    pub weight: f64,
    /// Length, cm
    pub length: f64,
    /// Width, cm
    pub width: f64,
    /// Height, cm
    pub height: f64,
}

impl From<&ParcelInfo> for Package {
    fn from(parcel: &ParcelInfo) -> Self {
        Self {
            weight: parcel.weight,
            length: parcel.length,
            width: parcel.width,
            height: parcel.height,
        }
    }
}

/// Shipping service price lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingServiceSearch {
    /// Restrict the search to one service
    pub service_id: Option<i64>,
    /// Departure country
    pub from_country: String,
    /// Departure postal code
    pub from_zip: String,
    /// Destination country
    pub to_country: String,
    /// Destination postal code
    pub to_zip: String,
    /// Packages to price
    pub packages: Vec<Package>,
}

/// A shipping service offered for one route, with its price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingServiceDetails {
    /// Packlink service id
    pub id: i64,
    /// Carrier, e.g. `UPS`
    pub carrier_name: String,
    /// Service name, e.g. `Express Saver`
    pub service_name: String,
    /// Price currency
    pub currency: String,
    /// Departure country
    pub departure_country: String,
    /// Destination country
    pub destination_country: String,
    /// Transit time as given by the carrier, e.g. `24-48H`
    pub transit_time: String,
    /// Domestic route
    pub national: bool,
    /// Express service
    pub express: bool,
    /// Parcel is dropped off by the sender
    pub departure_drop_off: bool,
    /// Parcel is picked up by the recipient
    pub destination_drop_off: bool,
    /// Price including taxes
    pub total_price: f64,
    /// Taxes
    pub tax_price: f64,
    /// Price before taxes
    pub base_price: f64,
}

/// Shipment draft sent to Packlink PRO for the merchant to complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Integration name reported to Packlink
    pub source: String,
    /// Platform country
    pub platform_country: String,
    /// Chosen service, if the order has one
    pub service_id: Option<i64>,
    /// Sender
    pub from: Address,
    /// Recipient
    pub to: Address,
    /// Packages
    pub packages: Vec<Package>,
    /// Content description
    pub content: String,
    /// Declared value
    pub content_value: f64,
    /// Shop order reference, shown in Packlink PRO
    pub shipment_custom_reference: String,
}

impl Draft {
    /// Build a draft for `order`, shipped from `warehouse`.
    ///
    /// Items without weight or dimensions use the default parcel's values.
    pub fn from_order(
        order: &Order,
        warehouse: &Warehouse,
        parcel: &ParcelInfo,
        platform_country: &str,
        service_id: Option<i64>,
    ) -> Self {
        let mut packages: Vec<Package> = order
            .items
            .iter()
            .flat_map(|item| {
                let package = Package {
                    weight: item.weight.unwrap_or(parcel.weight),
                    length: item.length.unwrap_or(parcel.length),
                    width: item.width.unwrap_or(parcel.width),
                    height: item.height.unwrap_or(parcel.height),
                };
                std::iter::repeat_n(package, item.quantity as usize)
            })
            .collect();
        if packages.is_empty() {
            packages.push(Package::from(parcel));
        }

        let content = order
            .items
            .iter()
            .map(|item| item.title.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            source: "module_packlink".to_string(),
            platform_country: platform_country.to_string(),
            service_id,
            from: Address::from(warehouse),
            to: order.shipping_address.clone(),
            packages,
            content,
            content_value: order.total_price,
            shipment_custom_reference: order.order_number.clone(),
        }
    }
}

/// Shipment as reported by Packlink PRO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    /// Packlink shipment reference
    pub reference: String,
    /// Raw API status
    pub status: String,
    /// Carrier name
    pub carrier: Option<String>,
    /// Carrier tracking numbers
    #[serde(default)]
    pub tracking_numbers: Vec<String>,
    /// Carrier tracking page
    pub tracking_url: Option<String>,
    /// Price paid
    pub price: Option<f64>,
}

/// One carrier tracking event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Unix time of the event
    pub timestamp: i64,
    /// Carrier description
    pub description: String,
    /// Where it happened
    pub city: Option<String>,
}

/// Order as exposed by the shop platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Platform order id
    pub id: String,
    /// Order number shown to the merchant
    pub order_number: String,
    /// Recipient
    pub shipping_address: Address,
    /// Ordered items
    pub items: Vec<OrderItem>,
    /// Order total
    pub total_price: f64,
    /// Currency
    pub currency: String,
    /// Packlink service the customer picked at checkout
    pub shipping_service_id: Option<i64>,
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product title
    pub title: String,
    /// Units ordered
    pub quantity: u32,
    /// Unit price
    pub price: f64,
    /// Unit weight, kg
    pub weight: Option<f64>,
    /// Unit length, cm
    pub length: Option<f64>,
    /// Unit width, cm
    pub width: Option<f64>,
    /// Unit height, cm
    pub height: Option<f64>,
}

/// Shipment status as tracked by the integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    /// Draft created, not paid yet
    #[default]
    Pending,
    /// Paid, carrier processing
    Processing,
    /// Label ready, waiting for pickup
    ReadyForShipping,
    /// With the carrier
    InTransit,
    /// Delivered to the recipient
    Delivered,
    /// Cancelled
    Cancelled,
}

impl ShipmentStatus {
    /// Map a Packlink API status string.
    pub fn from_api(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "AWAITING_COMPLETION" | "READY_TO_PURCHASE" | "PENDING" => Self::Pending,
            "PROCESSING" | "CARRIER_PENDING" | "CARRIER_OK" | "RETRY" | "PURCHASE_SUCCESS" => {
                Self::Processing
            }
            "READY_TO_PRINT" | "READY_FOR_COLLECTION" | "LABELS_READY" => Self::ReadyForShipping,
            "IN_TRANSIT" | "CARRIER_KO" | "INCIDENT" => Self::InTransit,
            "DELIVERED" | "RETURNED_TO_SENDER" => Self::Delivered,
            "CANCELED" | "CANCELLED" => Self::Cancelled,
            other => {
                tracing::debug!("Unknown shipment status '{}', treating as pending", other);
                Self::Pending
            }
        }
    }

    /// Whether the shipment will not change any more.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::ReadyForShipping => "ready_for_shipping",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> Warehouse {
        Warehouse {
            id: Some("w-1".to_string()),
            alias: "Madrid".to_string(),
            name: "Ana".to_string(),
            surname: "Lopez".to_string(),
            company: None,
            country: "ES".to_string(),
            postal_code: "28001".to_string(),
            city: "Madrid".to_string(),
            address: "Calle Mayor 1".to_string(),
            phone: "600000000".to_string(),
            email: "ana@example.com".to_string(),
            default_warehouse: true,
        }
    }

    fn item(title: &str, quantity: u32, weight: Option<f64>) -> OrderItem {
        OrderItem {
            title: title.to_string(),
            quantity,
            price: 10.0,
            weight,
            length: None,
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ShipmentStatus::from_api("READY_TO_PRINT"), ShipmentStatus::ReadyForShipping);
        assert_eq!(ShipmentStatus::from_api("delivered"), ShipmentStatus::Delivered);
        assert_eq!(ShipmentStatus::from_api("CANCELED"), ShipmentStatus::Cancelled);
        assert_eq!(ShipmentStatus::from_api("SOMETHING_NEW"), ShipmentStatus::Pending);
        assert!(ShipmentStatus::Delivered.is_final());
        assert!(!ShipmentStatus::InTransit.is_final());
    }

    #[test]
    fn test_draft_from_order() {
        let order = Order {
            id: "1".to_string(),
            order_number: "#1001".to_string(),
            shipping_address: Address {
                country: "FR".to_string(),
                zip_code: "75001".to_string(),
                ..Address::default()
            },
            items: vec![item("Mug", 2, Some(0.4)), item("Poster", 1, None)],
            total_price: 30.0,
            currency: "EUR".to_string(),
            shipping_service_id: Some(20_945),
        };

        let draft = Draft::from_order(&order, &warehouse(), &ParcelInfo::fallback(), "ES", Some(20_945));
        assert_eq!(draft.packages.len(), 3);
        assert_eq!(draft.packages[0].weight, 0.4);
        assert_eq!(draft.packages[2].weight, 1.0);
        assert_eq!(draft.content, "Mug, Poster");
        assert_eq!(draft.from.zip_code, "28001");
        assert_eq!(draft.to.country, "FR");
        assert_eq!(draft.shipment_custom_reference, "#1001");
    }

    #[test]
    fn test_draft_without_items_uses_default_parcel() {
        let order = Order {
            id: "2".to_string(),
            order_number: "#1002".to_string(),
            shipping_address: Address::default(),
            items: Vec::new(),
            total_price: 0.0,
            currency: "EUR".to_string(),
            shipping_service_id: None,
        };
        let draft = Draft::from_order(&order, &warehouse(), &ParcelInfo::fallback(), "ES", None);
        assert_eq!(draft.packages, vec![Package::from(&ParcelInfo::fallback())]);
    }
}
