//! Shipping methods offered at checkout.

use super::dto::ShippingServiceDetails;
use crate::error::PacklinkResult;
use crate::orm::{Direction, Entity, Operator, QueryFilter, Repository};
use crate::time::TimeProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Price of a shipping method on one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingPrice {
    /// Departure country
    pub from_country: String,
    /// Destination country
    pub to_country: String,
    /// Price including taxes
    pub total_price: f64,
    /// Price before taxes
    pub base_price: f64,
    /// Taxes
    pub tax_price: f64,
    /// Currency
    pub currency: String,
}

/// A Packlink service as configured in the shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethod {
    /// Storage id
    pub id: Option<i64>,
    /// Owning shop context
    pub context: String,
    /// Packlink service id
    pub service_id: i64,
    /// Carrier name
    pub carrier_name: String,
    /// Service name
    pub service_name: String,
    /// Name shown at checkout
    pub title: String,
    /// Domestic service
    pub national: bool,
    /// Express service
    pub express: bool,
    /// Sender drops the parcel off
    pub departure_drop_off: bool,
    /// Recipient collects the parcel
    pub destination_drop_off: bool,
    /// Carrier transit time
    pub transit_time: String,
    /// Offered at checkout
    pub activated: bool,
    /// Prices per route
    pub prices: Vec<ShippingPrice>,
    /// Last synchronization
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_update: DateTime<Utc>,
}

impl ShippingMethod {
    fn from_details(context: &str, details: &ShippingServiceDetails, now: DateTime<Utc>) -> Self {
        let mut method = Self {
            id: None,
            context: context.to_string(),
            service_id: details.id,
            carrier_name: String::new(),
            service_name: String::new(),
            title: format!("{} - {}", details.carrier_name, details.service_name),
            national: false,
            express: false,
            departure_drop_off: false,
            destination_drop_off: false,
            transit_time: String::new(),
            activated: false,
            prices: Vec::new(),
            last_update: now,
        };
        method.merge(details, now);
        method
    }

    /// Apply fresh service details, replacing the price of the same route.
    fn merge(&mut self, details: &ShippingServiceDetails, now: DateTime<Utc>) {
        self.carrier_name = details.carrier_name.clone();
        self.service_name = details.service_name.clone();
        self.national = details.national;
        self.express = details.express;
        self.departure_drop_off = details.departure_drop_off;
        self.destination_drop_off = details.destination_drop_off;
        self.transit_time = details.transit_time.clone();
        self.last_update = now;

        let price = ShippingPrice {
            from_country: details.departure_country.clone(),
            to_country: details.destination_country.clone(),
            total_price: details.total_price,
            base_price: details.base_price,
            tax_price: details.tax_price,
            currency: details.currency.clone(),
        };
        match self
            .prices
            .iter_mut()
            .find(|p| p.from_country == price.from_country && p.to_country == price.to_country)
        {
            Some(existing) => *existing = price,
            None => self.prices.push(price),
        }
    }

    /// Price for shipping to `to_country`, if the route is known.
    pub fn price_to(&self, to_country: &str) -> Option<&ShippingPrice> {
        self.prices.iter().find(|p| p.to_country == to_country)
    }
}

impl Entity for ShippingMethod {
    const TYPE: &'static str = "ShippingMethod";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn indexes() -> &'static [&'static str] {
        &["context", "service_id", "activated"]
    }
}

/// Shipping methods of one shop context.
#[derive(Clone)]
pub struct ShippingMethodService {
    repository: Arc<dyn Repository<ShippingMethod>>,
    time: Arc<dyn TimeProvider>,
    context: String,
}

impl ShippingMethodService {
    /// Service over `repository` for `context`.
    pub fn new(
        repository: Arc<dyn Repository<ShippingMethod>>,
        time: Arc<dyn TimeProvider>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            time,
            context: context.into(),
        }
    }

    fn filter(&self) -> QueryFilter {
        QueryFilter::new().eq("context", self.context.as_str())
    }

    /// Create or refresh methods from service search results.
    ///
    /// Results for the same service on different routes are merged into one
    /// method. Returns the service ids touched.
    pub async fn upsert(&self, services: &[ShippingServiceDetails]) -> PacklinkResult<HashSet<i64>> {
        let now = self.time.now();
        let mut grouped: BTreeMap<i64, Vec<&ShippingServiceDetails>> = BTreeMap::new();
        for details in services {
            grouped.entry(details.id).or_default().push(details);
        }

        for (service_id, routes) in &grouped {
            match self.get_by_service_id(*service_id).await? {
                Some(mut method) => {
                    for details in routes {
                        method.merge(details, now);
                    }
                    self.repository.update(&method).await?;
                }
                None => {
                    let mut method = ShippingMethod::from_details(&self.context, routes[0], now);
                    for details in &routes[1..] {
                        method.merge(details, now);
                    }
                    self.repository.save(&mut method).await?;
                    tracing::debug!(context = %self.context, "Added shipping method {}", method.title);
                }
            }
        }

        Ok(grouped.into_keys().collect())
    }

    /// Offer a method at checkout.
    pub async fn activate(&self, service_id: i64) -> PacklinkResult<bool> {
        self.set_activated(service_id, true).await
    }

    /// Stop offering a method at checkout.
    pub async fn deactivate(&self, service_id: i64) -> PacklinkResult<bool> {
        self.set_activated(service_id, false).await
    }

    async fn set_activated(&self, service_id: i64, activated: bool) -> PacklinkResult<bool> {
        let Some(mut method) = self.get_by_service_id(service_id).await? else {
            return Ok(false);
        };
        method.activated = activated;
        self.repository.update(&method).await
    }

    /// All methods, by service id.
    pub async fn get_all(&self) -> PacklinkResult<Vec<ShippingMethod>> {
        self.repository
            .select(&self.filter().order_by("service_id", Direction::Asc))
            .await
    }

    /// Methods offered at checkout.
    pub async fn get_active(&self) -> PacklinkResult<Vec<ShippingMethod>> {
        self.repository
            .select(
                &self
                    .filter()
                    .eq("activated", true)
                    .order_by("service_id", Direction::Asc),
            )
            .await
    }

    /// Method for a Packlink service.
    pub async fn get_by_service_id(&self, service_id: i64) -> PacklinkResult<Option<ShippingMethod>> {
        self.repository
            .select_one(&self.filter().eq("service_id", service_id))
            .await
    }

    /// Delete methods whose service is no longer offered.
    pub async fn delete_obsolete(&self, keep: &HashSet<i64>) -> PacklinkResult<u64> {
        let keep: Vec<i64> = keep.iter().copied().collect();
        let deleted = self
            .repository
            .delete_where(&self.filter().and_where("service_id", Operator::NotIn, keep))
            .await?;
        if deleted > 0 {
            tracing::info!(context = %self.context, "Removed {} obsolete shipping methods", deleted);
        }
        Ok(deleted)
    }
}
