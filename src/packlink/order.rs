//! Shipment data kept per shop order.

use super::dto::{Shipment, ShipmentStatus, TrackingEvent};
use crate::error::PacklinkResult;
use crate::orm::{Direction, Entity, Operator, QueryFilter, Repository};
use crate::time::TimeProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Packlink shipment linked to a shop order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipmentDetails {
    /// Storage id
    pub id: Option<i64>,
    /// Shop context
    pub context: String,
    /// Platform order id
    pub order_id: String,
    /// Packlink shipment reference
    pub reference: Option<String>,
    /// Current status
    pub status: ShipmentStatus,
    /// Carrier name
    pub carrier: Option<String>,
    /// Carrier tracking numbers
    pub tracking_numbers: Vec<String>,
    /// Carrier tracking page
    pub tracking_url: Option<String>,
    /// Tracking history, oldest first
    pub tracking_history: Vec<TrackingEvent>,
    /// Label download links
    pub labels: Vec<String>,
    /// Price paid
    pub price: Option<f64>,
    /// Last status change
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub status_updated_at: Option<DateTime<Utc>>,
}

impl OrderShipmentDetails {
    fn new(context: &str, order_id: &str) -> Self {
        Self {
            id: None,
            context: context.to_string(),
            order_id: order_id.to_string(),
            reference: None,
            status: ShipmentStatus::Pending,
            carrier: None,
            tracking_numbers: Vec::new(),
            tracking_url: None,
            tracking_history: Vec::new(),
            labels: Vec::new(),
            price: None,
            status_updated_at: None,
        }
    }
}

impl OrderShipmentDetails {
    /// Move to `status` unless the shipment already reached a final one.
    fn change_status(&mut self, status: ShipmentStatus, now: DateTime<Utc>) {
        if self.status == status {
            return;
        }
        if self.status.is_final() {
            tracing::debug!(
                order_id = %self.order_id,
                "Shipment is {}, ignoring change to {}",
                self.status.as_str(),
                status.as_str()
            );
            return;
        }
        self.status = status;
        self.status_updated_at = Some(now);
    }
}

impl Entity for OrderShipmentDetails {
    const TYPE: &'static str = "OrderShipmentDetails";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn indexes() -> &'static [&'static str] {
        &["context", "order_id", "reference", "status"]
    }
}

/// Shipment details of one shop context.
#[derive(Clone)]
pub struct OrderShipmentDetailsService {
    repository: Arc<dyn Repository<OrderShipmentDetails>>,
    time: Arc<dyn TimeProvider>,
    context: String,
}

impl OrderShipmentDetailsService {
    /// Service over `repository` for `context`.
    pub fn new(
        repository: Arc<dyn Repository<OrderShipmentDetails>>,
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

    /// Details of a shop order.
    pub async fn get_by_order_id(&self, order_id: &str) -> PacklinkResult<Option<OrderShipmentDetails>> {
        self.repository
            .select_one(&self.filter().eq("order_id", order_id))
            .await
    }

    /// Details of a Packlink shipment.
    pub async fn get_by_reference(&self, reference: &str) -> PacklinkResult<Option<OrderShipmentDetails>> {
        self.repository
            .select_one(&self.filter().eq("reference", reference))
            .await
    }

    /// Shipments that still can change, oldest first.
    pub async fn get_incomplete(&self) -> PacklinkResult<Vec<OrderShipmentDetails>> {
        let final_statuses: Vec<&str> = [ShipmentStatus::Delivered, ShipmentStatus::Cancelled]
            .iter()
            .map(ShipmentStatus::as_str)
            .collect();
        self.repository
            .select(
                &self
                    .filter()
                    .and_where("reference", Operator::IsNotNull, serde_json::Value::Null)
                    .and_where("status", Operator::NotIn, final_statuses)
                    .order_by("id", Direction::Asc),
            )
            .await
    }

    /// Link a shop order to a Packlink shipment.
    pub async fn set_reference(&self, order_id: &str, reference: &str) -> PacklinkResult<OrderShipmentDetails> {
        let mut details = self
            .get_by_order_id(order_id)
            .await?
            .unwrap_or_else(|| OrderShipmentDetails::new(&self.context, order_id));
        details.reference = Some(reference.to_string());
        details.status = ShipmentStatus::Pending;
        details.status_updated_at = Some(self.time.now());
        self.store(&mut details).await?;

        tracing::info!(context = %self.context, "Order {} linked to shipment {}", order_id, reference);
        Ok(details)
    }

    /// Change the status of a shipment. Returns `None` for unknown references.
    ///
    /// Delivered and cancelled shipments keep their status.
    pub async fn update_status(
        &self,
        reference: &str,
        status: ShipmentStatus,
    ) -> PacklinkResult<Option<OrderShipmentDetails>> {
        self.modify(reference, |details, now| details.change_status(status, now))
            .await
    }

    /// Apply shipment data reported by Packlink.
    pub async fn update_from_shipment(
        &self,
        shipment: &Shipment,
    ) -> PacklinkResult<Option<OrderShipmentDetails>> {
        let status = ShipmentStatus::from_api(&shipment.status);
        self.modify(&shipment.reference, |details, now| {
            details.change_status(status, now);
            details.carrier = shipment.carrier.clone().or(details.carrier.take());
            if !shipment.tracking_numbers.is_empty() {
                details.tracking_numbers = shipment.tracking_numbers.clone();
            }
            details.tracking_url = shipment.tracking_url.clone().or(details.tracking_url.take());
            details.price = shipment.price.or(details.price);
        })
        .await
    }

    /// Replace the tracking history of a shipment.
    pub async fn update_tracking(
        &self,
        reference: &str,
        mut history: Vec<TrackingEvent>,
    ) -> PacklinkResult<Option<OrderShipmentDetails>> {
        history.sort_by_key(|event| event.timestamp);
        self.modify(reference, move |details, _| details.tracking_history = history)
            .await
    }

    /// Store label links of a shipment.
    pub async fn set_labels(
        &self,
        reference: &str,
        labels: Vec<String>,
    ) -> PacklinkResult<Option<OrderShipmentDetails>> {
        self.modify(reference, move |details, _| details.labels = labels)
            .await
    }

    async fn modify<F>(&self, reference: &str, change: F) -> PacklinkResult<Option<OrderShipmentDetails>>
    where
        F: FnOnce(&mut OrderShipmentDetails, DateTime<Utc>),
    {
        let Some(mut details) = self.get_by_reference(reference).await? else {
            tracing::debug!(context = %self.context, "Unknown shipment reference {}", reference);
            return Ok(None);
        };
        change(&mut details, self.time.now());
        self.store(&mut details).await?;
        Ok(Some(details))
    }

    async fn store(&self, details: &mut OrderShipmentDetails) -> PacklinkResult<()> {
        if details.id.is_some() {
            self.repository.update(details).await?;
        } else {
            self.repository.save(details).await?;
        }
        Ok(())
    }
}
