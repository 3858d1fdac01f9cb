//! Persisted per-context configuration.
//!
//! Values are stored as JSON in [`ConfigEntry`] rows keyed by name and
//! context. The empty context holds system-wide values such as the task
//! runner status.

use crate::core::engine::TaskRunnerStatus;
use crate::error::PacklinkResult;
use crate::orm::{Entity, QueryFilter, Repository};
use crate::packlink::dto::{ParcelInfo, User, Warehouse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Context used for values that do not belong to a shop.
pub const SYSTEM_CONTEXT: &str = "";

const AUTHORIZATION_TOKEN: &str = "authorizationToken";
const USER_INFO: &str = "userInfo";
const DEFAULT_PARCEL: &str = "defaultParcel";
const DEFAULT_WAREHOUSE: &str = "defaultWarehouse";
const WEBHOOK_URL: &str = "webhookUrl";
const TASK_RUNNER_STATUS: &str = "taskRunnerStatus";
const DESTINATION_COUNTRIES: &str = "shippingServiceDestinationCountries";

/// One stored configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Storage id
    pub id: Option<i64>,
    /// Setting name
    pub name: String,
    /// JSON value
    pub value: Value,
    /// Owning context
    pub context: String,
}

impl Entity for ConfigEntry {
    const TYPE: &'static str = "ConfigEntry";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn indexes() -> &'static [&'static str] {
        &["name", "context"]
    }
}

/// Settings of one context.
#[derive(Clone)]
pub struct Settings {
    repository: Arc<dyn Repository<ConfigEntry>>,
    context: String,
}

impl Settings {
    /// Settings of `context` stored in `repository`.
    pub fn new(repository: Arc<dyn Repository<ConfigEntry>>, context: impl Into<String>) -> Self {
        Self {
            repository,
            context: context.into(),
        }
    }

    /// Same storage, another context.
    pub fn for_context(&self, context: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.repository), context)
    }

    /// Context these settings belong to.
    pub fn context(&self) -> &str {
        &self.context
    }

    async fn entry(&self, name: &str) -> PacklinkResult<Option<ConfigEntry>> {
        self.repository
            .select_one(
                &QueryFilter::new()
                    .eq("name", name)
                    .eq("context", self.context.as_str()),
            )
            .await
    }

    /// Raw value of a setting.
    pub async fn get_value(&self, name: &str) -> PacklinkResult<Option<Value>> {
        Ok(self.entry(name).await?.map(|entry| entry.value))
    }

    /// Typed value of a setting. A stored `null` reads as unset.
    pub async fn get<T: DeserializeOwned>(&self, name: &str) -> PacklinkResult<Option<T>> {
        match self.get_value(name).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Store a setting, replacing any previous value.
    pub async fn set<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> PacklinkResult<()> {
        let value = serde_json::to_value(value)?;
        match self.entry(name).await? {
            Some(mut entry) => {
                entry.value = value;
                self.repository.update(&entry).await?;
            }
            None => {
                let mut entry = ConfigEntry {
                    id: None,
                    name: name.to_string(),
                    value,
                    context: self.context.clone(),
                };
                self.repository.save(&mut entry).await?;
            }
        }
        tracing::trace!(context = %self.context, "Stored setting {}", name);
        Ok(())
    }

    /// Delete a setting. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> PacklinkResult<bool> {
        let removed = self
            .repository
            .delete_where(
                &QueryFilter::new()
                    .eq("name", name)
                    .eq("context", self.context.as_str()),
            )
            .await?;
        Ok(removed > 0)
    }

    /// Delete every setting of this context.
    pub async fn clear(&self) -> PacklinkResult<u64> {
        self.repository
            .delete_where(&QueryFilter::new().eq("context", self.context.as_str()))
            .await
    }

    /// API key of the logged in user.
    pub async fn authorization_token(&self) -> PacklinkResult<Option<String>> {
        self.get(AUTHORIZATION_TOKEN).await
    }

    /// Store the API key.
    pub async fn set_authorization_token(&self, token: &str) -> PacklinkResult<()> {
        self.set(AUTHORIZATION_TOKEN, token).await
    }

    /// Logged in user.
    pub async fn user_info(&self) -> PacklinkResult<Option<User>> {
        self.get(USER_INFO).await
    }

    /// Store the logged in user.
    pub async fn set_user_info(&self, user: &User) -> PacklinkResult<()> {
        self.set(USER_INFO, user).await
    }

    /// Default parcel used for drafts and price lookups.
    pub async fn default_parcel(&self) -> PacklinkResult<Option<ParcelInfo>> {
        self.get(DEFAULT_PARCEL).await
    }

    /// Store the default parcel.
    pub async fn set_default_parcel(&self, parcel: &ParcelInfo) -> PacklinkResult<()> {
        self.set(DEFAULT_PARCEL, parcel).await
    }

    /// Default pickup warehouse.
    pub async fn default_warehouse(&self) -> PacklinkResult<Option<Warehouse>> {
        self.get(DEFAULT_WAREHOUSE).await
    }

    /// Store the default warehouse.
    pub async fn set_default_warehouse(&self, warehouse: &Warehouse) -> PacklinkResult<()> {
        self.set(DEFAULT_WAREHOUSE, warehouse).await
    }

    /// URL registered with Packlink for webhook callbacks.
    pub async fn webhook_url(&self) -> PacklinkResult<Option<String>> {
        self.get(WEBHOOK_URL).await
    }

    /// Store the webhook URL.
    pub async fn set_webhook_url(&self, url: &str) -> PacklinkResult<()> {
        self.set(WEBHOOK_URL, url).await
    }

    /// Current task runner owner.
    pub async fn task_runner_status(&self) -> PacklinkResult<Option<TaskRunnerStatus>> {
        self.get(TASK_RUNNER_STATUS).await
    }

    /// Store the task runner owner; `None` releases it.
    pub async fn set_task_runner_status(
        &self,
        status: Option<&TaskRunnerStatus>,
    ) -> PacklinkResult<()> {
        self.set(TASK_RUNNER_STATUS, &status).await
    }

    /// Countries shipping services are synchronized for.
    pub async fn shipping_destination_countries(&self) -> PacklinkResult<Vec<String>> {
        Ok(self.get(DESTINATION_COUNTRIES).await?.unwrap_or_default())
    }

    /// Store the destination countries.
    pub async fn set_shipping_destination_countries(
        &self,
        countries: &[String],
    ) -> PacklinkResult<()> {
        self.set(DESTINATION_COUNTRIES, countries).await
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::MemoryRepository;

    fn settings(context: &str) -> Settings {
        Settings::new(Arc::new(MemoryRepository::<ConfigEntry>::new()), context)
    }

    #[tokio::test]
    async fn test_set_get_overwrite_remove() {
        let settings = settings("shop-1");
        assert_eq!(settings.authorization_token().await.unwrap(), None);

        settings.set_authorization_token("key-1").await.unwrap();
        settings.set_authorization_token("key-2").await.unwrap();
        assert_eq!(
            settings.authorization_token().await.unwrap().as_deref(),
            Some("key-2")
        );

        assert!(settings.remove(AUTHORIZATION_TOKEN).await.unwrap());
        assert!(!settings.remove(AUTHORIZATION_TOKEN).await.unwrap());
        assert_eq!(settings.authorization_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let first = settings("shop-1");
        let second = first.for_context("shop-2");

        first.set_webhook_url("https://shop-1/webhook").await.unwrap();
        second
            .set_shipping_destination_countries(&["ES".to_string(), "DE".to_string()])
            .await
            .unwrap();

        assert_eq!(second.webhook_url().await.unwrap(), None);
        assert!(first.shipping_destination_countries().await.unwrap().is_empty());
        assert_eq!(
            second.shipping_destination_countries().await.unwrap(),
            vec!["ES", "DE"]
        );

        assert_eq!(first.clear().await.unwrap(), 1);
        assert_eq!(second.get_value(DESTINATION_COUNTRIES).await.unwrap().map(|v| v.is_array()), Some(true));
    }

    #[tokio::test]
    async fn test_released_runner_status_reads_as_none() {
        let settings = settings(SYSTEM_CONTEXT);
        let status = TaskRunnerStatus::new(
            "guid-1",
            chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        settings.set_task_runner_status(Some(&status)).await.unwrap();
        assert_eq!(settings.task_runner_status().await.unwrap(), Some(status));

        settings.set_task_runner_status(None).await.unwrap();
        assert_eq!(settings.task_runner_status().await.unwrap(), None);
    }
}
