//! Packlink PRO account of a shop context.

use super::dto::User;
use super::tasks::{
    GetDefaultParcelAndWarehouseTask, TaskCleanupTask, UpdateShipmentDataTask,
    UpdateShippingServicesTask,
};
use crate::core::Services;
use crate::error::{PacklinkError, PacklinkResult};
use crate::queue::Priority;
use crate::scheduler::{Schedule, ScheduleKind};
use crate::task::{CompositeTask, Task};
use chrono::Weekday;
use std::sync::Arc;

/// Login, logout and account data for one shop context.
#[derive(Clone)]
pub struct UserAccountService {
    services: Arc<Services>,
    context: String,
}

impl UserAccountService {
    /// Service for `context`.
    pub fn new(services: Arc<Services>, context: impl Into<String>) -> Self {
        Self {
            services,
            context: context.into(),
        }
    }

    /// Log in with a Packlink PRO API key.
    ///
    /// Returns `false` if the key is empty or Packlink rejects it. On success
    /// the account data is stored, the webhook is registered, the initial
    /// synchronization is enqueued and the default schedules are created.
    pub async fn login(&self, api_key: &str) -> PacklinkResult<bool> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Ok(false);
        }

        let proxy = self.services.proxy()?;
        let user = match proxy.get_user(api_key).await {
            Ok(user) => user,
            Err(PacklinkError::Unauthorized { message }) => {
                tracing::warn!(context = %self.context, "Login rejected: {}", message);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let settings = self.services.settings(&self.context);
        settings.set_authorization_token(api_key).await?;
        settings.set_user_info(&user).await?;
        if settings.shipping_destination_countries().await?.is_empty() {
            settings
                .set_shipping_destination_countries(&[user.country.clone()])
                .await?;
        }

        if let Some(url) = settings.webhook_url().await? {
            if let Err(err) = proxy.register_webhook(api_key, &url).await {
                tracing::warn!(context = %self.context, "Webhook registration failed: {}", err);
            }
        }

        let initial_sync = CompositeTask::new()
            .with(&GetDefaultParcelAndWarehouseTask::default(), 30)?
            .with(&UpdateShippingServicesTask::default(), 70)?;
        self.services
            .queue()
            .enqueue(
                &self.services.queue_name_for(&self.context),
                &initial_sync,
                &self.context,
                Priority::High,
            )
            .await?;

        self.create_default_schedules().await?;

        tracing::info!(context = %self.context, "Logged in as {}", user.email);
        Ok(true)
    }

    async fn create_default_schedules(&self) -> PacklinkResult<()> {
        let scheduler = self.services.scheduler();
        let queue_name = self.services.queue_name_for(&self.context);

        scheduler
            .remove_for_task_type(UpdateShippingServicesTask::TYPE, &self.context)
            .await?;
        scheduler
            .add(Schedule::new(
                queue_name.as_str(),
                &UpdateShippingServicesTask::default(),
                self.context.as_str(),
                ScheduleKind::Weekly {
                    days: vec![Weekday::Mon],
                    hour: 2,
                    minute: 0,
                },
            )?)
            .await?;

        scheduler
            .remove_for_task_type(UpdateShipmentDataTask::TYPE, &self.context)
            .await?;
        scheduler
            .add(Schedule::new(
                queue_name.as_str(),
                &UpdateShipmentDataTask::default(),
                self.context.as_str(),
                ScheduleKind::Hourly {
                    interval: 1,
                    minute: 0,
                },
            )?)
            .await?;

        scheduler
            .remove_for_task_type(TaskCleanupTask::TYPE, &self.context)
            .await?;
        scheduler
            .add(
                Schedule::new(
                    queue_name.as_str(),
                    &TaskCleanupTask::default(),
                    self.context.as_str(),
                    ScheduleKind::Hourly {
                        interval: 1,
                        minute: 30,
                    },
                )?
                .with_priority(Priority::Low),
            )
            .await?;
        Ok(())
    }

    /// Whether an API key is stored for the context.
    pub async fn is_logged_in(&self) -> PacklinkResult<bool> {
        Ok(self
            .services
            .settings(&self.context)
            .authorization_token()
            .await?
            .is_some())
    }

    /// Stored account data.
    pub async fn user(&self) -> PacklinkResult<Option<User>> {
        self.services.settings(&self.context).user_info().await
    }

    /// Forget the account: drops the context's schedules and settings.
    pub async fn logout(&self) -> PacklinkResult<()> {
        let schedules = self
            .services
            .scheduler()
            .remove_for_context(&self.context)
            .await?;
        let entries = self.services.settings(&self.context).clear().await?;

        tracing::info!(
            context = %self.context,
            "Logged out, removed {} schedules and {} settings",
            schedules,
            entries
        );
        Ok(())
    }
}

impl std::fmt::Debug for UserAccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAccountService")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
