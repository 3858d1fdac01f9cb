use async_trait::async_trait;
use packlink_core::core::PacklinkCore;
use packlink_core::packlink::dto::{
    Address, Draft, Order, OrderItem, ParcelInfo, Shipment, ShipmentStatus,
    ShippingServiceDetails, ShippingServiceSearch, TrackingEvent, User, Warehouse,
};
use packlink_core::packlink::{DraftStatus, Proxy, ShopOrderService, UpdateShipmentDataTask};
use packlink_core::prelude::*;
use packlink_core::time::TestTimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const API_KEY: &str = "valid-key";
const CONTEXT: &str = "shop-1";

#[derive(Default)]
struct MockProxy {
    drafts: Mutex<Vec<Draft>>,
    webhooks: Mutex<Vec<String>>,
    shipment_statuses: Mutex<HashMap<String, String>>,
}

impl MockProxy {
    fn check(&self, api_key: &str) -> PacklinkResult<()> {
        if api_key == API_KEY {
            Ok(())
        } else {
            Err(PacklinkError::Unauthorized {
                message: "invalid API key".to_string(),
            })
        }
    }

    fn set_shipment_status(&self, reference: &str, status: &str) {
        self.shipment_statuses
            .lock()
            .unwrap()
            .insert(reference.to_string(), status.to_string());
    }
}

fn warehouse() -> Warehouse {
    Warehouse {
        id: Some("w-1".to_string()),
        alias: "Madrid".to_string(),
        name: "Ana".to_string(),
        surname: "Lopez".to_string(),
        company: Some("Tienda SL".to_string()),
        country: "ES".to_string(),
        postal_code: "28001".to_string(),
        city: "Madrid".to_string(),
        address: "Calle Mayor 1".to_string(),
        phone: "600000000".to_string(),
        email: "ana@example.com".to_string(),
        default_warehouse: true,
    }
}

#[async_trait]
impl Proxy for MockProxy {
    async fn get_user(&self, api_key: &str) -> PacklinkResult<User> {
        self.check(api_key)?;
        Ok(User {
            first_name: "Ana".to_string(),
            last_name: "Lopez".to_string(),
            email: "ana@example.com".to_string(),
            country: "ES".to_string(),
        })
    }

    async fn get_parcels(&self, api_key: &str) -> PacklinkResult<Vec<ParcelInfo>> {
        self.check(api_key)?;
        Ok(vec![
            ParcelInfo {
                id: Some("p-1".to_string()),
                name: "Envelope".to_string(),
                weight: 0.2,
                length: 30.0,
                width: 20.0,
                height: 1.0,
                default: false,
            },
            ParcelInfo {
                id: Some("p-2".to_string()),
                name: "Box".to_string(),
                weight: 2.0,
                length: 40.0,
                width: 30.0,
                height: 20.0,
                default: true,
            },
        ])
    }

    async fn get_warehouses(&self, api_key: &str) -> PacklinkResult<Vec<Warehouse>> {
        self.check(api_key)?;
        Ok(vec![warehouse()])
    }

    async fn register_webhook(&self, api_key: &str, url: &str) -> PacklinkResult<()> {
        self.check(api_key)?;
        self.webhooks.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn search_shipping_services(
        &self,
        api_key: &str,
        search: &ShippingServiceSearch,
    ) -> PacklinkResult<Vec<ShippingServiceDetails>> {
        self.check(api_key)?;
        let national = search.from_country == search.to_country;
        Ok(vec![ShippingServiceDetails {
            id: if national { 20_945 } else { 21_000 },
            carrier_name: "UPS".to_string(),
            service_name: (if national { "Standard" } else { "Express Saver" }).to_string(),
            currency: "EUR".to_string(),
            departure_country: search.from_country.clone(),
            destination_country: search.to_country.clone(),
            transit_time: "24-48H".to_string(),
            national,
            express: !national,
            departure_drop_off: false,
            destination_drop_off: false,
            total_price: 6.05,
            tax_price: 1.05,
            base_price: 5.0,
        }])
    }

    async fn send_draft(&self, api_key: &str, draft: &Draft) -> PacklinkResult<String> {
        self.check(api_key)?;
        let mut drafts = self.drafts.lock().unwrap();
        drafts.push(draft.clone());
        Ok(format!("ES2026PRO{:04}", drafts.len()))
    }

    async fn get_shipment(
        &self,
        api_key: &str,
        reference: &str,
    ) -> PacklinkResult<Option<Shipment>> {
        self.check(api_key)?;
        let statuses = self.shipment_statuses.lock().unwrap();
        Ok(statuses.get(reference).map(|status| Shipment {
            reference: reference.to_string(),
            status: status.clone(),
            carrier: Some("UPS".to_string()),
            tracking_numbers: vec!["1Z999AA10123456784".to_string()],
            tracking_url: Some("https://tracking.example/1Z999AA10123456784".to_string()),
            price: Some(6.05),
        }))
    }

    async fn get_tracking_info(
        &self,
        api_key: &str,
        _reference: &str,
    ) -> PacklinkResult<Vec<TrackingEvent>> {
        self.check(api_key)?;
        Ok(vec![
            TrackingEvent {
                timestamp: 1_700_003_600,
                description: "In transit".to_string(),
                city: Some("Zaragoza".to_string()),
            },
            TrackingEvent {
                timestamp: 1_700_000_000,
                description: "Picked up".to_string(),
                city: Some("Madrid".to_string()),
            },
        ])
    }

    async fn get_labels(&self, api_key: &str, reference: &str) -> PacklinkResult<Vec<String>> {
        self.check(api_key)?;
        Ok(vec![format!("https://labels.example/{}.pdf", reference)])
    }
}

#[derive(Default)]
struct MockShop {
    orders: HashMap<String, Order>,
    references: Mutex<HashMap<String, String>>,
    statuses: Mutex<HashMap<String, ShipmentStatus>>,
    tracking: Mutex<HashMap<String, Vec<String>>>,
}

impl MockShop {
    fn with_order(order_id: &str) -> Self {
        let order = Order {
            id: order_id.to_string(),
            order_number: format!("#{}", order_id),
            shipping_address: Address {
                name: "Jean".to_string(),
                surname: "Dupont".to_string(),
                street: "1 Rue de Rivoli".to_string(),
                city: "Paris".to_string(),
                zip_code: "75001".to_string(),
                country: "FR".to_string(),
                ..Address::default()
            },
            items: vec![OrderItem {
                title: "Mug".to_string(),
                quantity: 2,
                price: 12.5,
                weight: Some(0.4),
                length: None,
                width: None,
                height: None,
            }],
            total_price: 25.0,
            currency: "EUR".to_string(),
            shipping_service_id: Some(21_000),
        };

        let mut shop = Self::default();
        shop.orders.insert(order_id.to_string(), order);
        shop
    }
}

#[async_trait]
impl ShopOrderService for MockShop {
    async fn get_order(&self, _context: &str, order_id: &str) -> PacklinkResult<Option<Order>> {
        Ok(self.orders.get(order_id).cloned())
    }

    async fn set_reference(
        &self,
        _context: &str,
        order_id: &str,
        reference: &str,
    ) -> PacklinkResult<()> {
        self.references
            .lock()
            .unwrap()
            .insert(order_id.to_string(), reference.to_string());
        Ok(())
    }

    async fn update_tracking_info(
        &self,
        _context: &str,
        order_id: &str,
        _tracking: &[TrackingEvent],
        tracking_numbers: &[String],
    ) -> PacklinkResult<()> {
        self.tracking
            .lock()
            .unwrap()
            .insert(order_id.to_string(), tracking_numbers.to_vec());
        Ok(())
    }

    async fn update_shipment_status(
        &self,
        _context: &str,
        order_id: &str,
        status: ShipmentStatus,
    ) -> PacklinkResult<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(order_id.to_string(), status);
        Ok(())
    }
}

fn build_core(proxy: Arc<MockProxy>, shop: Arc<MockShop>) -> PacklinkCore {
    PacklinkCore::builder()
        .config(CoreConfig::testing())
        .time_provider(Arc::new(TestTimeProvider::at_timestamp(1_700_000_000)))
        .proxy(proxy)
        .shop_orders(shop)
        .build()
        .unwrap()
}

/// Tick the runner until nothing is queued or running.
async fn drain(core: &PacklinkCore) {
    for _ in 0..20 {
        core.tick().await.unwrap();
        core.runner()
            .wait_for_executions(Duration::from_secs(5))
            .await
            .unwrap();
        if core.services().queue().stats().await.unwrap().active() == 0 {
            return;
        }
    }
    panic!("queue did not drain");
}

async fn logged_in_core(proxy: Arc<MockProxy>, shop: Arc<MockShop>) -> PacklinkCore {
    let core = build_core(proxy, shop);
    core.services()
        .settings(CONTEXT)
        .set_shipping_destination_countries(&["ES".to_string(), "FR".to_string()])
        .await
        .unwrap();
    assert!(core.user_accounts(CONTEXT).login(API_KEY).await.unwrap());
    drain(&core).await;
    core
}

#[tokio::test]
async fn test_login_synchronizes_account() {
    let proxy = Arc::new(MockProxy::default());
    let core = build_core(Arc::clone(&proxy), Arc::new(MockShop::default()));
    let settings = core.services().settings(CONTEXT);
    settings
        .set_webhook_url("https://shop.example/packlink/webhook")
        .await
        .unwrap();

    let accounts = core.user_accounts(CONTEXT);
    assert!(accounts.login(API_KEY).await.unwrap());
    assert!(accounts.is_logged_in().await.unwrap());
    assert_eq!(accounts.user().await.unwrap().unwrap().email, "ana@example.com");
    assert_eq!(
        settings.shipping_destination_countries().await.unwrap(),
        vec!["ES".to_string()]
    );
    assert_eq!(
        proxy.webhooks.lock().unwrap().as_slice(),
        ["https://shop.example/packlink/webhook".to_string()]
    );

    let schedules = core.services().scheduler().list(CONTEXT).await.unwrap();
    assert_eq!(schedules.len(), 3);
    assert!(schedules.iter().all(|s| s.queue_name == "packlink-shop-1"));

    drain(&core).await;

    let stats = core.services().queue().stats().await.unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.aborted, 0);
    assert_eq!(settings.default_parcel().await.unwrap().unwrap().name, "Box");
    assert_eq!(
        settings.default_warehouse().await.unwrap().unwrap().alias,
        "Madrid"
    );

    let methods = core.shipping_methods(CONTEXT).get_all().await.unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].service_id, 20_945);
    assert!(methods[0].price_to("ES").is_some());
}

#[tokio::test]
async fn test_login_twice_keeps_one_set_of_schedules() {
    let core = build_core(Arc::new(MockProxy::default()), Arc::new(MockShop::default()));
    let accounts = core.user_accounts(CONTEXT);

    assert!(accounts.login(API_KEY).await.unwrap());
    assert!(accounts.login(API_KEY).await.unwrap());

    assert_eq!(core.services().scheduler().list(CONTEXT).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_rejected_login() {
    let core = build_core(Arc::new(MockProxy::default()), Arc::new(MockShop::default()));
    let accounts = core.user_accounts(CONTEXT);

    assert!(!accounts.login("   ").await.unwrap());
    assert!(!accounts.login("wrong-key").await.unwrap());
    assert!(!accounts.is_logged_in().await.unwrap());
    assert_eq!(core.services().queue().stats().await.unwrap().queued, 0);
    assert!(core.services().scheduler().list(CONTEXT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_logout_forgets_account() {
    let core = logged_in_core(Arc::new(MockProxy::default()), Arc::new(MockShop::default())).await;
    let accounts = core.user_accounts(CONTEXT);

    accounts.logout().await.unwrap();

    assert!(!accounts.is_logged_in().await.unwrap());
    assert!(accounts.user().await.unwrap().is_none());
    assert!(core.services().scheduler().list(CONTEXT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_send_draft_and_refresh_shipment() {
    let proxy = Arc::new(MockProxy::default());
    let shop = Arc::new(MockShop::with_order("1001"));
    let core = logged_in_core(Arc::clone(&proxy), Arc::clone(&shop)).await;

    let methods = core.shipping_methods(CONTEXT).get_all().await.unwrap();
    assert_eq!(methods.len(), 2);

    let drafts = core.drafts(CONTEXT);
    assert!(drafts.enqueue_send_draft("1001").await.unwrap());
    drain(&core).await;

    assert_eq!(drafts.draft_status("1001").await.unwrap(), DraftStatus::Completed);
    assert!(!drafts.enqueue_send_draft("1001").await.unwrap());

    let sent = proxy.drafts.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.country, "FR");
    assert_eq!(sent[0].from.zip_code, "28001");
    assert_eq!(sent[0].packages.len(), 2);
    assert_eq!(sent[0].service_id, Some(21_000));
    assert_eq!(sent[0].shipment_custom_reference, "#1001");

    let reference = "ES2026PRO0001";
    assert_eq!(
        shop.references.lock().unwrap().get("1001").map(String::as_str),
        Some(reference)
    );

    proxy.set_shipment_status(reference, "READY_TO_PRINT");
    core.enqueue(&UpdateShipmentDataTask::default(), CONTEXT, Priority::Normal)
        .await
        .unwrap();
    drain(&core).await;

    let details = core
        .order_details(CONTEXT)
        .get_by_order_id("1001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.status, ShipmentStatus::ReadyForShipping);
    assert_eq!(details.carrier.as_deref(), Some("UPS"));
    assert_eq!(details.labels.len(), 1);
    assert_eq!(details.tracking_history.len(), 2);
    assert_eq!(details.tracking_history[0].description, "Picked up");
    assert_eq!(
        shop.statuses.lock().unwrap().get("1001"),
        Some(&ShipmentStatus::ReadyForShipping)
    );
    assert_eq!(
        shop.tracking.lock().unwrap().get("1001").cloned(),
        Some(vec!["1Z999AA10123456784".to_string()])
    );
}

#[tokio::test]
async fn test_draft_for_missing_order_is_aborted() {
    let proxy = Arc::new(MockProxy::default());
    let core = logged_in_core(Arc::clone(&proxy), Arc::new(MockShop::default())).await;

    let drafts = core.drafts(CONTEXT);
    assert!(drafts.enqueue_send_draft("404").await.unwrap());
    drain(&core).await;

    assert_eq!(drafts.draft_status("404").await.unwrap(), DraftStatus::Aborted);
    assert!(proxy.drafts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_events() {
    let shop = Arc::new(MockShop::default());
    let core = build_core(Arc::new(MockProxy::default()), Arc::clone(&shop));
    core.services()
        .settings(CONTEXT)
        .set_authorization_token(API_KEY)
        .await
        .unwrap();
    let details = core.order_details(CONTEXT);
    details.set_reference("2002", "ES2026PRO0042").await.unwrap();

    let webhooks = core.webhooks(CONTEXT);
    let event = |name: &str| {
        format!(
            r#"{{"event":"{}","data":{{"shipment_reference":"ES2026PRO0042"}}}}"#,
            name
        )
    };

    assert!(webhooks.handle(&event("shipment.label.ready")).await.unwrap());
    let current = details.get_by_order_id("2002").await.unwrap().unwrap();
    assert_eq!(current.status, ShipmentStatus::ReadyForShipping);
    assert_eq!(current.labels, vec!["https://labels.example/ES2026PRO0042.pdf".to_string()]);

    assert!(webhooks.handle(&event("shipment.tracking.update")).await.unwrap());
    let current = details.get_by_order_id("2002").await.unwrap().unwrap();
    assert_eq!(current.status, ShipmentStatus::InTransit);
    assert_eq!(current.tracking_history.len(), 2);

    assert!(webhooks.handle(&event("shipment.delivered")).await.unwrap());
    assert_eq!(
        shop.statuses.lock().unwrap().get("2002"),
        Some(&ShipmentStatus::Delivered)
    );

    // Late events do not reopen a delivered shipment.
    assert!(!webhooks.handle(&event("shipment.carrier.success")).await.unwrap());
    assert!(!webhooks.handle(&event("shipment.tracking.update")).await.unwrap());
    let current = details.get_by_order_id("2002").await.unwrap().unwrap();
    assert_eq!(current.status, ShipmentStatus::Delivered);
    assert!(details.get_incomplete().await.unwrap().is_empty());
    assert_eq!(
        shop.statuses.lock().unwrap().get("2002"),
        Some(&ShipmentStatus::Delivered)
    );

    assert!(!webhooks.handle(&event("shipment.label.fail")).await.unwrap());
    assert!(!webhooks.handle(&event("shipment.unknown")).await.unwrap());
    assert!(
        !webhooks
            .handle(r#"{"event":"shipment.delivered","data":{"shipment_reference":"NOPE"}}"#)
            .await
            .unwrap()
    );
    assert_err!(webhooks.handle("not json").await);
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportOrdersTask {
    batch: u32,
}

#[async_trait]
impl Task for ExportOrdersTask {
    const TYPE: &'static str = "ExportOrdersTask";

    async fn execute(&mut self, ctx: &TaskContext) -> PacklinkResult<()> {
        for step in 1..=self.batch {
            ctx.report_progress(step as f64 * 100.0 / self.batch as f64)
                .await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_started_core_runs_custom_task() {
    register_tasks!(ExportOrdersTask);
    let core = PacklinkCore::builder()
        .config(CoreConfig::testing())
        .build()
        .unwrap();

    core.start().await.unwrap();
    assert!(core.is_running());

    let item = core
        .enqueue(&ExportOrdersTask { batch: 4 }, CONTEXT, Priority::Normal)
        .await
        .unwrap();
    let id = item.id.unwrap();

    let mut status = QueueItemStatus::Queued;
    for _ in 0..250 {
        status = core.services().queue().find(id).await.unwrap().unwrap().status;
        if status == QueueItemStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, QueueItemStatus::Completed);

    let health = core.health_check().await.unwrap();
    assert!(health.running);

    assert_ok!(core.stop().await);
    assert!(!core.is_running());
    assert!(
        core.services()
            .settings("")
            .task_runner_status()
            .await
            .unwrap()
            .is_none()
    );
}
