#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    Set,
};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use storefront_api::{
    config::AppConfig,
    db,
    entities::{order, product},
    errors::ServiceError,
    events::{process_events, EventSender},
    handlers::AppServices,
    services::catalog::{CatalogGateway, SeaOrmCatalog},
    services::orders::{CreateOrderRequest, OrderItemRequest, ShippingAddress},
    services::payments::{GatewayIntent, GatewayIntentStatus, PaymentGateway},
    AppState,
};

use storefront_api::entities::order::PaymentMethod;

/// In-process stand-in for the payment gateway: intents are held in a map
/// and flipped to succeeded by the test, transport failures are switchable.
#[derive(Default)]
pub struct FakePaymentGateway {
    intents: Mutex<HashMap<String, bool>>,
    last_order_id: Mutex<Option<Uuid>>,
    counter: AtomicU64,
    pub last_amount_minor_units: AtomicI64,
    pub status_queries: AtomicU64,
    transport_failure: AtomicBool,
}

impl FakePaymentGateway {
    pub async fn mark_succeeded(&self, reference_id: &str) {
        self.intents
            .lock()
            .await
            .insert(reference_id.to_string(), true);
    }

    pub async fn last_order_id(&self) -> Option<Uuid> {
        *self.last_order_id.lock().await
    }

    pub fn set_transport_failure(&self, failing: bool) {
        self.transport_failure.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_intent(
        &self,
        amount_minor_units: i64,
        _currency: &str,
        order_id: Uuid,
    ) -> Result<GatewayIntent, ServiceError> {
        if self.transport_failure.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable(
                "connection refused".to_string(),
            ));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let reference_id = format!("pi_test_{:06}", n);
        self.intents.lock().await.insert(reference_id.clone(), false);
        *self.last_order_id.lock().await = Some(order_id);
        self.last_amount_minor_units
            .store(amount_minor_units, Ordering::SeqCst);

        Ok(GatewayIntent {
            client_secret: format!("{}_secret", reference_id),
            reference_id,
        })
    }

    async fn get_intent_status(
        &self,
        reference_id: &str,
    ) -> Result<GatewayIntentStatus, ServiceError> {
        if self.transport_failure.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable(
                "connection refused".to_string(),
            ));
        }

        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let succeeded = self
            .intents
            .lock()
            .await
            .get(reference_id)
            .copied()
            .unwrap_or(false);

        Ok(GatewayIntentStatus { succeeded })
    }
}

/// A fully wired engine over in-memory SQLite and the fake gateway.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub gateway: Arc<FakePaymentGateway>,
    pub event_sender: EventSender,
}

pub async fn spawn_app() -> TestApp {
    // A single pooled connection keeps the in-memory database alive and
    // shared across the whole test.
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(options).await.expect("sqlite connect");
    db::init_schema(&db).await.expect("schema init");
    let db = Arc::new(db);

    let (tx, rx) = mpsc::channel(64);
    let event_sender = EventSender::new(tx);
    tokio::spawn(process_events(rx));

    let gateway = Arc::new(FakePaymentGateway::default());
    let catalog: Arc<dyn CatalogGateway> = Arc::new(SeaOrmCatalog::new(db.clone()));
    let services = AppServices::new(
        db.clone(),
        catalog,
        gateway.clone(),
        Arc::new(event_sender.clone()),
        "usd".to_string(),
    );

    TestApp {
        db,
        services,
        gateway,
        event_sender,
    }
}

impl TestApp {
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.db)
            .await
            .expect("count orders")
    }

    /// Shared state + router for HTTP-level tests.
    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: AppConfig::new(
                "sqlite::memory:".to_string(),
                "127.0.0.1".to_string(),
                0,
                "test".to_string(),
            ),
            event_sender: self.event_sender.clone(),
            services: self.services.clone(),
        }
    }
}

pub fn test_address() -> ShippingAddress {
    ShippingAddress {
        street: "1 Market St".to_string(),
        city: "San Francisco".to_string(),
        state: "CA".to_string(),
        zip_code: "94105".to_string(),
        country: "US".to_string(),
    }
}

pub fn order_request(customer_id: Uuid, items: &[(Uuid, i32)]) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id,
        items: items
            .iter()
            .map(|&(product_id, quantity)| OrderItemRequest {
                product_id,
                quantity,
            })
            .collect(),
        shipping_address: test_address(),
        payment_method: PaymentMethod::Card,
    }
}
