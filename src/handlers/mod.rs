pub mod orders;
pub mod payments;

use axum::Json;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::events::EventSender;
use crate::repositories::OrderRepository;
use crate::services::catalog::CatalogGateway;
use crate::services::order_status::OrderStatusService;
use crate::services::orders::OrderService;
use crate::services::payments::{PaymentGateway, PaymentService};

/// The services the HTTP handlers dispatch into.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub order_status: Arc<OrderStatusService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogGateway>,
        payment_gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        let repository = Arc::new(OrderRepository::new(db));

        Self {
            orders: Arc::new(OrderService::new(
                repository.clone(),
                catalog.clone(),
                Some(event_sender.clone()),
            )),
            payments: Arc::new(PaymentService::new(
                repository.clone(),
                payment_gateway,
                currency,
                Some(event_sender.clone()),
            )),
            order_status: Arc::new(OrderStatusService::new(
                repository,
                catalog,
                Some(event_sender),
            )),
        }
    }
}

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
