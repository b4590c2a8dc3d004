use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::OrderRepository,
    services::catalog::CatalogGateway,
    services::pricing::{self, PricedItem},
};

/// Request/response types for the order service

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "zip_code is required"))]
    pub zip_code: String,
    #[validate(length(min = 1, message = "country is required"))]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: String,
    pub status: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub payment: PaymentInfo,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItemResponse>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_amount: Decimal,
    pub total: Decimal,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    pub fn from_parts(model: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            customer_id: model.customer_id,
            status: model.status,
            payment: PaymentInfo {
                method: model.payment_method,
                status: model.payment_status,
                transaction_id: model.payment_transaction_id,
            },
            shipping_address: ShippingAddress {
                street: model.shipping_street,
                city: model.shipping_city,
                state: model.shipping_state,
                zip_code: model.shipping_zip_code,
                country: model.shipping_country,
            },
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            subtotal: model.subtotal,
            tax: model.tax,
            shipping_amount: model.shipping_amount,
            total: model.total,
            delivered_at: model.delivered_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderListFilter {
    pub customer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub page: u64,
    pub per_page: u64,
}

/// A successfully reserved line: stock is decremented and the unit price
/// snapshotted until the order is persisted or the saga rolls back.
struct ReservedLine {
    product_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
}

/// Service orchestrating order creation: validation, atomic stock
/// reservation with compensating rollback, price snapshot, persistence.
#[derive(Clone)]
pub struct OrderService {
    repository: Arc<OrderRepository>,
    catalog: Arc<dyn CatalogGateway>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        repository: Arc<OrderRepository>,
        catalog: Arc<dyn CatalogGateway>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            repository,
            catalog,
            event_sender,
        }
    }

    /// Creates an order from a cart of product references.
    ///
    /// The reservation phase is a saga: each item is reserved through the
    /// catalog's atomic conditional decrement, and any failure after the
    /// first reservation releases every reservation made in this request
    /// before the error surfaces. No order row is written on any failure
    /// path, so a failed attempt leaves no net stock change behind.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, item_count = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        request.shipping_address.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        let mut reserved: Vec<ReservedLine> = Vec::with_capacity(request.items.len());

        for item in &request.items {
            let product = match self.catalog.get_product(item.product_id).await {
                Ok(Some(product)) => product,
                Ok(None) => {
                    self.release_reservations(&reserved).await;
                    return Err(ServiceError::ProductNotFound(item.product_id));
                }
                Err(e) => {
                    self.release_reservations(&reserved).await;
                    return Err(e);
                }
            };

            match self
                .catalog
                .conditional_decrement_stock(item.product_id, item.quantity)
                .await
            {
                Ok(true) => reserved.push(ReservedLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    // price at the moment of reservation, not a later read
                    unit_price: product.price,
                }),
                Ok(false) => {
                    self.release_reservations(&reserved).await;
                    return Err(ServiceError::InsufficientStock(item.product_id));
                }
                Err(e) => {
                    self.release_reservations(&reserved).await;
                    return Err(e);
                }
            }
        }

        let priced: Vec<PricedItem> = reserved
            .iter()
            .map(|line| PricedItem {
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect();
        let totals = pricing::price_items(&priced).rounded();

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", order_id.to_string()[..8].to_uppercase())),
            customer_id: Set(request.customer_id),
            status: Set(OrderStatus::Processing.to_string()),
            payment_method: Set(request.payment_method.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_transaction_id: Set(None),
            shipping_street: Set(request.shipping_address.street.clone()),
            shipping_city: Set(request.shipping_address.city.clone()),
            shipping_state: Set(request.shipping_address.state.clone()),
            shipping_zip_code: Set(request.shipping_address.zip_code.clone()),
            shipping_country: Set(request.shipping_address.country.clone()),
            subtotal: Set(totals.subtotal),
            tax: Set(totals.tax),
            shipping_amount: Set(totals.shipping),
            total: Set(totals.total),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let item_models: Vec<order_item::ActiveModel> = reserved
            .iter()
            .map(|line| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                created_at: Set(now),
            })
            .collect();

        // A persistence failure means no order was durably recorded, so the
        // reservations must be released exactly as on a mid-cart failure.
        let (order_model, item_models) = match self
            .repository
            .insert_with_items(order_model, item_models)
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(error = %e, %order_id, "failed to persist order, releasing reservations");
                self.release_reservations(&reserved).await;
                return Err(e);
            }
        };

        info!(%order_id, customer_id = %request.customer_id, total = %order_model.total, "order created");

        self.emit(Event::OrderCreated(order_id)).await;

        Ok(OrderResponse::from_parts(order_model, item_models))
    }

    /// Retrieves an order with its line items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let (order_model, items) = self
            .repository
            .find_with_items(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        Ok(OrderResponse::from_parts(order_model, items))
    }

    /// Lists orders, newest first, optionally filtered by owner and status.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: OrderListFilter,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = filter.page.max(1);
        let per_page = filter.per_page.max(1);

        let (orders, total) = self
            .repository
            .find_filtered(filter.customer_id, filter.status, page, per_page)
            .await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in self.repository.items_for_orders(&order_ids).await? {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        let orders = orders
            .into_iter()
            .map(|order_model| {
                let items = items_by_order.remove(&order_model.id).unwrap_or_default();
                OrderResponse::from_parts(order_model, items)
            })
            .collect();

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Compensates every decrement applied so far in this request.
    async fn release_reservations(&self, reserved: &[ReservedLine]) {
        for line in reserved {
            if let Err(e) = self
                .catalog
                .compensating_increment_stock(line.product_id, line.quantity)
                .await
            {
                // Nothing left to do but flag it for reconciliation.
                error!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    "failed to release reserved stock during rollback"
                );
            }
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }
}
