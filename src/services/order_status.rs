use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::OrderRepository,
    services::catalog::CatalogGateway,
    services::orders::OrderResponse,
};

/// The transition table. Forward edges only: `processing` may ship or be
/// cancelled, `shipped` may only be delivered. `delivered` and `cancelled`
/// are terminal, and a shipped order can no longer be cancelled (undoing a
/// shipment is a returns flow, not a cancellation).
pub fn is_legal_transition(from: OrderStatus, to: OrderStatus) -> bool {
    matches!(
        (from, to),
        (OrderStatus::Processing, OrderStatus::Shipped)
            | (OrderStatus::Processing, OrderStatus::Cancelled)
            | (OrderStatus::Shipped, OrderStatus::Delivered)
    )
}

/// Drives the order fulfillment status through its legal transitions.
#[derive(Clone)]
pub struct OrderStatusService {
    repository: Arc<OrderRepository>,
    catalog: Arc<dyn CatalogGateway>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderStatusService {
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

    /// Applies a status transition.
    ///
    /// The write is a compare-and-set against the status the transition was
    /// validated from, so two operators racing the same order cannot both
    /// win; the loser sees a concurrent-modification error. Entering
    /// `delivered` stamps `delivered_at` exactly once, and cancelling
    /// restores the stock every line item reserved.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let current = OrderStatus::from_str(&order.status)
            .map_err(|_| ServiceError::InvalidStatus(order.status.clone()))?;

        if !is_legal_transition(current, new_status) {
            return Err(ServiceError::IllegalTransition {
                from: current,
                to: new_status,
            });
        }

        let delivered_at = (new_status == OrderStatus::Delivered).then(Utc::now);

        let rows = self
            .repository
            .transition_status(order_id, current, new_status, delivered_at)
            .await?;
        if rows == 0 {
            warn!(%order_id, from = %current, to = %new_status, "status transition lost a concurrent race");
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        info!(%order_id, from = %current, to = %new_status, "order status updated");

        if new_status == OrderStatus::Cancelled {
            self.restore_stock(order_id).await?;
            self.emit(Event::OrderCancelled(order_id)).await;
        }

        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: current.to_string(),
            new_status: new_status.to_string(),
        })
        .await;

        let (order, items) = self
            .repository
            .find_with_items(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        Ok(OrderResponse::from_parts(order, items))
    }

    /// Cancels an order (a `processing -> cancelled` transition).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    /// Returns every line item's reserved stock to the catalog.
    async fn restore_stock(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let items = self.repository.items_for(order_id).await?;

        for item in items {
            match self
                .catalog
                .compensating_increment_stock(item.product_id, item.quantity)
                .await
            {
                Ok(()) => {
                    self.emit(Event::StockRestored {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    })
                    .await;
                }
                Err(e) => {
                    // The order is already cancelled; flag the leak for
                    // reconciliation instead of failing the transition.
                    error!(
                        %order_id,
                        product_id = %item.product_id,
                        quantity = item.quantity,
                        error = %e,
                        "failed to restore stock for cancelled order"
                    );
                }
            }
        }

        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }
}
