use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the settlement engine. Delivery is best-effort;
/// a failed send never fails the operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    PaymentIntentCreated {
        order_id: Uuid,
        reference_id: String,
    },
    PaymentCaptured {
        order_id: Uuid,
        transaction_id: String,
    },
    StockRestored {
        product_id: Uuid,
        quantity: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Spawned once at startup;
/// exits when every sender has been dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "event: order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "event: order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "event: order cancelled");
            }
            Event::PaymentIntentCreated {
                order_id,
                reference_id,
            } => {
                info!(%order_id, %reference_id, "event: payment intent created");
            }
            Event::PaymentCaptured {
                order_id,
                transaction_id,
            } => {
                info!(%order_id, %transaction_id, "event: payment captured");
            }
            Event::StockRestored {
                product_id,
                quantity,
            } => {
                info!(%product_id, quantity, "event: stock restored");
            }
        }
    }
}
