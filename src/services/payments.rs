use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::PaymentGatewayConfig,
    entities::order::PaymentStatus,
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::OrderRepository,
    services::orders::OrderResponse,
};

/// A gateway-side payment intent: the secret the client completes payment
/// with and the reference the engine reconciles against later.
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub client_secret: String,
    pub reference_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayIntentStatus {
    pub succeeded: bool,
}

/// Seam to the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an intent for `amount_minor_units`, tagged with the order id
    /// so the record can be reconciled later.
    async fn create_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
        order_id: Uuid,
    ) -> Result<GatewayIntent, ServiceError>;

    /// Fetches the authoritative status of an intent. Confirmation always
    /// goes through this call; a client-supplied "succeeded" flag is never
    /// trusted.
    async fn get_intent_status(
        &self,
        reference_id: &str,
    ) -> Result<GatewayIntentStatus, ServiceError>;
}

/// HTTP payment gateway client (Stripe-style wire shape). Every call
/// carries the configured timeout; transport failures and expiries surface
/// as the retryable gateway-unavailable error.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Serialize)]
struct CreateIntentBody<'a> {
    amount: i64,
    currency: &'a str,
    metadata: IntentMetadata,
}

#[derive(Serialize)]
struct IntentMetadata {
    order_id: Uuid,
}

#[derive(Deserialize)]
struct CreatedIntentBody {
    id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct IntentStatusBody {
    status: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }
}

fn gateway_error(err: reqwest::Error) -> ServiceError {
    ServiceError::GatewayUnavailable(err.to_string())
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn create_intent(
        &self,
        amount_minor_units: i64,
        currency: &str,
        order_id: Uuid,
    ) -> Result<GatewayIntent, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&CreateIntentBody {
                amount: amount_minor_units,
                currency,
                metadata: IntentMetadata { order_id },
            })
            .send()
            .await
            .map_err(gateway_error)?
            .error_for_status()
            .map_err(gateway_error)?;

        let body: CreatedIntentBody = response.json().await.map_err(gateway_error)?;
        Ok(GatewayIntent {
            client_secret: body.client_secret,
            reference_id: body.id,
        })
    }

    #[instrument(skip(self))]
    async fn get_intent_status(
        &self,
        reference_id: &str,
    ) -> Result<GatewayIntentStatus, ServiceError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.base_url, reference_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(gateway_error)?
            .error_for_status()
            .map_err(gateway_error)?;

        let body: IntentStatusBody = response.json().await.map_err(gateway_error)?;
        Ok(GatewayIntentStatus {
            succeeded: body.status == "succeeded",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub order_id: Uuid,
    pub client_secret: String,
    pub reference_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
}

/// Service reconciling gateway payment state into order state.
#[derive(Clone)]
pub struct PaymentService {
    repository: Arc<OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        repository: Arc<OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        currency: String,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            repository,
            gateway,
            currency,
            event_sender,
        }
    }

    /// Creates a payment intent for the order's total. Does not mutate the
    /// order; the client completes payment with the gateway out-of-band and
    /// then submits confirmation.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn create_payment_intent(
        &self,
        order_id: Uuid,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let amount_minor_units = to_minor_units(order.total)?;

        let intent = self
            .gateway
            .create_intent(amount_minor_units, &self.currency, order_id)
            .await?;

        info!(%order_id, reference_id = %intent.reference_id, amount_minor_units, "payment intent created");

        self.emit(Event::PaymentIntentCreated {
            order_id,
            reference_id: intent.reference_id.clone(),
        })
        .await;

        Ok(PaymentIntentResponse {
            order_id,
            client_secret: intent.client_secret,
            reference_id: intent.reference_id,
            amount_minor_units,
            currency: self.currency.clone(),
        })
    }

    /// Confirms a payment against the gateway's authoritative intent status
    /// and applies it to the order.
    ///
    /// Idempotent: confirming an already-completed order is a no-op success,
    /// since gateway webhooks and clients retry. A concurrent confirmation
    /// losing the compare-and-set simply returns the stored completed state.
    #[instrument(skip(self), fields(order_id = %order_id, reference_id = %reference_id))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        reference_id: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.payment_status == PaymentStatus::Completed.to_string() {
            info!(%order_id, "payment already completed, returning stored state");
            let items = self.repository.items_for(order_id).await?;
            return Ok(OrderResponse::from_parts(order, items));
        }

        let status = self.gateway.get_intent_status(reference_id).await?;
        if !status.succeeded {
            return Err(ServiceError::PaymentNotConfirmed(reference_id.to_string()));
        }

        let rows = self
            .repository
            .complete_payment(order_id, reference_id)
            .await?;

        if rows > 0 {
            info!(%order_id, %reference_id, "payment confirmed");
            self.emit(Event::PaymentCaptured {
                order_id,
                transaction_id: reference_id.to_string(),
            })
            .await;
        } else {
            info!(%order_id, "payment was completed concurrently, returning stored state");
        }

        let (order, items) = self
            .repository
            .find_with_items(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        Ok(OrderResponse::from_parts(order, items))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }
}

/// Converts a currency amount into the gateway's minor units (cents),
/// rounding halves away from zero.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("amount {} exceeds minor-unit range", amount))
        })
}
