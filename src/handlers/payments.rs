use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::orders::OrderResponse;
use crate::services::payments::PaymentIntentResponse;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: Uuid,
    pub payment_intent_id: String,
}

/// POST /api/v1/payments/intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentIntentResponse>>), ServiceError> {
    let intent = state
        .services
        .payments
        .create_payment_intent(request.order_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(intent))))
}

/// POST /api/v1/payments/confirm
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .payments
        .confirm_payment(request.order_id, &request.payment_intent_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
