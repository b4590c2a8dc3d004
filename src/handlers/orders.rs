use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrderRequest, OrderListFilter, OrderResponse};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub customer_id: Option<Uuid>,
    pub status: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// GET /api/v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<OrderListParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let status = params
        .status
        .as_deref()
        .map(|s| OrderStatus::from_str(s).map_err(|_| ServiceError::InvalidStatus(s.to_string())))
        .transpose()?;

    let list = state
        .services
        .orders
        .list_orders(OrderListFilter {
            customer_id: params.customer_id,
            status,
            page: params.page,
            per_page: params.limit,
        })
        .await?;

    let total_pages = list.total.div_ceil(list.per_page.max(1));
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: list.orders,
        total: list.total,
        page: list.page,
        limit: list.per_page,
        total_pages,
    })))
}

/// PUT /api/v1/orders/{id}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let new_status = OrderStatus::from_str(&request.status)
        .map_err(|_| ServiceError::InvalidStatus(request.status.clone()))?;

    let order = state.services.order_status.transition(id, new_status).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /api/v1/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.order_status.cancel(id).await?;
    Ok(Json(ApiResponse::success(order)))
}
