use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    entities::order::OrderStatus,
    models::{StatusDisplay, StatusMeta},
    services::{
        order_status::TransitionPolicy,
        orders::{OrderResponse, UpdateTrackingRequest},
        payments::TransactionView,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AdminOrderQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Only orders in this status
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Order as seen from the back office.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminOrderDetail {
    pub order: OrderResponse,
    pub transition_policy: TransitionPolicy,
    /// Statuses the order may be moved to next
    pub allowed_targets: Vec<StatusDisplay>,
    pub transactions: Vec<TransactionView>,
}

async fn detail(state: &AppState, id: Uuid) -> Result<AdminOrderDetail, crate::errors::ServiceError> {
    let order = state.services.orders.find(id).await?;
    let table = state.services.order_status.table();
    let allowed_targets = table
        .targets(order.status)
        .into_iter()
        .map(StatusMeta::display)
        .collect();
    let transactions = state
        .services
        .payments
        .transactions_for_order(id)
        .await?
        .into_iter()
        .map(TransactionView::from)
        .collect();
    Ok(AdminOrderDetail {
        transition_policy: table.policy(),
        order: state.services.orders.to_response(order).await?,
        allowed_targets,
        transactions,
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    params(AdminOrderQuery),
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = state.config.page_size(query.limit);
    let (orders, total) = state
        .services
        .orders
        .list_all(query.status, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, total, page, limit,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}",
    summary = "Get order with ledger",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order, allowed next statuses and payment attempts", body = ApiResponse<AdminOrderDetail>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AdminOrderDetail> {
    Ok(Json(ApiResponse::success(detail(&state, id).await?)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    summary = "Advance order status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<AdminOrderDetail>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<AdminOrderDetail> {
    state.services.order_status.advance(id, payload.status).await?;
    Ok(Json(ApiResponse::success(detail(&state, id).await?)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/tracking",
    summary = "Set tracking code",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateTrackingRequest,
    responses(
        (status = 200, description = "Tracking code stored", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Blank or too long", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn update_tracking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTrackingRequest>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.set_tracking_code(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{id}/cancel",
    summary = "Cancel order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<AdminOrderDetail>),
        (status = 400, description = "Order already delivered", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<AdminOrderDetail> {
    state.services.order_status.cancel(id).await?;
    Ok(Json(ApiResponse::success(detail(&state, id).await?)))
}
