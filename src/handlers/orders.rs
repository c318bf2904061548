use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::Actor,
    errors::ServiceError,
    handlers::common::PaginationParams,
    services::{
        orders::{CheckoutResponse, CreateOrderRequest, OrderResponse, QuoteRequest, QuoteResponse},
        payments::PaymentAttempt,
    },
    ApiCreated, ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct RetryPaymentRequest {
    /// Keeps the order's installment count when omitted
    #[validate(range(min = 1, max = 36))]
    pub installments: Option<i32>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/quote",
    summary = "Price a cart",
    description = "Computes line prices, warranty add-ons, coupon discount and totals without placing an order",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Cart priced", body = ApiResponse<QuoteResponse>),
        (status = 400, description = "Invalid cart or coupon", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn quote_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<QuoteRequest>,
) -> ApiResult<QuoteResponse> {
    let quote = state.services.orders.quote(actor.user_id, payload).await?;
    Ok(Json(ApiResponse::success(quote)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Places an order. Card orders also return the first payment attempt with its 3-D Secure redirect.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CheckoutResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 409, description = "Coupon was used up concurrently", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateOrderRequest>,
) -> ApiCreated<CheckoutResponse> {
    let checkout = state.services.orders.create(actor.user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(checkout))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Caller's orders, newest first", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let (page, limit) = params.resolve(&state.config);
    let (orders, total) = state
        .services
        .orders
        .list_for_user(actor.user_id, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, total, page, limit,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get my order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_my_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get(id, actor.user_id, actor.is_admin())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payments",
    summary = "Retry payment",
    description = "Starts a new card payment attempt for an unpaid, non-cancelled order",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = RetryPaymentRequest,
    responses(
        (status = 201, description = "New attempt with redirect", body = ApiResponse<PaymentAttempt>),
        (status = 400, description = "Order cannot be paid by card", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment channel unavailable; retryable", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    payload: Option<Json<RetryPaymentRequest>>,
) -> ApiCreated<PaymentAttempt> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate().map_err(ServiceError::from)?;
    let attempt = state
        .services
        .payments
        .retry(id, actor.user_id, payload.installments)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(attempt))))
}
