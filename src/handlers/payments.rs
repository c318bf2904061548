use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use bytes::Bytes;
use chrono::Utc;
use tracing::warn;

use crate::{
    errors::ServiceError,
    services::{
        payment_channels::{CreatePaymentChannelRequest, PaymentChannelResponse},
        payments::{verify_callback_signature, CallbackOutcome, PaymentCallback},
    },
    ApiCreated, ApiResponse, ApiResult, AppState,
};

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ServiceError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized(format!("Missing {} header", name)))
}

// POST /api/v1/payments/callback
#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    summary = "Payment channel callback",
    description = "Applies the channel's asynchronous result. Repeated deliveries are answered with the recorded state.",
    request_body = PaymentCallback,
    params(
        ("x-timestamp" = Option<String>, Header, description = "Unix seconds; required when a callback secret is configured"),
        ("x-signature" = Option<String>, Header, description = "Hex HMAC-SHA256 of \"{timestamp}.{body}\""),
    ),
    responses(
        (status = 200, description = "Callback applied or recognised as a repeat", body = ApiResponse<CallbackOutcome>),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown transaction", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<CallbackOutcome> {
    if let Some(secret) = state.config.payment_callback_secret.as_deref() {
        let timestamp = header(&headers, TIMESTAMP_HEADER)?;
        let signature = header(&headers, SIGNATURE_HEADER)?;
        verify_callback_signature(
            secret,
            timestamp,
            signature,
            &body,
            state.config.payment_callback_tolerance_secs,
            Utc::now().timestamp(),
        )
        .map_err(|e| {
            warn!(error = %e, "Payment callback signature verification failed");
            e
        })?;
    }

    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("Invalid callback payload: {}", e)))?;
    let raw = String::from_utf8_lossy(&body).into_owned();

    let outcome = state
        .services
        .payments
        .apply_callback(callback, Some(raw))
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/payment-channels",
    summary = "List payment channels",
    responses(
        (status = 200, description = "Configured channels", body = ApiResponse<Vec<PaymentChannelResponse>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn list_channels(State(state): State<AppState>) -> ApiResult<Vec<PaymentChannelResponse>> {
    let channels = state.services.payment_channels.list().await?;
    Ok(Json(ApiResponse::success(
        channels.into_iter().map(PaymentChannelResponse::from).collect(),
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/payment-channels",
    summary = "Create payment channel",
    request_body = CreatePaymentChannelRequest,
    responses(
        (status = 201, description = "Channel created", body = ApiResponse<PaymentChannelResponse>),
        (status = 400, description = "Invalid configuration", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn create_channel(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentChannelRequest>,
) -> ApiCreated<PaymentChannelResponse> {
    let channel = state.services.payment_channels.create(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(PaymentChannelResponse::from(channel))),
    ))
}
