//! Ender Outlet order core
//!
//! Order lifecycle, payment transaction ledger, coupon redemption, return
//! workflow and admin notification fan-out behind a JSON HTTP API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::auth::IdentityRouterExt;
use crate::services::{notifications::NotificationHub, payment_gateway::PaymentGateway};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub notifications: NotificationHub,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Builds the state and returns the receiving end of the event channel,
    /// which the caller hands to [`events::process_events`].
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<(Self, mpsc::Receiver<events::Event>), errors::ServiceError> {
        let (event_sender, event_rx) = events::channel(config.event_channel_capacity);
        let notifications = NotificationHub::new(config.notification_channel_capacity);
        let services = handlers::AppServices::new(
            db.clone(),
            event_sender.clone(),
            notifications.clone(),
            &config,
            gateway,
        )?;
        Ok((
            Self {
                db,
                config,
                event_sender,
                notifications,
                services,
            },
            event_rx,
        ))
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// JSON response with an explicit status, used for 201/202 replies
pub type ApiCreated<T> = Result<(StatusCode, Json<ApiResponse<T>>), errors::ServiceError>;

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(response.message.is_some());
    }
}

/// Every `/api/v1` route, grouped by who may call it.
pub fn api_v1_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .route("/order-statuses", get(handlers::catalog::order_statuses))
        .route(
            "/warranty-categories",
            get(handlers::catalog::warranty_categories),
        )
        .route(
            "/payments/callback",
            post(handlers::payments::payment_callback),
        );

    let customer = Router::new()
        .route("/orders/quote", post(handlers::orders::quote_order))
        .route(
            "/orders",
            get(handlers::orders::list_my_orders).post(handlers::orders::create_order),
        )
        .route("/orders/:id", get(handlers::orders::get_my_order))
        .route(
            "/orders/:id/payments",
            post(handlers::orders::retry_payment),
        )
        .route(
            "/coupons/validate",
            post(handlers::coupons::validate_coupon),
        )
        .route(
            "/returns",
            get(handlers::returns::list_my_returns).post(handlers::returns::create_return),
        )
        .route("/returns/:id", get(handlers::returns::get_my_return))
        .with_identity();

    let admin = Router::new()
        .route("/admin/orders", get(handlers::admin_orders::list_orders))
        .route("/admin/orders/:id", get(handlers::admin_orders::get_order))
        .route(
            "/admin/orders/:id/status",
            put(handlers::admin_orders::update_status),
        )
        .route(
            "/admin/orders/:id/tracking",
            put(handlers::admin_orders::update_tracking),
        )
        .route(
            "/admin/orders/:id/cancel",
            post(handlers::admin_orders::cancel_order),
        )
        .route("/admin/returns", get(handlers::returns::list_returns))
        .route("/admin/returns/:id", put(handlers::returns::resolve_return))
        .route(
            "/admin/returns/:id/refund",
            post(handlers::returns::complete_refund),
        )
        .route(
            "/admin/coupons",
            get(handlers::coupons::list_coupons).post(handlers::coupons::create_coupon),
        )
        .route(
            "/admin/coupons/:id",
            get(handlers::coupons::get_coupon).put(handlers::coupons::update_coupon),
        )
        .route(
            "/admin/payment-channels",
            get(handlers::payments::list_channels).post(handlers::payments::create_channel),
        )
        .route(
            "/admin/notifications",
            post(handlers::notifications::publish_notification),
        )
        .route(
            "/admin/notifications/ws",
            get(handlers::notifications::notifications_ws),
        )
        .admin_only();

    public.merge(customer).merge(admin)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "ender-outlet",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": std::env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), errors::ServiceError> {
    let db_ok = db::check_connection(&state.db).await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let health_data = json!({
        "status": if db_ok { "healthy" } else { "unhealthy" },
        "checks": {
            "database": if db_ok { "healthy" } else { "unhealthy" },
            "notification_sessions": state.notifications.subscriber_count(),
        },
        "transition_policy": state.services.order_status.table().policy(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok((status, Json(ApiResponse::success(health_data))))
}
