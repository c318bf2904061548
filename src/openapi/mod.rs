use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{USER_ID_HEADER, USER_ROLE_HEADER};

/// Registers the identity headers set by the upstream gateway.
struct IdentityHeaders;

impl Modify for IdentityHeaders {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "user_id",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                USER_ID_HEADER,
                "Authenticated user id (UUID) forwarded by the gateway",
            ))),
        );
        components.add_security_scheme(
            "user_role",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                USER_ROLE_HEADER,
                "customer or admin; defaults to customer",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ender Outlet API",
        version = "0.1.0",
        description = r#"
# Ender Outlet order core

Checkout, payment reconciliation, coupons and returns for the Ender Outlet storefront.

## Identity

Requests arrive through a gateway that has already authenticated the caller and forwards:

```
x-user-id: <uuid>
x-user-role: customer | admin
```

`/admin/*` routes require the admin role. The payment channel callback is unauthenticated
but may be signed with `x-timestamp` and `x-signature` when a callback secret is configured.

## Money

Amounts are decimal strings in the order currency, rounded half-up to two places.

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 20, capped by configuration).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&IdentityHeaders),
    tags(
        (name = "catalog", description = "Status labels and warranty price table"),
        (name = "orders", description = "Checkout and customer order history"),
        (name = "coupons", description = "Coupon previews"),
        (name = "payments", description = "Payment channel callbacks"),
        (name = "returns", description = "Return and exchange requests"),
        (name = "admin", description = "Back-office order, return, coupon and channel management")
    ),
    paths(
        // Catalog
        crate::handlers::catalog::order_statuses,
        crate::handlers::catalog::warranty_categories,

        // Orders
        crate::handlers::orders::quote_order,
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_my_order,
        crate::handlers::orders::retry_payment,

        // Coupons
        crate::handlers::coupons::validate_coupon,

        // Payments
        crate::handlers::payments::payment_callback,

        // Returns
        crate::handlers::returns::create_return,
        crate::handlers::returns::list_my_returns,
        crate::handlers::returns::get_my_return,

        // Admin
        crate::handlers::admin_orders::list_orders,
        crate::handlers::admin_orders::get_order,
        crate::handlers::admin_orders::update_status,
        crate::handlers::admin_orders::update_tracking,
        crate::handlers::admin_orders::cancel_order,
        crate::handlers::returns::list_returns,
        crate::handlers::returns::resolve_return,
        crate::handlers::returns::complete_refund,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::get_coupon,
        crate::handlers::coupons::update_coupon,
        crate::handlers::payments::list_channels,
        crate::handlers::payments::create_channel,
        crate::handlers::notifications::notifications_ws,
        crate::handlers::notifications::publish_notification,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,
            crate::errors::ErrorResponse,
            crate::models::status_display::StatusDisplay,

            // Status enums
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order_item::WarrantyPlan,
            crate::entities::coupon::DiscountType,
            crate::entities::payment_channel::ChannelKind,
            crate::entities::payment_transaction::TransactionStatus,
            crate::entities::return_request::ReturnType,
            crate::entities::return_request::ReturnStatus,

            // Orders
            crate::services::pricing::CartLine,
            crate::services::pricing::PricedLine,
            crate::services::pricing::Totals,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::QuoteRequest,
            crate::services::orders::QuoteResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderResponse,
            crate::services::orders::CheckoutResponse,
            crate::services::orders::UpdateTrackingRequest,
            crate::handlers::orders::RetryPaymentRequest,
            crate::handlers::admin_orders::UpdateStatusRequest,
            crate::handlers::admin_orders::AdminOrderDetail,

            // Payments
            crate::services::payment_gateway::ChargeInitiation,
            crate::services::payments::CallbackStatus,
            crate::services::payments::PaymentCallback,
            crate::services::payments::CallbackOutcome,
            crate::services::payments::PaymentAttempt,
            crate::services::payments::TransactionView,
            crate::services::payment_channels::CreatePaymentChannelRequest,
            crate::services::payment_channels::PaymentChannelResponse,

            // Coupons
            crate::services::coupons::ValidateCouponRequest,
            crate::services::coupons::CouponValidation,
            crate::services::coupons::CreateCouponRequest,
            crate::services::coupons::UpdateCouponRequest,
            crate::services::coupons::CouponResponse,

            // Returns
            crate::services::returns::CreateReturnRequest,
            crate::services::returns::ReturnDecision,
            crate::services::returns::ResolveReturnRequest,
            crate::services::returns::ReturnResponse,

            // Catalog and notifications
            crate::handlers::catalog::StatusCatalog,
            crate::handlers::catalog::WarrantyPrice,
            crate::services::notifications::Notification,
            crate::services::notifications::PublishNotificationRequest,
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
