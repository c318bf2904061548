//! End-to-end tests for checkout and the admin-driven order lifecycle.
//!
//! Covers:
//! - Pricing with warranty add-ons and coupons (quote and checkout)
//! - Bank transfer orders starting in `preparing`
//! - Ownership and role checks on customer and admin routes
//! - Transition table presets, cancellation and tracking codes

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, response_json, Caller, TestApp};
use ender_outlet::entities::coupon::DiscountType;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

async fn bank_transfer_order(app: &TestApp) -> Value {
    let fridge = app
        .seed_product("Arçelik 270560 EB No Frost Buzdolabı", "Buzdolabı", dec!(5000), None)
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": fridge.id, "quantity": 1 }],
                "shipping_address": "Kadikoy, Istanbul",
                "payment_method": "bank-transfer"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"]["order"].clone()
}

// ==================== Checkout ====================

#[tokio::test]
async fn bank_transfer_checkout_prices_warranty_and_coupon() {
    let app = TestApp::new().await;
    let fridge = app
        .seed_product("Arçelik 590640 EI Gardırop Tipi Buzdolabı", "Buzdolabı", dec!(5000), Some(dec!(6000)))
        .await;
    app.seed_warranty("Buzdolabı", dec!(500), dec!(900)).await;
    app.seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), dec!(500), 0)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": fridge.id, "quantity": 2, "warranty_plan": "two_year" }],
                "shipping_address": "Besiktas, Istanbul",
                "payment_method": "bank-transfer",
                "coupon_code": "save10"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let order = &body["data"]["order"];
    assert_eq!(decimal(&order["original_amount"]), dec!(10500));
    assert_eq!(decimal(&order["discount_amount"]), dec!(1050));
    assert_eq!(decimal(&order["total_amount"]), dec!(9450));
    assert_eq!(order["coupon_code"], "SAVE10");
    assert_eq!(order["status"], "preparing");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["status_display"]["code"], "preparing");
    assert!(order["order_number"].as_str().unwrap().starts_with("EO-"));

    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(decimal(&items[0]["unit_price"]), dec!(5000));
    assert_eq!(decimal(&items[0]["warranty_price"]), dec!(500));
    assert_eq!(decimal(&items[0]["line_total"]), dec!(10500));
    assert!(body["data"]["payment"].is_null());
}

#[tokio::test]
async fn quote_prices_cart_without_consuming_coupon() {
    let app = TestApp::new().await;
    let appliance = app
        .seed_product("Arçelik K 8060 Kettle", "Küçük Ev Aletleri", dec!(0), Some(dec!(449.90)))
        .await;
    let coupon = app
        .seed_coupon("FIFTY", DiscountType::FixedAmount, dec!(50), dec!(0), 1)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders/quote",
            Some(json!({
                "items": [{ "product_id": appliance.id, "quantity": 3 }],
                "coupon_code": "FIFTY"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(decimal(&body["data"]["lines"][0]["unit_price"]), dec!(449.90));
    assert_eq!(decimal(&body["data"]["totals"]["original_amount"]), dec!(1349.70));
    assert_eq!(decimal(&body["data"]["totals"]["total_amount"]), dec!(1299.70));

    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.used_count, 0);
}

#[tokio::test]
async fn warranty_for_uncovered_category_is_rejected() {
    let app = TestApp::new().await;
    let plate = app
        .seed_product("Arçelik Buzdolabı Su Filtresi", "Yedek Parça", dec!(649), None)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": plate.id, "quantity": 1, "warranty_plan": "four_year" }],
                "shipping_address": "Ankara",
                "payment_method": "bank-transfer"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mine = app
        .request(Method::GET, "/api/v1/orders", None, app.customer())
        .await;
    let body = response_json(mine).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn checkout_validates_request() {
    let app = TestApp::new().await;
    let empty = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [],
                "shipping_address": "Izmir",
                "payment_method": "bank-transfer"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let unknown_product = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": Uuid::new_v4(), "quantity": 1 }],
                "shipping_address": "Izmir",
                "payment_method": "bank-transfer"
            })),
            app.customer(),
        )
        .await;
    assert!(unknown_product.status().is_client_error());
}

// ==================== Identity ====================

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let order = bank_transfer_order(&app).await;
    let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());

    let own = app.request(Method::GET, &uri, None, app.customer()).await;
    assert_eq!(own.status(), StatusCode::OK);

    let stranger = app
        .request(Method::GET, &uri, None, Caller::Customer(Uuid::new_v4()))
        .await;
    assert_eq!(stranger.status(), StatusCode::NOT_FOUND);

    let anonymous = app.request(Method::GET, &uri, None, Caller::Anonymous).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = TestApp::new().await;
    let as_customer = app
        .request(Method::GET, "/api/v1/admin/orders", None, app.customer())
        .await;
    assert_eq!(as_customer.status(), StatusCode::FORBIDDEN);

    let as_admin = app
        .request(Method::GET, "/api/v1/admin/orders", None, app.admin())
        .await;
    assert_eq!(as_admin.status(), StatusCode::OK);
}

// ==================== Admin lifecycle ====================

#[tokio::test]
async fn permissive_policy_allows_any_move_but_not_back_to_pending() {
    let app = TestApp::new().await;
    let order = bank_transfer_order(&app).await;
    let id = order["id"].as_str().unwrap();
    let status_uri = format!("/api/v1/admin/orders/{}/status", id);

    let delivered = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "delivered" })),
            app.admin(),
        )
        .await;
    assert_eq!(delivered.status(), StatusCode::OK);
    let body = response_json(delivered).await;
    assert_eq!(body["data"]["order"]["status"], "delivered");
    assert_eq!(body["data"]["transition_policy"], "permissive");

    let back_to_preparing = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "preparing" })),
            app.admin(),
        )
        .await;
    assert_eq!(back_to_preparing.status(), StatusCode::OK);

    let pending = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "pending" })),
            app.admin(),
        )
        .await;
    assert_eq!(pending.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sequential_policy_only_allows_the_next_state() {
    let app = TestApp::with_config(|cfg| cfg.order_transition_policy = "sequential".into()).await;
    let order = bank_transfer_order(&app).await;
    let id = order["id"].as_str().unwrap();
    let status_uri = format!("/api/v1/admin/orders/{}/status", id);

    let detail = app
        .request(
            Method::GET,
            &format!("/api/v1/admin/orders/{}", id),
            None,
            app.admin(),
        )
        .await;
    let body = response_json(detail).await;
    let targets: Vec<&str> = body["data"]["allowed_targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["code"].as_str().unwrap())
        .collect();
    assert_eq!(targets, vec!["ready_to_ship", "cancelled"]);

    let skip = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({ "status": "shipped" })),
            app.admin(),
        )
        .await;
    assert_eq!(skip.status(), StatusCode::BAD_REQUEST);

    for next in ["ready_to_ship", "shipped", "in_transit", "delivered"] {
        let step = app
            .request(
                Method::PUT,
                &status_uri,
                Some(json!({ "status": next })),
                app.admin(),
            )
            .await;
        assert_eq!(step.status(), StatusCode::OK, "step to {next}");
    }

    let cancel = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/orders/{}/cancel", id),
            None,
            app.admin(),
        )
        .await;
    assert_eq!(cancel.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_is_idempotent_for_open_orders() {
    let app = TestApp::new().await;
    let order = bank_transfer_order(&app).await;
    let cancel_uri = format!("/api/v1/admin/orders/{}/cancel", order["id"].as_str().unwrap());

    for _ in 0..2 {
        let response = app.request(Method::POST, &cancel_uri, None, app.admin()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["data"]["order"]["status"], "cancelled");
    }
}

#[tokio::test]
async fn tracking_code_is_trimmed_and_version_checked() {
    let app = TestApp::new().await;
    let order = bank_transfer_order(&app).await;
    let uri = format!("/api/v1/admin/orders/{}/tracking", order["id"].as_str().unwrap());

    let blank = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "tracking_code": "   " })),
            app.admin(),
        )
        .await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let set = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "tracking_code": "  YK123456789TR ", "version": order["version"] })),
            app.admin(),
        )
        .await;
    assert_eq!(set.status(), StatusCode::OK);
    let body = response_json(set).await;
    assert_eq!(body["data"]["tracking_code"], "YK123456789TR");

    let stale = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "tracking_code": "YK000", "version": order["version"] })),
            app.admin(),
        )
        .await;
    assert_eq!(stale.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_list_filters_by_status() {
    let app = TestApp::new().await;
    let order = bank_transfer_order(&app).await;
    bank_transfer_order(&app).await;
    app.state
        .services
        .order_status
        .cancel(order["id"].as_str().unwrap().parse().unwrap())
        .await
        .unwrap();

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/orders?status=cancelled",
            None,
            app.admin(),
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["id"], order["id"]);
}
