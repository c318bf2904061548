//! Return and exchange requests from filing through refund.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, Caller, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// Places a bank transfer order and optionally walks it to `delivered`.
async fn order_with_item(app: &TestApp, deliver: bool) -> (String, String) {
    let fridge = app
        .seed_product("Arçelik 270560 EB No Frost Buzdolabı", "Buzdolabı", dec!(8999), None)
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": fridge.id, "quantity": 1 }],
                "shipping_address": "Konak, Izmir",
                "payment_method": "bank-transfer"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();
    let item_id = body["data"]["order"]["items"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    if deliver {
        let moved = app
            .request(
                Method::PUT,
                &format!("/api/v1/admin/orders/{}/status", order_id),
                Some(json!({ "status": "delivered" })),
                app.admin(),
            )
            .await;
        assert_eq!(moved.status(), StatusCode::OK);
    }
    (order_id, item_id)
}

async fn file_return(app: &TestApp, item_id: &str, return_type: &str, caller: Caller) -> axum::response::Response {
    app.request(
        Method::POST,
        "/api/v1/returns",
        Some(json!({
            "order_item_id": item_id,
            "return_type": return_type,
            "reason": "Compressor is noisy and the freezer does not cool"
        })),
        caller,
    )
    .await
}

async fn resolve(app: &TestApp, return_id: &str, decision: &str) -> axum::response::Response {
    app.request(
        Method::PUT,
        &format!("/api/v1/admin/returns/{}", return_id),
        Some(json!({ "decision": decision, "admin_notes": "  checked by support  " })),
        app.admin(),
    )
    .await
}

#[tokio::test]
async fn returns_require_a_delivered_order() {
    let app = TestApp::new().await;
    let (_, item_id) = order_with_item(&app, false).await;

    let response = file_return(&app, &item_id, "return", app.customer()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_the_owner_can_file_a_return() {
    let app = TestApp::new().await;
    let (_, item_id) = order_with_item(&app, true).await;

    let stranger = file_return(&app, &item_id, "return", Caller::Customer(Uuid::new_v4())).await;
    assert_eq!(stranger.status(), StatusCode::NOT_FOUND);

    let unknown_item = file_return(&app, &Uuid::new_v4().to_string(), "return", app.customer()).await;
    assert_eq!(unknown_item.status(), StatusCode::NOT_FOUND);

    let blank_reason = app
        .request(
            Method::POST,
            "/api/v1/returns",
            Some(json!({ "order_item_id": item_id, "return_type": "return", "reason": "   " })),
            app.customer(),
        )
        .await;
    assert_eq!(blank_reason.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn approved_return_is_refunded_exactly_once() {
    let app = TestApp::new().await;
    let (order_id, item_id) = order_with_item(&app, true).await;

    let filed = file_return(&app, &item_id, "return", app.customer()).await;
    assert_eq!(filed.status(), StatusCode::CREATED);
    let body = response_json(filed).await;
    let request = &body["data"];
    assert_eq!(request["status"], "pending");
    assert_eq!(request["order_id"], order_id.as_str());
    assert_eq!(request["refund_pending"], false);
    assert!(request["response_date"].is_null());
    let return_id = request["id"].as_str().unwrap().to_string();

    let duplicate = file_return(&app, &item_id, "exchange", app.customer()).await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let early_refund = app
        .request(
            Method::POST,
            &format!("/api/v1/admin/returns/{}/refund", return_id),
            None,
            app.admin(),
        )
        .await;
    assert_eq!(early_refund.status(), StatusCode::BAD_REQUEST);

    let approved = resolve(&app, &return_id, "approved").await;
    assert_eq!(approved.status(), StatusCode::OK);
    let body = response_json(approved).await;
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["data"]["admin_notes"], "checked by support");
    assert_eq!(body["data"]["refund_pending"], true);
    assert!(!body["data"]["response_date"].is_null());

    let again = resolve(&app, &return_id, "rejected").await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let still_open = file_return(&app, &item_id, "return", app.customer()).await;
    assert_eq!(still_open.status(), StatusCode::CONFLICT);

    let refund_uri = format!("/api/v1/admin/returns/{}/refund", return_id);
    let refunded = app.request(Method::POST, &refund_uri, None, app.admin()).await;
    assert_eq!(refunded.status(), StatusCode::OK);
    let body = response_json(refunded).await;
    assert_eq!(body["data"]["refund_pending"], false);
    assert!(!body["data"]["refund_completed_at"].is_null());

    let twice = app.request(Method::POST, &refund_uri, None, app.admin()).await;
    assert_eq!(twice.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rejection_frees_the_item_for_a_new_request() {
    let app = TestApp::new().await;
    let (_, item_id) = order_with_item(&app, true).await;

    let filed = response_json(file_return(&app, &item_id, "exchange", app.customer()).await).await;
    let return_id = filed["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(filed["data"]["return_type"], "exchange");

    let rejected = resolve(&app, &return_id, "rejected").await;
    assert_eq!(rejected.status(), StatusCode::OK);
    let body = response_json(rejected).await;
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["refund_pending"], false);

    let refiled = file_return(&app, &item_id, "return", app.customer()).await;
    assert_eq!(refiled.status(), StatusCode::CREATED);

    let mine = app
        .request(Method::GET, "/api/v1/returns", None, app.customer())
        .await;
    let body = response_json(mine).await;
    assert_eq!(body["data"]["total"], 2);
}

#[tokio::test]
async fn customers_see_only_their_returns_and_admins_filter_by_status() {
    let app = TestApp::new().await;
    let (_, item_id) = order_with_item(&app, true).await;
    let filed = response_json(file_return(&app, &item_id, "return", app.customer()).await).await;
    let return_id = filed["data"]["id"].as_str().unwrap();
    let uri = format!("/api/v1/returns/{}", return_id);

    let own = app.request(Method::GET, &uri, None, app.customer()).await;
    assert_eq!(own.status(), StatusCode::OK);
    let stranger = app
        .request(Method::GET, &uri, None, Caller::Customer(Uuid::new_v4()))
        .await;
    assert_eq!(stranger.status(), StatusCode::NOT_FOUND);

    let pending: Value = response_json(
        app.request(Method::GET, "/api/v1/admin/returns?status=pending", None, app.admin())
            .await,
    )
    .await;
    assert_eq!(pending["data"]["total"], 1);
    assert_eq!(pending["data"]["items"][0]["status_display"]["code"], "pending");

    let approved: Value = response_json(
        app.request(Method::GET, "/api/v1/admin/returns?status=approved", None, app.admin())
            .await,
    )
    .await;
    assert_eq!(approved["data"]["total"], 0);

    let as_customer = app
        .request(Method::GET, "/api/v1/admin/returns", None, app.customer())
        .await;
    assert_eq!(as_customer.status(), StatusCode::FORBIDDEN);
}
