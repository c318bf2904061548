//! Coupon preview, redemption and usage-limit races.

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, response_json, Caller, TestApp};
use assert_matches::assert_matches;
use ender_outlet::{
    entities::coupon::DiscountType,
    errors::ServiceError,
    services::coupons::{CouponService, UpdateCouponRequest},
};
use futures::future::join_all;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn validate_previews_discount_without_redeeming() {
    let app = TestApp::new().await;
    let coupon = app
        .seed_coupon("SAVE10", DiscountType::Percentage, dec!(10), dec!(500), 5)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": " save10 ", "order_subtotal": "1200.00" })),
            app.customer(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["code"], "SAVE10");
    assert_eq!(decimal(&body["data"]["discount_amount"]), dec!(120));
    assert_eq!(decimal(&body["data"]["total_after_discount"]), dec!(1080));

    let below_minimum = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": "SAVE10", "order_subtotal": "499.99" })),
            app.customer(),
        )
        .await;
    assert_eq!(below_minimum.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": "NOPE", "order_subtotal": "1200" })),
            app.customer(),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let anonymous = app
        .request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": "SAVE10", "order_subtotal": "1200" })),
            Caller::Anonymous,
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.used_count, 0);
}

#[tokio::test]
async fn checkout_redeems_once_per_order() {
    let app = TestApp::new().await;
    let appliance = app
        .seed_product("Arçelik K 8060 Kettle", "Küçük Ev Aletleri", dec!(449.90), None)
        .await;
    let coupon = app
        .seed_coupon("FIFTY", DiscountType::FixedAmount, dec!(50), dec!(0), 2)
        .await;

    for expected_used in 1..=2 {
        let response = app
            .request(
                Method::POST,
                "/api/v1/orders",
                Some(json!({
                    "items": [{ "product_id": appliance.id, "quantity": 1 }],
                    "shipping_address": "Antalya",
                    "payment_method": "bank-transfer",
                    "coupon_code": "FIFTY"
                })),
                app.customer(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
        assert_eq!(stored.used_count, expected_used);
    }

    let exhausted = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": appliance.id, "quantity": 1 }],
                "shipping_address": "Antalya",
                "payment_method": "bank-transfer",
                "coupon_code": "FIFTY"
            })),
            app.customer(),
        )
        .await;
    assert_eq!(exhausted.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn concurrent_checkouts_cannot_overspend_a_single_use_coupon() {
    let app = TestApp::new().await;
    let fridge = app
        .seed_product("Arçelik 270560 EB No Frost Buzdolabı", "Buzdolabı", dec!(8999), None)
        .await;
    let coupon = app
        .seed_coupon("ONCE", DiscountType::Percentage, dec!(15), dec!(0), 1)
        .await;

    let attempts = (0..5).map(|_| {
        let body = json!({
            "items": [{ "product_id": fridge.id, "quantity": 1 }],
            "shipping_address": "Eskisehir",
            "payment_method": "bank-transfer",
            "coupon_code": "ONCE"
        });
        let caller = Caller::Customer(Uuid::new_v4());
        let app = &app;
        async move { app.request(Method::POST, "/api/v1/orders", Some(body), caller).await }
    });
    let statuses: Vec<StatusCode> = join_all(attempts)
        .await
        .into_iter()
        .map(|response| response.status())
        .collect();

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    assert_eq!(created, 1, "statuses: {statuses:?}");
    assert!(statuses
        .iter()
        .filter(|s| **s != StatusCode::CREATED)
        .all(|s| *s == StatusCode::BAD_REQUEST || *s == StatusCode::CONFLICT));

    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.used_count, 1);
}

#[tokio::test]
async fn raising_the_limit_reopens_an_exhausted_coupon() {
    let app = TestApp::new().await;
    let appliance = app
        .seed_product("Arçelik K 3190 Buharlı Ütü", "Küçük Ev Aletleri", dec!(529.90), None)
        .await;
    let coupon = app
        .seed_coupon("PETG20", DiscountType::Percentage, dec!(20), dec!(0), 1)
        .await;
    let order = json!({
        "items": [{ "product_id": appliance.id, "quantity": 1 }],
        "shipping_address": "Trabzon",
        "payment_method": "bank-transfer",
        "coupon_code": "PETG20"
    });

    let first = app
        .request(Method::POST, "/api/v1/orders", Some(order.clone()), app.customer())
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let body = response_json(first).await;
    assert_eq!(decimal(&body["data"]["order"]["discount_amount"]), dec!(105.98));

    let current = app.state.services.coupons.get(coupon.id).await.unwrap();
    app.state
        .services
        .coupons
        .update(
            coupon.id,
            UpdateCouponRequest {
                version: current.version,
                description: None,
                discount_type: None,
                value: None,
                min_order_amount: None,
                max_discount: None,
                usage_limit: Some(2),
                used_count: None,
                is_active: None,
                valid_from: None,
                valid_until: None,
            },
        )
        .await
        .unwrap();

    let second = app
        .request(Method::POST, "/api/v1/orders", Some(order), app.customer())
        .await;
    assert_eq!(second.status(), StatusCode::CREATED);
    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.used_count, 2);
}

#[tokio::test]
async fn redeeming_an_exhausted_coupon_is_a_conflict() {
    let app = TestApp::new().await;
    let coupon = app
        .seed_coupon("LASTONE", DiscountType::FixedAmount, dec!(25), dec!(0), 1)
        .await;

    CouponService::redeem_on(&*app.state.db, coupon.id).await.unwrap();
    assert_matches!(
        CouponService::redeem_on(&*app.state.db, coupon.id).await,
        Err(ServiceError::Conflict(_))
    );

    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.used_count, 1);
}

#[tokio::test]
async fn parallel_redemptions_on_a_pooled_database_take_one_use() {
    let app = TestApp::with_config(|cfg| cfg.db_max_connections = 4).await;
    let coupon = app
        .seed_coupon("RACE", DiscountType::Percentage, dec!(10), dec!(0), 1)
        .await;

    let coupon_id = coupon.id;
    let attempts = (0..8).map(|_| {
        let db = app.state.db.clone();
        tokio::spawn(async move { CouponService::redeem_on(&*db, coupon_id).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("redeem task"))
        .collect();

    let redeemed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(redeemed, 1, "results: {results:?}");
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(ServiceError::Conflict(_)))));

    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.used_count, 1);
}

#[tokio::test]
async fn usage_limit_cannot_drop_below_redemptions() {
    let app = TestApp::new().await;
    let coupon = app
        .seed_coupon("TWICE", DiscountType::FixedAmount, dec!(10), dec!(0), 2)
        .await;
    CouponService::redeem_on(&*app.state.db, coupon.id).await.unwrap();
    CouponService::redeem_on(&*app.state.db, coupon.id).await.unwrap();

    let uri = format!("/api/v1/admin/coupons/{}", coupon.id);
    let lowered = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "version": 1, "usage_limit": 1 })),
            app.admin(),
        )
        .await;
    assert_eq!(lowered.status(), StatusCode::BAD_REQUEST);

    let stored = app.state.services.coupons.get(coupon.id).await.unwrap();
    assert_eq!(stored.usage_limit, 2);
    assert_eq!(stored.used_count, 2);
    assert_eq!(stored.version, 1);

    // Correcting the counter in the same edit is allowed
    let corrected = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "version": 1, "usage_limit": 1, "used_count": 1 })),
            app.admin(),
        )
        .await;
    assert_eq!(corrected.status(), StatusCode::OK);

    let unlimited = app
        .request(
            Method::PUT,
            &uri,
            Some(json!({ "version": 2, "usage_limit": 0 })),
            app.admin(),
        )
        .await;
    assert_eq!(unlimited.status(), StatusCode::OK);
}

#[tokio::test]
async fn explicit_null_clears_cap_and_expiry() {
    let app = TestApp::new().await;
    let created = app
        .request(
            Method::POST,
            "/api/v1/admin/coupons",
            Some(json!({
                "code": "CAPPED",
                "discount_type": "percentage",
                "value": "20",
                "max_discount": "100",
                "valid_until": "2099-01-01T00:00:00Z"
            })),
            app.admin(),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let id = response_json(created).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/v1/admin/coupons/{}", id);

    let untouched = response_json(
        app.request(
            Method::PUT,
            &uri,
            Some(json!({ "version": 1, "description": "Spring" })),
            app.admin(),
        )
        .await,
    )
    .await;
    assert_eq!(decimal(&untouched["data"]["max_discount"]), dec!(100));
    assert!(!untouched["data"]["valid_until"].is_null());

    let cleared = response_json(
        app.request(
            Method::PUT,
            &uri,
            Some(json!({ "version": 2, "max_discount": null, "valid_until": null })),
            app.admin(),
        )
        .await,
    )
    .await;
    assert!(cleared["data"]["max_discount"].is_null());
    assert!(cleared["data"]["valid_until"].is_null());

    let preview = response_json(
        app.request(
            Method::POST,
            "/api/v1/coupons/validate",
            Some(json!({ "code": "CAPPED", "order_subtotal": "1000" })),
            app.customer(),
        )
        .await,
    )
    .await;
    assert_eq!(decimal(&preview["data"]["discount_amount"]), dec!(200));
}
