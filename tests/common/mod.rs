#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    middleware,
    response::Response,
    Router,
};
use chrono::Utc;
use ender_outlet::{
    api_v1_routes,
    auth::{USER_ID_HEADER, USER_ROLE_HEADER},
    config::AppConfig,
    db,
    entities::{coupon, coupon::DiscountType, extended_warranty_category, payment_channel, product},
    events,
    middleware_helpers::request_id::request_id_middleware,
    services::{
        coupons::CreateCouponRequest,
        payment_channels::CreatePaymentChannelRequest,
        payment_gateway::{PaymentGateway, VirtualPosGateway},
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// Who a test request is sent as.
#[derive(Debug, Clone, Copy)]
pub enum Caller {
    Anonymous,
    Customer(Uuid),
    Admin(Uuid),
}

/// Application harness backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub customer_id: Uuid,
    pub admin_id: Uuid,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the test adjust configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        Self::with_gateway(adjust, Arc::new(VirtualPosGateway)).await
    }

    pub async fn with_gateway(
        adjust: impl FnOnce(&mut AppConfig),
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("ender_outlet_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Read-then-write checkout transactions on separate SQLite connections
        // can deadlock into SQLITE_BUSY; tests that need a pool raise this.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (state, event_rx) =
            AppState::new(Arc::new(pool), cfg, gateway).expect("app state for tests");
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            state.notifications.clone(),
        ));

        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state.clone());

        Self {
            router,
            state,
            customer_id: Uuid::new_v4(),
            admin_id: Uuid::new_v4(),
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub fn customer(&self) -> Caller {
        Caller::Customer(self.customer_id)
    }

    pub fn admin(&self) -> Caller {
        Caller::Admin(self.admin_id)
    }

    /// Sends a JSON request as `caller`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        caller: Caller,
    ) -> Response {
        let body = body.map(|json| serde_json::to_vec(&json).expect("serialize json body"));
        self.send(method, uri, body, caller, &[]).await
    }

    /// Sends raw bytes with extra headers; used for signed callbacks.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        caller: Caller,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        match caller {
            Caller::Anonymous => {}
            Caller::Customer(id) => {
                builder = builder
                    .header(USER_ID_HEADER, id.to_string())
                    .header(USER_ROLE_HEADER, "customer");
            }
            Caller::Admin(id) => {
                builder = builder
                    .header(USER_ID_HEADER, id.to_string())
                    .header(USER_ROLE_HEADER, "admin");
            }
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(bytes) => {
                builder = builder.header("content-type", "application/json");
                Body::from(bytes)
            }
            None => Body::empty(),
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        category: &str,
        price: Decimal,
        original_price: Option<Decimal>,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            category: Set(category.to_string()),
            price: Set(price),
            original_price: Set(original_price),
            in_stock: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_warranty(
        &self,
        category: &str,
        two_year: Decimal,
        four_year: Decimal,
    ) -> extended_warranty_category::Model {
        let now = Utc::now();
        extended_warranty_category::ActiveModel {
            id: Set(Uuid::new_v4()),
            category_name: Set(category.to_string()),
            two_year_price: Set(two_year),
            four_year_price: Set(four_year),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed warranty category")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
        min_order_amount: Decimal,
        usage_limit: i32,
    ) -> coupon::Model {
        self.state
            .services
            .coupons
            .create(CreateCouponRequest {
                code: code.to_string(),
                description: None,
                discount_type,
                value,
                min_order_amount: Some(min_order_amount),
                max_discount: None,
                usage_limit,
                is_active: true,
                valid_from: Some(Utc::now() - chrono::Duration::minutes(1)),
                valid_until: None,
            })
            .await
            .expect("seed coupon")
    }

    /// Active test-mode virtual POS allowing up to six installments.
    pub async fn seed_virtual_pos(&self) -> payment_channel::Model {
        self.state
            .services
            .payment_channels
            .create(CreatePaymentChannelRequest {
                name: "Test POS".to_string(),
                kind: payment_channel::ChannelKind::VirtualPos,
                merchant_id: Some("100100000".to_string()),
                terminal_id: Some("30691297".to_string()),
                store_key: Some("test-store-key".to_string()),
                gateway_url: Some("https://sandbox.vpos.example.com/3dgate".to_string()),
                max_installments: 6,
                currency: "TRY".to_string(),
                is_active: true,
                test_mode: true,
            })
            .await
            .expect("seed virtual pos")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a decimal that the API rendered as a JSON string or number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected decimal, got {other}"),
    }
}
