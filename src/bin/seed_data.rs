//! Seed data script - populates the database with demo catalog data
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - a handful of products across three categories
//! - extended warranty prices for those categories
//! - the SAVE10 coupon
//! - a bank transfer channel and a test-mode virtual POS channel

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::{info, warn};
use uuid::Uuid;

use ender_outlet::{
    config,
    db,
    entities::{
        coupon::DiscountType, extended_warranty_category, payment_channel::ChannelKind, product,
    },
    errors::ServiceError,
    events,
    services::{
        coupons::{CouponService, CreateCouponRequest},
        payment_channels::{CreatePaymentChannelRequest, PaymentChannelService},
    },
};

#[derive(Debug, Parser)]
#[command(name = "seed-data", version)]
struct Cli {
    /// Database URL; defaults to the configured `database_url`
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Run migrations before seeding
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config().context("failed to load configuration")?;
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }

    info!("=== Ender Outlet Seed Data ===");
    let pool = Arc::new(db::establish_connection_from_app_config(&cfg).await?);
    if cli.migrate {
        db::run_migrations(&pool).await?;
    }

    info!("Creating products...");
    let products = create_products(&pool).await?;
    info!("  Created {} products", products);

    info!("Creating warranty price table...");
    let warranties = create_warranty_categories(&pool).await?;
    info!("  Created {} warranty categories", warranties);

    // Seeding publishes domain events; nobody listens here.
    let (event_sender, _event_rx) = events::channel(16);

    info!("Creating coupons...");
    let coupons = CouponService::new(pool.clone(), event_sender);
    match coupons
        .create(CreateCouponRequest {
            code: "SAVE10".into(),
            description: Some("10% off orders over 500".into()),
            discount_type: DiscountType::Percentage,
            value: dec!(10),
            min_order_amount: Some(dec!(500)),
            max_discount: Some(dec!(250)),
            usage_limit: 100,
            is_active: true,
            valid_from: None,
            valid_until: None,
        })
        .await
    {
        Ok(coupon) => info!("  Created coupon {}", coupon.code),
        Err(ServiceError::Conflict(msg)) => warn!("  Skipped coupon: {}", msg),
        Err(e) => return Err(e.into()),
    }

    info!("Creating payment channels...");
    let channels = PaymentChannelService::new(pool.clone());
    if channels.list().await?.is_empty() {
        channels
            .create(CreatePaymentChannelRequest {
                name: "Bank transfer".into(),
                kind: ChannelKind::BankTransfer,
                merchant_id: None,
                terminal_id: None,
                store_key: None,
                gateway_url: None,
                max_installments: 1,
                currency: cfg.default_currency.clone(),
                is_active: true,
                test_mode: false,
            })
            .await?;
        channels
            .create(CreatePaymentChannelRequest {
                name: "Virtual POS (test)".into(),
                kind: ChannelKind::VirtualPos,
                merchant_id: Some("100100000".into()),
                terminal_id: Some("30691297".into()),
                store_key: Some("demo-store-key".into()),
                gateway_url: Some("https://sandbox.vpos.example.com/3dgate".into()),
                max_installments: 9,
                currency: cfg.default_currency.clone(),
                is_active: true,
                test_mode: true,
            })
            .await?;
        info!("  Created 2 payment channels");
    } else {
        warn!("  Payment channels already configured; skipping");
    }

    info!("=== Seed Data Complete ===");
    info!("Try: curl -H 'x-user-id: {}' http://localhost:8080/api/v1/orders", Uuid::new_v4());
    info!("Or explore interactively at: http://localhost:8080/swagger-ui");
    Ok(())
}

async fn create_products(db: &sea_orm::DatabaseConnection) -> anyhow::Result<usize> {
    let products_data: Vec<(&str, &str, Decimal, Option<Decimal>)> = vec![
        ("Arçelik 270560 EB No Frost Buzdolabı", "Buzdolabı", dec!(8999.00), Some(dec!(9999.00))),
        ("Arçelik 583630 EB Buzdolabı", "Buzdolabı", dec!(12499.00), None),
        ("Arçelik 590640 EI Gardırop Tipi Buzdolabı", "Buzdolabı", dec!(17999.00), Some(dec!(19999.00))),
        ("Arçelik K 8060 Kettle", "Küçük Ev Aletleri", dec!(449.90), None),
        ("Arçelik K 3190 Buharlı Ütü", "Küçük Ev Aletleri", dec!(529.90), Some(dec!(599.90))),
        ("Arçelik Çamaşır Makinesi Kapak Contası", "Yedek Parça", dec!(1299.00), None),
        ("Arçelik Buzdolabı Su Filtresi", "Yedek Parça", dec!(649.00), None),
    ];

    let now = Utc::now();
    let mut created = 0;
    for (name, category, price, original_price) in products_data {
        let exists = product::Entity::find()
            .filter(product::Column::Name.eq(name))
            .one(db)
            .await?
            .is_some();
        if exists {
            continue;
        }
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
        .insert(db)
        .await?;
        created += 1;
    }
    Ok(created)
}

async fn create_warranty_categories(db: &sea_orm::DatabaseConnection) -> anyhow::Result<usize> {
    let rows = [
        ("Buzdolabı", dec!(750.00), dec!(1250.00)),
        ("Yedek Parça", dec!(90.00), dec!(150.00)),
    ];

    let now = Utc::now();
    let mut created = 0;
    for (category, two_year, four_year) in rows {
        let exists = extended_warranty_category::Entity::find()
            .filter(extended_warranty_category::Column::CategoryName.eq(category))
            .one(db)
            .await?
            .is_some();
        if exists {
            continue;
        }
        extended_warranty_category::ActiveModel {
            id: Set(Uuid::new_v4()),
            category_name: Set(category.to_string()),
            two_year_price: Set(two_year),
            four_year_price: Set(four_year),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
        created += 1;
    }
    Ok(created)
}
