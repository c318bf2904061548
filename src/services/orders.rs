use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, WarrantyPlan},
        payment_channel::{self, ChannelKind, Entity as ChannelEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{StatusDisplay, StatusMeta},
    services::{
        coupons::CouponService,
        payments::{PaymentAttempt, PaymentService},
        pricing::{CartLine, PricedLine, PricingService, Totals},
    },
};

const MAX_TRACKING_CODE_LEN: usize = 100;

/// Checkout request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CartLine>,
    #[validate(length(min = 1, max = 2000))]
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 32))]
    pub coupon_code: Option<String>,
    /// Defaults to the first active virtual POS for card payments
    pub payment_channel_id: Option<Uuid>,
    #[validate(range(min = 1, max = 36))]
    pub installments: Option<i32>,
}

/// Pricing preview; nothing is written.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct QuoteRequest {
    #[validate(length(min = 1, message = "Cart is empty"))]
    pub items: Vec<CartLine>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuoteResponse {
    pub lines: Vec<PricedLine>,
    pub totals: Totals,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub warranty_plan: Option<WarrantyPlan>,
    pub warranty_price: Decimal,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            warranty_plan: item.warranty_plan,
            warranty_price: item.warranty_price,
            line_total: item.line_total,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub status_display: StatusDisplay,
    pub payment_status: PaymentStatus,
    pub payment_status_display: StatusDisplay,
    pub payment_method: PaymentMethod,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub coupon_code: Option<String>,
    pub currency: String,
    pub shipping_address: String,
    pub payment_channel_id: Option<Uuid>,
    pub payment_transaction_id: Option<Uuid>,
    pub installments: i32,
    pub tracking_code: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl OrderResponse {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            status: order.status,
            status_display: order.status.display(),
            payment_status: order.payment_status,
            payment_status_display: order.payment_status.display(),
            payment_method: order.payment_method,
            original_amount: order.original_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            coupon_code: order.coupon_code,
            currency: order.currency,
            shipping_address: order.shipping_address,
            payment_channel_id: order.payment_channel_id,
            payment_transaction_id: order.payment_transaction_id,
            installments: order.installments,
            tracking_code: order.tracking_code,
            items: items.into_iter().map(OrderItemResponse::from).collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
            version: order.version,
        }
    }
}

/// Result of a checkout: the order plus the first payment attempt for card orders.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    pub payment: Option<PaymentAttempt>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateTrackingRequest {
    #[validate(length(min = 1, max = 100))]
    pub tracking_code: String,
    /// Rejects the write when the order moved on since it was read
    pub version: Option<i32>,
}

fn new_order_number(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().format("%Y%m%d"),
        suffix.to_uppercase()
    )
}

/// Checkout, reads and tracking updates for orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    pricing: PricingService,
    payments: PaymentService,
    event_sender: EventSender,
    currency: String,
    order_number_prefix: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        payments: PaymentService,
        event_sender: EventSender,
        currency: impl Into<String>,
        order_number_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db,
            pricing: PricingService::new(),
            payments,
            event_sender,
            currency: currency.into(),
            order_number_prefix: order_number_prefix.into(),
        }
    }

    /// Places an order.
    ///
    /// Pricing, coupon redemption, the order and its items, and the opening
    /// payment transaction for card orders commit together. The channel is
    /// contacted only after commit; its failure leaves the order in place with
    /// a failed, retryable attempt.
    #[instrument(skip(self, request), fields(user_id = %user_id, method = %request.payment_method))]
    pub async fn create(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;
        let shipping_address = request.shipping_address.trim().to_string();
        if shipping_address.is_empty() {
            return Err(ServiceError::ValidationError(
                "Shipping address is required".to_string(),
            ));
        }
        let installments = request.installments.unwrap_or(1);
        let method = request.payment_method;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin checkout transaction");
            ServiceError::DatabaseError(e)
        })?;

        let priced = self
            .pricing
            .price_cart(&txn, &request.items, request.coupon_code.as_deref(), user_id)
            .await?;

        let channel = resolve_channel(&txn, method, request.payment_channel_id).await?;
        let max_installments = channel.as_ref().map_or(1, |c| c.max_installments);
        if installments < 1 || installments > max_installments {
            return Err(ServiceError::ValidationError(format!(
                "Installments must be between 1 and {}",
                max_installments
            )));
        }

        if let Some(coupon) = &priced.coupon {
            CouponService::redeem_on(&txn, coupon.id).await?;
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(new_order_number(&self.order_number_prefix)),
            user_id: Set(user_id),
            status: Set(method.initial_status()),
            original_amount: Set(priced.totals.original_amount),
            discount_amount: Set(priced.totals.discount_amount),
            total_amount: Set(priced.totals.total_amount),
            coupon_code: Set(priced.coupon.as_ref().map(|c| c.code.clone())),
            coupon_id: Set(priced.coupon.as_ref().map(|c| c.id)),
            currency: Set(self.currency.clone()),
            shipping_address: Set(shipping_address),
            payment_method: Set(method),
            payment_status: Set(PaymentStatus::Pending),
            payment_channel_id: Set(channel.as_ref().map(|c| c.id)),
            payment_transaction_id: Set(None),
            installments: Set(installments),
            tracking_code: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_unique_violation(e, "Order number collision, please retry"))?;

        let mut items = Vec::with_capacity(priced.lines.len());
        for line in &priced.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                warranty_plan: Set(line.warranty_plan),
                warranty_price: Set(line.warranty_price),
                line_total: Set(line.line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order.id, "Failed to insert order item");
                ServiceError::DatabaseError(e)
            })?;
            items.push(item);
        }

        let opened = match (&channel, method.is_card()) {
            (Some(channel), true) => Some(
                PaymentService::open_on(
                    &txn,
                    &order,
                    channel,
                    order.total_amount,
                    installments,
                )
                .await?,
            ),
            _ => None,
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit checkout");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order created"
        );
        metrics::counter!("ender_outlet_orders.created", 1, "method" => method.to_string());

        self.event_sender.publish(Event::OrderCreated {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id,
            status: order.status.to_string(),
            total_amount: order.total_amount,
        });
        if let Some(coupon) = &priced.coupon {
            self.event_sender.publish(Event::CouponRedeemed {
                coupon_id: coupon.id,
                code: coupon.code.clone(),
                order_id: order.id,
            });
        }

        let payment = match (opened, channel) {
            (Some(transaction), Some(channel)) => {
                Some(self.payments.initiate(transaction, &channel).await?)
            }
            _ => None,
        };

        let order = self.find(order.id).await?;
        Ok(CheckoutResponse {
            order: OrderResponse::from_parts(order, items),
            payment,
        })
    }

    /// Prices a cart without writing anything.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn quote(&self, user_id: Uuid, request: QuoteRequest) -> Result<QuoteResponse, ServiceError> {
        request.validate()?;
        let priced = self
            .pricing
            .price_cart(&*self.db, &request.items, request.coupon_code.as_deref(), user_id)
            .await?;
        Ok(QuoteResponse {
            lines: priced.lines,
            totals: priced.totals,
            coupon_code: priced.coupon.map(|c| c.code),
        })
    }

    pub async fn find(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Loads an order with its items. Customers only see their own orders.
    pub async fn get(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        is_admin: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find(order_id).await?;
        if !is_admin && order.user_id != user_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        self.to_response(order).await
    }

    pub async fn to_response(&self, order: order::Model) -> Result<OrderResponse, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(OrderResponse::from_parts(order, items))
    }

    /// The caller's orders, newest first.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let query = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt);
        self.page(query, page, per_page).await
    }

    /// All orders, optionally filtered by status, newest first.
    pub async fn list_all(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        self.page(query, page, per_page).await
    }

    async fn page(
        &self,
        query: sea_orm::Select<OrderEntity>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch orders page");
                ServiceError::DatabaseError(e)
            })?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if !ids.is_empty() {
            for item in OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(ids))
                .order_by_asc(order_item::Column::CreatedAt)
                .all(&*self.db)
                .await
                .map_err(ServiceError::DatabaseError)?
            {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        let responses = orders
            .into_iter()
            .map(|o| {
                let items = items_by_order.remove(&o.id).unwrap_or_default();
                OrderResponse::from_parts(o, items)
            })
            .collect();
        Ok((responses, total))
    }

    /// Records the carrier's tracking code. Allowed in any status.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn set_tracking_code(
        &self,
        order_id: Uuid,
        request: UpdateTrackingRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let code = request.tracking_code.trim().to_string();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Tracking code cannot be blank".to_string(),
            ));
        }
        if code.chars().count() > MAX_TRACKING_CODE_LEN {
            return Err(ServiceError::ValidationError(format!(
                "Tracking code cannot exceed {} characters",
                MAX_TRACKING_CODE_LEN
            )));
        }

        let order = self.find(order_id).await?;
        if request.version.is_some_and(|v| v != order.version) {
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::TrackingCode, Expr::value(code.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to update tracking code");
                ServiceError::DatabaseError(e)
            })?;
        if result.rows_affected == 0 {
            warn!(order_id = %order_id, "Tracking code update lost a race");
            return Err(ServiceError::ConcurrentModification(order_id));
        }

        info!(order_id = %order_id, tracking_code = %code, "Tracking code updated");
        self.event_sender.publish(Event::TrackingCodeUpdated {
            order_id,
            tracking_code: code,
        });

        let order = self.find(order_id).await?;
        self.to_response(order).await
    }
}

/// Picks the channel an order will be paid through.
async fn resolve_channel<C: ConnectionTrait>(
    conn: &C,
    method: PaymentMethod,
    requested: Option<Uuid>,
) -> Result<Option<payment_channel::Model>, ServiceError> {
    let expected_kind = match method {
        PaymentMethod::BankTransfer => ChannelKind::BankTransfer,
        PaymentMethod::VirtualPos | PaymentMethod::CreditCard => ChannelKind::VirtualPos,
    };

    let channel = match requested {
        Some(id) => {
            let channel = ChannelEntity::find_by_id(id)
                .one(conn)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("Payment channel {} does not exist", id))
                })?;
            if !channel.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "Payment channel '{}' is not active",
                    channel.name
                )));
            }
            if channel.kind != expected_kind {
                return Err(ServiceError::ValidationError(format!(
                    "Payment channel '{}' cannot take {} payments",
                    channel.name, method
                )));
            }
            Some(channel)
        }
        None if method.is_card() => Some(
            ChannelEntity::find()
                .filter(payment_channel::Column::Kind.eq(ChannelKind::VirtualPos))
                .filter(payment_channel::Column::IsActive.eq(true))
                .order_by_asc(payment_channel::Column::CreatedAt)
                .one(conn)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "No active card payment channel is configured".to_string(),
                    )
                })?,
        ),
        None => None,
    };
    Ok(channel)
}
