use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        payment_channel::{self, ChannelKind, Entity as ChannelEntity},
        payment_transaction::{self, Entity as TransactionEntity, TransactionStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::payment_gateway::{ChargeInitiation, ChargeRequest, MerchantConfig, PaymentGateway},
};

/// Error code recorded when the channel could not start a charge.
pub const CHANNEL_ERROR_CODE: &str = "CHANNEL_ERROR";

/// Outcome reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Failed,
    Cancelled,
}

impl From<CallbackStatus> for TransactionStatus {
    fn from(status: CallbackStatus) -> Self {
        match status {
            CallbackStatus::Success => TransactionStatus::Success,
            CallbackStatus::Failed => TransactionStatus::Failed,
            CallbackStatus::Cancelled => TransactionStatus::Cancelled,
        }
    }
}

/// Asynchronous result delivered by the payment channel.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentCallback {
    /// Internal transaction id; either this or `reference_number` is required
    pub transaction_id: Option<Uuid>,
    #[validate(length(max = 64))]
    pub reference_number: Option<String>,
    pub status: CallbackStatus,
    #[validate(length(max = 128))]
    pub channel_transaction_id: Option<String>,
    #[validate(length(max = 64))]
    pub error_code: Option<String>,
    #[validate(length(max = 1000))]
    pub error_message: Option<String>,
    pub three_ds_status: Option<String>,
    pub three_ds_cavv: Option<String>,
    pub three_ds_eci: Option<String>,
    #[validate(length(max = 32))]
    pub masked_card: Option<String>,
    pub card_brand: Option<String>,
}

/// What happened when a callback was applied.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallbackOutcome {
    pub transaction_id: Uuid,
    pub order_id: Uuid,
    pub transaction_status: TransactionStatus,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// False when the transaction was already terminal
    pub applied: bool,
    /// True when a repeat callback claimed a different outcome than the recorded one,
    /// or a success arrived for an order another attempt had already paid
    pub conflict: bool,
}

/// A payment attempt as returned to the customer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentAttempt {
    pub transaction_id: Uuid,
    pub reference_number: String,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub currency: String,
    pub installments: i32,
    pub redirect: Option<ChargeInitiation>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Set when the customer may start a new attempt
    pub retryable: bool,
}

impl PaymentAttempt {
    fn from_model(model: &payment_transaction::Model, redirect: Option<ChargeInitiation>) -> Self {
        Self {
            transaction_id: model.id,
            reference_number: model.reference_number.clone(),
            status: model.status,
            amount: model.amount,
            currency: model.currency.clone(),
            installments: model.installments,
            redirect,
            error_code: model.error_code.clone(),
            error_message: model.error_message.clone(),
            retryable: matches!(
                model.status,
                TransactionStatus::Failed | TransactionStatus::Cancelled
            ),
        }
    }
}

/// Ledger row as exposed to admins; payloads stay opaque text.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub channel_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub reference_number: String,
    pub channel_transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub three_ds_status: Option<String>,
    pub masked_card: Option<String>,
    pub card_brand: Option<String>,
    pub installments: i32,
    pub created_at: chrono::DateTime<Utc>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
}

impl From<payment_transaction::Model> for TransactionView {
    fn from(m: payment_transaction::Model) -> Self {
        Self {
            id: m.id,
            order_id: m.order_id,
            channel_id: m.channel_id,
            amount: m.amount,
            currency: m.currency,
            reference_number: m.reference_number,
            channel_transaction_id: m.channel_transaction_id,
            status: m.status,
            error_code: m.error_code,
            error_message: m.error_message,
            three_ds_status: m.three_ds_status,
            masked_card: m.masked_card,
            card_brand: m.card_brand,
            installments: m.installments,
            created_at: m.created_at,
            completed_at: m.completed_at,
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Verifies `signature` (hex HMAC-SHA256 of `"{timestamp}.{body}"`) and the
/// timestamp's distance from `now`.
pub fn verify_callback_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| ServiceError::Unauthorized("Invalid callback timestamp".to_string()))?;
    if now.abs_diff(ts) > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "Callback timestamp outside tolerance".to_string(),
        ));
    }

    let provided = hex::decode(signature.trim())
        .map_err(|_| ServiceError::Unauthorized("Malformed callback signature".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| ServiceError::Unauthorized("Callback signature mismatch".to_string()))
}

/// Signs a callback body the way the channel does; used by tests and tooling.
pub fn sign_callback(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn new_reference_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("EOP-{}-{}", Utc::now().format("%Y%m%d"), suffix.to_uppercase())
}

/// Payment transaction ledger
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>, gateway: Arc<dyn PaymentGateway>, event_sender: EventSender) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Opens a `pending` transaction for `order` and points the order at it.
    pub async fn open_on<C: ConnectionTrait>(
        conn: &C,
        order: &order::Model,
        channel: &payment_channel::Model,
        amount: Decimal,
        installments: i32,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let now = Utc::now();
        let model = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            user_id: Set(order.user_id),
            channel_id: Set(Some(channel.id)),
            amount: Set(amount),
            currency: Set(order.currency.clone()),
            reference_number: Set(new_reference_number()),
            channel_transaction_id: Set(None),
            status: Set(TransactionStatus::Pending),
            error_code: Set(None),
            error_message: Set(None),
            three_ds_status: Set(None),
            three_ds_cavv: Set(None),
            three_ds_eci: Set(None),
            masked_card: Set(None),
            card_brand: Set(None),
            installments: Set(installments),
            request_payload: Set(None),
            response_payload: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        }
        .insert(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to open payment transaction");
            ServiceError::DatabaseError(e)
        })?;

        OrderEntity::update_many()
            .col_expr(order::Column::PaymentTransactionId, Expr::value(model.id))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .exec(conn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(transaction_id = %model.id, order_id = %order.id, "Payment transaction opened");
        Ok(model)
    }

    /// Asks the channel for a redirect continuation.
    ///
    /// A channel failure is recorded on the transaction and the order's payment
    /// status; the returned attempt is then `failed` and `retryable`.
    #[instrument(skip(self, transaction, channel), fields(transaction_id = %transaction.id))]
    pub async fn initiate(
        &self,
        transaction: payment_transaction::Model,
        channel: &payment_channel::Model,
    ) -> Result<PaymentAttempt, ServiceError> {
        let request = ChargeRequest {
            reference_number: transaction.reference_number.clone(),
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            installments: transaction.installments,
            merchant: MerchantConfig::from(channel),
        };

        let start = std::time::Instant::now();
        let outcome = self.gateway.initiate(&request).await;
        metrics::histogram!("ender_outlet_payments.gateway_latency", start.elapsed());

        match outcome {
            Ok(initiation) => {
                let payload = serde_json::to_string(&initiation)?;
                let mut active: payment_transaction::ActiveModel = transaction.into();
                active.request_payload = Set(Some(payload));
                active.updated_at = Set(Utc::now());
                let saved = active
                    .update(&*self.db)
                    .await
                    .map_err(ServiceError::DatabaseError)?;

                self.event_sender.publish(Event::PaymentInitiated {
                    transaction_id: saved.id,
                    order_id: saved.order_id,
                    amount: saved.amount,
                });
                Ok(PaymentAttempt::from_model(&saved, Some(initiation)))
            }
            Err(gateway_error) => {
                warn!(error = %gateway_error, "Payment channel failed to initiate charge");
                metrics::counter!("ender_outlet_payments.channel_errors", 1);
                let failed = self
                    .record_channel_failure(transaction, &gateway_error.to_string())
                    .await?;
                Ok(PaymentAttempt::from_model(&failed, None))
            }
        }
    }

    async fn record_channel_failure(
        &self,
        transaction: payment_transaction::Model,
        message: &str,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;

        TransactionEntity::update_many()
            .col_expr(
                payment_transaction::Column::Status,
                Expr::value(TransactionStatus::Failed),
            )
            .col_expr(
                payment_transaction::Column::ErrorCode,
                Expr::value(CHANNEL_ERROR_CODE),
            )
            .col_expr(payment_transaction::Column::ErrorMessage, Expr::value(message))
            .col_expr(payment_transaction::Column::UpdatedAt, Expr::value(now))
            .col_expr(payment_transaction::Column::CompletedAt, Expr::value(now))
            .filter(payment_transaction::Column::Id.eq(transaction.id))
            .filter(payment_transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        mark_payment_failed(&txn, transaction.order_id).await?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        self.event_sender.publish(Event::PaymentFailed {
            transaction_id: transaction.id,
            order_id: transaction.order_id,
            status: TransactionStatus::Failed.to_string(),
            error_code: Some(CHANNEL_ERROR_CODE.to_string()),
        });

        self.find_transaction(transaction.id).await
    }

    /// Starts a new attempt for a card order owned by `user_id` whose last attempt failed.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn retry(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        installments: Option<i32>,
    ) -> Result<PaymentAttempt, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !order.payment_method.is_card() {
            return Err(ServiceError::ValidationError(
                "Only card orders can retry payment".to_string(),
            ));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::ValidationError(
                "Cancelled orders cannot be paid".to_string(),
            ));
        }
        match order.payment_status {
            PaymentStatus::Completed => {
                return Err(ServiceError::Conflict(format!(
                    "Order {} is already paid",
                    order.order_number
                )))
            }
            PaymentStatus::Pending => {
                return Err(ServiceError::Conflict(format!(
                    "Order {} has a payment attempt in progress",
                    order.order_number
                )))
            }
            PaymentStatus::Failed => {}
        }

        let channel_id = order.payment_channel_id.ok_or_else(|| {
            ServiceError::ValidationError("Order has no payment channel".to_string())
        })?;
        let channel = ChannelEntity::find_by_id(channel_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .filter(|c| c.is_active && c.kind == ChannelKind::VirtualPos)
            .ok_or_else(|| {
                ServiceError::ValidationError("Payment channel is not available".to_string())
            })?;

        let installments = installments.unwrap_or(order.installments);
        if installments < 1 || installments > channel.max_installments {
            return Err(ServiceError::ValidationError(format!(
                "Installments must be between 1 and {}",
                channel.max_installments
            )));
        }

        // Claim the failed payment; a concurrent retry leaves zero rows matched
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;
        let claimed = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Pending))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Failed))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if claimed.rows_affected == 0 {
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            return Err(ServiceError::Conflict(format!(
                "Order {} has a payment attempt in progress",
                order.order_number
            )));
        }
        let transaction =
            Self::open_on(&txn, &order, &channel, order.total_amount, installments).await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        let attempt = self.initiate(transaction, &channel).await?;

        if attempt.status == TransactionStatus::Failed {
            return Err(ServiceError::ChannelError(
                attempt
                    .error_message
                    .unwrap_or_else(|| "payment channel unavailable".to_string()),
            ));
        }
        Ok(attempt)
    }

    /// Applies the channel's result exactly once.
    #[instrument(skip(self, callback, raw_payload), fields(status = ?callback.status))]
    pub async fn apply_callback(
        &self,
        callback: PaymentCallback,
        raw_payload: Option<String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        callback.validate()?;
        let transaction = self.locate(&callback).await?;
        let received: TransactionStatus = callback.status.into();

        if transaction.status.is_terminal() {
            return self.repeat_outcome(transaction, received).await;
        }

        let now = Utc::now();
        let txn = self.db.begin().await.map_err(ServiceError::DatabaseError)?;

        let mut update = TransactionEntity::update_many()
            .col_expr(payment_transaction::Column::Status, Expr::value(received))
            .col_expr(payment_transaction::Column::UpdatedAt, Expr::value(now))
            .col_expr(payment_transaction::Column::CompletedAt, Expr::value(now))
            .col_expr(
                payment_transaction::Column::ResponsePayload,
                Expr::value(raw_payload),
            );
        let optional = [
            (payment_transaction::Column::ChannelTransactionId, &callback.channel_transaction_id),
            (payment_transaction::Column::ErrorCode, &callback.error_code),
            (payment_transaction::Column::ErrorMessage, &callback.error_message),
            (payment_transaction::Column::ThreeDsStatus, &callback.three_ds_status),
            (payment_transaction::Column::ThreeDsCavv, &callback.three_ds_cavv),
            (payment_transaction::Column::ThreeDsEci, &callback.three_ds_eci),
            (payment_transaction::Column::MaskedCard, &callback.masked_card),
            (payment_transaction::Column::CardBrand, &callback.card_brand),
        ];
        for (column, value) in optional {
            if let Some(value) = value {
                update = update.col_expr(column, Expr::value(value.clone()));
            }
        }

        let written = update
            .filter(payment_transaction::Column::Id.eq(transaction.id))
            .filter(payment_transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, transaction_id = %transaction.id, "Failed to record callback");
                ServiceError::DatabaseError(e)
            })?;

        if written.rows_affected == 0 {
            // A concurrent delivery got there first
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            let current = self.find_transaction(transaction.id).await?;
            return self.repeat_outcome(current, received).await;
        }

        let order = OrderEntity::find_by_id(transaction.order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", transaction.order_id))
            })?;

        let mut moved_to_preparing = false;
        let mut already_paid = false;
        if received == TransactionStatus::Success {
            let settled = OrderEntity::update_many()
                .col_expr(
                    order::Column::PaymentStatus,
                    Expr::value(PaymentStatus::Completed),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(now))
                .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
                .filter(order::Column::Id.eq(order.id))
                .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed))
                .exec(&txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
            // Another attempt already settled the order: this charge is a duplicate
            already_paid = settled.rows_affected == 0;

            if order.payment_method.is_card() && !already_paid {
                let advanced = OrderEntity::update_many()
                    .col_expr(order::Column::Status, Expr::value(OrderStatus::Preparing))
                    .filter(order::Column::Id.eq(order.id))
                    .filter(order::Column::Status.eq(OrderStatus::Pending))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?;
                moved_to_preparing = advanced.rows_affected > 0;
            }
        } else {
            mark_payment_failed(&txn, order.id).await?;
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            transaction_id = %transaction.id,
            order_id = %order.id,
            status = %received,
            "Payment callback applied"
        );
        metrics::counter!("ender_outlet_payments.callbacks_applied", 1, "status" => received.to_string());

        if already_paid {
            warn!(
                transaction_id = %transaction.id,
                order_id = %order.id,
                "Success callback for an order that is already paid"
            );
            metrics::counter!("ender_outlet_payments.callback_conflicts", 1);
            self.event_sender.publish(Event::PaymentCallbackConflict {
                transaction_id: transaction.id,
                recorded_status: PaymentStatus::Completed.to_string(),
                received_status: received.to_string(),
            });
            return self.outcome(transaction.id, true, true).await;
        }

        if received == TransactionStatus::Success {
            self.event_sender.publish(Event::PaymentSucceeded {
                transaction_id: transaction.id,
                order_id: order.id,
            });
            if moved_to_preparing {
                self.event_sender.publish(Event::OrderStatusChanged {
                    order_id: order.id,
                    old_status: OrderStatus::Pending.to_string(),
                    new_status: OrderStatus::Preparing.to_string(),
                });
            }
        } else {
            self.event_sender.publish(Event::PaymentFailed {
                transaction_id: transaction.id,
                order_id: order.id,
                status: received.to_string(),
                error_code: callback.error_code.clone(),
            });
        }

        self.outcome(transaction.id, true, false).await
    }

    async fn repeat_outcome(
        &self,
        recorded: payment_transaction::Model,
        received: TransactionStatus,
    ) -> Result<CallbackOutcome, ServiceError> {
        let conflict = recorded.status != received;
        if conflict {
            warn!(
                transaction_id = %recorded.id,
                recorded = %recorded.status,
                received = %received,
                "Callback conflicts with recorded outcome; ignoring"
            );
            metrics::counter!("ender_outlet_payments.callback_conflicts", 1);
            self.event_sender.publish(Event::PaymentCallbackConflict {
                transaction_id: recorded.id,
                recorded_status: recorded.status.to_string(),
                received_status: received.to_string(),
            });
        } else {
            info!(transaction_id = %recorded.id, "Duplicate callback ignored");
        }
        self.outcome(recorded.id, false, conflict).await
    }

    async fn outcome(
        &self,
        transaction_id: Uuid,
        applied: bool,
        conflict: bool,
    ) -> Result<CallbackOutcome, ServiceError> {
        let transaction = self.find_transaction(transaction_id).await?;
        let order = OrderEntity::find_by_id(transaction.order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", transaction.order_id))
            })?;
        Ok(CallbackOutcome {
            transaction_id,
            order_id: order.id,
            transaction_status: transaction.status,
            order_status: order.status,
            payment_status: order.payment_status,
            applied,
            conflict,
        })
    }

    async fn locate(
        &self,
        callback: &PaymentCallback,
    ) -> Result<payment_transaction::Model, ServiceError> {
        let query = match (&callback.transaction_id, &callback.reference_number) {
            (Some(id), _) => TransactionEntity::find_by_id(*id),
            (None, Some(reference)) => TransactionEntity::find()
                .filter(payment_transaction::Column::ReferenceNumber.eq(reference.trim())),
            (None, None) => {
                return Err(ServiceError::ValidationError(
                    "Callback must carry transaction_id or reference_number".to_string(),
                ))
            }
        };
        query
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound("Payment transaction not found".to_string()))
    }

    pub async fn find_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<payment_transaction::Model, ServiceError> {
        TransactionEntity::find_by_id(transaction_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment transaction {} not found", transaction_id))
            })
    }

    /// Every attempt made for an order, oldest first.
    pub async fn transactions_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment_transaction::Model>, ServiceError> {
        TransactionEntity::find()
            .filter(payment_transaction::Column::OrderId.eq(order_id))
            .order_by_asc(payment_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

/// Sets `payment_status = failed` unless the order is already paid.
async fn mark_payment_failed<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<(), ServiceError> {
    OrderEntity::update_many()
        .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed))
        .exec(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    Ok(())
}
