use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db::DbPool,
    entities::coupon::{self, DiscountType, Entity as CouponEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::round_money,
};

static COUPON_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9_-]{2,49}$").expect("coupon code pattern"));

/// Canonical storage form of a coupon code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn validate_code(code: &str) -> Result<(), ValidationError> {
    if COUPON_CODE.is_match(&normalize_code(code)) {
        Ok(())
    } else {
        let mut err = ValidationError::new("code");
        err.message =
            Some("Coupon code must be 3-50 letters, digits, '-' or '_'".into());
        Err(err)
    }
}

/// Discount a coupon grants on `subtotal`, rounded to cents and never above the subtotal.
pub fn compute_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    if subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let pct = subtotal * coupon.value / Decimal::ONE_HUNDRED;
            match coupon.max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        DiscountType::FixedAmount => coupon.value.min(subtotal),
    };
    round_money(raw.max(Decimal::ZERO)).min(subtotal)
}

/// Runs the eligibility checks in order and stops at the first failure.
pub fn check_eligibility(
    coupon: &coupon::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if !coupon.is_active {
        return Err(ServiceError::ValidationError(format!(
            "Coupon {} is not active",
            coupon.code
        )));
    }
    if !coupon.is_within_window(now) {
        return Err(ServiceError::ValidationError(format!(
            "Coupon {} is not valid at this time",
            coupon.code
        )));
    }
    if subtotal < coupon.min_order_amount {
        return Err(ServiceError::ValidationError(format!(
            "Coupon {} requires a minimum order of {}",
            coupon.code, coupon.min_order_amount
        )));
    }
    if coupon.is_exhausted() {
        return Err(ServiceError::ValidationError(format!(
            "Coupon {} has reached its usage limit",
            coupon.code
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 50))]
    #[schema(example = "SAVE10")]
    pub code: String,
    pub order_subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponValidation {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_amount: Decimal,
    pub total_after_discount: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_create_coupon"))]
pub struct CreateCouponRequest {
    #[validate(custom = "validate_code")]
    #[schema(example = "SAVE10")]
    pub code: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub value: Decimal,
    #[serde(default)]
    pub min_order_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    /// 0 = unlimited
    #[serde(default)]
    #[validate(range(min = 0))]
    pub usage_limit: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn validate_create_coupon(req: &CreateCouponRequest) -> Result<(), ValidationError> {
    validate_terms(
        req.discount_type,
        req.value,
        req.min_order_amount,
        req.max_discount,
        req.valid_from,
        req.valid_until,
        req.usage_limit,
        0,
    )
}

fn validate_terms(
    discount_type: DiscountType,
    value: Decimal,
    min_order_amount: Option<Decimal>,
    max_discount: Option<Decimal>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    usage_limit: i32,
    used_count: i32,
) -> Result<(), ValidationError> {
    let fail = |code: &'static str, msg: &str| {
        let mut err = ValidationError::new(code);
        err.message = Some(msg.to_string().into());
        Err(err)
    };
    match discount_type {
        DiscountType::Percentage if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED => {
            return fail("value", "Percentage value must be in (0, 100]");
        }
        DiscountType::FixedAmount if value <= Decimal::ZERO => {
            return fail("value", "Fixed discount must be greater than 0");
        }
        _ => {}
    }
    if min_order_amount.map_or(false, |m| m < Decimal::ZERO) {
        return fail("min_order_amount", "Minimum order amount cannot be negative");
    }
    if max_discount.map_or(false, |m| m <= Decimal::ZERO) {
        return fail("max_discount", "Maximum discount must be greater than 0");
    }
    if let (Some(from), Some(until)) = (valid_from, valid_until) {
        if until < from {
            return fail("valid_until", "valid_until must not precede valid_from");
        }
    }
    if usage_limit > 0 && used_count > usage_limit {
        return fail("usage_limit", "usage_limit cannot be below the number of redemptions");
    }
    Ok(())
}

/// Present-but-null becomes `Some(None)`; an absent field stays `None` via `#[serde(default)]`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update; `version` must match the stored row.
///
/// `max_discount` and `valid_until` accept an explicit `null` to remove the cap or expiry.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCouponRequest {
    pub version: i32,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    pub value: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<Decimal>)]
    pub max_discount: Option<Option<Decimal>>,
    #[validate(range(min = 0))]
    pub usage_limit: Option<i32>,
    /// Administrative correction of the redemption counter
    #[validate(range(min = 0))]
    pub used_count: Option<i32>,
    pub is_active: Option<bool>,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<DateTime<Utc>>)]
    pub valid_until: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponResponse {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount: Option<Decimal>,
    pub usage_limit: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl From<coupon::Model> for CouponResponse {
    fn from(m: coupon::Model) -> Self {
        Self {
            id: m.id,
            code: m.code,
            description: m.description,
            discount_type: m.discount_type,
            value: m.value,
            min_order_amount: m.min_order_amount,
            max_discount: m.max_discount,
            usage_limit: m.usage_limit,
            used_count: m.used_count,
            is_active: m.is_active,
            valid_from: m.valid_from,
            valid_until: m.valid_until,
            created_at: m.created_at,
            updated_at: m.updated_at,
            version: m.version,
        }
    }
}

/// Coupon validation, redemption and administration
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Loads `code` on `conn` and checks that it applies to `subtotal` right now.
    pub async fn check_on<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        subtotal: Decimal,
        user_id: Uuid,
    ) -> Result<coupon::Model, ServiceError> {
        let normalized = normalize_code(code);
        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(normalized.clone()))
            .one(conn)
            .await
            .map_err(|e| {
                error!(error = %e, code = %normalized, "Failed to load coupon");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("Coupon {} does not exist", normalized))
            })?;

        check_eligibility(&coupon, subtotal, Utc::now()).map_err(|e| {
            info!(code = %normalized, user_id = %user_id, reason = %e, "Coupon rejected");
            e
        })?;
        Ok(coupon)
    }

    /// Customer-facing preview; nothing is written.
    #[instrument(skip(self, request), fields(code = %request.code, user_id = %user_id))]
    pub async fn validate(
        &self,
        request: ValidateCouponRequest,
        user_id: Uuid,
    ) -> Result<CouponValidation, ServiceError> {
        request.validate()?;
        if request.order_subtotal < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order subtotal cannot be negative".to_string(),
            ));
        }
        let coupon =
            Self::check_on(&*self.db, &request.code, request.order_subtotal, user_id).await?;
        let discount = compute_discount(&coupon, request.order_subtotal);
        Ok(CouponValidation {
            code: coupon.code,
            discount_type: coupon.discount_type,
            discount_amount: discount,
            total_after_discount: (request.order_subtotal - discount).max(Decimal::ZERO),
        })
    }

    /// Consumes one use of the coupon with a single conditional update.
    ///
    /// Zero affected rows means a concurrent checkout took the last use.
    pub async fn redeem_on<C: ConnectionTrait>(
        conn: &C,
        coupon_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.eq(0))
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, coupon_id = %coupon_id, "Failed to redeem coupon");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            warn!(coupon_id = %coupon_id, "Coupon redemption lost a race");
            metrics::counter!("ender_outlet_coupons.redeem_conflicts", 1);
            return Err(ServiceError::Conflict(
                "Coupon usage limit was reached by another order".to_string(),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(&self, request: CreateCouponRequest) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        let code = normalize_code(&request.code);

        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            description: Set(request.description),
            discount_type: Set(request.discount_type),
            value: Set(request.value),
            min_order_amount: Set(request.min_order_amount.unwrap_or(Decimal::ZERO)),
            max_discount: Set(request.max_discount),
            usage_limit: Set(request.usage_limit),
            used_count: Set(0),
            is_active: Set(request.is_active),
            valid_from: Set(request.valid_from.unwrap_or(now)),
            valid_until: Set(request.valid_until),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            ServiceError::from_unique_violation(e, format!("Coupon code {} already exists", code))
        })?;

        info!(coupon_id = %model.id, code = %model.code, "Coupon created");
        self.event_sender.publish(Event::CouponSaved {
            coupon_id: model.id,
            code: model.code.clone(),
        });
        Ok(model)
    }

    #[instrument(skip(self, request), fields(coupon_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateCouponRequest,
    ) -> Result<coupon::Model, ServiceError> {
        request.validate()?;
        let current = self.get(id).await?;
        if current.version != request.version {
            return Err(ServiceError::ConcurrentModification(id));
        }

        let discount_type = request.discount_type.unwrap_or(current.discount_type);
        let value = request.value.unwrap_or(current.value);
        let min_order_amount = request.min_order_amount.unwrap_or(current.min_order_amount);
        let max_discount = request.max_discount.unwrap_or(current.max_discount);
        let valid_from = request.valid_from.unwrap_or(current.valid_from);
        let valid_until = request.valid_until.unwrap_or(current.valid_until);
        let usage_limit = request.usage_limit.unwrap_or(current.usage_limit);
        let used_count = request.used_count.unwrap_or(current.used_count);
        validate_terms(
            discount_type,
            value,
            Some(min_order_amount),
            max_discount,
            Some(valid_from),
            valid_until,
            usage_limit,
            used_count,
        )
        .map_err(|e| {
            ServiceError::ValidationError(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            )
        })?;

        let mut active: coupon::ActiveModel = current.into();
        active.discount_type = Set(discount_type);
        active.value = Set(value);
        active.min_order_amount = Set(min_order_amount);
        active.max_discount = Set(max_discount);
        active.valid_from = Set(valid_from);
        active.valid_until = Set(valid_until);
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        active.usage_limit = Set(usage_limit);
        if let Some(used) = request.used_count {
            active.used_count = Set(used);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());
        active.version = Set(request.version + 1);

        // Version-guarded write: a concurrent edit leaves zero rows matched.
        // Redemptions do not bump the version, so the limit is re-checked in the same statement.
        let mut write = CouponEntity::update_many()
            .set(active)
            .filter(coupon::Column::Id.eq(id))
            .filter(coupon::Column::Version.eq(request.version));
        if request.used_count.is_none() && usage_limit > 0 {
            write = write.filter(coupon::Column::UsedCount.lte(usage_limit));
        }
        let result = write
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if result.rows_affected == 0 {
            let latest = self.get(id).await?;
            if latest.version == request.version {
                return Err(ServiceError::ValidationError(format!(
                    "usage_limit {} is below the {} redemptions of coupon {}",
                    usage_limit, latest.used_count, latest.code
                )));
            }
            return Err(ServiceError::ConcurrentModification(id));
        }

        let updated = self.get(id).await?;
        info!(coupon_id = %id, version = updated.version, "Coupon updated");
        self.event_sender.publish(Event::CouponSaved {
            coupon_id: id,
            code: updated.code.clone(),
        });
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        CouponEntity::find_by_id(id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn list(&self, page: u64, per_page: u64) -> Result<(Vec<coupon::Model>, u64), ServiceError> {
        let paginator = CouponEntity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await.map_err(ServiceError::DatabaseError)?;
        let items = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((items, total))
    }
}
