//! Pricing engine: effective price, per-line warranty add-on, coupon discount
//! and the zero-floored total.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon,
        extended_warranty_category::{self, Entity as WarrantyEntity},
        order_item::WarrantyPlan,
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    services::coupons::{compute_discount, CouponService},
};

/// One line of a customer's cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be at least 1"))]
    #[schema(example = 1)]
    pub quantity: i32,
    #[serde(default)]
    pub warranty_plan: Option<WarrantyPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub warranty_plan: Option<WarrantyPlan>,
    pub warranty_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Totals {
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

/// Result of pricing a cart, with the coupon that produced the discount.
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub totals: Totals,
    pub coupon: Option<coupon::Model>,
}

/// Price the storefront charges for one unit.
///
/// A zero `price` with an `original_price` set means the product is listed at
/// its original price.
pub fn effective_price(product: &product::Model) -> Decimal {
    match product.original_price {
        Some(original) if product.price.is_zero() => original,
        _ => product.price,
    }
}

/// Prices a single line. The warranty add-on is charged once per line, not per unit.
pub fn price_line(
    product: &product::Model,
    quantity: i32,
    plan: Option<WarrantyPlan>,
    warranty: Option<&extended_warranty_category::Model>,
) -> Result<PricedLine, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity for {} must be at least 1",
            product.name
        )));
    }

    let unit_price = effective_price(product);
    let warranty_price = match plan {
        None => Decimal::ZERO,
        Some(plan) => match warranty.filter(|w| w.is_active) {
            Some(row) => row.price_for(plan),
            None => {
                return Err(ServiceError::ValidationError(format!(
                    "Extended warranty is not offered for category '{}'",
                    product.category
                )))
            }
        },
    };

    Ok(PricedLine {
        product_id: product.id,
        product_name: product.name.clone(),
        quantity,
        unit_price,
        warranty_plan: plan,
        warranty_price,
        line_total: unit_price * Decimal::from(quantity) + warranty_price,
    })
}

/// Combines the subtotal and a discount into order totals.
/// The discount is clamped into `[0, subtotal]` so the total never goes negative.
pub fn compute_totals(subtotal: Decimal, discount: Decimal) -> Totals {
    let discount = round_money(discount.max(Decimal::ZERO).min(subtotal));
    Totals {
        original_amount: subtotal,
        discount_amount: discount,
        total_amount: (subtotal - discount).max(Decimal::ZERO),
    }
}

pub(crate) fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone, Default)]
pub struct PricingService;

impl PricingService {
    pub fn new() -> Self {
        Self
    }

    /// Prices a cart against current catalog data on `conn`.
    ///
    /// Takes any connection so checkout can price inside its own transaction.
    #[instrument(skip(self, conn, cart), fields(lines = cart.len(), coupon = ?coupon_code))]
    pub async fn price_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: &[CartLine],
        coupon_code: Option<&str>,
        user_id: Uuid,
    ) -> Result<PricedCart, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        for line in cart {
            line.validate()?;
        }

        let product_ids: Vec<Uuid> = cart.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load cart products");
                ServiceError::DatabaseError(e)
            })?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let categories: Vec<String> = products.values().map(|p| p.category.clone()).collect();
        let warranties: HashMap<String, extended_warranty_category::Model> = WarrantyEntity::find()
            .filter(extended_warranty_category::Column::CategoryName.is_in(categories))
            .filter(extended_warranty_category::Column::IsActive.eq(true))
            .all(conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load warranty prices");
                ServiceError::DatabaseError(e)
            })?
            .into_iter()
            .map(|w| (w.category_name.clone(), w))
            .collect();

        let mut lines = Vec::with_capacity(cart.len());
        for line in cart {
            let product = products.get(&line.product_id).ok_or_else(|| {
                ServiceError::ValidationError(format!("Unknown product {}", line.product_id))
            })?;
            if !product.in_stock {
                return Err(ServiceError::ValidationError(format!(
                    "{} is out of stock",
                    product.name
                )));
            }
            lines.push(price_line(
                product,
                line.quantity,
                line.warranty_plan,
                warranties.get(&product.category),
            )?);
        }

        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

        let (coupon, discount) = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let coupon = CouponService::check_on(conn, code, subtotal, user_id).await?;
                let discount = compute_discount(&coupon, subtotal);
                (Some(coupon), discount)
            }
            None => (None, Decimal::ZERO),
        };

        Ok(PricedCart {
            lines,
            totals: compute_totals(subtotal, discount),
            coupon,
        })
    }

    /// Active warranty price rows, by category name.
    pub async fn warranty_table<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<extended_warranty_category::Model>, ServiceError> {
        Ok(WarrantyEntity::find()
            .filter(extended_warranty_category::Column::IsActive.eq(true))
            .order_by_asc(extended_warranty_category::Column::CategoryName)
            .all(conn)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::coupon::DiscountType;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, original: Option<Decimal>) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Dishwasher".into(),
            category: "Dishwashers".into(),
            price,
            original_price: original,
            in_stock: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn warranty(two: Decimal, four: Decimal) -> extended_warranty_category::Model {
        extended_warranty_category::Model {
            id: Uuid::new_v4(),
            category_name: "Dishwashers".into(),
            two_year_price: two,
            four_year_price: four,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn coupon(kind: DiscountType, value: Decimal, max: Option<Decimal>) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            description: None,
            discount_type: kind,
            value,
            min_order_amount: Decimal::ZERO,
            max_discount: max,
            usage_limit: 0,
            used_count: 0,
            is_active: true,
            valid_from: Utc::now(),
            valid_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn effective_price_falls_back_to_original_when_price_is_zero() {
        assert_eq!(effective_price(&product(dec!(0), Some(dec!(750)))), dec!(750));
        assert_eq!(effective_price(&product(dec!(600), Some(dec!(750)))), dec!(600));
        assert_eq!(effective_price(&product(dec!(0), None)), dec!(0));
    }

    #[test]
    fn warranty_is_added_once_per_line() {
        let line = price_line(
            &product(dec!(1000), None),
            3,
            Some(WarrantyPlan::FourYear),
            Some(&warranty(dec!(100), dec!(180))),
        )
        .unwrap();
        assert_eq!(line.warranty_price, dec!(180));
        assert_eq!(line.line_total, dec!(3180));
    }

    #[test]
    fn warranty_without_active_row_is_rejected() {
        let mut inactive = warranty(dec!(100), dec!(180));
        inactive.is_active = false;
        let p = product(dec!(1000), None);
        assert!(matches!(
            price_line(&p, 1, Some(WarrantyPlan::TwoYear), None),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            price_line(&p, 1, Some(WarrantyPlan::TwoYear), Some(&inactive)),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(price_line(&product(dec!(10), None), 0, None, None).is_err());
    }

    #[test]
    fn capped_percentage_coupon_example() {
        let line = price_line(
            &product(dec!(10000), None),
            1,
            Some(WarrantyPlan::TwoYear),
            Some(&warranty(dec!(500), dec!(900))),
        )
        .unwrap();
        assert_eq!(line.line_total, dec!(10500));

        let save10 = coupon(DiscountType::Percentage, dec!(10), Some(dec!(2000)));
        let totals = compute_totals(line.line_total, compute_discount(&save10, line.line_total));
        assert_eq!(totals.original_amount, dec!(10500));
        assert_eq!(totals.discount_amount, dec!(1050));
        assert_eq!(totals.total_amount, dec!(9450));
    }

    #[test]
    fn fixed_coupon_larger_than_subtotal_floors_at_zero() {
        let big = coupon(DiscountType::FixedAmount, dec!(500), None);
        let totals = compute_totals(dec!(300), compute_discount(&big, dec!(300)));
        assert_eq!(totals.discount_amount, dec!(300));
        assert_eq!(totals.total_amount, dec!(0));
    }

    proptest! {
        #[test]
        fn totals_invariant_holds(
            prices in prop::collection::vec((0u32..50_000, 1i32..5, prop::option::of(0u32..2_000)), 1..6),
            percentage in any::<bool>(),
            value in 1u32..20_000,
            cap in prop::option::of(1u32..5_000),
        ) {
            let w = warranty(dec!(0), dec!(0));
            let subtotal: Decimal = prices
                .iter()
                .map(|(price, qty, warranty_price)| {
                    let mut row = w.clone();
                    row.two_year_price = Decimal::from(warranty_price.unwrap_or(0));
                    let plan = warranty_price.map(|_| WarrantyPlan::TwoYear);
                    price_line(&product(Decimal::from(*price), None), *qty, plan, Some(&row))
                        .unwrap()
                        .line_total
                })
                .sum();

            let c = if percentage {
                coupon(DiscountType::Percentage, Decimal::from(value % 100 + 1), cap.map(Decimal::from))
            } else {
                coupon(DiscountType::FixedAmount, Decimal::from(value), None)
            };
            let totals = compute_totals(subtotal, compute_discount(&c, subtotal));

            prop_assert!(totals.discount_amount >= Decimal::ZERO);
            prop_assert!(totals.discount_amount <= totals.original_amount);
            prop_assert!(totals.total_amount >= Decimal::ZERO);
            prop_assert_eq!(
                totals.total_amount,
                (totals.original_amount - totals.discount_amount).max(Decimal::ZERO)
            );
        }
    }
}
