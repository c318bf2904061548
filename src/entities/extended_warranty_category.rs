use super::order_item::WarrantyPlan;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "extended_warranty_categories")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub category_name: String,
    pub two_year_price: Decimal,
    pub four_year_price: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Flat add-on price for one order line under `plan`.
    pub fn price_for(&self, plan: WarrantyPlan) -> Decimal {
        match plan {
            WarrantyPlan::TwoYear => self.two_year_price,
            WarrantyPlan::FourYear => self.four_year_price,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
