//! Read-only lookups the storefront renders from.

use axum::{extract::State, response::Json};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    entities::{
        order::PaymentStatus,
        return_request::ReturnStatus,
    },
    models::{status_display::order_status_catalog, StatusDisplay, StatusMeta},
    ApiResponse, ApiResult, AppState,
};
use sea_orm::Iterable;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusCatalog {
    pub order_statuses: Vec<StatusDisplay>,
    pub payment_statuses: Vec<StatusDisplay>,
    pub return_statuses: Vec<StatusDisplay>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WarrantyPrice {
    pub category_name: String,
    pub two_year_price: Decimal,
    pub four_year_price: Decimal,
}

#[utoipa::path(
    get,
    path = "/api/v1/order-statuses",
    summary = "Status display metadata",
    description = "Label, badge color, icon and terminal flag for every order, payment and return status",
    responses(
        (status = 200, description = "Status catalog", body = ApiResponse<StatusCatalog>),
    ),
    tag = "catalog"
)]
pub async fn order_statuses() -> ApiResult<StatusCatalog> {
    Ok(Json(ApiResponse::success(StatusCatalog {
        order_statuses: order_status_catalog(),
        payment_statuses: PaymentStatus::iter().map(StatusMeta::display).collect(),
        return_statuses: ReturnStatus::iter().map(StatusMeta::display).collect(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/warranty-categories",
    summary = "Extended warranty prices",
    description = "Active flat per-line warranty prices by product category",
    responses(
        (status = 200, description = "Warranty price table", body = ApiResponse<Vec<WarrantyPrice>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "catalog"
)]
pub async fn warranty_categories(State(state): State<AppState>) -> ApiResult<Vec<WarrantyPrice>> {
    let rows = state.services.pricing.warranty_table(&*state.db).await?;
    let prices = rows
        .into_iter()
        .map(|w| WarrantyPrice {
            category_name: w.category_name,
            two_year_price: w.two_year_price,
            four_year_price: w.four_year_price,
        })
        .collect();
    Ok(Json(ApiResponse::success(prices)))
}
