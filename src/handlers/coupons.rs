use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    auth::Actor,
    handlers::common::PaginationParams,
    services::coupons::{
        CouponResponse, CouponValidation, CreateCouponRequest, UpdateCouponRequest,
        ValidateCouponRequest,
    },
    ApiCreated, ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    summary = "Preview a coupon",
    description = "Checks a coupon against a subtotal and returns the discount it would give. Nothing is redeemed.",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = ApiResponse<CouponValidation>),
        (status = 400, description = "Coupon does not apply", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<ValidateCouponRequest>,
) -> ApiResult<CouponValidation> {
    let validation = state.services.coupons.validate(payload, actor.user_id).await?;
    Ok(Json(ApiResponse::success(validation)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons",
    summary = "List coupons",
    params(PaginationParams),
    responses(
        (status = 200, description = "Coupons, newest first", body = ApiResponse<PaginatedResponse<CouponResponse>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<CouponResponse>> {
    let (page, limit) = params.resolve(&state.config);
    let (coupons, total) = state.services.coupons.list(page, limit).await?;
    let items = coupons.into_iter().map(CouponResponse::from).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/coupons",
    summary = "Create coupon",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Invalid terms", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponRequest>,
) -> ApiCreated<CouponResponse> {
    let coupon = state.services.coupons.create(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CouponResponse::from(coupon))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons/{id}",
    summary = "Get coupon",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 200, description = "Coupon", body = ApiResponse<CouponResponse>),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<CouponResponse> {
    let coupon = state.services.coupons.get(id).await?;
    Ok(Json(ApiResponse::success(CouponResponse::from(coupon))))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/coupons/{id}",
    summary = "Update coupon",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    request_body = UpdateCouponRequest,
    responses(
        (status = 200, description = "Coupon updated", body = ApiResponse<CouponResponse>),
        (status = 400, description = "Invalid terms", body = crate::errors::ErrorResponse),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Stale version", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponRequest>,
) -> ApiResult<CouponResponse> {
    let coupon = state.services.coupons.update(id, payload).await?;
    Ok(Json(ApiResponse::success(CouponResponse::from(coupon))))
}
