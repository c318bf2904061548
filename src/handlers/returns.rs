use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::return_request::ReturnStatus,
    handlers::common::PaginationParams,
    services::returns::{CreateReturnRequest, ResolveReturnRequest, ReturnResponse},
    ApiCreated, ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ReturnListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size
    pub limit: Option<u64>,
    /// Only requests in this status
    pub status: Option<ReturnStatus>,
}

#[utoipa::path(
    post,
    path = "/api/v1/returns",
    summary = "Request a return or exchange",
    description = "Files a request for one item of a delivered order. Only one open request per item is allowed.",
    request_body = CreateReturnRequest,
    responses(
        (status = 201, description = "Request filed", body = ApiResponse<ReturnResponse>),
        (status = 400, description = "Order not delivered or reason missing", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "A request is already open for the item", body = crate::errors::ErrorResponse),
    ),
    tag = "returns"
)]
pub async fn create_return(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateReturnRequest>,
) -> ApiCreated<ReturnResponse> {
    let created = state.services.returns.file_request(actor.user_id, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ReturnResponse::from(created))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns",
    summary = "List my returns",
    params(PaginationParams),
    responses(
        (status = 200, description = "Caller's requests, newest first", body = ApiResponse<PaginatedResponse<ReturnResponse>>),
    ),
    tag = "returns"
)]
pub async fn list_my_returns(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<ReturnResponse>> {
    let (page, limit) = params.resolve(&state.config);
    let (rows, total) = state
        .services
        .returns
        .list_for_user(actor.user_id, page, limit)
        .await?;
    let items = rows.into_iter().map(ReturnResponse::from).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/returns/{id}",
    summary = "Get my return",
    params(("id" = Uuid, Path, description = "Return ID")),
    responses(
        (status = 200, description = "Return request", body = ApiResponse<ReturnResponse>),
        (status = 404, description = "Return not found", body = crate::errors::ErrorResponse),
    ),
    tag = "returns"
)]
pub async fn get_my_return(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<ReturnResponse> {
    let model = state
        .services
        .returns
        .get(id, actor.user_id, actor.is_admin())
        .await?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(model))))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/returns",
    summary = "List all returns",
    params(ReturnListQuery),
    responses(
        (status = 200, description = "Requests, newest first", body = ApiResponse<PaginatedResponse<ReturnResponse>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn list_returns(
    State(state): State<AppState>,
    Query(query): Query<ReturnListQuery>,
) -> ApiResult<PaginatedResponse<ReturnResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = state.config.page_size(query.limit);
    let (rows, total) = state
        .services
        .returns
        .list_all(query.status, page, limit)
        .await?;
    let items = rows.into_iter().map(ReturnResponse::from).collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, limit,
    ))))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/returns/{id}",
    summary = "Resolve a return",
    params(("id" = Uuid, Path, description = "Return ID")),
    request_body = ResolveReturnRequest,
    responses(
        (status = 200, description = "Request approved or rejected", body = ApiResponse<ReturnResponse>),
        (status = 404, description = "Return not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already resolved", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn resolve_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResolveReturnRequest>,
) -> ApiResult<ReturnResponse> {
    let resolved = state.services.returns.resolve(id, payload).await?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(resolved))))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/returns/{id}/refund",
    summary = "Mark refund completed",
    params(("id" = Uuid, Path, description = "Return ID")),
    responses(
        (status = 200, description = "Refund recorded", body = ApiResponse<ReturnResponse>),
        (status = 400, description = "Return is not approved", body = crate::errors::ErrorResponse),
        (status = 409, description = "Refund already recorded", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn complete_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ReturnResponse> {
    let updated = state.services.returns.complete_refund(id).await?;
    Ok(Json(ApiResponse::success(ReturnResponse::from(updated))))
}
