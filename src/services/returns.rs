use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order::{Entity as OrderEntity, OrderStatus},
        order_item::Entity as OrderItemEntity,
        return_request::{self, Entity as ReturnEntity, ReturnStatus, ReturnType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{StatusDisplay, StatusMeta},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateReturnRequest {
    pub order_item_id: Uuid,
    pub return_type: ReturnType,
    #[validate(length(min = 1, max = 2000, message = "Reason is required"))]
    pub reason: String,
}

/// Admin decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReturnDecision {
    Approved,
    Rejected,
}

impl From<ReturnDecision> for ReturnStatus {
    fn from(decision: ReturnDecision) -> Self {
        match decision {
            ReturnDecision::Approved => ReturnStatus::Approved,
            ReturnDecision::Rejected => ReturnStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResolveReturnRequest {
    pub decision: ReturnDecision,
    #[validate(length(max = 2000))]
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReturnResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub user_id: Uuid,
    pub return_type: ReturnType,
    pub reason: String,
    pub status: ReturnStatus,
    pub status_display: StatusDisplay,
    pub admin_notes: Option<String>,
    pub refund_pending: bool,
    pub refund_completed_at: Option<DateTime<Utc>>,
    pub request_date: DateTime<Utc>,
    pub response_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl From<return_request::Model> for ReturnResponse {
    fn from(m: return_request::Model) -> Self {
        Self {
            id: m.id,
            order_id: m.order_id,
            order_item_id: m.order_item_id,
            user_id: m.user_id,
            return_type: m.return_type,
            reason: m.reason,
            status: m.status,
            status_display: m.status.display(),
            admin_notes: m.admin_notes,
            refund_pending: m.refund_pending,
            refund_completed_at: m.refund_completed_at,
            request_date: m.request_date,
            response_date: m.response_date,
            updated_at: m.updated_at,
            version: m.version,
        }
    }
}

/// Return and exchange requests for delivered order items.
#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl ReturnService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Files a request for one item of the caller's delivered order.
    ///
    /// At most one pending or approved request may exist per item; the unique
    /// `open_item_id` index backs the pre-check under concurrency.
    #[instrument(skip(self, request), fields(user_id = %user_id, order_item_id = %request.order_item_id))]
    pub async fn file_request(
        &self,
        user_id: Uuid,
        request: CreateReturnRequest,
    ) -> Result<return_request::Model, ServiceError> {
        request.validate()?;
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError("Reason is required".to_string()));
        }

        let not_found =
            || ServiceError::NotFound(format!("Order item {} not found", request.order_item_id));
        let item = OrderItemEntity::find_by_id(request.order_item_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(not_found)?;
        let order = OrderEntity::find_by_id(item.order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(not_found)?;

        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::ValidationError(format!(
                "Returns can only be requested for delivered orders; order {} is {}",
                order.order_number, order.status
            )));
        }

        let open = ReturnEntity::find()
            .filter(return_request::Column::OpenItemId.eq(item.id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if let Some(existing) = open {
            return Err(ServiceError::Conflict(format!(
                "A {} request is already open for this item",
                existing.status
            )));
        }

        let now = Utc::now();
        let model = return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            order_item_id: Set(item.id),
            user_id: Set(user_id),
            return_type: Set(request.return_type),
            reason: Set(reason),
            status: Set(ReturnStatus::Pending),
            admin_notes: Set(None),
            refund_pending: Set(false),
            refund_completed_at: Set(None),
            open_item_id: Set(Some(item.id)),
            request_date: Set(now),
            response_date: Set(None),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            warn!(error = %e, order_item_id = %item.id, "Return insert rejected");
            ServiceError::from_unique_violation(e, "A request is already open for this item")
        })?;

        info!(return_id = %model.id, return_type = %model.return_type, "Return requested");
        metrics::counter!("ender_outlet_returns.requested", 1, "type" => model.return_type.to_string());
        self.event_sender.publish(Event::ReturnRequested {
            return_id: model.id,
            order_id: model.order_id,
            order_item_id: model.order_item_id,
            return_type: model.return_type.to_string(),
        });
        Ok(model)
    }

    /// Approves or rejects a pending request. No refund or stock side effects.
    #[instrument(skip(self, request), fields(return_id = %return_id, decision = ?request.decision))]
    pub async fn resolve(
        &self,
        return_id: Uuid,
        request: ResolveReturnRequest,
    ) -> Result<return_request::Model, ServiceError> {
        request.validate()?;
        let current = self.find(return_id).await?;
        if current.status != ReturnStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Return {} was already {}",
                return_id, current.status
            )));
        }

        let status: ReturnStatus = request.decision.into();
        let approved = status == ReturnStatus::Approved;
        let notes = request
            .admin_notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let now = Utc::now();

        let mut update = ReturnEntity::update_many()
            .col_expr(return_request::Column::Status, Expr::value(status))
            .col_expr(return_request::Column::AdminNotes, Expr::value(notes))
            .col_expr(return_request::Column::ResponseDate, Expr::value(now))
            .col_expr(return_request::Column::RefundPending, Expr::value(approved))
            .col_expr(return_request::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                return_request::Column::Version,
                Expr::value(current.version + 1),
            );
        if !approved {
            update = update.col_expr(
                return_request::Column::OpenItemId,
                Expr::value(Option::<Uuid>::None),
            );
        }

        let result = update
            .filter(return_request::Column::Id.eq(return_id))
            .filter(return_request::Column::Status.eq(ReturnStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, return_id = %return_id, "Failed to resolve return");
                ServiceError::DatabaseError(e)
            })?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Return {} was resolved concurrently",
                return_id
            )));
        }

        info!(return_id = %return_id, status = %status, "Return resolved");
        self.event_sender.publish(Event::ReturnResolved {
            return_id,
            status: status.to_string(),
        });
        self.find(return_id).await
    }

    /// Records that the refund for an approved return was paid out.
    #[instrument(skip(self), fields(return_id = %return_id))]
    pub async fn complete_refund(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        let current = self.find(return_id).await?;
        if current.status != ReturnStatus::Approved {
            return Err(ServiceError::ValidationError(format!(
                "Return {} is {}, only approved returns can be refunded",
                return_id, current.status
            )));
        }
        if !current.refund_pending {
            return Err(ServiceError::Conflict(format!(
                "Refund for return {} was already completed",
                return_id
            )));
        }

        let now = Utc::now();
        let result = ReturnEntity::update_many()
            .col_expr(return_request::Column::RefundPending, Expr::value(false))
            .col_expr(return_request::Column::RefundCompletedAt, Expr::value(now))
            .col_expr(return_request::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                return_request::Column::Version,
                Expr::value(current.version + 1),
            )
            .filter(return_request::Column::Id.eq(return_id))
            .filter(return_request::Column::RefundPending.eq(true))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Refund for return {} was already completed",
                return_id
            )));
        }

        info!(return_id = %return_id, "Refund completed");
        self.event_sender.publish(Event::RefundCompleted { return_id });
        self.find(return_id).await
    }

    async fn find(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        ReturnEntity::find_by_id(return_id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, return_id = %return_id, "Failed to fetch return");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Return {} not found", return_id)))
    }

    pub async fn get(
        &self,
        return_id: Uuid,
        user_id: Uuid,
        is_admin: bool,
    ) -> Result<return_request::Model, ServiceError> {
        let model = self.find(return_id).await?;
        if !is_admin && model.user_id != user_id {
            return Err(ServiceError::NotFound(format!("Return {} not found", return_id)));
        }
        Ok(model)
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<return_request::Model>, u64), ServiceError> {
        let paginator = ReturnEntity::find()
            .filter(return_request::Column::UserId.eq(user_id))
            .order_by_desc(return_request::Column::RequestDate)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::DatabaseError)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((rows, total))
    }

    pub async fn list_all(
        &self,
        status: Option<ReturnStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<return_request::Model>, u64), ServiceError> {
        let mut query = ReturnEntity::find().order_by_desc(return_request::Column::RequestDate);
        if let Some(status) = status {
            query = query.filter(return_request::Column::Status.eq(status));
        }
        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::DatabaseError)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{order, order_item};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{Database, DatabaseConnection};
    use sea_orm_migration::MigratorTrait;

    async fn seed(status: OrderStatus) -> (Arc<DatabaseConnection>, Uuid, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        crate::migrator::Migrator::up(&db, None).await.unwrap();
        let now = Utc::now();
        let user = Uuid::new_v4();

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set("EO-20250301-RET00001".into()),
            user_id: Set(user),
            status: Set(status),
            original_amount: Set(dec!(100)),
            discount_amount: Set(dec!(0)),
            total_amount: Set(dec!(100)),
            coupon_code: Set(None),
            coupon_id: Set(None),
            currency: Set("TRY".into()),
            shipping_address: Set("Ankara".into()),
            payment_method: Set(order::PaymentMethod::BankTransfer),
            payment_status: Set(order::PaymentStatus::Completed),
            payment_channel_id: Set(None),
            payment_transaction_id: Set(None),
            installments: Set(1),
            tracking_code: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&db)
        .await
        .unwrap();

        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(Uuid::new_v4()),
            product_name: Set("Oven".into()),
            quantity: Set(1),
            unit_price: Set(dec!(100)),
            warranty_plan: Set(None),
            warranty_price: Set(dec!(0)),
            line_total: Set(dec!(100)),
            created_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();

        (Arc::new(db), user, item.id)
    }

    fn service(db: Arc<DatabaseConnection>) -> ReturnService {
        let (sender, _rx) = crate::events::channel(16);
        ReturnService::new(db, sender)
    }

    fn request(item: Uuid) -> CreateReturnRequest {
        CreateReturnRequest {
            order_item_id: item,
            return_type: ReturnType::Exchange,
            reason: "Door hinge arrived bent".into(),
        }
    }

    #[tokio::test]
    async fn second_open_request_for_item_conflicts_until_rejected() {
        let (db, user, item) = seed(OrderStatus::Delivered).await;
        let svc = service(db);

        let first = svc.file_request(user, request(item)).await.unwrap();
        assert_eq!(first.open_item_id, Some(item));
        assert_matches!(
            svc.file_request(user, request(item)).await,
            Err(ServiceError::Conflict(_))
        );

        let rejected = svc
            .resolve(
                first.id,
                ResolveReturnRequest {
                    decision: ReturnDecision::Rejected,
                    admin_notes: Some("Outside policy".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, ReturnStatus::Rejected);
        assert!(rejected.response_date.is_some());
        assert_eq!(rejected.open_item_id, None);

        assert!(svc.file_request(user, request(item)).await.is_ok());
    }

    #[tokio::test]
    async fn undelivered_orders_and_foreign_items_are_rejected() {
        let (db, user, item) = seed(OrderStatus::Shipped).await;
        let svc = service(db);
        assert_matches!(
            svc.file_request(user, request(item)).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            svc.file_request(Uuid::new_v4(), request(item)).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn approval_flags_refund_and_second_resolve_conflicts() {
        let (db, user, item) = seed(OrderStatus::Delivered).await;
        let svc = service(db);
        let filed = svc.file_request(user, request(item)).await.unwrap();
        assert!(filed.response_date.is_none());

        let approve = ResolveReturnRequest {
            decision: ReturnDecision::Approved,
            admin_notes: None,
        };
        let approved = svc.resolve(filed.id, approve.clone()).await.unwrap();
        assert!(approved.refund_pending);
        assert_eq!(approved.open_item_id, Some(item));

        assert_matches!(
            svc.resolve(filed.id, approve).await,
            Err(ServiceError::Conflict(_))
        );

        let refunded = svc.complete_refund(filed.id).await.unwrap();
        assert!(!refunded.refund_pending);
        assert!(refunded.refund_completed_at.is_some());
        assert_matches!(
            svc.complete_refund(filed.id).await,
            Err(ServiceError::Conflict(_))
        );
    }
}
