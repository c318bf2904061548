use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Preset that decides which admin status changes are allowed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any non-terminal or terminal state may move to any non-`pending` state
    #[default]
    Permissive,
    /// Only to a later state in the sequence
    ForwardOnly,
    /// Only to the immediately following state
    Sequential,
}

/// Explicit `from -> {targets}` map materialized from a [`TransitionPolicy`].
///
/// Cancellation is part of every table and is only reachable from a
/// non-terminal state. `pending` is never a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    policy: TransitionPolicy,
    allowed: BTreeMap<OrderStatus, BTreeSet<OrderStatus>>,
}

impl TransitionTable {
    pub fn from_policy(policy: TransitionPolicy) -> Self {
        let mut allowed: BTreeMap<OrderStatus, BTreeSet<OrderStatus>> = BTreeMap::new();
        let seq = OrderStatus::SEQUENCE;

        for from in seq.iter().copied().chain(std::iter::once(OrderStatus::Cancelled)) {
            let mut targets = BTreeSet::new();
            match (policy, from.position()) {
                (TransitionPolicy::Permissive, _) => {
                    targets.extend(seq.iter().copied().filter(|s| *s != OrderStatus::Pending && *s != from));
                }
                (TransitionPolicy::ForwardOnly, Some(idx)) => {
                    targets.extend(seq.iter().copied().skip(idx + 1));
                }
                (TransitionPolicy::Sequential, Some(idx)) => {
                    targets.extend(seq.get(idx + 1).copied());
                }
                (_, None) => {}
            }
            if !from.is_terminal() {
                targets.insert(OrderStatus::Cancelled);
            }
            allowed.insert(from, targets);
        }

        Self { policy, allowed }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    pub fn allows(&self, from: OrderStatus, to: OrderStatus) -> bool {
        self.allowed.get(&from).map_or(false, |t| t.contains(&to))
    }

    pub fn targets(&self, from: OrderStatus) -> Vec<OrderStatus> {
        self.allowed
            .get(&from)
            .map(|t| t.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Admin-driven status changes, guarded by the transition table and the order's version.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DbPool>,
    table: Arc<TransitionTable>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DbPool>, table: Arc<TransitionTable>, event_sender: EventSender) -> Self {
        Self {
            db,
            table,
            event_sender,
        }
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    async fn load(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to fetch order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Moves an order to `target`. Same-state requests are a no-op.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %target))]
    pub async fn advance(
        &self,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        if target == OrderStatus::Pending {
            return Err(ServiceError::ValidationError(
                "Orders cannot be moved back to pending".to_string(),
            ));
        }
        if target == OrderStatus::Cancelled {
            return self.cancel(order_id).await;
        }

        let order = self.load(order_id).await?;
        if order.status == target {
            return Ok(order);
        }
        if !self.table.allows(order.status, target) {
            error!("Invalid status transition from {} to {}", order.status, target);
            return Err(ServiceError::ValidationError(format!(
                "Cannot transition from status '{}' to '{}'",
                order.status, target
            )));
        }

        self.write_status(order, target).await
    }

    /// Cancels an order from any non-terminal state.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }
        if order.status.is_terminal() {
            return Err(ServiceError::ValidationError(format!(
                "Order in status '{}' cannot be cancelled",
                order.status
            )));
        }
        self.write_status(order, OrderStatus::Cancelled).await
    }

    /// Targets the admin may pick for this order next.
    pub async fn allowed_targets(&self, order_id: Uuid) -> Result<Vec<OrderStatus>, ServiceError> {
        let order = self.load(order_id).await?;
        Ok(self.table.targets(order.status))
    }

    async fn write_status(
        &self,
        order: OrderModel,
        target: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let old_status = order.status;
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to update order {} status: {}", order.id, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        info!(
            "Order {} status updated from '{}' to '{}'",
            order.id, old_status, target
        );
        metrics::counter!("ender_outlet_orders.status_changes", 1, "to" => target.to_string());

        if target == OrderStatus::Cancelled {
            self.event_sender.publish(Event::OrderCancelled {
                order_id: order.id,
                previous_status: old_status.to_string(),
            });
        } else {
            self.event_sender.publish(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: old_status.to_string(),
                new_status: target.to_string(),
            });
        }

        self.load(order.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;
    use OrderStatus::*;

    #[rstest]
    #[case(TransitionPolicy::Permissive, Delivered, Preparing, true)]
    #[case(TransitionPolicy::Permissive, Pending, InTransit, true)]
    #[case(TransitionPolicy::Permissive, Cancelled, Preparing, true)]
    #[case(TransitionPolicy::Permissive, Delivered, Cancelled, false)]
    #[case(TransitionPolicy::Permissive, Preparing, Pending, false)]
    #[case(TransitionPolicy::ForwardOnly, Preparing, Shipped, true)]
    #[case(TransitionPolicy::ForwardOnly, Shipped, Preparing, false)]
    #[case(TransitionPolicy::ForwardOnly, InTransit, Cancelled, true)]
    #[case(TransitionPolicy::ForwardOnly, Cancelled, Preparing, false)]
    #[case(TransitionPolicy::Sequential, Preparing, ReadyToShip, true)]
    #[case(TransitionPolicy::Sequential, Preparing, Shipped, false)]
    #[case(TransitionPolicy::Sequential, Pending, Cancelled, true)]
    #[case(TransitionPolicy::Sequential, Delivered, Cancelled, false)]
    fn transition_table_cases(
        #[case] policy: TransitionPolicy,
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] expected: bool,
    ) {
        let table = TransitionTable::from_policy(policy);
        assert_eq!(table.allows(from, to), expected, "{policy}: {from} -> {to}");
    }

    #[rstest]
    #[case(TransitionPolicy::Permissive)]
    #[case(TransitionPolicy::ForwardOnly)]
    #[case(TransitionPolicy::Sequential)]
    fn pending_is_never_a_target(#[case] policy: TransitionPolicy) {
        let table = TransitionTable::from_policy(policy);
        for from in OrderStatus::SEQUENCE {
            assert!(!table.targets(from).contains(&Pending));
        }
    }

    #[test]
    fn sequential_targets_are_next_state_and_cancel() {
        let table = TransitionTable::from_policy(TransitionPolicy::Sequential);
        assert_eq!(table.targets(Shipped), vec![InTransit, Cancelled]);
        assert!(table.targets(Delivered).is_empty());
    }

    #[test]
    fn policy_parses_from_config_names() {
        assert_eq!(
            TransitionPolicy::from_str("forward_only").unwrap(),
            TransitionPolicy::ForwardOnly
        );
        assert!(TransitionPolicy::from_str("strict").is_err());
        assert_eq!(TransitionPolicy::default(), TransitionPolicy::Permissive);
    }
}
