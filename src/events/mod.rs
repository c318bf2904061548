use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::notifications::{Notification, NotificationHub};

/// Domain events emitted after a mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        status: String,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        previous_status: String,
    },
    TrackingCodeUpdated {
        order_id: Uuid,
        tracking_code: String,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        code: String,
        order_id: Uuid,
    },
    CouponSaved {
        coupon_id: Uuid,
        code: String,
    },
    PaymentInitiated {
        transaction_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentSucceeded {
        transaction_id: Uuid,
        order_id: Uuid,
    },
    PaymentFailed {
        transaction_id: Uuid,
        order_id: Uuid,
        status: String,
        error_code: Option<String>,
    },
    PaymentCallbackConflict {
        transaction_id: Uuid,
        recorded_status: String,
        received_status: String,
    },
    ReturnRequested {
        return_id: Uuid,
        order_id: Uuid,
        order_item_id: Uuid,
        return_type: String,
    },
    ReturnResolved {
        return_id: Uuid,
        status: String,
    },
    RefundCompleted {
        return_id: Uuid,
    },
    /// Published by the catalog service through the admin notification endpoint
    ProductChanged {
        product_id: Uuid,
        change: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Notification topic an admin session can filter on.
    pub fn topic(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. }
            | Event::OrderStatusChanged { .. }
            | Event::OrderCancelled { .. }
            | Event::TrackingCodeUpdated { .. } => "orders",
            Event::CouponRedeemed { .. } | Event::CouponSaved { .. } => "coupons",
            Event::PaymentInitiated { .. }
            | Event::PaymentSucceeded { .. }
            | Event::PaymentFailed { .. }
            | Event::PaymentCallbackConflict { .. } => "payments",
            Event::ReturnRequested { .. }
            | Event::ReturnResolved { .. }
            | Event::RefundCompleted { .. } => "returns",
            Event::ProductChanged { .. } => "catalog",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::TrackingCodeUpdated { .. } => "tracking_code_updated",
            Event::CouponRedeemed { .. } => "coupon_redeemed",
            Event::CouponSaved { .. } => "coupon_saved",
            Event::PaymentInitiated { .. } => "payment_initiated",
            Event::PaymentSucceeded { .. } => "payment_succeeded",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::PaymentCallbackConflict { .. } => "payment_callback_conflict",
            Event::ReturnRequested { .. } => "return_requested",
            Event::ReturnResolved { .. } => "return_resolved",
            Event::RefundCompleted { .. } => "refund_completed",
            Event::ProductChanged { .. } => "product_changed",
        }
    }

    /// Id of the entity the event is about.
    pub fn entity_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::OrderCancelled { order_id, .. }
            | Event::TrackingCodeUpdated { order_id, .. } => *order_id,
            Event::CouponRedeemed { coupon_id, .. } | Event::CouponSaved { coupon_id, .. } => {
                *coupon_id
            }
            Event::PaymentInitiated { transaction_id, .. }
            | Event::PaymentSucceeded { transaction_id, .. }
            | Event::PaymentFailed { transaction_id, .. }
            | Event::PaymentCallbackConflict { transaction_id, .. } => *transaction_id,
            Event::ReturnRequested { return_id, .. }
            | Event::ReturnResolved { return_id, .. }
            | Event::RefundCompleted { return_id } => *return_id,
            Event::ProductChanged { product_id, .. } => *product_id,
        }
    }

    pub fn into_notification(self, occurred_at: DateTime<Utc>) -> Notification {
        let topic = self.topic().to_string();
        let kind = self.kind().to_string();
        let entity_id = self.entity_id();
        let payload = serde_json::to_value(&self).unwrap_or(serde_json::Value::Null);
        Notification {
            topic,
            kind,
            entity_id,
            payload,
            occurred_at,
        }
    }
}

/// Best-effort publisher handed to every service.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting. A full or closed channel drops it.
    pub fn publish(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                counter!("ender_outlet_events.dropped", 1, "reason" => "full");
                warn!(kind = event.kind(), entity_id = %event.entity_id(), "Event channel full; dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                counter!("ender_outlet_events.dropped", 1, "reason" => "closed");
                warn!(kind = event.kind(), entity_id = %event.entity_id(), "Event channel closed; dropping event");
            }
        }
    }
}

/// Creates the event channel with the given capacity.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

/// Logs every event and fans it out to connected admin sessions.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, hub: NotificationHub) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("ender_outlet_events.processed", 1, "topic" => event.topic());
        match &event {
            Event::PaymentCallbackConflict {
                transaction_id,
                recorded_status,
                received_status,
            } => warn!(
                transaction_id = %transaction_id,
                recorded_status = %recorded_status,
                received_status = %received_status,
                "Conflicting payment callback recorded"
            ),
            other => info!(
                topic = other.topic(),
                kind = other.kind(),
                entity_id = %other.entity_id(),
                "Domain event"
            ),
        }

        let delivered = hub.publish(event.into_notification(Utc::now()));
        tracing::debug!(receivers = delivered, "Notification fanned out");
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_hub_subscribers() {
        let hub = NotificationHub::new(8);
        let mut sub = hub.subscribe();
        let (sender, rx) = channel(8);
        let loop_handle = tokio::spawn(process_events(rx, hub.clone()));

        let order_id = Uuid::new_v4();
        sender.publish(Event::OrderCancelled {
            order_id,
            previous_status: "preparing".into(),
        });

        let notification = sub.recv().await.unwrap();
        assert_eq!(notification.topic, "orders");
        assert_eq!(notification.kind, "order_cancelled");
        assert_eq!(notification.entity_id, order_id);
        assert_eq!(notification.payload["type"], "order_cancelled");

        drop(sender);
        loop_handle.await.unwrap();
    }

    #[test]
    fn publish_on_full_channel_drops_without_blocking() {
        let (sender, _rx) = channel(1);
        let event = Event::RefundCompleted {
            return_id: Uuid::new_v4(),
        };
        sender.publish(event.clone());
        sender.publish(event);
    }

    #[test]
    fn publish_after_receiver_dropped_is_harmless() {
        let (sender, rx) = channel(1);
        drop(rx);
        sender.publish(Event::RefundCompleted {
            return_id: Uuid::new_v4(),
        });
    }
}
