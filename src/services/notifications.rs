use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Message delivered to admin sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    #[schema(example = "orders")]
    pub topic: String,
    #[schema(example = "order_created")]
    pub kind: String,
    pub entity_id: Uuid,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// In-process fan-out of notifications to every connected admin session.
///
/// Delivery is fire-and-forget: a slow subscriber that falls more than the
/// buffer capacity behind skips the messages it missed.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Returns the number of sessions the notification reached.
    pub fn publish(&self, notification: Notification) -> usize {
        self.tx.send(notification).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Change notice pushed by the catalog service.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PublishNotificationRequest {
    pub product_id: Uuid,
    /// Free-form change kind, e.g. `price_changed` or `stock_changed`
    #[validate(length(min = 1, max = 64))]
    #[schema(example = "price_changed")]
    pub change: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// Accepts notifications from external collaborators and routes them through
/// the same event loop as internal events.
#[derive(Clone)]
pub struct NotificationService {
    event_sender: EventSender,
    hub: NotificationHub,
}

impl NotificationService {
    pub fn new(event_sender: EventSender, hub: NotificationHub) -> Self {
        Self { event_sender, hub }
    }

    #[tracing::instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub fn publish_external(&self, request: PublishNotificationRequest) -> Result<(), ServiceError> {
        request.validate()?;
        self.event_sender.publish(Event::ProductChanged {
            product_id: request.product_id,
            change: request.change.trim().to_string(),
            payload: request.payload,
        });
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn sample(kind: &str) -> Notification {
        Notification {
            topic: "orders".into(),
            kind: kind.into(),
            entity_id: Uuid::new_v4(),
            payload: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let hub = NotificationHub::new(4);
        assert_eq!(hub.publish(sample("order_created")), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_missed_messages() {
        let hub = NotificationHub::new(2);
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.publish(sample(&format!("n{i}")));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
        assert_eq!(rx.recv().await.unwrap().kind, "n3");
    }

    #[tokio::test]
    async fn external_publish_is_validated() {
        let (sender, mut rx) = crate::events::channel(4);
        let service = NotificationService::new(sender, NotificationHub::new(4));

        let bad = PublishNotificationRequest {
            product_id: Uuid::new_v4(),
            change: String::new(),
            payload: serde_json::Value::Null,
        };
        assert!(matches!(
            service.publish_external(bad),
            Err(ServiceError::ValidationError(_))
        ));

        let good = PublishNotificationRequest {
            product_id: Uuid::new_v4(),
            change: "price_changed".into(),
            payload: serde_json::json!({"price": "100"}),
        };
        service.publish_external(good).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "catalog");
    }
}
