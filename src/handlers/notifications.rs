use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Json, Response},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::{
    auth::Actor,
    services::notifications::{Notification, PublishNotificationRequest},
    ApiCreated, ApiResponse, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/admin/notifications/ws",
    summary = "Admin notification feed",
    description = "Upgrades to a WebSocket that streams every domain notification as JSON text frames. Slow sessions skip what they missed.",
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn notifications_ws(
    State(state): State<AppState>,
    actor: Actor,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.services.notifications.subscribe();
    ws.on_upgrade(move |socket| stream_notifications(socket, rx, actor))
}

async fn stream_notifications(
    socket: WebSocket,
    mut rx: broadcast::Receiver<Notification>,
    actor: Actor,
) {
    info!(user_id = %actor.user_id, "Admin notification session opened");
    metrics::increment_gauge!("ender_outlet_notifications.sessions", 1.0);
    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Dropping unserializable notification");
                            continue;
                        }
                    };
                    if outbound.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, user_id = %actor.user_id, "Notification session lagged");
                    metrics::counter!("ender_outlet_notifications.lagged", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => debug!("Ignoring client frame on notification feed"),
            },
        }
    }

    metrics::decrement_gauge!("ender_outlet_notifications.sessions", 1.0);
    info!(user_id = %actor.user_id, "Admin notification session closed");
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/notifications",
    summary = "Publish a product change",
    description = "Lets the catalog service announce product changes to connected admin sessions",
    request_body = PublishNotificationRequest,
    responses(
        (status = 202, description = "Queued for delivery", body = ApiResponse<serde_json::Value>),
        (status = 400, description = "Invalid notification", body = crate::errors::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn publish_notification(
    State(state): State<AppState>,
    Json(payload): Json<PublishNotificationRequest>,
) -> ApiCreated<serde_json::Value> {
    let product_id = payload.product_id;
    state.services.notifications.publish_external(payload)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({
            "product_id": product_id,
            "subscribers": state.services.notifications.hub().subscriber_count(),
        }))),
    ))
}
