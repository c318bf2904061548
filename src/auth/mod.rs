/*!
 * # Caller Identity
 *
 * Authentication happens upstream. The identity gateway forwards the caller
 * as two headers which this module turns into an [`Actor`]:
 *
 * - `x-user-id`: the caller's UUID (required)
 * - `x-user-role`: `customer` (default) or `admin`
 *
 * Routers opt in with [`IdentityRouterExt::with_identity`]; admin surfaces add
 * [`IdentityRouterExt::admin_only`].
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

/// The caller of a business route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Reads the identity headers set by the gateway.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServiceError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("Missing caller identity".to_string()))?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| ServiceError::Unauthorized("Invalid caller identity".to_string()))?;

        let role = match headers.get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
            None => Role::Customer,
            Some(raw) => raw
                .trim()
                .parse::<Role>()
                .map_err(|_| ServiceError::Unauthorized(format!("Unknown role '{}'", raw)))?,
        };

        Ok(Self { user_id, role })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Actor>() {
            Some(actor) => Ok(*actor),
            None => Actor::from_headers(&parts.headers),
        }
    }
}

/// Resolves the caller and stores it in the request extensions.
pub async fn identity_middleware(mut request: Request, next: Next) -> Result<Response, ServiceError> {
    let actor = Actor::from_headers(request.headers())?;
    debug!(user_id = %actor.user_id, role = %actor.role, "Caller identified");
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

/// Rejects callers that are not admins.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, ServiceError> {
    let actor = match request.extensions().get::<Actor>() {
        Some(actor) => *actor,
        None => Actor::from_headers(request.headers())?,
    };
    if !actor.is_admin() {
        return Err(ServiceError::Forbidden(
            "Admin role required for this operation".to_string(),
        ));
    }
    Ok(next.run(request).await)
}

pub trait IdentityRouterExt {
    fn with_identity(self) -> Self;
    fn admin_only(self) -> Self;
}

impl<S> IdentityRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_identity(self) -> Self {
        self.route_layer(axum::middleware::from_fn(identity_middleware))
    }

    fn admin_only(self) -> Self {
        // Layers run outermost-last, so identity resolves first.
        self.route_layer(axum::middleware::from_fn(admin_middleware))
            .with_identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    fn headers(id: Option<&str>, role: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(id) = id {
            map.insert(USER_ID_HEADER, HeaderValue::from_str(id).unwrap());
        }
        if let Some(role) = role {
            map.insert(USER_ROLE_HEADER, HeaderValue::from_str(role).unwrap());
        }
        map
    }

    #[test]
    fn role_defaults_to_customer() {
        let id = Uuid::new_v4();
        let actor = Actor::from_headers(&headers(Some(&id.to_string()), None)).unwrap();
        assert_eq!(actor.user_id, id);
        assert_eq!(actor.role, Role::Customer);
        assert!(!actor.is_admin());
    }

    #[test]
    fn admin_role_is_case_insensitive() {
        let id = Uuid::new_v4().to_string();
        let actor = Actor::from_headers(&headers(Some(&id), Some("Admin"))).unwrap();
        assert!(actor.is_admin());
    }

    #[test]
    fn missing_or_malformed_identity_is_unauthorized() {
        assert_matches!(
            Actor::from_headers(&headers(None, None)),
            Err(ServiceError::Unauthorized(_))
        );
        assert_matches!(
            Actor::from_headers(&headers(Some("not-a-uuid"), None)),
            Err(ServiceError::Unauthorized(_))
        );
        let id = Uuid::new_v4().to_string();
        assert_matches!(
            Actor::from_headers(&headers(Some(&id), Some("root"))),
            Err(ServiceError::Unauthorized(_))
        );
    }
}
