use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db::DbPool,
    entities::payment_channel::{self, ChannelKind, Entity as ChannelEntity},
    errors::ServiceError,
};

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("currency_code"))
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentChannelRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub kind: ChannelKind,
    #[validate(length(max = 64))]
    pub merchant_id: Option<String>,
    #[validate(length(max = 64))]
    pub terminal_id: Option<String>,
    #[validate(length(max = 256))]
    pub store_key: Option<String>,
    #[validate(url)]
    pub gateway_url: Option<String>,
    #[validate(range(min = 1, max = 36))]
    #[serde(default = "one")]
    pub max_installments: i32,
    #[validate(custom = "validate_currency")]
    #[schema(example = "TRY")]
    pub currency: String,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub test_mode: bool,
}

fn one() -> i32 {
    1
}

fn yes() -> bool {
    true
}

/// Channel configuration as shown to admins. The store key is never echoed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentChannelResponse {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    pub merchant_id: Option<String>,
    pub terminal_id: Option<String>,
    pub has_store_key: bool,
    pub gateway_url: Option<String>,
    pub max_installments: i32,
    pub currency: String,
    pub is_active: bool,
    pub test_mode: bool,
    pub created_at: DateTime<Utc>,
}

impl From<payment_channel::Model> for PaymentChannelResponse {
    fn from(m: payment_channel::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            kind: m.kind,
            merchant_id: m.merchant_id,
            terminal_id: m.terminal_id,
            has_store_key: m.store_key.as_deref().is_some_and(|k| !k.is_empty()),
            gateway_url: m.gateway_url,
            max_installments: m.max_installments,
            currency: m.currency,
            is_active: m.is_active,
            test_mode: m.test_mode,
            created_at: m.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PaymentChannelService {
    db: Arc<DbPool>,
}

impl PaymentChannelService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name, kind = %request.kind))]
    pub async fn create(
        &self,
        request: CreatePaymentChannelRequest,
    ) -> Result<payment_channel::Model, ServiceError> {
        request.validate()?;
        let max_installments = match request.kind {
            ChannelKind::BankTransfer => 1,
            ChannelKind::VirtualPos => request.max_installments,
        };
        if request.kind == ChannelKind::VirtualPos
            && (request.merchant_id.is_none() || request.store_key.is_none())
        {
            return Err(ServiceError::ValidationError(
                "Virtual POS channels need a merchant_id and a store_key".to_string(),
            ));
        }

        let now = Utc::now();
        let model = payment_channel::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            kind: Set(request.kind),
            merchant_id: Set(request.merchant_id),
            terminal_id: Set(request.terminal_id),
            store_key: Set(request.store_key),
            gateway_url: Set(request.gateway_url),
            max_installments: Set(max_installments),
            currency: Set(request.currency),
            is_active: Set(request.is_active),
            test_mode: Set(request.test_mode),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(channel_id = %model.id, "Payment channel created");
        Ok(model)
    }

    pub async fn list(&self) -> Result<Vec<payment_channel::Model>, ServiceError> {
        Ok(ChannelEntity::find()
            .order_by_asc(payment_channel::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_must_be_three_upper_case_letters() {
        assert!(validate_currency("TRY").is_ok());
        assert!(validate_currency("try").is_err());
        assert!(validate_currency("TRYX").is_err());
    }

    #[test]
    fn response_hides_store_key() {
        let now = Utc::now();
        let model = payment_channel::Model {
            id: Uuid::new_v4(),
            name: "POS".into(),
            kind: ChannelKind::VirtualPos,
            merchant_id: Some("M".into()),
            terminal_id: None,
            store_key: Some("secret".into()),
            gateway_url: None,
            max_installments: 6,
            currency: "TRY".into(),
            is_active: true,
            test_mode: false,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(PaymentChannelResponse::from(model)).unwrap();
        assert_eq!(json["has_store_key"], true);
        assert!(json.get("store_key").is_none());
    }
}
