//! Seam between the payment ledger and the card channel.

use std::collections::BTreeMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use utoipa::ToSchema;

use crate::entities::payment_channel;

type HmacSha256 = Hmac<Sha256>;

/// Merchant settings the gateway needs for one charge.
#[derive(Debug, Clone)]
pub struct MerchantConfig {
    pub merchant_id: Option<String>,
    pub terminal_id: Option<String>,
    pub store_key: Option<String>,
    pub gateway_url: Option<String>,
    pub test_mode: bool,
}

impl From<&payment_channel::Model> for MerchantConfig {
    fn from(channel: &payment_channel::Model) -> Self {
        Self {
            merchant_id: channel.merchant_id.clone(),
            terminal_id: channel.terminal_id.clone(),
            store_key: channel.store_key.clone(),
            gateway_url: channel.gateway_url.clone(),
            test_mode: channel.test_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub reference_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub installments: i32,
    pub merchant: MerchantConfig,
}

/// Redirect continuation the customer's browser follows to finish 3-D Secure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChargeInitiation {
    pub redirect_url: String,
    #[schema(example = "POST")]
    pub method: String,
    pub form_fields: BTreeMap<String, String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("channel is not configured: {0}")]
    Misconfigured(String),
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("channel rejected the charge: {0}")]
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError>;
}

/// Builds the signed 3-D Secure form for a virtual POS.
///
/// The hash is HMAC-SHA256 over `merchant_id|reference|amount|installments`
/// keyed with the channel's store key.
#[derive(Debug, Clone, Default)]
pub struct VirtualPosGateway;

impl VirtualPosGateway {
    pub fn sign(store_key: &str, fields: &[&str]) -> Result<String, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(store_key.as_bytes())
            .map_err(|e| GatewayError::Misconfigured(e.to_string()))?;
        mac.update(fields.join("|").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl PaymentGateway for VirtualPosGateway {
    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        let merchant = &request.merchant;
        let gateway_url = merchant
            .gateway_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| GatewayError::Misconfigured("gateway_url is missing".into()))?;
        let merchant_id = merchant
            .merchant_id
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| GatewayError::Misconfigured("merchant_id is missing".into()))?;
        let store_key = merchant
            .store_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::Misconfigured("store_key is missing".into()))?;

        let amount = request.amount.round_dp(2).to_string();
        let installments = request.installments.to_string();
        let hash = Self::sign(
            store_key,
            &[merchant_id, &request.reference_number, &amount, &installments],
        )?;

        let mut form_fields = BTreeMap::new();
        form_fields.insert("merchant_id".to_string(), merchant_id.to_string());
        if let Some(terminal) = &merchant.terminal_id {
            form_fields.insert("terminal_id".to_string(), terminal.clone());
        }
        form_fields.insert("order_ref".to_string(), request.reference_number.clone());
        form_fields.insert("amount".to_string(), amount);
        form_fields.insert("currency".to_string(), request.currency.clone());
        form_fields.insert("installments".to_string(), installments);
        form_fields.insert("hash".to_string(), hash);
        if merchant.test_mode {
            form_fields.insert("test_mode".to_string(), "1".to_string());
        }

        Ok(ChargeInitiation {
            redirect_url: gateway_url.to_string(),
            method: "POST".to_string(),
            form_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(merchant: MerchantConfig) -> ChargeRequest {
        ChargeRequest {
            reference_number: "EOP-1".into(),
            amount: dec!(9450),
            currency: "TRY".into(),
            installments: 3,
            merchant,
        }
    }

    fn merchant() -> MerchantConfig {
        MerchantConfig {
            merchant_id: Some("M-100".into()),
            terminal_id: Some("T-1".into()),
            store_key: Some("store-key".into()),
            gateway_url: Some("https://pos.example/3d".into()),
            test_mode: true,
        }
    }

    #[tokio::test]
    async fn builds_signed_three_d_secure_form() {
        let init = VirtualPosGateway.initiate(&request(merchant())).await.unwrap();
        assert_eq!(init.redirect_url, "https://pos.example/3d");
        assert_eq!(init.form_fields["amount"], "9450");
        assert_eq!(init.form_fields["installments"], "3");

        let expected =
            VirtualPosGateway::sign("store-key", &["M-100", "EOP-1", "9450", "3"]).unwrap();
        assert_eq!(init.form_fields["hash"], expected);
        assert_eq!(expected.len(), 64);
    }

    #[tokio::test]
    async fn missing_gateway_url_is_a_channel_misconfiguration() {
        let mut m = merchant();
        m.gateway_url = None;
        let err = VirtualPosGateway.initiate(&request(m)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Misconfigured(_)));
    }
}
