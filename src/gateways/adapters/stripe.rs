use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::http::{hmac_sha256_hex, secure_eq, Auth, Body, GatewayHttpClient};
use crate::gateways::types::{
    GatewayName, GatewayVerdict, GatewayWebhookEvent, IntentRequest, IntentStatus, Money,
    WebhookVerification,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl StripeConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| GatewayError::Validation {
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
                field: Some("STRIPE_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            secret_key,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

/// Card-network processor adapter.
///
/// Stripe expects amounts as integers in the smallest currency unit and
/// form-encoded request bodies; both conventions stay inside this file.
pub struct StripeAdapter {
    config: StripeConfig,
    http: GatewayHttpClient,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Convert a major-unit decimal amount to Stripe's integer minor units
    fn to_minor_units(amount: &Money) -> GatewayResult<i64> {
        let parsed = amount.parse_decimal()?;
        let minor: BigDecimal = (parsed * BigDecimal::from(100)).with_scale(0);
        minor.to_i64().ok_or(GatewayError::Validation {
            message: format!("amount {} out of range", amount.amount),
            field: Some("amount".to_string()),
        })
    }

    fn map_intent_status(status: &str) -> IntentStatus {
        match status {
            "succeeded" => IntentStatus::Succeeded,
            "processing" => IntentStatus::Processing,
            "requires_payment_method" | "requires_confirmation" | "requires_action" => {
                IntentStatus::RequiresConfirmation
            }
            "canceled" => IntentStatus::Cancelled,
            _ => IntentStatus::Unknown,
        }
    }

    fn intent_to_verdict(intent: StripeIntent) -> GatewayVerdict {
        let status = Self::map_intent_status(&intent.status);
        match status {
            IntentStatus::Succeeded => GatewayVerdict::Approved {
                transaction_id: intent.latest_charge.unwrap_or_else(|| intent.id.clone()),
                status,
                raw: None,
            },
            IntentStatus::Cancelled => GatewayVerdict::failed("intent cancelled", false),
            _ => GatewayVerdict::Pending {
                intent_id: intent.id,
                redirect_url: None,
                status,
                raw: None,
            },
        }
    }

    async fn try_create_intent(&self, request: &IntentRequest) -> GatewayResult<GatewayVerdict> {
        request.amount.validate_positive("amount")?;
        let minor = Self::to_minor_units(&request.amount)?;

        let mut fields = vec![
            ("amount".to_string(), minor.to_string()),
            (
                "currency".to_string(),
                request.amount.currency.to_lowercase(),
            ),
            (
                "metadata[reference]".to_string(),
                request.reference.clone(),
            ),
        ];
        if let Some(description) = &request.description {
            fields.push(("description".to_string(), description.clone()));
        }
        if let Some(pm) = &request.payment_method_ref {
            fields.push(("payment_method".to_string(), pm.clone()));
        }

        let intent: StripeIntent = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                Auth::Bearer(&self.config.secret_key),
                Body::Form(&fields),
                &[],
            )
            .await?;

        info!(intent_id = %intent.id, status = %intent.status, "stripe intent created");
        Ok(Self::intent_to_verdict(intent))
    }

    async fn try_confirm(
        &self,
        intent_id: &str,
        payment_method_ref: Option<&str>,
    ) -> GatewayResult<GatewayVerdict> {
        let mut fields = Vec::new();
        if let Some(pm) = payment_method_ref {
            fields.push(("payment_method".to_string(), pm.to_string()));
        }

        let intent: StripeIntent = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/payment_intents/{}/confirm", intent_id)),
                Auth::Bearer(&self.config.secret_key),
                Body::Form(&fields),
                &[],
            )
            .await?;

        info!(intent_id = %intent.id, status = %intent.status, "stripe intent confirmed");
        Ok(Self::intent_to_verdict(intent))
    }

    async fn try_verify(&self, reference: &str) -> GatewayResult<GatewayVerdict> {
        let intent: StripeIntent = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", reference)),
                Auth::Bearer(&self.config.secret_key),
                Body::Empty,
                &[],
            )
            .await?;
        Ok(Self::intent_to_verdict(intent))
    }

    async fn try_refund(
        &self,
        charge_id: &str,
        amount: Option<&Money>,
    ) -> GatewayResult<GatewayVerdict> {
        let target_field = if charge_id.starts_with("pi_") {
            "payment_intent"
        } else {
            "charge"
        };
        let mut fields = vec![(target_field.to_string(), charge_id.to_string())];
        if let Some(amount) = amount {
            fields.push(("amount".to_string(), Self::to_minor_units(amount)?.to_string()));
        }

        let refund: StripeRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                Auth::Bearer(&self.config.secret_key),
                Body::Form(&fields),
                &[],
            )
            .await?;

        info!(refund_id = %refund.id, status = %refund.status, "stripe refund requested");
        let status = match refund.status.as_str() {
            "succeeded" => IntentStatus::Refunded,
            "pending" => IntentStatus::Processing,
            _ => IntentStatus::Unknown,
        };
        if matches!(status, IntentStatus::Refunded | IntentStatus::Processing) {
            Ok(GatewayVerdict::Approved {
                transaction_id: refund.id,
                status,
                raw: None,
            })
        } else {
            Ok(GatewayVerdict::failed(
                format!("refund rejected with status {}", refund.status),
                false,
            ))
        }
    }

    fn fold(result: GatewayResult<GatewayVerdict>, operation: &str) -> GatewayVerdict {
        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(operation = operation, error = %e, "stripe call failed");
                GatewayVerdict::failed(e.to_string(), e.is_retryable())
            }
        }
    }
}

#[async_trait]
impl GatewayAdapter for StripeAdapter {
    async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict {
        Self::fold(self.try_create_intent(&request).await, "create_intent")
    }

    async fn confirm(&self, intent_id: &str, payment_method_ref: Option<&str>) -> GatewayVerdict {
        Self::fold(self.try_confirm(intent_id, payment_method_ref).await, "confirm")
    }

    async fn verify(&self, reference: &str) -> GatewayVerdict {
        Self::fold(self.try_verify(reference).await, "verify")
    }

    async fn refund(&self, charge_id: &str, amount: Option<Money>) -> GatewayVerdict {
        Self::fold(self.try_refund(charge_id, amount.as_ref()).await, "refund")
    }

    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    fn home_countries(&self) -> &'static [&'static str] {
        &[]
    }

    /// Stripe signs webhooks as `t=<unix>,v1=<hmac>` over `{t}.{payload}`.
    /// Verification is mandatory: no secret configured means nothing is
    /// accepted.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        let secret = match self.config.webhook_secret.as_deref() {
            Some(secret) => secret,
            None => {
                return Ok(WebhookVerification {
                    valid: false,
                    reason: Some("stripe webhook secret not configured".to_string()),
                })
            }
        };

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value.to_string()),
                Some(("v1", value)) => candidates.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = match timestamp {
            Some(t) => t,
            None => {
                return Ok(WebhookVerification {
                    valid: false,
                    reason: Some("missing timestamp in stripe signature".to_string()),
                })
            }
        };

        let mut signed = Vec::with_capacity(timestamp.len() + 1 + payload.len());
        signed.extend_from_slice(timestamp.as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let expected = hmac_sha256_hex(secret, &signed);

        let valid = candidates
            .iter()
            .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()));
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid stripe signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookVerification {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let object = parsed.get("data").and_then(|v| v.get("object"));
        let reference = object
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let status = match event_type.as_str() {
            "payment_intent.succeeded" => Some(IntentStatus::Succeeded),
            "payment_intent.payment_failed" => Some(IntentStatus::Failed),
            "payment_intent.canceled" => Some(IntentStatus::Cancelled),
            "charge.refunded" => Some(IntentStatus::Refunded),
            _ => object
                .and_then(|v| v.get("status"))
                .and_then(|v| v.as_str())
                .map(Self::map_intent_status),
        };

        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Stripe,
            event_type,
            reference,
            status,
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: String,
    #[serde(default)]
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
}
