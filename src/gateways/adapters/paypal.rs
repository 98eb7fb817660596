use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::http::{verify_hmac_sha256_base64, Auth, Body, GatewayHttpClient};
use crate::gateways::types::{
    GatewayName, GatewayVerdict, GatewayWebhookEvent, IntentRequest, IntentStatus, Money,
    WebhookVerification,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Safety margin subtracted from the issued token TTL so a token is never
/// used right at its expiry boundary
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl PaypalConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let client_id = std::env::var("PAYPAL_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(GatewayError::Validation {
                message: "PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET are required".to_string(),
                field: Some("paypal".to_string()),
            });
        }

        Ok(Self {
            client_id,
            client_secret,
            webhook_secret: std::env::var("PAYPAL_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYPAL_BASE_URL")
                .unwrap_or_else(|_| "https://api-m.paypal.com".to_string()),
            timeout_secs: std::env::var("PAYPAL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("PAYPAL_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Wallet-redirect processor adapter.
///
/// PayPal wants amounts as decimal strings in major units and every API
/// call authenticated with an OAuth client-credentials token. The token is
/// cached on the instance and refreshed lazily on the first call after it
/// goes stale; there is no background refresh.
pub struct PaypalAdapter {
    config: PaypalConfig,
    http: GatewayHttpClient,
    token: RwLock<Option<CachedToken>>,
}

impl PaypalAdapter {
    pub fn new(config: PaypalConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(PaypalConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Format a major-unit amount the way PayPal expects: decimal string
    /// with two fraction digits
    fn format_amount(amount: &Money) -> GatewayResult<String> {
        let parsed = amount.parse_decimal()?;
        Ok(parsed.with_scale(2).to_string())
    }

    async fn access_token(&self) -> GatewayResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.token.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("refreshing paypal access token");
        let fields = vec![("grant_type".to_string(), "client_credentials".to_string())];
        let response: PaypalTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/oauth2/token"),
                Auth::Basic(&self.config.client_id, &self.config.client_secret),
                Body::Form(&fields),
                &[],
            )
            .await?;

        let usable_secs = response
            .expires_in
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)
            .max(1);
        let token = CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(usable_secs),
        };
        *cached = Some(token);
        info!(expires_in = response.expires_in, "paypal access token refreshed");
        Ok(response.access_token)
    }

    fn map_order_status(status: &str) -> IntentStatus {
        match status {
            "COMPLETED" => IntentStatus::Succeeded,
            "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" => {
                IntentStatus::RequiresConfirmation
            }
            "VOIDED" => IntentStatus::Cancelled,
            _ => IntentStatus::Unknown,
        }
    }

    fn order_to_verdict(order: PaypalOrder) -> GatewayVerdict {
        let status = Self::map_order_status(&order.status);
        match status {
            IntentStatus::Succeeded => {
                let capture_id = order.capture_id().unwrap_or_else(|| order.id.clone());
                GatewayVerdict::Approved {
                    transaction_id: capture_id,
                    status,
                    raw: None,
                }
            }
            IntentStatus::Cancelled => GatewayVerdict::failed("order voided", false),
            _ => {
                let redirect_url = order
                    .links
                    .iter()
                    .find(|link| link.rel == "approve" || link.rel == "payer-action")
                    .map(|link| link.href.clone());
                GatewayVerdict::Pending {
                    intent_id: order.id,
                    redirect_url,
                    status,
                    raw: None,
                }
            }
        }
    }

    async fn try_create_intent(&self, request: &IntentRequest) -> GatewayResult<GatewayVerdict> {
        request.amount.validate_positive("amount")?;
        let token = self.access_token().await?;

        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.reference,
                "description": request.description,
                "amount": {
                    "currency_code": request.amount.currency,
                    "value": Self::format_amount(&request.amount)?,
                },
            }],
        });

        let order: PaypalOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/checkout/orders"),
                Auth::Bearer(&token),
                Body::Json(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        info!(order_id = %order.id, status = %order.status, "paypal order created");
        Ok(Self::order_to_verdict(order))
    }

    async fn try_confirm(&self, intent_id: &str) -> GatewayResult<GatewayVerdict> {
        let token = self.access_token().await?;
        let payload = serde_json::json!({});

        let order: PaypalOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/checkout/orders/{}/capture", intent_id)),
                Auth::Bearer(&token),
                Body::Json(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        info!(order_id = %order.id, status = %order.status, "paypal order captured");
        Ok(Self::order_to_verdict(order))
    }

    async fn try_verify(&self, reference: &str) -> GatewayResult<GatewayVerdict> {
        let token = self.access_token().await?;
        let order: PaypalOrder = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/checkout/orders/{}", reference)),
                Auth::Bearer(&token),
                Body::Empty,
                &[],
            )
            .await?;
        Ok(Self::order_to_verdict(order))
    }

    async fn try_refund(
        &self,
        capture_id: &str,
        amount: Option<&Money>,
    ) -> GatewayResult<GatewayVerdict> {
        let token = self.access_token().await?;
        let payload = match amount {
            Some(amount) => serde_json::json!({
                "amount": {
                    "currency_code": amount.currency,
                    "value": Self::format_amount(amount)?,
                }
            }),
            None => serde_json::json!({}),
        };

        let refund: PaypalRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v2/payments/captures/{}/refund", capture_id)),
                Auth::Bearer(&token),
                Body::Json(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;

        info!(refund_id = %refund.id, status = %refund.status, "paypal refund requested");
        match refund.status.as_str() {
            "COMPLETED" => Ok(GatewayVerdict::Approved {
                transaction_id: refund.id,
                status: IntentStatus::Refunded,
                raw: None,
            }),
            "PENDING" => Ok(GatewayVerdict::Approved {
                transaction_id: refund.id,
                status: IntentStatus::Processing,
                raw: None,
            }),
            other => Ok(GatewayVerdict::failed(
                format!("refund rejected with status {}", other),
                false,
            )),
        }
    }

    fn fold(result: GatewayResult<GatewayVerdict>, operation: &str) -> GatewayVerdict {
        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(operation = operation, error = %e, "paypal call failed");
                GatewayVerdict::failed(e.to_string(), e.is_retryable())
            }
        }
    }
}

#[async_trait]
impl GatewayAdapter for PaypalAdapter {
    async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict {
        Self::fold(self.try_create_intent(&request).await, "create_intent")
    }

    async fn confirm(&self, intent_id: &str, _payment_method_ref: Option<&str>) -> GatewayVerdict {
        Self::fold(self.try_confirm(intent_id).await, "confirm")
    }

    async fn verify(&self, reference: &str) -> GatewayVerdict {
        Self::fold(self.try_verify(reference).await, "verify")
    }

    async fn refund(&self, charge_id: &str, amount: Option<Money>) -> GatewayVerdict {
        Self::fold(self.try_refund(charge_id, amount.as_ref()).await, "refund")
    }

    fn name(&self) -> GatewayName {
        GatewayName::Paypal
    }

    fn home_countries(&self) -> &'static [&'static str] {
        &[]
    }

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
                    reason: Some("paypal webhook secret not configured".to_string()),
                })
            }
        };

        let valid = verify_hmac_sha256_base64(payload, secret, signature);
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid paypal signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookVerification {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let resource = parsed.get("resource");
        // Prefer the checkout order id (our stored intent id) over the
        // capture id so the event can be matched back to the payment row
        let reference = resource
            .and_then(|r| r.get("supplementary_data"))
            .and_then(|s| s.get("related_ids"))
            .and_then(|ids| ids.get("order_id"))
            .and_then(|v| v.as_str())
            .or_else(|| resource.and_then(|r| r.get("id")).and_then(|v| v.as_str()))
            .map(|v| v.to_string());
        let status = match event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" | "CHECKOUT.ORDER.COMPLETED" => {
                Some(IntentStatus::Succeeded)
            }
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => Some(IntentStatus::Failed),
            "PAYMENT.CAPTURE.REFUNDED" => Some(IntentStatus::Refunded),
            _ => None,
        };

        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Paypal,
            event_type,
            reference,
            status,
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaypalTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PaypalOrder {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<PaypalLink>,
    #[serde(default)]
    purchase_units: Vec<PaypalPurchaseUnit>,
}

impl PaypalOrder {
    fn capture_id(&self) -> Option<String> {
        self.purchase_units
            .iter()
            .filter_map(|unit| unit.payments.as_ref())
            .flat_map(|payments| payments.captures.iter())
            .next()
            .map(|capture| capture.id.clone())
    }
}

#[derive(Debug, Deserialize)]
struct PaypalLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct PaypalPurchaseUnit {
    #[serde(default)]
    payments: Option<PaypalPayments>,
}

#[derive(Debug, Deserialize)]
struct PaypalPayments {
    #[serde(default)]
    captures: Vec<PaypalCapture>,
}

#[derive(Debug, Deserialize)]
struct PaypalCapture {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaypalRefund {
    id: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::http::hmac_sha256_base64;

    fn adapter() -> PaypalAdapter {
        PaypalAdapter::new(PaypalConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            webhook_secret: Some("whsec".to_string()),
            base_url: "https://api-m.paypal.com".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .expect("adapter init should succeed")
    }

    #[test]
    fn amounts_format_as_two_decimal_strings() {
        assert_eq!(
            PaypalAdapter::format_amount(&Money::new("10", "USD")).unwrap(),
            "10.00"
        );
        assert_eq!(
            PaypalAdapter::format_amount(&Money::new("42.5", "EUR")).unwrap(),
            "42.50"
        );
    }

    #[test]
    fn completed_order_resolves_capture_id() {
        let order = PaypalOrder {
            id: "ORDER1".to_string(),
            status: "COMPLETED".to_string(),
            links: vec![],
            purchase_units: vec![PaypalPurchaseUnit {
                payments: Some(PaypalPayments {
                    captures: vec![PaypalCapture {
                        id: "CAP1".to_string(),
                    }],
                }),
            }],
        };
        let verdict = PaypalAdapter::order_to_verdict(order);
        assert_eq!(verdict.transaction_id(), Some("CAP1"));
    }

    #[test]
    fn created_order_carries_redirect() {
        let order = PaypalOrder {
            id: "ORDER2".to_string(),
            status: "CREATED".to_string(),
            links: vec![PaypalLink {
                rel: "approve".to_string(),
                href: "https://www.paypal.com/checkoutnow?token=ORDER2".to_string(),
            }],
            purchase_units: vec![],
        };
        match PaypalAdapter::order_to_verdict(order) {
            GatewayVerdict::Pending {
                intent_id,
                redirect_url,
                ..
            } => {
                assert_eq!(intent_id, "ORDER2");
                assert!(redirect_url.unwrap().contains("checkoutnow"));
            }
            other => panic!("expected pending verdict, got {:?}", other),
        }
    }

    #[test]
    fn webhook_signature_verified() {
        let adapter = adapter();
        let payload = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED"}"#;
        let signature = hmac_sha256_base64("whsec", payload);
        assert!(adapter.verify_webhook(payload, &signature).unwrap().valid);
        assert!(!adapter.verify_webhook(payload, "bogus").unwrap().valid);
    }

    #[test]
    fn webhook_event_prefers_order_id() {
        let adapter = adapter();
        let payload = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{"id":"CAP9","supplementary_data":{"related_ids":{"order_id":"ORDER9"}}}}"#;
        let event = adapter.parse_webhook_event(payload).unwrap();
        assert_eq!(event.reference.as_deref(), Some("ORDER9"));
        assert_eq!(event.status, Some(IntentStatus::Succeeded));
    }
}
