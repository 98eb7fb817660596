use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::http::{
    hmac_sha256_hex, verify_hmac_sha256_base64, Auth, Body, GatewayHttpClient,
};
use crate::gateways::types::{
    GatewayName, GatewayVerdict, GatewayWebhookEvent, IntentRequest, IntentStatus, Money,
    WebhookVerification,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IyzicoConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl IyzicoConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let api_key = std::env::var("IYZICO_API_KEY").unwrap_or_default();
        let secret_key = std::env::var("IYZICO_SECRET_KEY").unwrap_or_default();
        if api_key.is_empty() || secret_key.is_empty() {
            return Err(GatewayError::Validation {
                message: "IYZICO_API_KEY and IYZICO_SECRET_KEY are required".to_string(),
                field: Some("iyzico".to_string()),
            });
        }

        Ok(Self {
            api_key,
            secret_key,
            base_url: std::env::var("IYZICO_BASE_URL")
                .unwrap_or_else(|_| "https://api.iyzipay.com".to_string()),
            timeout_secs: std::env::var("IYZICO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("IYZICO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

/// Regional-card processor adapter for the Turkish market.
///
/// iyzico charges in one shot (no separate confirm step) and rejects any
/// request missing its mandatory buyer/billing/shipping blocks, so absent
/// caller data those blocks are synthesized from neutral defaults. The
/// processor still rejects a request where they are missing entirely, so
/// the synthesis is not optional.
pub struct IyzicoAdapter {
    config: IyzicoConfig,
    http: GatewayHttpClient,
}

impl IyzicoAdapter {
    pub fn new(config: IyzicoConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(IyzicoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// iyzico v2 request signing: HMACSHA256 over randomKey + path + body,
    /// wrapped in a base64 authorization token
    fn authorization(&self, path: &str, body: &str) -> (String, String) {
        let random_key = format!(
            "{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let signed = format!("{}{}{}", random_key, path, body);
        let signature = hmac_sha256_hex(&self.config.secret_key, signed.as_bytes());
        let token = BASE64.encode(format!(
            "apiKey:{}&randomKey:{}&signature:{}",
            self.config.api_key, random_key, signature
        ));
        (format!("IYZWSv2 {}", token), random_key)
    }

    /// Buyer/billing/shipping blocks are mandatory; synthesize what the
    /// caller did not provide
    fn payment_payload(request: &IntentRequest, price: &str) -> JsonValue {
        let meta = request.metadata.as_ref();
        let field = |key: &str, default: &str| -> String {
            meta.and_then(|m| m.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };

        serde_json::json!({
            "locale": "tr",
            "conversationId": request.reference,
            "price": price,
            "paidPrice": price,
            "currency": request.amount.currency,
            "installment": 1,
            "paymentChannel": "WEB",
            "paymentGroup": "PRODUCT",
            "paymentCard": {
                "cardToken": request.payment_method_ref,
            },
            "buyer": {
                "id": field("buyer_id", "guest"),
                "name": field("buyer_name", "Guest"),
                "surname": field("buyer_surname", "Customer"),
                "email": field("buyer_email", "guest@example.com"),
                "identityNumber": field("buyer_identity", "11111111111"),
                "registrationAddress": field("buyer_address", "N/A"),
                "ip": field("buyer_ip", "127.0.0.1"),
                "city": field("buyer_city", "Istanbul"),
                "country": field("buyer_country", "Turkey"),
            },
            "shippingAddress": {
                "contactName": field("buyer_name", "Guest"),
                "city": field("buyer_city", "Istanbul"),
                "country": field("buyer_country", "Turkey"),
                "address": field("buyer_address", "N/A"),
            },
            "billingAddress": {
                "contactName": field("buyer_name", "Guest"),
                "city": field("buyer_city", "Istanbul"),
                "country": field("buyer_country", "Turkey"),
                "address": field("buyer_address", "N/A"),
            },
            "basketItems": [{
                "id": request.reference,
                "name": request.description.clone().unwrap_or_else(|| "Order".to_string()),
                "category1": "Restaurant",
                "itemType": "VIRTUAL",
                "price": price,
            }],
        })
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &JsonValue,
    ) -> GatewayResult<T> {
        let body = serde_json::to_string(payload).map_err(|e| GatewayError::Validation {
            message: format!("failed to encode request: {}", e),
            field: None,
        })?;
        let (authorization, random_key) = self.authorization(path, &body);

        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                Auth::None,
                Body::Json(payload),
                &[
                    ("Authorization", authorization.as_str()),
                    ("x-iyzi-rnd", random_key.as_str()),
                    ("Content-Type", "application/json"),
                ],
            )
            .await
    }

    fn result_to_verdict(result: IyzicoResult) -> GatewayVerdict {
        if result.status == "success" {
            let transaction_id = result
                .payment_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let status = if result.refund_reference.is_some() {
                IntentStatus::Refunded
            } else {
                IntentStatus::Succeeded
            };
            GatewayVerdict::Approved {
                transaction_id: result.refund_reference.unwrap_or(transaction_id),
                status,
                raw: None,
            }
        } else {
            GatewayVerdict::failed(
                result
                    .error_message
                    .unwrap_or_else(|| "payment rejected".to_string()),
                false,
            )
        }
    }

    async fn try_create_intent(&self, request: &IntentRequest) -> GatewayResult<GatewayVerdict> {
        request.amount.validate_positive("amount")?;
        let price = request.amount.parse_decimal()?.with_scale(2).to_string();
        let payload = Self::payment_payload(request, &price);

        let result: IyzicoResult = self.post_signed("/payment/auth", &payload).await?;
        info!(
            conversation_id = %request.reference,
            status = %result.status,
            "iyzico payment attempted"
        );
        Ok(Self::result_to_verdict(result))
    }

    async fn try_verify(&self, reference: &str) -> GatewayResult<GatewayVerdict> {
        let payload = serde_json::json!({
            "locale": "tr",
            "paymentId": reference,
        });
        let result: IyzicoResult = self.post_signed("/payment/detail", &payload).await?;
        Ok(Self::result_to_verdict(result))
    }

    async fn try_refund(
        &self,
        charge_id: &str,
        amount: Option<&Money>,
    ) -> GatewayResult<GatewayVerdict> {
        let mut payload = serde_json::json!({
            "locale": "tr",
            "paymentTransactionId": charge_id,
        });
        if let Some(amount) = amount {
            payload["price"] = serde_json::json!(amount.parse_decimal()?.with_scale(2).to_string());
            payload["currency"] = serde_json::json!(amount.currency);
        }

        let result: IyzicoResult = self.post_signed("/payment/refund", &payload).await?;
        info!(charge_id = %charge_id, status = %result.status, "iyzico refund requested");
        Ok(Self::result_to_verdict(result))
    }

    fn fold(result: GatewayResult<GatewayVerdict>, operation: &str) -> GatewayVerdict {
        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(operation = operation, error = %e, "iyzico call failed");
                GatewayVerdict::failed(e.to_string(), e.is_retryable())
            }
        }
    }
}

#[async_trait]
impl GatewayAdapter for IyzicoAdapter {
    async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict {
        Self::fold(self.try_create_intent(&request).await, "create_intent")
    }

    /// No distinct confirm step: the charge already settled (or failed) at
    /// creation, so confirmation degenerates to a status lookup
    async fn confirm(&self, intent_id: &str, _payment_method_ref: Option<&str>) -> GatewayVerdict {
        Self::fold(self.try_verify(intent_id).await, "confirm")
    }

    async fn verify(&self, reference: &str) -> GatewayVerdict {
        Self::fold(self.try_verify(reference).await, "verify")
    }

    async fn refund(&self, charge_id: &str, amount: Option<Money>) -> GatewayVerdict {
        Self::fold(self.try_refund(charge_id, amount.as_ref()).await, "refund")
    }

    fn name(&self) -> GatewayName {
        GatewayName::Iyzico
    }

    fn home_countries(&self) -> &'static [&'static str] {
        &["TR"]
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        let valid = verify_hmac_sha256_base64(payload, &self.config.secret_key, signature);
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid iyzico signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed: JsonValue =
            serde_json::from_slice(payload).map_err(|e| GatewayError::WebhookVerification {
                message: format!("invalid webhook JSON payload: {}", e),
            })?;

        let event_type = parsed
            .get("iyziEventType")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let reference = parsed
            .get("paymentId")
            .and_then(|v| match v {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .or_else(|| {
                parsed
                    .get("paymentConversationId")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        let status = match event_type.as_str() {
            "CHARGE_SUCCEEDED" | "PAYMENT_SUCCEEDED" => Some(IntentStatus::Succeeded),
            "CHARGE_FAILED" | "PAYMENT_FAILED" => Some(IntentStatus::Failed),
            "REFUND_SUCCEEDED" => Some(IntentStatus::Refunded),
            _ => None,
        };

        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Iyzico,
            event_type,
            reference,
            status,
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IyzicoResult {
    status: String,
    #[serde(rename = "paymentId", default)]
    payment_id: Option<String>,
    #[serde(rename = "paymentTransactionId", default)]
    refund_reference: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}
