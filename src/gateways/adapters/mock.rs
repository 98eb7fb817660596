use crate::gateways::adapter::GatewayAdapter;
use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    GatewayName, GatewayVerdict, GatewayWebhookEvent, IntentRequest, IntentStatus, Money,
    WebhookVerification,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Deterministic sandbox adapter for non-production use and tests.
///
/// Behavior is fully scripted: by default every operation succeeds with
/// predictable identifiers; `failing` flips every money-moving call to a
/// decline so failure paths can be exercised without a real processor.
pub struct MockAdapter {
    failing: bool,
    decline_message: String,
    counter: AtomicU64,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            failing: false,
            decline_message: String::new(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failing: true,
            decline_message: message.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayAdapter for MockAdapter {
    async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict {
        if self.failing {
            return GatewayVerdict::failed(self.decline_message.clone(), false);
        }
        GatewayVerdict::Pending {
            intent_id: format!("mock_pi_{}_{}", request.reference, self.next_seq()),
            redirect_url: None,
            status: IntentStatus::RequiresConfirmation,
            raw: None,
        }
    }

    async fn confirm(&self, intent_id: &str, _payment_method_ref: Option<&str>) -> GatewayVerdict {
        if self.failing {
            return GatewayVerdict::failed(self.decline_message.clone(), false);
        }
        GatewayVerdict::Approved {
            transaction_id: format!("mock_ch_{}", intent_id),
            status: IntentStatus::Succeeded,
            raw: None,
        }
    }

    async fn verify(&self, reference: &str) -> GatewayVerdict {
        if self.failing {
            return GatewayVerdict::failed(self.decline_message.clone(), false);
        }
        GatewayVerdict::Approved {
            transaction_id: reference.to_string(),
            status: IntentStatus::Succeeded,
            raw: None,
        }
    }

    async fn refund(&self, charge_id: &str, _amount: Option<Money>) -> GatewayVerdict {
        if self.failing {
            return GatewayVerdict::failed(self.decline_message.clone(), false);
        }
        GatewayVerdict::Approved {
            transaction_id: format!("mock_re_{}", charge_id),
            status: IntentStatus::Refunded,
            raw: None,
        }
    }

    fn name(&self) -> GatewayName {
        GatewayName::Mock
    }

    fn home_countries(&self) -> &'static [&'static str] {
        &[]
    }

    fn verify_webhook(
        &self,
        _payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerification> {
        // The sandbox accepts a fixed signature so webhook plumbing can be
        // exercised end to end
        let valid = signature == "mock-signature";
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid mock signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
        let parsed = serde_json::from_slice::<serde_json::Value>(payload)
            .unwrap_or_else(|_| serde_json::json!({}));
        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let reference = parsed
            .get("reference")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let status = match event_type.as_str() {
            "payment.succeeded" => Some(IntentStatus::Succeeded),
            "payment.failed" => Some(IntentStatus::Failed),
            "payment.refunded" => Some(IntentStatus::Refunded),
            _ => None,
        };
        Ok(GatewayWebhookEvent {
            gateway: GatewayName::Mock,
            event_type,
            reference,
            status,
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}
