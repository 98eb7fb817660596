use crate::gateways::error::GatewayResult;
use crate::gateways::types::{
    GatewayName, GatewayVerdict, GatewayWebhookEvent, IntentRequest, Money, WebhookVerification,
};
use async_trait::async_trait;

/// Common contract every processor adapter implements.
///
/// The four money-moving operations return a [`GatewayVerdict`] and never
/// error for expected failure modes: declines, timeouts and unreachable
/// processors come back as `Failed` so the router and orchestrator apply
/// one failure path. Construction (`from_env`) is where missing
/// credentials surface, as a fatal configuration error at startup.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Open an authorization with the processor. Depending on the
    /// processor this yields a confirmable intent, a redirect, or an
    /// immediately settled charge.
    async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict;

    /// Confirm a previously created intent. Processors without a distinct
    /// confirm step degenerate to `verify`.
    async fn confirm(&self, intent_id: &str, payment_method_ref: Option<&str>) -> GatewayVerdict;

    /// Look up the settled state of an intent or charge.
    async fn verify(&self, reference: &str) -> GatewayVerdict;

    /// Refund a settled charge. `amount` of `None` means full refund;
    /// partial refunds are supported where the processor allows them.
    async fn refund(&self, charge_id: &str, amount: Option<Money>) -> GatewayVerdict;

    fn name(&self) -> GatewayName;

    /// Markets where this processor is the mandatory choice
    fn home_countries(&self) -> &'static [&'static str];

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> GatewayResult<WebhookVerification>;

    fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::types::IntentStatus;

    struct NoopAdapter;

    #[async_trait]
    impl GatewayAdapter for NoopAdapter {
        async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict {
            GatewayVerdict::Pending {
                intent_id: format!("noop_{}", request.reference),
                redirect_url: None,
                status: IntentStatus::RequiresConfirmation,
                raw: None,
            }
        }

        async fn confirm(
            &self,
            intent_id: &str,
            _payment_method_ref: Option<&str>,
        ) -> GatewayVerdict {
            GatewayVerdict::Approved {
                transaction_id: intent_id.to_string(),
                status: IntentStatus::Succeeded,
                raw: None,
            }
        }

        async fn verify(&self, reference: &str) -> GatewayVerdict {
            self.confirm(reference, None).await
        }

        async fn refund(&self, charge_id: &str, _amount: Option<Money>) -> GatewayVerdict {
            GatewayVerdict::Approved {
                transaction_id: format!("re_{}", charge_id),
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
            _signature: &str,
        ) -> GatewayResult<WebhookVerification> {
            Ok(WebhookVerification {
                valid: true,
                reason: None,
            })
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> GatewayResult<GatewayWebhookEvent> {
            let parsed = serde_json::from_slice(payload).unwrap_or_else(|_| serde_json::json!({}));
            Ok(GatewayWebhookEvent {
                gateway: GatewayName::Mock,
                event_type: "noop".to_string(),
                reference: None,
                status: None,
                payload: parsed,
                received_at: chrono::Utc::now().to_rfc3339(),
            })
        }
    }

    #[tokio::test]
    async fn trait_object_is_usable() {
        let adapter: Box<dyn GatewayAdapter> = Box::new(NoopAdapter);
        let verdict = adapter
            .create_intent(IntentRequest {
                amount: Money::new("10.00", "USD"),
                reference: "pay_1".to_string(),
                payer_country: None,
                payment_method_ref: None,
                description: None,
                metadata: None,
            })
            .await;
        assert_eq!(verdict.intent_id(), Some("noop_pay_1"));

        let confirmed = adapter.confirm("noop_pay_1", Some("card_1")).await;
        assert!(confirmed.is_approved());
    }
}
