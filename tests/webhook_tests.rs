//! Webhook processing against the mock gateway

mod support;

use bigdecimal::BigDecimal;
use restopay_backend::database::store::PaymentStore;
use restopay_backend::gateways::adapters::MockAdapter;
use restopay_backend::gateways::router::GatewayRouter;
use restopay_backend::gateways::types::GatewayName;
use restopay_backend::services::idempotency::{IdempotencyConfig, IdempotencyKeystore};
use restopay_backend::services::orders::{OrderRecord, OrderService, TableService};
use restopay_backend::services::payment_orchestrator::{
    CreatePayment, OrchestratorConfig, PaymentMethod, PaymentOrchestrator, ProcessPayment,
};
use restopay_backend::services::webhook_processor::{WebhookProcessor, WebhookProcessorError};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeOrders, FakeTables, InMemoryPaymentStore};
use uuid::Uuid;

struct WebhookHarness {
    orchestrator: Arc<PaymentOrchestrator>,
    processor: WebhookProcessor,
    order_id: Uuid,
    tenant_id: Uuid,
}

impl WebhookHarness {
    fn new() -> Self {
        let store = Arc::new(InMemoryPaymentStore::new());
        let store_dyn: Arc<dyn PaymentStore> = store;
        let orders = Arc::new(FakeOrders::new());
        let tables = Arc::new(FakeTables::new());

        let order_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        orders.insert(OrderRecord {
            id: order_id,
            order_number: "ORD-3003".to_string(),
            total_amount: BigDecimal::from_str("25.00").unwrap(),
            status: "served".to_string(),
            table_id: None,
            tenant_id,
        });

        let keystore = Arc::new(IdempotencyKeystore::new(
            store_dyn.clone(),
            IdempotencyConfig {
                retention: Duration::from_secs(3600),
                max_attempts: 5,
                backoff_base_ms: 1,
            },
        ));
        let router = Arc::new(GatewayRouter::new(
            GatewayName::Mock,
            vec![Arc::new(MockAdapter::new())],
        ));

        let orders_svc: Arc<dyn OrderService> = orders;
        let tables_svc: Arc<dyn TableService> = tables;
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store_dyn,
            keystore,
            router.clone(),
            orders_svc,
            tables_svc,
            OrchestratorConfig {
                gateway_timeout: Duration::from_secs(2),
                currency: "TRY".to_string(),
            },
        ));
        let processor = WebhookProcessor::new(router, orchestrator.clone());

        Self {
            orchestrator,
            processor,
            order_id,
            tenant_id,
        }
    }

    /// Create a pending card payment with a persisted gateway intent
    async fn pending_payment_with_intent(&self) -> (Uuid, String) {
        let payment = self
            .orchestrator
            .create(CreatePayment {
                order_id: self.order_id,
                tenant_id: self.tenant_id,
                amount: BigDecimal::from_str("25.00").unwrap(),
                method: PaymentMethod::CreditCard,
                cashier_id: None,
                payer_country: None,
            })
            .await
            .expect("creation succeeds");
        let pending = self
            .orchestrator
            .process_payment(payment.id, ProcessPayment::default())
            .await
            .expect("intent creation succeeds");
        (payment.id, pending.payment_intent_id.expect("intent set"))
    }
}

#[tokio::test]
async fn succeeded_event_completes_the_payment() {
    let harness = WebhookHarness::new();
    let (payment_id, intent_id) = harness.pending_payment_with_intent().await;

    let body = serde_json::json!({
        "event": "payment.succeeded",
        "reference": intent_id,
    })
    .to_string();

    harness
        .processor
        .process_webhook("mock", Some("mock-signature"), body.as_bytes())
        .await
        .expect("webhook applies");

    let payment = harness.orchestrator.get(payment_id).await.unwrap();
    assert_eq!(payment.status, "completed");
}

#[tokio::test]
async fn replayed_event_is_acknowledged_as_already_processed() {
    let harness = WebhookHarness::new();
    let (_, intent_id) = harness.pending_payment_with_intent().await;

    let body = serde_json::json!({
        "event": "payment.succeeded",
        "reference": intent_id,
    })
    .to_string();

    harness
        .processor
        .process_webhook("mock", Some("mock-signature"), body.as_bytes())
        .await
        .expect("first delivery applies");

    let replay = harness
        .processor
        .process_webhook("mock", Some("mock-signature"), body.as_bytes())
        .await
        .expect_err("second delivery is a replay");
    assert!(matches!(replay, WebhookProcessorError::AlreadyProcessed));
}

#[tokio::test]
async fn failed_event_moves_the_payment_to_failed() {
    let harness = WebhookHarness::new();
    let (payment_id, intent_id) = harness.pending_payment_with_intent().await;

    let body = serde_json::json!({
        "event": "payment.failed",
        "reference": intent_id,
    })
    .to_string();

    harness
        .processor
        .process_webhook("mock", Some("mock-signature"), body.as_bytes())
        .await
        .expect("failure webhook applies");

    let payment = harness.orchestrator.get(payment_id).await.unwrap();
    assert_eq!(payment.status, "failed");
}

#[tokio::test]
async fn invalid_signature_is_rejected_before_any_lookup() {
    let harness = WebhookHarness::new();
    let (_, intent_id) = harness.pending_payment_with_intent().await;

    let body = serde_json::json!({
        "event": "payment.succeeded",
        "reference": intent_id,
    })
    .to_string();

    let err = harness
        .processor
        .process_webhook("mock", Some("forged"), body.as_bytes())
        .await
        .expect_err("forged signature");
    assert!(matches!(err, WebhookProcessorError::InvalidSignature));

    let missing = harness
        .processor
        .process_webhook("mock", None, body.as_bytes())
        .await
        .expect_err("absent signature");
    assert!(matches!(missing, WebhookProcessorError::InvalidSignature));
}

#[tokio::test]
async fn unknown_gateway_and_unmatched_reference_are_handled() {
    let harness = WebhookHarness::new();

    let err = harness
        .processor
        .process_webhook("square", Some("sig"), b"{}")
        .await
        .expect_err("unknown gateway");
    assert!(matches!(err, WebhookProcessorError::UnknownGateway(_)));

    let body = serde_json::json!({
        "event": "payment.succeeded",
        "reference": "pi_nobody_knows",
    })
    .to_string();
    let err = harness
        .processor
        .process_webhook("mock", Some("mock-signature"), body.as_bytes())
        .await
        .expect_err("no payment for reference");
    assert!(matches!(err, WebhookProcessorError::PaymentNotFound(_)));
}

#[tokio::test]
async fn event_without_actionable_status_is_ignored() {
    let harness = WebhookHarness::new();
    let body = serde_json::json!({
        "event": "payout.created",
        "reference": "whatever",
    })
    .to_string();

    harness
        .processor
        .process_webhook("mock", Some("mock-signature"), body.as_bytes())
        .await
        .expect("non-payment events are acknowledged");
}
