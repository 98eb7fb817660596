//! Payment orchestrator
//!
//! The use-case layer composing the idempotency keystore, the gateway
//! router, the state machine and the order/table collaborators. Gateway
//! calls are never made while a database transaction is open: a pending
//! payment row is committed before any money moves, and gateway results
//! are applied afterwards through validated state transitions.

use crate::config::PaymentConfig;
use crate::database::payment_repository::{NewPayment, Payment, PaymentStateTransition};
use crate::database::store::PaymentStore;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};
use crate::gateways::router::GatewayRouter;
use crate::gateways::types::{GatewayVerdict, IntentRequest, Money};
use crate::services::idempotency::IdempotencyKeystore;
use crate::services::orders::{OrderRecord, OrderService, OrderStatus, TableService, TableStatus};
use crate::services::payment_state::{PaymentStateService, PaymentStatus};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// How a payment is settled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    Stripe,
    Paypal,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Paypal => "paypal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "credit_card" | "credit-card" => Some(PaymentMethod::CreditCard),
            "debit_card" | "debit-card" => Some(PaymentMethod::DebitCard),
            "stripe" => Some(PaymentMethod::Stripe),
            "paypal" => Some(PaymentMethod::Paypal),
            _ => None,
        }
    }

    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }

    /// Prefix for generated transaction ids
    pub fn transaction_prefix(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::CreditCard | PaymentMethod::DebitCard => "CARD",
            PaymentMethod::Stripe => "STRIPE",
            PaymentMethod::Paypal => "PAYPAL",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment creation request
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub cashier_id: Option<Uuid>,
    /// Declared payer country, drives gateway routing
    pub payer_country: Option<String>,
}

/// Payment processing request
#[derive(Debug, Clone, Default)]
pub struct ProcessPayment {
    /// Card token / payment-method handle for the gateway
    pub payment_method_ref: Option<String>,
    /// Known gateway intent, when the client is confirming
    pub payment_intent_id: Option<String>,
    pub cashier_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for any single gateway call
    pub gateway_timeout: Duration,
    /// Currency charged for all orders of this deployment
    pub currency: String,
}

impl OrchestratorConfig {
    pub fn from_payment_config(config: &PaymentConfig) -> Self {
        Self {
            gateway_timeout: Duration::from_secs(config.gateway_timeout_secs),
            currency: std::env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "TRY".to_string()),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(15),
            currency: "TRY".to_string(),
        }
    }
}

pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentStore>,
    state: PaymentStateService,
    keystore: Arc<IdempotencyKeystore>,
    router: Arc<GatewayRouter>,
    orders: Arc<dyn OrderService>,
    tables: Arc<dyn TableService>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        keystore: Arc<IdempotencyKeystore>,
        router: Arc<GatewayRouter>,
        orders: Arc<dyn OrderService>,
        tables: Arc<dyn TableService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state: PaymentStateService::new(store.clone()),
            store,
            keystore,
            router,
            orders,
            tables,
            config,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a payment for an order.
    ///
    /// A repeated request with the same fingerprint inside the retention
    /// window resolves to the original payment instead of conflicting.
    /// The unique index on order_id is the authoritative guard against
    /// two concurrent creations; this method translates its violation to
    /// the duplicate-payment conflict.
    pub async fn create(&self, request: CreatePayment) -> Result<Payment, AppError> {
        if request.amount <= BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: request.amount.to_string(),
                reason: "amount must be greater than zero".to_string(),
            }));
        }

        let key = IdempotencyKeystore::fingerprint(
            request.order_id,
            &request.amount,
            request.method.as_str(),
            request.cashier_id,
        );
        if let Some(existing) = self
            .keystore
            .lookup(&key, request.order_id, &request.amount, request.method.as_str())
            .await
        {
            info!(
                payment_id = %existing.id,
                order_id = %request.order_id,
                "creation request recognized as retry"
            );
            return Ok(existing);
        }

        let order = self.load_order(request.order_id).await?;
        if order.tenant_id != request.tenant_id {
            // Cross-tenant references are indistinguishable from missing
            return Err(AppError::domain(DomainError::OrderNotFound {
                order_id: request.order_id,
            }));
        }

        if self.store.find_by_order(order.id).await?.is_some() {
            return Err(AppError::domain(DomainError::DuplicatePayment {
                order_id: order.id,
            }));
        }

        let order_status = OrderStatus::parse(&order.status);
        if !order_status.map(|s| s.is_payable()).unwrap_or(false) {
            return Err(AppError::domain(DomainError::OrderNotPayable {
                order_id: order.id,
                status: order.status.clone(),
            }));
        }

        let payment = if request.method.is_cash() {
            let transaction_id = self
                .keystore
                .generate_unique_transaction_id(request.method.transaction_prefix())
                .await?;
            let payment = self
                .insert_payment(&request, PaymentStatus::Completed, Some(transaction_id))
                .await?;
            self.finalize_order(&order).await?;
            payment
        } else {
            // The external charge has not happened yet: a pending row
            // exists before any money moves, so status stays queryable
            // even if the gateway call never returns
            self.insert_payment(&request, PaymentStatus::Pending, None)
                .await?
        };

        self.keystore.record(&key, payment.id).await;
        info!(
            payment_id = %payment.id,
            order_id = %order.id,
            method = %request.method,
            status = %payment.status,
            "payment created"
        );
        Ok(payment)
    }

    async fn insert_payment(
        &self,
        request: &CreatePayment,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<Payment, AppError> {
        let mut gateway_response = serde_json::json!({});
        if let Some(country) = &request.payer_country {
            gateway_response["payer_country"] = serde_json::json!(country);
        }

        let new = NewPayment {
            order_id: request.order_id,
            tenant_id: request.tenant_id,
            amount: request.amount.clone(),
            method: request.method.as_str().to_string(),
            status: status.as_str().to_string(),
            transaction_id,
            gateway_response,
            cashier_id: request.cashier_id,
        };

        self.store.insert_payment(new).await.map_err(|e| {
            if e.is_unique_violation() {
                AppError::domain(DomainError::DuplicatePayment {
                    order_id: request.order_id,
                })
            } else {
                AppError::from(e)
            }
        })
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Drive a payment to settlement.
    ///
    /// Cash completes immediately. Card payments go through the router:
    /// without a known intent one is created and persisted (the payment
    /// stays pending, an intermediate state rather than a failure); with
    /// an
    /// intent the gateway confirm runs and its verdict becomes a
    /// completed or failed transition. The failed row is kept, never
    /// discarded.
    pub async fn process_payment(
        &self,
        payment_id: Uuid,
        request: ProcessPayment,
    ) -> Result<Payment, AppError> {
        let payment = self.load_payment(payment_id).await?;
        if payment.status == PaymentStatus::Completed.as_str() {
            return Err(AppError::domain(DomainError::PaymentAlreadyCompleted {
                payment_id,
            }));
        }

        let order = self.load_order(payment.order_id).await?;
        let method = PaymentMethod::parse(&payment.method).ok_or_else(|| {
            AppError::validation(ValidationError::UnknownMethod {
                value: payment.method.clone(),
            })
        })?;

        if method.is_cash() {
            let transaction_id = self
                .keystore
                .generate_unique_transaction_id(method.transaction_prefix())
                .await?;
            let (updated, _) = self
                .state
                .record_transition(
                    &payment,
                    PaymentStatus::Completed,
                    Some("cash payment received".to_string()),
                    request.cashier_id,
                    serde_json::json!({}),
                    Some(transaction_id),
                    request.cashier_id,
                )
                .await?;
            self.finalize_order(&order).await?;
            return Ok(updated);
        }

        let payer_country = payment
            .gateway_response
            .get("payer_country")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let known_intent = request
            .payment_intent_id
            .clone()
            .or_else(|| payment.payment_intent_id.clone());

        match known_intent {
            None => {
                let intent_request = IntentRequest {
                    amount: Money::new(payment.amount.to_string(), self.config.currency.clone()),
                    reference: payment.id.to_string(),
                    payer_country,
                    payment_method_ref: request.payment_method_ref.clone(),
                    description: Some(format!("Order {}", order.order_number)),
                    metadata: None,
                };
                let verdict = self
                    .with_timeout(self.router.create_payment_intent(intent_request))
                    .await;
                self.apply_intent_verdict(payment, &order, verdict, request.cashier_id)
                    .await
            }
            Some(intent_id) => {
                let verdict = self
                    .with_timeout(self.router.confirm_payment(
                        &intent_id,
                        request.payment_method_ref.as_deref(),
                        payer_country.as_deref(),
                    ))
                    .await;
                self.apply_confirm_verdict(payment, &order, verdict, request.cashier_id)
                    .await
            }
        }
    }

    /// Outcome of a fresh intent creation
    async fn apply_intent_verdict(
        &self,
        payment: Payment,
        order: &OrderRecord,
        verdict: GatewayVerdict,
        actor_id: Option<Uuid>,
    ) -> Result<Payment, AppError> {
        match verdict {
            GatewayVerdict::Pending {
                intent_id,
                redirect_url,
                status,
                ..
            } => {
                let mut metadata = serde_json::json!({ "intent_status": status });
                if let Some(url) = &redirect_url {
                    metadata["redirect_url"] = serde_json::json!(url);
                }
                let updated = self
                    .store
                    .set_intent(payment.id, &intent_id, metadata)
                    .await?;
                info!(
                    payment_id = %updated.id,
                    "gateway intent created, awaiting confirmation"
                );
                Ok(updated)
            }
            // One-shot processors settle at creation
            GatewayVerdict::Approved {
                transaction_id,
                status,
                raw,
            } => {
                let (updated, _) = self
                    .state
                    .record_transition(
                        &payment,
                        PaymentStatus::Completed,
                        Some("gateway charge approved".to_string()),
                        actor_id,
                        serde_json::json!({ "gateway_status": status, "gateway_raw": raw }),
                        Some(transaction_id),
                        None,
                    )
                    .await?;
                self.finalize_order(order).await?;
                Ok(updated)
            }
            GatewayVerdict::Failed { error, retryable } => {
                self.record_gateway_failure(&payment, &error, actor_id).await?;
                Err(AppError::new(AppErrorKind::External(ExternalError::Gateway {
                    message: error,
                    is_retryable: retryable,
                })))
            }
        }
    }

    /// Outcome of confirming a known intent
    async fn apply_confirm_verdict(
        &self,
        payment: Payment,
        order: &OrderRecord,
        verdict: GatewayVerdict,
        actor_id: Option<Uuid>,
    ) -> Result<Payment, AppError> {
        match verdict {
            GatewayVerdict::Approved {
                transaction_id,
                status,
                raw,
            } => {
                let (updated, _) = self
                    .state
                    .record_transition(
                        &payment,
                        PaymentStatus::Completed,
                        Some("gateway confirmation succeeded".to_string()),
                        actor_id,
                        serde_json::json!({ "gateway_status": status, "gateway_raw": raw }),
                        Some(transaction_id),
                        None,
                    )
                    .await?;
                self.finalize_order(order).await?;
                Ok(updated)
            }
            GatewayVerdict::Pending { status, .. } => {
                // Still in flight on the processor side; safe to re-check
                // later via verify
                info!(
                    payment_id = %payment.id,
                    gateway_status = ?status,
                    "confirmation still pending at gateway"
                );
                Ok(payment)
            }
            GatewayVerdict::Failed { error, retryable } => {
                self.record_gateway_failure(&payment, &error, actor_id).await?;
                Err(AppError::new(AppErrorKind::External(ExternalError::Gateway {
                    message: error,
                    is_retryable: retryable,
                })))
            }
        }
    }

    async fn record_gateway_failure(
        &self,
        payment: &Payment,
        error: &str,
        actor_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        warn!(payment_id = %payment.id, error = %error, "gateway reported failure");
        self.state
            .record_transition(
                payment,
                PaymentStatus::Failed,
                Some("gateway failure".to_string()),
                actor_id,
                serde_json::json!({ "error": error }),
                None,
                None,
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // Status changes
    // =========================================================================

    /// Apply one validated status change. Used by the PATCH endpoint and
    /// by webhook-driven updates; illegal moves error without touching
    /// the row.
    pub async fn update_status(
        &self,
        payment_id: Uuid,
        to: PaymentStatus,
        reason: Option<String>,
        actor_id: Option<Uuid>,
        transaction_id: Option<String>,
        metadata: JsonValue,
    ) -> Result<Payment, AppError> {
        let payment = self.load_payment(payment_id).await?;
        let (updated, _) = self
            .state
            .record_transition(&payment, to, reason, actor_id, metadata, transaction_id, None)
            .await?;
        Ok(updated)
    }

    /// Re-check a pending payment against the processor.
    ///
    /// A pending row with an intent is always safely re-checkable: the
    /// gateway's settled verdict is applied exactly as a confirmation
    /// result would be, and an in-flight intent leaves the row untouched.
    pub async fn verify_gateway_status(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self.load_payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending.as_str() {
            return Ok(payment);
        }

        let reference = payment
            .payment_intent_id
            .clone()
            .or_else(|| payment.transaction_id.clone())
            .ok_or_else(|| {
                AppError::validation(ValidationError::MissingField {
                    field: "payment_intent_id".to_string(),
                })
            })?;
        let payer_country = payment
            .gateway_response
            .get("payer_country")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let order = self.load_order(payment.order_id).await?;
        let verdict = self
            .with_timeout(
                self.router
                    .verify_payment(&reference, payer_country.as_deref()),
            )
            .await;
        self.apply_confirm_verdict(payment, &order, verdict, None).await
    }

    /// Refund a completed payment. Gateway-settled payments are refunded
    /// at the processor first; the state transition only happens once the
    /// processor accepted the refund.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        reason: Option<String>,
        actor_id: Option<Uuid>,
    ) -> Result<Payment, AppError> {
        let payment = self.load_payment(payment_id).await?;
        if payment.status != PaymentStatus::Completed.as_str() {
            return Err(AppError::domain(DomainError::InvalidStateTransition {
                from: payment.status.clone(),
                to: PaymentStatus::Refunded.as_str().to_string(),
            }));
        }

        let method = PaymentMethod::parse(&payment.method);
        if method.map(|m| m.is_cash()).unwrap_or(false) {
            let (updated, _) = self
                .state
                .record_transition(
                    &payment,
                    PaymentStatus::Refunded,
                    reason,
                    actor_id,
                    serde_json::json!({}),
                    None,
                    None,
                )
                .await?;
            return Ok(updated);
        }

        let charge_ref = payment
            .transaction_id
            .clone()
            .or_else(|| payment.payment_intent_id.clone())
            .ok_or_else(|| {
                AppError::validation(ValidationError::MissingField {
                    field: "transaction_id".to_string(),
                })
            })?;
        let payer_country = payment
            .gateway_response
            .get("payer_country")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let amount = Money::new(payment.amount.to_string(), self.config.currency.clone());
        let verdict = self
            .with_timeout(self.router.refund_payment(
                &charge_ref,
                Some(amount),
                payer_country.as_deref(),
            ))
            .await;

        match verdict {
            GatewayVerdict::Approved { transaction_id, .. } => {
                let (updated, _) = self
                    .state
                    .record_transition(
                        &payment,
                        PaymentStatus::Refunded,
                        reason,
                        actor_id,
                        serde_json::json!({ "refund_id": transaction_id }),
                        None,
                        None,
                    )
                    .await?;
                Ok(updated)
            }
            GatewayVerdict::Pending { .. } | GatewayVerdict::Failed { .. } => {
                let message = verdict
                    .error_message()
                    .unwrap_or("refund not accepted by gateway")
                    .to_string();
                Err(AppError::new(AppErrorKind::External(ExternalError::Gateway {
                    message,
                    is_retryable: false,
                })))
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.load_payment(payment_id).await
    }

    pub async fn get_by_order(&self, order_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .find_by_order(order_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::OrderNotFound { order_id }))
    }

    pub async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        Ok(self.store.find_by_gateway_reference(reference).await?)
    }

    pub async fn history(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentStateTransition>, AppError> {
        // Surface not-found instead of an empty history for bogus ids
        let _ = self.load_payment(payment_id).await?;
        self.state.history(payment_id).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::PaymentNotFound { payment_id }))
    }

    async fn load_order(&self, order_id: Uuid) -> Result<OrderRecord, AppError> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::OrderNotFound { order_id }))
    }

    /// Mark the order settled and free its table
    async fn finalize_order(&self, order: &OrderRecord) -> Result<(), AppError> {
        self.orders
            .update_order_status(order.id, OrderStatus::Completed)
            .await?;
        if let Some(table_id) = order.table_id {
            self.tables
                .update_table_status(table_id, TableStatus::Available)
                .await?;
        }
        Ok(())
    }

    /// Bound a gateway call; a deadline miss is a failed verdict, never an
    /// indeterminate state: the pending row stays re-checkable via verify
    async fn with_timeout<F>(&self, call: F) -> GatewayVerdict
    where
        F: Future<Output = GatewayVerdict>,
    {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!(
                    timeout_secs = self.config.gateway_timeout.as_secs(),
                    "gateway call timed out"
                );
                GatewayVerdict::failed("timeout", true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_accepts_both_separators() {
        assert_eq!(
            PaymentMethod::parse("credit-card"),
            Some(PaymentMethod::CreditCard)
        );
        assert_eq!(
            PaymentMethod::parse("credit_card"),
            Some(PaymentMethod::CreditCard)
        );
        assert_eq!(PaymentMethod::parse("CASH"), Some(PaymentMethod::Cash));
        assert_eq!(PaymentMethod::parse("bitcoin"), None);
    }

    #[test]
    fn transaction_prefixes() {
        assert_eq!(PaymentMethod::Cash.transaction_prefix(), "CASH");
        assert_eq!(PaymentMethod::CreditCard.transaction_prefix(), "CARD");
        assert_eq!(PaymentMethod::DebitCard.transaction_prefix(), "CARD");
        assert_eq!(PaymentMethod::Stripe.transaction_prefix(), "STRIPE");
    }
}
