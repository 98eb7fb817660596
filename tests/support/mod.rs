//! Shared fakes for the integration suites: an in-memory payment store
//! with the same uniqueness and compare-and-set semantics as the Postgres
//! repository, plus scripted order/table/gateway collaborators.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use restopay_backend::database::error::{DatabaseError, DatabaseErrorKind};
use restopay_backend::database::payment_repository::{NewPayment, Payment, PaymentStateTransition};
use restopay_backend::database::store::{PaymentStore, TransitionCommand};
use restopay_backend::error::AppError;
use restopay_backend::gateways::adapter::GatewayAdapter;
use restopay_backend::gateways::error::GatewayResult;
use restopay_backend::gateways::types::{
    GatewayName, GatewayVerdict, GatewayWebhookEvent, IntentRequest, IntentStatus, Money,
    WebhookVerification,
};
use restopay_backend::services::orders::{
    OrderRecord, OrderService, OrderStatus, TableService, TableStatus,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// In-memory payment store
// ============================================================================

#[derive(Default)]
struct StoreInner {
    payments: HashMap<Uuid, Payment>,
    order_index: HashMap<Uuid, Uuid>,
    transitions: Vec<PaymentStateTransition>,
}

#[derive(Default)]
pub struct InMemoryPaymentStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment_count(&self) -> usize {
        self.inner.lock().unwrap().payments.len()
    }

    pub fn transition_count(&self) -> usize {
        self.inner.lock().unwrap().transitions.len()
    }
}

fn merge_metadata(target: &mut JsonValue, incoming: &JsonValue) {
    if let (Some(target_map), Some(incoming_map)) = (target.as_object_mut(), incoming.as_object())
    {
        for (key, value) in incoming_map {
            target_map.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_payment(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.order_index.contains_key(&new.order_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_order_id_key".to_string(),
            }));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id: new.order_id,
            tenant_id: new.tenant_id,
            amount: new.amount,
            method: new.method,
            status: new.status,
            transaction_id: new.transaction_id,
            payment_intent_id: None,
            gateway_response: new.gateway_response,
            cashier_id: new.cashier_id,
            created_at: now,
            updated_at: now,
        };
        inner.order_index.insert(payment.order_id, payment.id);
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.inner.lock().unwrap().payments.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .order_index
            .get(&order_id)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .find(|p| {
                p.payment_intent_id.as_deref() == Some(reference)
                    || p.transaction_id.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn find_recent_matching(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        method: &str,
        created_after: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .filter(|p| {
                p.order_id == order_id
                    && &p.amount == amount
                    && p.method == method
                    && p.created_at > created_after
            })
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn transaction_id_exists(&self, transaction_id: &str) -> Result<bool, DatabaseError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .any(|p| p.transaction_id.as_deref() == Some(transaction_id)))
    }

    async fn set_intent(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        metadata: JsonValue,
    ) -> Result<Payment, DatabaseError> {
        let mut inner = self.inner.lock().unwrap();
        let payment = inner.payments.get_mut(&payment_id).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Payment".to_string(),
                id: payment_id.to_string(),
            })
        })?;
        payment.payment_intent_id = Some(intent_id.to_string());
        merge_metadata(&mut payment.gateway_response, &metadata);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn apply_transition(
        &self,
        command: TransitionCommand,
    ) -> Result<(Payment, PaymentStateTransition), DatabaseError> {
        let mut inner = self.inner.lock().unwrap();
        let payment = inner.payments.get_mut(&command.payment_id).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Payment".to_string(),
                id: command.payment_id.to_string(),
            })
        })?;

        if payment.status != command.expected_from {
            return Err(DatabaseError::new(DatabaseErrorKind::StaleStatus {
                payment_id: command.payment_id.to_string(),
                expected: command.expected_from,
            }));
        }

        payment.status = command.to.clone();
        if let Some(transaction_id) = &command.transaction_id {
            payment.transaction_id = Some(transaction_id.clone());
        }
        if let Some(operator_id) = command.operator_id {
            payment.cashier_id = Some(operator_id);
        }
        merge_metadata(&mut payment.gateway_response, &command.metadata);
        payment.updated_at = Utc::now();
        let updated = payment.clone();

        let transition = PaymentStateTransition {
            id: Uuid::new_v4(),
            payment_id: command.payment_id,
            from_status: command.expected_from,
            to_status: command.to,
            reason: command.reason,
            actor_id: command.actor_id,
            metadata: command.metadata,
            created_at: Utc::now(),
        };
        inner.transitions.push(transition.clone());
        Ok((updated, transition))
    }

    async fn history(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentStateTransition>, DatabaseError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transitions
            .iter()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Order / table fakes
// ============================================================================

#[derive(Default)]
pub struct FakeOrders {
    orders: Mutex<HashMap<Uuid, OrderRecord>>,
}

impl FakeOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: OrderRecord) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn status_of(&self, order_id: Uuid) -> Option<String> {
        self.orders
            .lock()
            .unwrap()
            .get(&order_id)
            .map(|o| o.status.clone())
    }
}

#[async_trait]
impl OrderService for FakeOrders {
    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderRecord>, AppError> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), AppError> {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&order_id) {
            order.status = status.as_str().to_string();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTables {
    statuses: Mutex<HashMap<Uuid, String>>,
}

impl FakeTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, table_id: Uuid, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(table_id, status.to_string());
    }

    pub fn status_of(&self, table_id: Uuid) -> Option<String> {
        self.statuses.lock().unwrap().get(&table_id).cloned()
    }
}

#[async_trait]
impl TableService for FakeTables {
    async fn update_table_status(
        &self,
        table_id: Uuid,
        status: TableStatus,
    ) -> Result<(), AppError> {
        self.statuses
            .lock()
            .unwrap()
            .insert(table_id, status.as_str().to_string());
        Ok(())
    }
}

// ============================================================================
// Scripted gateway adapter
// ============================================================================

/// Adapter whose identity and home markets are configurable, with
/// predictable verdicts that embed the adapter name so routing decisions
/// are observable from the outside.
pub struct ScriptedGateway {
    pub gateway_name: GatewayName,
    pub home: &'static [&'static str],
}

#[async_trait]
impl GatewayAdapter for ScriptedGateway {
    async fn create_intent(&self, request: IntentRequest) -> GatewayVerdict {
        GatewayVerdict::Pending {
            intent_id: format!("{}_intent_{}", self.gateway_name, request.reference),
            redirect_url: None,
            status: IntentStatus::RequiresConfirmation,
            raw: None,
        }
    }

    async fn confirm(&self, intent_id: &str, _payment_method_ref: Option<&str>) -> GatewayVerdict {
        GatewayVerdict::Approved {
            transaction_id: format!("{}_txn_{}", self.gateway_name, intent_id),
            status: IntentStatus::Succeeded,
            raw: None,
        }
    }

    async fn verify(&self, reference: &str) -> GatewayVerdict {
        GatewayVerdict::Approved {
            transaction_id: reference.to_string(),
            status: IntentStatus::Succeeded,
            raw: None,
        }
    }

    async fn refund(&self, charge_id: &str, _amount: Option<Money>) -> GatewayVerdict {
        GatewayVerdict::Approved {
            transaction_id: format!("{}_refund_{}", self.gateway_name, charge_id),
            status: IntentStatus::Refunded,
            raw: None,
        }
    }

    fn name(&self) -> GatewayName {
        self.gateway_name
    }

    fn home_countries(&self) -> &'static [&'static str] {
        self.home
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
            gateway: self.gateway_name,
            event_type: "scripted".to_string(),
            reference: None,
            status: None,
            payload: parsed,
            received_at: Utc::now().to_rfc3339(),
        })
    }
}
