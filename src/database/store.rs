use crate::database::error::DatabaseError;
use crate::database::payment_repository::{NewPayment, Payment, PaymentStateTransition};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One validated status change, applied atomically with its audit row
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    pub payment_id: Uuid,
    /// Compare-and-set guard: the write only applies while the row is
    /// still in this status
    pub expected_from: String,
    pub to: String,
    pub reason: Option<String>,
    pub actor_id: Option<Uuid>,
    /// Merged into the payment's gateway_response and stored on the audit
    /// row
    pub metadata: JsonValue,
    /// Set on the payment when present (cash completion, gateway capture)
    pub transaction_id: Option<String>,
    /// Set as the payment's cashier when present
    pub operator_id: Option<Uuid>,
}

/// Persistence seam for payment records and their audit trail.
///
/// The production implementation is Postgres-backed
/// ([`crate::database::payment_repository::PaymentRepository`]); tests
/// drive the orchestrator against an in-memory implementation. Contract
/// points that matter beyond CRUD:
/// - `insert_payment` surfaces the one-payment-per-order unique constraint
///   as a `UniqueViolation`, which is the authoritative concurrency guard;
/// - `apply_transition` performs the status update and the transition
///   insert in one transaction, failing with `StaleStatus` when the row
///   moved concurrently.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, new: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    /// Look up by gateway intent id or settled transaction id; used by
    /// webhook processing
    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Read-through for the idempotency keystore: payments for the same
    /// order/amount/method created inside the retention window
    async fn find_recent_matching(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        method: &str,
        created_after: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn transaction_id_exists(&self, transaction_id: &str) -> Result<bool, DatabaseError>;

    /// Persist a freshly created gateway intent on a pending payment
    async fn set_intent(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        metadata: JsonValue,
    ) -> Result<Payment, DatabaseError>;

    async fn apply_transition(
        &self,
        command: TransitionCommand,
    ) -> Result<(Payment, PaymentStateTransition), DatabaseError>;

    /// Audit rows for one payment, oldest first
    async fn history(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentStateTransition>, DatabaseError>;
}
