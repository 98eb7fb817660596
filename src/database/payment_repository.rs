use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::store::{PaymentStore, TransitionCommand};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Payment entity
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub amount: BigDecimal,
    pub method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub gateway_response: serde_json::Value,
    pub cashier_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Insert payload for a new payment row
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub amount: BigDecimal,
    pub method: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub gateway_response: serde_json::Value,
    pub cashier_id: Option<Uuid>,
}

/// Append-only audit record of one status change
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentStateTransition {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub from_status: String,
    pub to_status: String,
    pub reason: Option<String>,
    pub actor_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const PAYMENT_COLUMNS: &str = "id, order_id, tenant_id, amount, method, status, \
     transaction_id, payment_intent_id, gateway_response, cashier_id, \
     created_at, updated_at";

const TRANSITION_COLUMNS: &str =
    "id, payment_id, from_status, to_status, reason, actor_id, metadata, created_at";

/// Postgres-backed payment store
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    /// The unique index on order_id makes this the authoritative
    /// at-most-one-payment-per-order check; a concurrent second writer
    /// gets a UniqueViolation here no matter what it read beforehand.
    async fn insert_payment(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
             (order_id, tenant_id, amount, method, status, transaction_id, \
              gateway_response, cashier_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(new.order_id)
        .bind(new.tenant_id)
        .bind(new.amount)
        .bind(&new.method)
        .bind(&new.status)
        .bind(&new.transaction_id)
        .bind(&new.gateway_response)
        .bind(new.cashier_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments \
             WHERE payment_intent_id = $1 OR transaction_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_recent_matching(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        method: &str,
        created_after: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments \
             WHERE order_id = $1 AND amount = $2 AND method = $3 \
               AND created_at > $4 \
             ORDER BY created_at DESC \
             LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .bind(amount)
        .bind(method)
        .bind(created_after)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn transaction_id_exists(&self, transaction_id: &str) -> Result<bool, DatabaseError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM payments WHERE transaction_id = $1 LIMIT 1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(row.is_some())
    }

    async fn set_intent(
        &self,
        payment_id: Uuid,
        intent_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments \
             SET payment_intent_id = $2, \
                 gateway_response = gateway_response || $3, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(intent_id)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Status update and audit insert in one transaction. The UPDATE is a
    /// compare-and-set on the current status so two racing writers cannot
    /// both record the same transition.
    async fn apply_transition(
        &self,
        command: TransitionCommand,
    ) -> Result<(Payment, PaymentStateTransition), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments \
             SET status = $3, \
                 transaction_id = COALESCE($4, transaction_id), \
                 cashier_id = COALESCE($5, cashier_id), \
                 gateway_response = gateway_response || $6, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(command.payment_id)
        .bind(&command.expected_from)
        .bind(&command.to)
        .bind(&command.transaction_id)
        .bind(command.operator_id)
        .bind(&command.metadata)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let updated = match updated {
            Some(payment) => payment,
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Err(DatabaseError::new(DatabaseErrorKind::StaleStatus {
                    payment_id: command.payment_id.to_string(),
                    expected: command.expected_from,
                }));
            }
        };

        let transition = sqlx::query_as::<_, PaymentStateTransition>(&format!(
            "INSERT INTO payment_state_transitions \
             (payment_id, from_status, to_status, reason, actor_id, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {}",
            TRANSITION_COLUMNS
        ))
        .bind(command.payment_id)
        .bind(&command.expected_from)
        .bind(&command.to)
        .bind(&command.reason)
        .bind(command.actor_id)
        .bind(&command.metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok((updated, transition))
    }

    async fn history(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentStateTransition>, DatabaseError> {
        sqlx::query_as::<_, PaymentStateTransition>(&format!(
            "SELECT {} FROM payment_state_transitions \
             WHERE payment_id = $1 \
             ORDER BY created_at ASC",
            TRANSITION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
