//! Payment lifecycle state machine
//!
//! Owns the legal status graph and the append-only audit trail. Every
//! status mutation in the crate goes through [`PaymentStateService`];
//! direct status writes are a correctness violation because they skip both
//! validation and the transition record.

use crate::database::error::DatabaseErrorKind;
use crate::database::payment_repository::{Payment, PaymentStateTransition};
use crate::database::store::{PaymentStore, TransitionCommand};
use crate::error::{AppError, DomainError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Payment record status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    /// All valid transitions from this status
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Completed => &[PaymentStatus::Refunded],
            PaymentStatus::Failed => &[PaymentStatus::Pending, PaymentStatus::Cancelled],
            // Terminal states
            PaymentStatus::Refunded => &[],
            PaymentStatus::Cancelled => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "cancelled" | "canceled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validates and records lifecycle transitions
pub struct PaymentStateService {
    store: Arc<dyn PaymentStore>,
}

impl PaymentStateService {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Pure lookup against the transition table. Unknown `from` strings
    /// have no valid transitions.
    pub fn is_valid_transition(from: &str, to: PaymentStatus) -> bool {
        match PaymentStatus::parse(from) {
            Some(from) => from.valid_transitions().contains(&to),
            None => false,
        }
    }

    /// States reachable from `current`, for UI/validation purposes
    pub fn next_states(current: PaymentStatus) -> &'static [PaymentStatus] {
        current.valid_transitions()
    }

    /// Validate and persist one status change.
    ///
    /// The payment row update and the audit row insert are a single store
    /// transaction; an illegal move errors without persisting anything.
    /// `transaction_id`/`operator_id` ride along so cash completion can
    /// set them atomically with the status.
    pub async fn record_transition(
        &self,
        payment: &Payment,
        to: PaymentStatus,
        reason: Option<String>,
        actor_id: Option<Uuid>,
        metadata: JsonValue,
        transaction_id: Option<String>,
        operator_id: Option<Uuid>,
    ) -> Result<(Payment, PaymentStateTransition), AppError> {
        if !Self::is_valid_transition(&payment.status, to) {
            return Err(AppError::domain(DomainError::InvalidStateTransition {
                from: payment.status.clone(),
                to: to.as_str().to_string(),
            }));
        }

        let command = TransitionCommand {
            payment_id: payment.id,
            expected_from: payment.status.clone(),
            to: to.as_str().to_string(),
            reason,
            actor_id,
            metadata,
            transaction_id,
            operator_id,
        };

        let (updated, transition) = self.store.apply_transition(command).await.map_err(|e| {
            // A concurrent writer moved the row first; surface it as the
            // same invalid-transition error the caller would have hit
            if matches!(e.kind, DatabaseErrorKind::StaleStatus { .. }) {
                AppError::domain(DomainError::InvalidStateTransition {
                    from: payment.status.clone(),
                    to: to.as_str().to_string(),
                })
            } else {
                AppError::from(e)
            }
        })?;

        info!(
            payment_id = %updated.id,
            from_status = %transition.from_status,
            to_status = %transition.to_status,
            "payment state transitioned"
        );

        Ok((updated, transition))
    }

    /// Chronological transition history, oldest first
    pub async fn history(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentStateTransition>, AppError> {
        self.store
            .history(payment_id)
            .await
            .map_err(AppError::from)
    }
}
