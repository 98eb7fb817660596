//! Gateway webhook processing
//!
//! Maps each processor's event taxonomy onto validated status updates.
//! Signature verification is mandatory for every gateway; an event that
//! does not verify is rejected before anything is looked up. Replayed
//! events that would repeat an already-applied transition are acknowledged
//! as already processed so at-least-once delivery stays harmless.

use crate::error::{AppErrorKind, DomainError};
use crate::gateways::router::GatewayRouter;
use crate::gateways::types::{GatewayName, IntentStatus};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::payment_state::PaymentStatus;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Already processed")]
    AlreadyProcessed,
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),
    #[error("Event carries no payment reference")]
    MissingReference,
    #[error("No payment for reference {0}")]
    PaymentNotFound(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

pub struct WebhookProcessor {
    router: Arc<GatewayRouter>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(router: Arc<GatewayRouter>, orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self {
            router,
            orchestrator,
        }
    }

    pub async fn process_webhook(
        &self,
        gateway_name: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookProcessorError> {
        let gateway = GatewayName::from_str(gateway_name)
            .map_err(|_| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;
        let adapter = self
            .router
            .adapter(gateway)
            .ok_or_else(|| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;

        let signature = signature.ok_or(WebhookProcessorError::InvalidSignature)?;
        let verification = adapter
            .verify_webhook(body, signature)
            .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;
        if !verification.valid {
            warn!(
                gateway = %gateway,
                reason = verification.reason.as_deref().unwrap_or("unknown"),
                "webhook signature rejected"
            );
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = adapter
            .parse_webhook_event(body)
            .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;

        let target = match event.status {
            Some(IntentStatus::Succeeded) => PaymentStatus::Completed,
            Some(IntentStatus::Failed) => PaymentStatus::Failed,
            Some(IntentStatus::Refunded) => PaymentStatus::Refunded,
            Some(IntentStatus::Cancelled) => PaymentStatus::Cancelled,
            _ => {
                info!(
                    gateway = %gateway,
                    event_type = %event.event_type,
                    "webhook event carries no actionable status, ignoring"
                );
                return Ok(());
            }
        };

        let reference = event
            .reference
            .as_deref()
            .ok_or(WebhookProcessorError::MissingReference)?;
        let payment = self
            .orchestrator
            .find_by_gateway_reference(reference)
            .await
            .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?
            .ok_or_else(|| WebhookProcessorError::PaymentNotFound(reference.to_string()))?;

        if payment.status == target.as_str() {
            info!(
                payment_id = %payment.id,
                status = %payment.status,
                "webhook replay, payment already in target status"
            );
            return Err(WebhookProcessorError::AlreadyProcessed);
        }

        let result = self
            .orchestrator
            .update_status(
                payment.id,
                target,
                Some(format!("{} webhook: {}", gateway, event.event_type)),
                None,
                None,
                serde_json::json!({
                    "webhook_event": event.event_type,
                    "webhook_reference": reference,
                }),
            )
            .await;

        match result {
            Ok(updated) => {
                info!(
                    payment_id = %updated.id,
                    status = %updated.status,
                    gateway = %gateway,
                    "webhook applied"
                );
                Ok(())
            }
            Err(e) => match &e.kind {
                // A replay that raced the first delivery: the transition
                // already happened, acknowledge instead of erroring
                AppErrorKind::Domain(DomainError::InvalidStateTransition { .. }) => {
                    Err(WebhookProcessorError::AlreadyProcessed)
                }
                _ => Err(WebhookProcessorError::ProcessingError(e.to_string())),
            },
        }
    }
}
