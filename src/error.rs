//! Unified error handling for the restopay backend
//!
//! One layered error type with HTTP status mapping, machine-readable error
//! codes and user-facing messages, so every handler can distinguish
//! "retry this" from "this will never succeed".

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,
    #[serde(rename = "PAYMENT_ALREADY_COMPLETED")]
    PaymentAlreadyCompleted,
    #[serde(rename = "ORDER_NOT_PAYABLE")]
    OrderNotPayable,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "TRANSACTION_ID_EXHAUSTED")]
    TransactionIdExhausted,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (401, 502, 504)
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,
    #[serde(rename = "WEBHOOK_SIGNATURE_INVALID")]
    WebhookSignatureInvalid,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business-rule violations in the payment lifecycle
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Order referenced by the request does not exist (or belongs to
    /// another tenant)
    OrderNotFound { order_id: Uuid },
    /// Payment with the given id does not exist
    PaymentNotFound { payment_id: Uuid },
    /// The order already carries a pending or completed payment
    DuplicatePayment { order_id: Uuid },
    /// Attempt to reprocess a payment that already completed
    PaymentAlreadyCompleted { payment_id: Uuid },
    /// Order is not in a payable status (served or completed)
    OrderNotPayable { order_id: Uuid, status: String },
    /// Requested status change is not in the lifecycle graph
    InvalidStateTransition { from: String, to: String },
    /// Transaction id generation collided on every attempt
    TransactionIdExhausted { prefix: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// External processor errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway declined, errored, or was unreachable; the payment row is
    /// preserved in `failed` with the diagnostics
    Gateway { message: String, is_retryable: bool },
    /// Gateway call exceeded its deadline
    Timeout { service: String, timeout_secs: u64 },
    /// Webhook payload failed signature verification
    WebhookSignature { provider: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    UnknownStatus { value: String },
    UnknownMethod { value: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::DuplicatePayment { .. } => 409,
                DomainError::PaymentAlreadyCompleted { .. } => 409,
                DomainError::TransactionIdExhausted { .. } => 409,
                DomainError::OrderNotPayable { .. } => 422,
                DomainError::InvalidStateTransition { .. } => 422,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 502,
                ExternalError::Timeout { .. } => 504,
                ExternalError::WebhookSignature { .. } => 401,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
                DomainError::PaymentAlreadyCompleted { .. } => ErrorCode::PaymentAlreadyCompleted,
                DomainError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::TransactionIdExhausted { .. } => ErrorCode::TransactionIdExhausted,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::Timeout { .. } => ErrorCode::GatewayTimeout,
                ExternalError::WebhookSignature { .. } => ErrorCode::WebhookSignatureInvalid,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Whether the caller can safely retry the request as-is
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
                ExternalError::WebhookSignature { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_id } => {
                    format!("Order {} not found", order_id)
                }
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment {} not found", payment_id)
                }
                DomainError::DuplicatePayment { order_id } => {
                    format!("Order {} already has a payment", order_id)
                }
                DomainError::PaymentAlreadyCompleted { payment_id } => {
                    format!("Payment {} is already completed", payment_id)
                }
                DomainError::OrderNotPayable { order_id, status } => format!(
                    "Order {} is not in a payable status (current: {})",
                    order_id, status
                ),
                DomainError::InvalidStateTransition { from, to } => {
                    format!("Cannot transition payment from {} to {}", from, to)
                }
                DomainError::TransactionIdExhausted { prefix } => format!(
                    "Could not allocate a unique {} transaction id, please retry",
                    prefix
                ),
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => {
                    "A storage error occurred. Please try again later".to_string()
                }
                InfrastructureError::Configuration { message } => {
                    format!("Service misconfigured: {}", message)
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { message, .. } => {
                    format!("Payment gateway error: {}", message)
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!("{} did not respond within {}s", service, timeout_secs)
                }
                ExternalError::WebhookSignature { provider } => {
                    format!("Invalid {} webhook signature", provider)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Missing required field: {}", field)
                }
                ValidationError::UnknownStatus { value } => {
                    format!("Unknown payment status: {}", value)
                }
                ValidationError::UnknownMethod { value } => {
                    format!("Unknown payment method: {}", value)
                }
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}
