use crate::gateways::error::GatewayError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Stripe,
    Paypal,
    Iyzico,
    Mock,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Stripe => "stripe",
            GatewayName::Paypal => "paypal",
            GatewayName::Iyzico => "iyzico",
            GatewayName::Mock => "mock",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(GatewayName::Stripe),
            "paypal" => Ok(GatewayName::Paypal),
            "iyzico" => Ok(GatewayName::Iyzico),
            "mock" | "sandbox" => Ok(GatewayName::Mock),
            _ => Err(GatewayError::Validation {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Monetary amount as a decimal string plus ISO currency code.
///
/// Amounts stay in major units here; each adapter owns the conversion to
/// whatever its processor expects and never leaks that convention back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

impl Money {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }

    pub fn parse_decimal(&self) -> Result<BigDecimal, GatewayError> {
        BigDecimal::from_str(&self.amount).map_err(|_| GatewayError::Validation {
            message: format!("invalid decimal amount: {}", self.amount),
            field: Some("amount".to_string()),
        })
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        let parsed = self.parse_decimal()?;
        if parsed <= BigDecimal::from(0) {
            return Err(GatewayError::Validation {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

/// Processor-side lifecycle of an intent/charge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresConfirmation,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
    Unknown,
}

/// Request to open an authorization with a processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub amount: Money,
    /// Our side's reference (payment id / order number), echoed back by
    /// the processor in webhooks
    pub reference: String,
    /// ISO 3166-1 alpha-2 country the payer declared, drives routing
    pub payer_country: Option<String>,
    /// Card token / payment-method handle for processors that charge in
    /// one shot
    pub payment_method_ref: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// Tagged outcome shared by every adapter and the router.
///
/// Expected failures (declines, timeouts, unreachable processors) are the
/// `Failed` variant, never an `Err`, so callers apply uniform failure
/// handling without adapter-specific exception types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GatewayVerdict {
    /// Money moved (or refund accepted); `transaction_id` is the
    /// processor's settled reference
    Approved {
        transaction_id: String,
        status: IntentStatus,
        raw: Option<JsonValue>,
    },
    /// Intent exists but requires confirmation or a redirect
    Pending {
        intent_id: String,
        redirect_url: Option<String>,
        status: IntentStatus,
        raw: Option<JsonValue>,
    },
    Failed {
        error: String,
        retryable: bool,
    },
}

impl GatewayVerdict {
    pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
        GatewayVerdict::Failed {
            error: error.into(),
            retryable,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, GatewayVerdict::Approved { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, GatewayVerdict::Failed { .. })
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            GatewayVerdict::Approved { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }

    pub fn intent_id(&self) -> Option<&str> {
        match self {
            GatewayVerdict::Pending { intent_id, .. } => Some(intent_id),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            GatewayVerdict::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayWebhookEvent {
    pub gateway: GatewayName,
    pub event_type: String,
    /// Intent id or charge id the event refers to
    pub reference: Option<String>,
    pub status: Option<IntentStatus>,
    pub payload: JsonValue,
    pub received_at: String,
}
