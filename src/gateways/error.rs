use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerification { message: String },

    #[error("Processor error: provider={provider}, message={message}")]
    Provider {
        provider: String,
        message: String,
        code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Network { .. } => true,
            GatewayError::RateLimited { .. } => true,
            GatewayError::WebhookVerification { .. } => false,
            GatewayError::Provider { retryable, .. } => *retryable,
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let retryable = err.is_retryable();
        AppError::new(AppErrorKind::External(ExternalError::Gateway {
            message: err.to_string(),
            is_retryable: retryable,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(GatewayError::Network {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!GatewayError::Validation {
            message: "bad amount".to_string(),
            field: None
        }
        .is_retryable());
        assert!(GatewayError::Provider {
            provider: "stripe".to_string(),
            message: "503".to_string(),
            code: Some("503".to_string()),
            retryable: true
        }
        .is_retryable());
    }
}
