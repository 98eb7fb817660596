use thiserror::Error;

/// Database error with a classified kind
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    /// A unique index rejected the write. For the payments table this is
    /// the one-payment-per-order guard firing under concurrency.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// Compare-and-set on a status column matched zero rows: the row moved
    /// to another status between read and write.
    #[error("payment {payment_id} is no longer in status {expected}")]
    StaleStatus { payment_id: String, expected: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            }),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::new(DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                })
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::Connection {
                    message: err.to_string(),
                })
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        let retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: retryable,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_detectable() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: "payments_order_id_key".to_string(),
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        });
        assert!(err.is_retryable());
    }
}
