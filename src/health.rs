//! Service health reporting

use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub database: ComponentHealth,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct HealthChecker {
    pool: Option<PgPool>,
}

impl HealthChecker {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let database = match &self.pool {
            Some(pool) => match crate::database::health_check(pool).await {
                Ok(_) => ComponentHealth {
                    healthy: true,
                    error: None,
                },
                Err(e) => ComponentHealth {
                    healthy: false,
                    error: Some(e.to_string()),
                },
            },
            None => ComponentHealth {
                healthy: false,
                error: Some("database disabled by configuration".to_string()),
            },
        };

        let status = if database.healthy {
            HealthState::Healthy
        } else if self.pool.is_none() {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        };

        HealthStatus {
            status,
            database,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
