use restopay_backend::api;
use restopay_backend::config::AppConfig;
use restopay_backend::database;
use restopay_backend::database::order_repository::{OrderRepository, TableRepository};
use restopay_backend::database::payment_repository::PaymentRepository;
use restopay_backend::database::store::PaymentStore;
use restopay_backend::gateways::router::GatewayRouter;
use restopay_backend::health::{HealthChecker, HealthState, HealthStatus};
use restopay_backend::logging::init_tracing;
use restopay_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use restopay_backend::services::idempotency::{IdempotencyConfig, IdempotencyKeystore};
use restopay_backend::services::orders::{OrderService, TableService};
use restopay_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use restopay_backend::services::webhook_processor::WebhookProcessor;
use restopay_backend::workers::idempotency_sweeper::IdempotencySweeper;

use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting restopay backend service"
    );

    // Database pool
    info!("📊 Initializing database connection pool...");
    let db_pool = database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!("database init failed: {e}")
        })?;
    info!("✅ Database connection pool initialized");

    // Repositories and collaborators
    let payment_store: Arc<dyn PaymentStore> = Arc::new(PaymentRepository::new(db_pool.clone()));
    let orders: Arc<dyn OrderService> = Arc::new(OrderRepository::new(db_pool.clone()));
    let tables: Arc<dyn TableService> = Arc::new(TableRepository::new(db_pool.clone()));

    // Idempotency keystore + sweeper
    let keystore = Arc::new(IdempotencyKeystore::new(
        payment_store.clone(),
        IdempotencyConfig {
            retention: Duration::from_secs(config.payments.idempotency_retention_secs),
            max_attempts: config.payments.transaction_id_max_attempts,
            backoff_base_ms: 50,
        },
    ));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper = IdempotencySweeper::new(
        keystore.clone(),
        Duration::from_secs(config.payments.idempotency_sweep_interval_secs),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(worker_shutdown_rx));

    // Gateway router: missing credentials for the configured default are
    // fatal here, not per-request
    let router = Arc::new(GatewayRouter::from_env().map_err(|e| {
        error!("Failed to initialize gateway router: {}", e);
        anyhow::anyhow!("gateway init failed: {e}")
    })?);

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        payment_store,
        keystore,
        router.clone(),
        orders,
        tables,
        OrchestratorConfig::from_payment_config(&config.payments),
    ));

    let webhook_processor = Arc::new(WebhookProcessor::new(router, orchestrator.clone()));

    // Routes
    info!("🛣️  Setting up application routes...");
    let health_checker = HealthChecker::new(Some(db_pool));

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(health_checker)
        .merge(api::payments::routes(api::payments::PaymentApiState {
            orchestrator,
        }))
        .merge(api::webhooks::routes(api::webhooks::WebhookState {
            processor: webhook_processor,
        }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await {
        error!(error = %e, "Timed out waiting for sweeper shutdown");
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

async fn root() -> &'static str {
    "restopay payment service"
}

async fn health(
    axum::extract::State(checker): axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = checker.check_health().await;

    if matches!(health_status.status, HealthState::Unhealthy) {
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks all dependencies
async fn readiness(
    state: axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - basic process check
async fn liveness() -> &'static str {
    "OK"
}
