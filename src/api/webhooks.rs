use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::webhook_processor::{WebhookProcessor, WebhookProcessorError};

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/{gateway}", post(handle_webhook))
        .with_state(state)
}

/// POST /webhooks/{gateway}
///
/// Signature verification is mandatory for every gateway; an event that
/// does not carry a valid signature is rejected with 400 before anything
/// is processed.
async fn handle_webhook(
    State(state): State<WebhookState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!(gateway = %gateway, "Received webhook");

    let signature = match gateway.as_str() {
        "stripe" => header_value(&headers, "stripe-signature"),
        "paypal" => header_value(&headers, "paypal-transmission-sig"),
        "iyzico" => header_value(&headers, "x-iyz-signature"),
        "mock" => header_value(&headers, "x-mock-signature"),
        _ => None,
    };

    if signature.is_none() {
        warn!(gateway = %gateway, "Missing webhook signature");
        return (StatusCode::BAD_REQUEST, "Missing signature").into_response();
    }

    match state
        .processor
        .process_webhook(&gateway, signature.as_deref(), body.as_bytes())
        .await
    {
        Ok(_) => {
            info!(gateway = %gateway, "Webhook processed successfully");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            warn!(gateway = %gateway, "Invalid webhook signature");
            (StatusCode::BAD_REQUEST, "Invalid signature").into_response()
        }
        Err(WebhookProcessorError::AlreadyProcessed) => {
            info!(gateway = %gateway, "Webhook already processed");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(WebhookProcessorError::UnknownGateway(name)) => {
            warn!(gateway = %name, "Webhook for unknown gateway");
            (StatusCode::NOT_FOUND, "Unknown gateway").into_response()
        }
        Err(WebhookProcessorError::PaymentNotFound(reference)) => {
            // Event for a payment this deployment does not know; ack so
            // the processor stops redelivering it
            warn!(gateway = %gateway, reference = %reference, "Webhook payment not found");
            (StatusCode::OK, Json(serde_json::json!({"status": "ignored"}))).into_response()
        }
        Err(e) => {
            // Transient failure: non-2xx so the processor redelivers;
            // replays are harmless because transitions are validated
            error!(gateway = %gateway, error = %e, "Webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed").into_response()
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
