use crate::database::payment_repository::{Payment, PaymentStateTransition};
use crate::error::{AppError, ValidationError};
use crate::middleware::error::{app_error_response, get_request_id_from_headers, ErrorResponse};
use crate::services::payment_orchestrator::{
    CreatePayment, PaymentMethod, PaymentOrchestrator, ProcessPayment,
};
use crate::services::payment_state::PaymentStatus;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct PaymentApiState {
    pub orchestrator: Arc<PaymentOrchestrator>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Amount accepted as either a JSON string or number; parsed into a
/// fixed-point decimal, never touched as a float
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AmountField {
    Text(String),
    Number(serde_json::Number),
}

impl AmountField {
    fn parse(&self) -> Result<BigDecimal, AppError> {
        let raw = match self {
            AmountField::Text(s) => s.clone(),
            AmountField::Number(n) => n.to_string(),
        };
        BigDecimal::from_str(&raw).map_err(|_| {
            AppError::validation(ValidationError::InvalidAmount {
                amount: raw,
                reason: "not a decimal number".to_string(),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentRequest {
    order_id: Uuid,
    tenant_id: Uuid,
    amount: AmountField,
    method: String,
    cashier_id: Option<Uuid>,
    payment_details: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessPaymentRequest {
    #[allow(dead_code)]
    order_id: Option<Uuid>,
    payment_method_id: Option<String>,
    payment_intent_id: Option<String>,
    cashier_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest {
    status: String,
    reason: Option<String>,
    actor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RefundRequest {
    reason: Option<String>,
    actor_id: Option<Uuid>,
}

pub fn routes(state: PaymentApiState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/order/{order_id}", get(get_payment_by_order))
        .route("/payments/{id}/status", patch(update_status))
        .route("/payments/{id}/process", post(process_payment))
        .route("/payments/{id}/verify", post(verify_payment))
        .route("/payments/{id}/refund", post(refund_payment))
        .route("/payments/{id}/history", get(payment_history))
        .with_state(state)
}

async fn create_payment(
    State(state): State<PaymentApiState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentRequest>,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);

    let method = match PaymentMethod::parse(&payload.method) {
        Some(method) => method,
        None => {
            return Err(app_error_response(
                AppError::validation(ValidationError::UnknownMethod {
                    value: payload.method,
                }),
                request_id,
            ))
        }
    };
    let amount = payload
        .amount
        .parse()
        .map_err(|e| app_error_response(e, request_id.clone()))?;

    let payer_country = payload.payment_details.as_ref().and_then(|details| {
        details
            .get("userCountry")
            .or_else(|| details.get("user_country"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
    });

    state
        .orchestrator
        .create(CreatePayment {
            order_id: payload.order_id,
            tenant_id: payload.tenant_id,
            amount,
            method,
            cashier_id: payload.cashier_id,
            payer_country,
        })
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn get_payment(
    State(state): State<PaymentApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);
    state
        .orchestrator
        .get(id)
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn get_payment_by_order(
    State(state): State<PaymentApiState>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);
    state
        .orchestrator
        .get_by_order(order_id)
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn update_status(
    State(state): State<PaymentApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);

    let status = match PaymentStatus::parse(&payload.status) {
        Some(status) => status,
        None => {
            return Err(app_error_response(
                AppError::validation(ValidationError::UnknownStatus {
                    value: payload.status,
                }),
                request_id,
            ))
        }
    };

    state
        .orchestrator
        .update_status(
            id,
            status,
            payload.reason,
            payload.actor_id,
            None,
            serde_json::json!({}),
        )
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn process_payment(
    State(state): State<PaymentApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ProcessPaymentRequest>,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);

    state
        .orchestrator
        .process_payment(
            id,
            ProcessPayment {
                payment_method_ref: payload.payment_method_id,
                payment_intent_id: payload.payment_intent_id,
                cashier_id: payload.cashier_id,
            },
        )
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn verify_payment(
    State(state): State<PaymentApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);
    state
        .orchestrator
        .verify_gateway_status(id)
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn refund_payment(
    State(state): State<PaymentApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<RefundRequest>>,
) -> ApiResult<Payment> {
    let request_id = get_request_id_from_headers(&headers);
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    state
        .orchestrator
        .refund(id, payload.reason, payload.actor_id)
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}

async fn payment_history(
    State(state): State<PaymentApiState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Vec<PaymentStateTransition>> {
    let request_id = get_request_id_from_headers(&headers);
    state
        .orchestrator
        .history(id)
        .await
        .map(Json)
        .map_err(|e| app_error_response(e, request_id))
}
