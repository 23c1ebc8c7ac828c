//! M-Pesa STK push endpoints: initiation, provider callback, status polling.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::PaymentsState;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::payment_initiation::InitiationRequest;

/// Provider-facing acknowledgement. Always sent with HTTP 200.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// `POST /mpesa/stkpush`
pub async fn stk_push(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    let request: InitiationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return with_request_id(
                AppError::validation("body", format!("request body must be a JSON object: {}", e)),
                request_id,
            )
            .into_response()
        }
    };

    match state.initiation.initiate(request).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "STK Push initiated successfully",
                "payment_id": result.payment_id,
                "data": result.provider_response,
            })),
        )
            .into_response(),
        Err(e) => with_request_id(e, request_id).into_response(),
    }
}

/// `POST /callback` and `POST /mpesa/callback`
///
/// The provider retries on anything but a well-formed 200, so every outcome
/// is acknowledged here.
pub async fn callback(State(state): State<PaymentsState>, body: Bytes) -> Response {
    let outcome = state.reconciler.reconcile_bytes(&body).await;

    if !outcome.is_applied() {
        warn!(outcome = ?outcome, "callback acknowledged with failure code");
    }

    (
        StatusCode::OK,
        Json(CallbackAck {
            result_code: outcome.result_code(),
            result_desc: outcome.result_desc().to_string(),
        }),
    )
        .into_response()
}

/// `GET /mpesa/payment-status/{checkoutRequestId}`
pub async fn payment_status(
    State(state): State<PaymentsState>,
    Path(checkout_request_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.status.get_status(&checkout_request_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => {
            info!(checkout_request_id = %checkout_request_id, "payment status requested for unknown id");
            (StatusCode::NOT_FOUND, Json(json!({ "status": "not_found" }))).into_response()
        }
        Err(e) => with_request_id(e, get_request_id_from_headers(&headers)).into_response(),
    }
}

pub(crate) fn with_request_id(err: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}
