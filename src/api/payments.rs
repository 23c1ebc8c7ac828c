//! Administrative CRUD over stored payments.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::api::mpesa::with_request_id;
use crate::api::PaymentsState;
use crate::error::AppError;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::payment_admin::{CreatePaymentRequest, UpdatePaymentRequest};

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        AppError::validation("body", format!("request body must be a JSON object: {}", e))
    })
}

/// `GET /mpesa/payments`
pub async fn list_payments(State(state): State<PaymentsState>, headers: HeaderMap) -> Response {
    match state.admin.list().await {
        Ok(payments) => (StatusCode::OK, Json(payments)).into_response(),
        Err(e) => with_request_id(e, get_request_id_from_headers(&headers)).into_response(),
    }
}

/// `GET /mpesa/payments/{id}`
pub async fn get_payment(
    State(state): State<PaymentsState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return not_found();
    };

    match state.admin.get(id).await {
        Ok(Some(payment)) => (StatusCode::OK, Json(payment)).into_response(),
        Ok(None) => not_found(),
        Err(e) => with_request_id(e, get_request_id_from_headers(&headers)).into_response(),
    }
}

/// `POST /mpesa/payments`
pub async fn create_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let request: CreatePaymentRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return with_request_id(e, request_id).into_response(),
    };

    match state.admin.create(request).await {
        Ok(payment) => (StatusCode::CREATED, Json(payment)).into_response(),
        Err(e) => with_request_id(e, request_id).into_response(),
    }
}

/// `PUT /mpesa/payments/{id}`
pub async fn update_payment(
    State(state): State<PaymentsState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let Ok(id) = Uuid::parse_str(&id) else {
        return not_found();
    };
    let request: UpdatePaymentRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return with_request_id(e, request_id).into_response(),
    };

    match state.admin.update(id, request).await {
        Ok(Some(payment)) => (StatusCode::OK, Json(payment)).into_response(),
        Ok(None) => not_found(),
        Err(e) => with_request_id(e, request_id).into_response(),
    }
}

/// `DELETE /mpesa/payments/{id}`
pub async fn delete_payment(
    State(state): State<PaymentsState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return not_found();
    };

    match state.admin.delete(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "Deleted successfully" })),
        )
            .into_response(),
        Ok(false) => not_found(),
        Err(e) => with_request_id(e, get_request_id_from_headers(&headers)).into_response(),
    }
}
