//! Application error type shared by services and HTTP handlers
//!
//! Every failure that reaches an HTTP boundary is an [`AppError`]. It carries
//! the status mapping, a client-facing message and, for upstream failures, a
//! `details` payload echoed to operators.

use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UPSTREAM_AUTH_ERROR")]
    UpstreamAuthError,
    #[serde(rename = "UPSTREAM_PUSH_ERROR")]
    UpstreamPushError,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    /// Bad phone, amount or status supplied by the caller
    Validation {
        field: Option<String>,
        message: String,
    },
    /// OAuth token could not be obtained
    UpstreamAuth { details: JsonValue },
    /// STK push was rejected or the provider was unreachable
    UpstreamPush { details: JsonValue },
    NotFound { entity: String, id: String },
    Storage { message: String },
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation {
            field: Some(field.into()),
            message: message.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Validation { .. } => 422,
            AppErrorKind::UpstreamAuth { .. } => 500,
            AppErrorKind::UpstreamPush { .. } => 500,
            AppErrorKind::NotFound { .. } => 404,
            AppErrorKind::Storage { .. } => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Validation { .. } => ErrorCode::ValidationError,
            AppErrorKind::UpstreamAuth { .. } => ErrorCode::UpstreamAuthError,
            AppErrorKind::UpstreamPush { .. } => ErrorCode::UpstreamPushError,
            AppErrorKind::NotFound { .. } => ErrorCode::NotFound,
            AppErrorKind::Storage { .. } => ErrorCode::StorageError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation { message, .. } => message.clone(),
            AppErrorKind::UpstreamAuth { .. } => "Failed to get access token".to_string(),
            AppErrorKind::UpstreamPush { .. } => "STK Push initiation failed".to_string(),
            AppErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
            AppErrorKind::Storage { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    /// Operator diagnostics. Storage messages stay in the logs.
    pub fn details(&self) -> Option<JsonValue> {
        match &self.kind {
            AppErrorKind::Validation {
                field: Some(field),
                message,
            } => Some(serde_json::json!({ "field": field, "error": message })),
            AppErrorKind::Validation { field: None, .. } => None,
            AppErrorKind::UpstreamAuth { details } | AppErrorKind::UpstreamPush { details } => {
                Some(details.clone())
            }
            AppErrorKind::NotFound { .. } | AppErrorKind::Storage { .. } => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Storage { message } => write!(f, "storage error: {}", message),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let details = err.details();
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation { field, message }
            }
            PaymentError::AuthFailure { .. } => AppErrorKind::UpstreamAuth { details },
            PaymentError::PushFailure { .. } | PaymentError::NetworkError { .. } => {
                AppErrorKind::UpstreamPush { details }
            }
        };
        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
