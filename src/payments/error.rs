use serde_json::Value as JsonValue;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// OAuth token request rejected or unparseable.
    #[error("M-Pesa authentication failed: status={status:?}, body={body}")]
    AuthFailure { status: Option<u16>, body: String },

    /// STK push rejected by the provider. `body` is the provider's raw reply.
    #[error("STK push failed: status={status:?}, body={body}")]
    PushFailure {
        status: Option<u16>,
        body: JsonValue,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::AuthFailure { status, .. } | PaymentError::PushFailure { status, .. } => {
                status.map(|s| s >= 500 || s == 429).unwrap_or(false)
            }
            PaymentError::NetworkError { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 422,
            PaymentError::AuthFailure { .. } => 500,
            PaymentError::PushFailure { .. } => 500,
            PaymentError::NetworkError { .. } => 500,
        }
    }

    /// Diagnostic payload surfaced to operators in the `details` field.
    pub fn details(&self) -> JsonValue {
        match self {
            PaymentError::ValidationError { message, field } => serde_json::json!({
                "field": field,
                "error": message,
            }),
            PaymentError::AuthFailure { status, body } => serde_json::json!({
                "http_status": status,
                "body": body,
            }),
            PaymentError::PushFailure { body, .. } => body.clone(),
            PaymentError::NetworkError { message } => serde_json::json!({
                "error": message,
            }),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("provider request timed out: {}", err)
        } else {
            format!("provider request failed: {}", err)
        };
        PaymentError::NetworkError { message }
    }
}
