use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, ToPrimitive};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::LazyLock;

static MSISDN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^2547\d{8}$").expect("MSISDN pattern is a valid regex"));

/// Smallest amount the provider accepts, in shillings.
pub const MIN_AMOUNT: i64 = 1;

/// Largest single STK push amount, in shillings.
pub const MAX_AMOUNT: i64 = 250_000;

pub const TRANSACTION_TYPE_PAYBILL: &str = "CustomerPayBillOnline";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Outcome of an STK callback result code: `0` is success, anything else failure.
    pub fn from_result_code(code: i64) -> Self {
        if code == 0 {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            // "success" is what older rows written by the first callback handler carry
            "completed" | "success" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PaymentStatus::from_str(&value)
    }
}

/// Validate a payer MSISDN against the `2547XXXXXXXX` format.
pub fn validate_msisdn(phone: &str) -> Result<String, PaymentError> {
    let phone = phone.trim();
    if MSISDN_PATTERN.is_match(phone) {
        Ok(phone.to_string())
    } else {
        Err(PaymentError::ValidationError {
            message: "phone must be in the format 2547XXXXXXXX".to_string(),
            field: Some("phone".to_string()),
        })
    }
}

/// Parse a JSON number or numeric string into a two-decimal amount.
pub fn parse_amount(value: &JsonValue) -> Result<BigDecimal, PaymentError> {
    let raw = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        _ => {
            return Err(PaymentError::ValidationError {
                message: "amount must be numeric".to_string(),
                field: Some("amount".to_string()),
            })
        }
    };

    let parsed = BigDecimal::from_str(&raw).map_err(|_| PaymentError::ValidationError {
        message: format!("amount must be numeric, got '{}'", raw),
        field: Some("amount".to_string()),
    })?;

    if parsed < BigDecimal::from(MIN_AMOUNT) {
        return Err(PaymentError::ValidationError {
            message: format!("amount must be at least {}", MIN_AMOUNT),
            field: Some("amount".to_string()),
        });
    }
    if parsed > BigDecimal::from(MAX_AMOUNT) {
        return Err(PaymentError::ValidationError {
            message: format!("amount must not exceed {}", MAX_AMOUNT),
            field: Some("amount".to_string()),
        });
    }

    Ok(parsed.round(2))
}

/// Whole-shilling amount sent on the wire.
pub fn provider_amount(amount: &BigDecimal) -> Result<u64, PaymentError> {
    amount
        .with_scale(0)
        .to_u64()
        .filter(|whole| (MIN_AMOUNT as u64..=MAX_AMOUNT as u64).contains(whole))
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!(
                "amount {} is outside the provider range {}..={}",
                amount, MIN_AMOUNT, MAX_AMOUNT
            ),
            field: Some("amount".to_string()),
        })
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    pub amount: u64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

/// Provider acknowledgement of an STK push. Every field is optional; the
/// verbatim body is kept in `raw`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default)]
    pub response_code: Option<JsonValue>,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
    #[serde(skip)]
    pub raw: JsonValue,
}

impl StkPushResponse {
    /// Build from the raw body without failing on missing or mistyped fields.
    pub fn from_raw(raw: JsonValue) -> Self {
        let field = |name: &str| {
            raw.get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        Self {
            merchant_request_id: field("MerchantRequestID"),
            checkout_request_id: field("CheckoutRequestID"),
            response_code: raw.get("ResponseCode").cloned(),
            response_description: field("ResponseDescription"),
            customer_message: field("CustomerMessage"),
            raw,
        }
    }

    /// Daraja answers `"0"` when the push was accepted. A missing code on a
    /// 2xx reply is treated as accepted.
    pub fn is_accepted(&self) -> bool {
        match &self.response_code {
            None | Some(JsonValue::Null) => true,
            Some(JsonValue::String(code)) => code.trim() == "0",
            Some(JsonValue::Number(code)) => code.as_i64() == Some(0),
            Some(_) => false,
        }
    }
}
