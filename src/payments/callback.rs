//! Tolerant decoder for the STK callback envelope.
//!
//! The provider posts `{Body: {stkCallback: {...}}}`. Every field inside is
//! treated as optional: decoding never fails because a field is missing or
//! has an unexpected type, it just leaves that field empty.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

use crate::payments::types::MAX_AMOUNT;
use crate::payments::utils::parse_provider_timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackDecodeError {
    #[error("callback payload has no Body.stkCallback object")]
    MissingCallback,
    #[error("Body.stkCallback is empty")]
    EmptyCallback,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StkCallback {
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub metadata: CallbackMetadata,
}

/// `CallbackMetadata.Item` flattened into `Name -> Value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackMetadata {
    items: BTreeMap<String, JsonValue>,
}

impl StkCallback {
    pub fn decode(payload: &JsonValue) -> Result<Self, CallbackDecodeError> {
        let callback = payload
            .get("Body")
            .and_then(|body| body.get("stkCallback"))
            .ok_or(CallbackDecodeError::MissingCallback)?;

        let fields = match callback {
            JsonValue::Object(fields) if fields.is_empty() => {
                return Err(CallbackDecodeError::EmptyCallback)
            }
            JsonValue::Object(fields) => fields,
            JsonValue::Null => return Err(CallbackDecodeError::EmptyCallback),
            _ => return Err(CallbackDecodeError::MissingCallback),
        };

        Ok(Self {
            merchant_request_id: fields.get("MerchantRequestID").and_then(as_text),
            checkout_request_id: fields.get("CheckoutRequestID").and_then(as_text),
            result_code: fields.get("ResultCode").and_then(as_integer),
            result_desc: fields.get("ResultDesc").and_then(as_text),
            metadata: fields
                .get("CallbackMetadata")
                .map(CallbackMetadata::flatten)
                .unwrap_or_default(),
        })
    }
}

impl CallbackMetadata {
    /// Items missing a `Name` or a `Value` are skipped.
    pub fn flatten(metadata: &JsonValue) -> Self {
        let mut items = BTreeMap::new();
        let list = metadata
            .get("Item")
            .and_then(|item| item.as_array())
            .map(|list| list.as_slice())
            .unwrap_or(&[]);

        for entry in list {
            let name = entry.get("Name").and_then(|n| n.as_str());
            let value = entry.get("Value").filter(|v| !v.is_null());
            if let (Some(name), Some(value)) = (name, value) {
                items.insert(name.to_string(), value.clone());
            }
        }

        Self { items }
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.items.get(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `Amount`, only when it is a positive number within the push limit.
    pub fn amount(&self) -> Option<BigDecimal> {
        let raw = match self.get("Amount")? {
            JsonValue::Number(n) => n.to_string(),
            JsonValue::String(s) => s.trim().to_string(),
            _ => return None,
        };
        BigDecimal::from_str(&raw)
            .ok()
            .filter(|amount| *amount > BigDecimal::from(0) && *amount <= BigDecimal::from(MAX_AMOUNT))
            .map(|amount| amount.round(2))
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.get("MpesaReceiptNumber").and_then(as_text)
    }

    pub fn transaction_date(&self) -> Option<DateTime<Utc>> {
        self.get("TransactionDate").and_then(parse_provider_timestamp)
    }

    pub fn phone_number(&self) -> Option<String> {
        self.get("PhoneNumber").and_then(as_text)
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.items
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_integer(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
