//! Applies STK callbacks to payment records.
//!
//! Reconciliation never fails: every path ends in a [`ReconciliationOutcome`]
//! that the HTTP layer turns into the provider's `{ResultCode, ResultDesc}`
//! acknowledgement.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::repository::{PaymentRecord, PaymentStore, PaymentUpdate};
use crate::logging::mask_phone_number;
use crate::payments::callback::StkCallback;
use crate::payments::types::PaymentStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Body missing, not JSON, or without a usable `Body.stkCallback`
    InvalidPayload(String),
    /// The record could not be read or written
    StorageError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    Applied {
        payment_id: Uuid,
        checkout_request_id: Option<String>,
        status: PaymentStatus,
    },
    Rejected(RejectionReason),
}

impl ReconciliationOutcome {
    pub fn result_code(&self) -> i32 {
        match self {
            ReconciliationOutcome::Applied { .. } => 0,
            ReconciliationOutcome::Rejected(_) => 1,
        }
    }

    pub fn result_desc(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Applied { .. } => "Accepted",
            ReconciliationOutcome::Rejected(RejectionReason::InvalidPayload(_)) => {
                "Invalid callback structure"
            }
            ReconciliationOutcome::Rejected(RejectionReason::StorageError(_)) => {
                "Callback received but could not be processed"
            }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ReconciliationOutcome::Applied { .. })
    }
}

pub struct CallbackReconciler {
    store: Arc<dyn PaymentStore>,
}

impl CallbackReconciler {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Entry point for the raw request body.
    pub async fn reconcile_bytes(&self, body: &[u8]) -> ReconciliationOutcome {
        match serde_json::from_slice::<JsonValue>(body) {
            Ok(payload) => self.reconcile(&payload).await,
            Err(e) => {
                warn!(
                    error = %e,
                    body = %String::from_utf8_lossy(body),
                    "callback body is not valid JSON"
                );
                ReconciliationOutcome::Rejected(RejectionReason::InvalidPayload(e.to_string()))
            }
        }
    }

    pub async fn reconcile(&self, payload: &JsonValue) -> ReconciliationOutcome {
        info!(payload = %payload, "M-Pesa callback received");

        let callback = match StkCallback::decode(payload) {
            Ok(callback) => callback,
            Err(e) => {
                warn!(error = %e, payload = %payload, "invalid M-Pesa callback structure");
                return ReconciliationOutcome::Rejected(RejectionReason::InvalidPayload(
                    e.to_string(),
                ));
            }
        };

        let update = build_update(&callback, payload);

        match self.apply(&callback, update).await {
            Ok(record) => {
                info!(
                    payment_id = %record.id,
                    checkout_request_id = ?record.checkout_request_id,
                    merchant_request_id = ?record.merchant_request_id,
                    result_code = ?callback.result_code,
                    status = %record.status,
                    receipt = ?record.mpesa_receipt_number,
                    phone = ?record.phone_number.as_deref().map(mask_phone_number),
                    "callback reconciled"
                );
                ReconciliationOutcome::Applied {
                    payment_id: record.id,
                    checkout_request_id: record.checkout_request_id,
                    status: record.status,
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    checkout_request_id = ?callback.checkout_request_id,
                    merchant_request_id = ?callback.merchant_request_id,
                    payload = %payload,
                    "failed to store callback"
                );
                ReconciliationOutcome::Rejected(RejectionReason::StorageError(e.to_string()))
            }
        }
    }

    /// Checkout id first, then merchant id, else a new record. Each branch
    /// is a single atomic store call.
    async fn apply(
        &self,
        callback: &StkCallback,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError> {
        if let Some(checkout_id) = callback.checkout_request_id.as_deref() {
            return self.store.upsert_by_checkout_id(checkout_id, update).await;
        }

        if let Some(merchant_id) = callback.merchant_request_id.as_deref() {
            return self.store.merge_by_merchant_id(merchant_id, update).await;
        }

        warn!("callback carries no correlation id, recording it as new");
        self.store.create_from_update(update).await
    }
}

/// Map a decoded callback onto the store's merge input.
pub fn build_update(callback: &StkCallback, payload: &JsonValue) -> PaymentUpdate {
    let status = callback.result_code.map(PaymentStatus::from_result_code);
    let metadata = &callback.metadata;

    PaymentUpdate {
        merchant_request_id: callback.merchant_request_id.clone(),
        phone_number: metadata.phone_number(),
        amount: metadata.amount(),
        status,
        result_code: callback.result_code.and_then(|c| i32::try_from(c).ok()),
        result_desc: callback.result_desc.clone(),
        mpesa_receipt_number: metadata.receipt_number(),
        transaction_date: metadata.transaction_date(),
        failure_reason: match status {
            Some(PaymentStatus::Failed) => callback.result_desc.clone(),
            _ => None,
        },
        paid_at: match status {
            Some(PaymentStatus::Completed) => Some(Utc::now()),
            _ => None,
        },
        raw_response: Some(payload.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentStore;
    use crate::database::repository::NewPayment;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn reconciler() -> (CallbackReconciler, Arc<InMemoryPaymentStore>) {
        let store = Arc::new(InMemoryPaymentStore::new());
        (CallbackReconciler::new(store.clone()), store)
    }

    fn envelope(callback: JsonValue) -> JsonValue {
        json!({ "Body": { "stkCallback": callback } })
    }

    async fn pending(store: &InMemoryPaymentStore, checkout_id: &str) -> PaymentRecord {
        store
            .create(NewPayment {
                merchant_request_id: Some(format!("mr_{}", checkout_id)),
                checkout_request_id: Some(checkout_id.to_string()),
                phone_number: Some("254712345678".to_string()),
                amount: Some(BigDecimal::from(50)),
                raw_response: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn success_callback_completes_record() {
        let (reconciler, store) = reconciler();
        pending(&store, "ws_1").await;

        let outcome = reconciler
            .reconcile(&envelope(json!({
                "ResultCode": 0,
                "CheckoutRequestID": "ws_1",
                "CallbackMetadata": {"Item": [
                    {"Name": "MpesaReceiptNumber", "Value": "ABC123"},
                    {"Name": "Amount", "Value": 100}
                ]}
            })))
            .await;

        assert_eq!(outcome.result_code(), 0);
        let record = store.find_by_checkout_id("ws_1").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.mpesa_receipt_number.as_deref(), Some("ABC123"));
        assert_eq!(record.amount, Some(BigDecimal::from(100)));
        assert!(record.paid_at.is_some());
    }

    #[tokio::test]
    async fn failure_callback_records_reason() {
        let (reconciler, store) = reconciler();
        pending(&store, "ws_1").await;

        reconciler
            .reconcile(&envelope(json!({
                "ResultCode": 1,
                "ResultDesc": "Request cancelled by user",
                "CheckoutRequestID": "ws_1"
            })))
            .await;

        let record = store.find_by_checkout_id("ws_1").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Failed);
        assert_eq!(
            record.failure_reason.as_deref(),
            Some("Request cancelled by user")
        );
        assert!(record.paid_at.is_none());
        assert_eq!(record.amount, Some(BigDecimal::from(50)));
    }

    #[tokio::test]
    async fn merchant_id_fallback_finds_record() {
        let (reconciler, store) = reconciler();
        let record = store
            .create(NewPayment {
                merchant_request_id: Some("mr_9".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = reconciler
            .reconcile(&envelope(json!({
                "MerchantRequestID": "mr_9",
                "ResultCode": 2001,
                "ResultDesc": "The initiator information is invalid."
            })))
            .await;

        assert_eq!(
            outcome,
            ReconciliationOutcome::Applied {
                payment_id: record.id,
                checkout_request_id: None,
                status: PaymentStatus::Failed,
            }
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn conflicting_second_callback_leaves_settled_record() {
        let (reconciler, store) = reconciler();
        pending(&store, "ws_1").await;
        let callback = |receipt: &str, amount: i64| {
            envelope(json!({
                "ResultCode": 0,
                "CheckoutRequestID": "ws_1",
                "CallbackMetadata": {"Item": [
                    {"Name": "MpesaReceiptNumber", "Value": receipt},
                    {"Name": "Amount", "Value": amount},
                    {"Name": "PhoneNumber", "Value": 254799999999u64}
                ]}
            }))
        };

        reconciler.reconcile(&callback("R1", 100)).await;
        let settled = store.find_by_checkout_id("ws_1").await.unwrap().unwrap();

        let outcome = reconciler.reconcile(&callback("R2", 5)).await;
        assert!(outcome.is_applied());

        let record = store.find_by_checkout_id("ws_1").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.mpesa_receipt_number.as_deref(), Some("R1"));
        assert_eq!(record.amount, Some(BigDecimal::from(100)));
        assert_eq!(record.phone_number, settled.phone_number);
        assert_eq!(record.paid_at, settled.paid_at);
    }

    #[tokio::test]
    async fn concurrent_merchant_only_callbacks_share_one_record() {
        let (reconciler, store) = reconciler();
        let reconciler = Arc::new(reconciler);
        let payload = envelope(json!({
            "MerchantRequestID": "mr_7",
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            let payload = payload.clone();
            handles.push(tokio::spawn(async move { reconciler.reconcile(&payload).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_applied());
        }

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unmatched_callback_creates_record() {
        let (reconciler, store) = reconciler();

        let outcome = reconciler
            .reconcile(&envelope(json!({"MerchantRequestID": "mr_x", "ResultCode": 0})))
            .await;

        assert!(outcome.is_applied());
        let record = store.find_by_merchant_request_id("mr_x").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert!(record.raw_response.is_some());
    }

    #[tokio::test]
    async fn callback_without_ids_is_recorded_once() {
        let (reconciler, store) = reconciler();

        let outcome = reconciler
            .reconcile(&envelope(json!({"ResultCode": 0, "ResultDesc": "ok"})))
            .await;

        assert!(outcome.is_applied());
        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Completed);
        assert!(records[0].merchant_request_id.is_none());
    }

    #[tokio::test]
    async fn invalid_payloads_touch_nothing() {
        let (reconciler, store) = reconciler();

        let bodies: [&[u8]; 4] = [b"", b"not json", b"{}", br#"{"Body": {"stkCallback": {}}}"#];
        for body in bodies {
            let outcome = reconciler.reconcile_bytes(body).await;
            assert!(matches!(
                outcome,
                ReconciliationOutcome::Rejected(RejectionReason::InvalidPayload(_))
            ));
            assert_eq!(outcome.result_code(), 1);
        }
        assert!(store.is_empty().await);
    }

    #[test]
    fn build_update_leaves_metadata_fields_empty_without_metadata() {
        let payload = envelope(json!({"CheckoutRequestID": "ws_1", "ResultCode": 0}));
        let callback = StkCallback::decode(&payload).unwrap();
        let update = build_update(&callback, &payload);

        assert_eq!(update.status, Some(PaymentStatus::Completed));
        assert!(update.mpesa_receipt_number.is_none());
        assert!(update.amount.is_none());
        assert!(update.paid_at.is_some());
        assert_eq!(update.raw_response, Some(payload));
    }
}
