//! Payment store seam and the merge policy shared by its implementations.

use crate::database::error::DatabaseError;
use crate::payments::types::PaymentStatus;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// A row of the `payments` table.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub phone_number: Option<String>,
    pub amount: Option<BigDecimal>,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub result_code: Option<i32>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub raw_response: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a freshly created record.
#[derive(Debug, Clone, Default)]
pub struct NewPayment {
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub phone_number: Option<String>,
    pub amount: Option<BigDecimal>,
    pub raw_response: Option<JsonValue>,
}

/// Partial update merged onto an existing record. `None` never erases a
/// stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentUpdate {
    pub merchant_request_id: Option<String>,
    pub phone_number: Option<String>,
    pub amount: Option<BigDecimal>,
    pub status: Option<PaymentStatus>,
    pub result_code: Option<i32>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub raw_response: Option<JsonValue>,
}

/// Operator edit from the admin endpoints. Applied as-is, no merge rules.
#[derive(Debug, Clone, Default)]
pub struct AdminUpdate {
    pub status: Option<PaymentStatus>,
    pub amount: Option<BigDecimal>,
}

impl PaymentRecord {
    /// A blank PENDING record, used as the base for inserts.
    pub fn pending(checkout_request_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            merchant_request_id: None,
            checkout_request_id,
            phone_number: None,
            amount: None,
            status: PaymentStatus::Pending,
            result_code: None,
            result_desc: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            failure_reason: None,
            paid_at: None,
            raw_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_new(payment: &NewPayment, now: DateTime<Utc>) -> Self {
        Self {
            merchant_request_id: payment.merchant_request_id.clone(),
            phone_number: payment.phone_number.clone(),
            amount: payment.amount.clone(),
            raw_response: payment.raw_response.clone(),
            ..Self::pending(payment.checkout_request_id.clone(), now)
        }
    }

    /// Merge `update` onto this record.
    ///
    /// While pending, incoming values win. Once terminal the record is
    /// settled: its status never changes and later callbacks only fill
    /// fields that are still empty. A failed record never gains a receipt
    /// and a completed one never gains a failure reason. `paid_at` is set
    /// once.
    pub fn apply(&mut self, update: &PaymentUpdate, now: DateTime<Utc>) {
        let was_terminal = self.status.is_terminal();
        if !was_terminal {
            if let Some(next) = update.status {
                self.status = next;
            }
        }

        merge_field(was_terminal, &mut self.merchant_request_id, &update.merchant_request_id);
        merge_field(was_terminal, &mut self.phone_number, &update.phone_number);
        merge_field(was_terminal, &mut self.amount, &update.amount);
        merge_field(was_terminal, &mut self.transaction_date, &update.transaction_date);
        merge_field(was_terminal, &mut self.result_code, &update.result_code);
        merge_field(was_terminal, &mut self.result_desc, &update.result_desc);

        if self.status != PaymentStatus::Failed {
            merge_field(
                was_terminal,
                &mut self.mpesa_receipt_number,
                &update.mpesa_receipt_number,
            );
        }
        if self.status != PaymentStatus::Completed {
            merge_field(was_terminal, &mut self.failure_reason, &update.failure_reason);
        }
        if self.status == PaymentStatus::Completed {
            fill_missing(&mut self.paid_at, &update.paid_at);
        }

        coalesce(&mut self.raw_response, &update.raw_response);
        self.updated_at = now;
    }

    /// Operator edit. The status invariants still hold: a completed record
    /// carries `paid_at` and no failure reason, a failed one carries
    /// neither receipt nor `paid_at`.
    pub fn apply_admin(&mut self, update: &AdminUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.status {
            self.status = status;
            match status {
                PaymentStatus::Completed => {
                    self.failure_reason = None;
                    self.paid_at.get_or_insert(now);
                }
                PaymentStatus::Failed => {
                    self.mpesa_receipt_number = None;
                    self.paid_at = None;
                }
                PaymentStatus::Pending => {}
            }
        }
        if let Some(amount) = &update.amount {
            self.amount = Some(amount.clone());
        }
        self.updated_at = now;
    }
}

fn merge_field<T: Clone>(settled: bool, current: &mut Option<T>, incoming: &Option<T>) {
    if settled {
        fill_missing(current, incoming);
    } else {
        coalesce(current, incoming);
    }
}

/// Incoming value wins when present.
fn coalesce<T: Clone>(current: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *current = Some(value.clone());
    }
}

/// Existing value wins when present.
fn fill_missing<T: Clone>(current: &mut Option<T>, incoming: &Option<T>) {
    if current.is_none() {
        *current = incoming.clone();
    }
}

/// Persistence for payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create(&self, payment: NewPayment) -> Result<PaymentRecord, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Most recent record carrying this merchant request id.
    async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Insert a record for `checkout_request_id` or merge `update` onto the
    /// existing one, atomically.
    async fn upsert_by_checkout_id(
        &self,
        checkout_request_id: &str,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError>;

    /// Merge `update` onto the most recent record carrying this merchant
    /// request id, or insert a new record with it. Lookup and write are one
    /// atomic step.
    async fn merge_by_merchant_id(
        &self,
        merchant_request_id: &str,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError>;

    /// Insert a record built from `update` alone, for callbacks carrying
    /// neither correlation id.
    async fn create_from_update(&self, update: PaymentUpdate)
        -> Result<PaymentRecord, DatabaseError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<PaymentRecord>, DatabaseError>;

    async fn update_admin(
        &self,
        id: Uuid,
        update: AdminUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn ping(&self) -> Result<(), DatabaseError>;

    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed_update() -> PaymentUpdate {
        PaymentUpdate {
            status: Some(PaymentStatus::Completed),
            result_code: Some(0),
            result_desc: Some("The service request is processed successfully.".to_string()),
            mpesa_receipt_number: Some("R1".to_string()),
            amount: Some(BigDecimal::from(100)),
            paid_at: Some(Utc::now()),
            raw_response: Some(json!({"Body": {"stkCallback": {"ResultCode": 0}}})),
            ..Default::default()
        }
    }

    fn failed_update(reason: &str) -> PaymentUpdate {
        PaymentUpdate {
            status: Some(PaymentStatus::Failed),
            result_code: Some(1032),
            result_desc: Some(reason.to_string()),
            failure_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn without_timestamps(record: &PaymentRecord) -> PaymentRecord {
        let mut copy = record.clone();
        copy.updated_at = copy.created_at;
        copy
    }

    #[test]
    fn pending_record_completes() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(Some("ws_1".to_string()), now);
        record.amount = Some(BigDecimal::from(50));

        record.apply(&completed_update(), now);

        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.mpesa_receipt_number.as_deref(), Some("R1"));
        assert_eq!(record.amount, Some(BigDecimal::from(100)));
        assert!(record.paid_at.is_some());
        assert!(record.failure_reason.is_none());
    }

    #[test]
    fn applying_twice_matches_applying_once() {
        let now = Utc::now();
        let update = completed_update();

        let mut once = PaymentRecord::pending(Some("ws_1".to_string()), now);
        once.apply(&update, now);
        let mut twice = once.clone();
        twice.apply(&update, now);

        assert_eq!(without_timestamps(&once), without_timestamps(&twice));
    }

    #[test]
    fn partial_update_does_not_erase_receipt() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(Some("ws_1".to_string()), now);
        record.apply(&completed_update(), now);

        record.apply(
            &PaymentUpdate {
                status: Some(PaymentStatus::Completed),
                ..Default::default()
            },
            now,
        );

        assert_eq!(record.mpesa_receipt_number.as_deref(), Some("R1"));
        assert_eq!(record.amount, Some(BigDecimal::from(100)));
    }

    #[test]
    fn terminal_status_is_sticky() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(Some("ws_1".to_string()), now);
        record.apply(&completed_update(), now);
        let paid_at = record.paid_at;

        record.apply(&failed_update("Request cancelled by user"), now);

        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.result_code, Some(0));
        assert!(record.failure_reason.is_none());
        assert_eq!(record.paid_at, paid_at);
    }

    #[test]
    fn failed_record_never_gains_receipt() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(Some("ws_1".to_string()), now);
        record.apply(&failed_update("Request cancelled by user"), now);
        record.apply(&completed_update(), now);

        assert_eq!(record.status, PaymentStatus::Failed);
        assert_eq!(
            record.failure_reason.as_deref(),
            Some("Request cancelled by user")
        );
        assert!(record.mpesa_receipt_number.is_none());
        assert!(record.paid_at.is_none());
    }

    #[test]
    fn missing_status_keeps_record_pending() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(Some("ws_1".to_string()), now);
        record.apply(
            &PaymentUpdate {
                phone_number: Some("254712345678".to_string()),
                raw_response: Some(json!({"partial": true})),
                ..Default::default()
            },
            now,
        );

        assert_eq!(record.status, PaymentStatus::Pending);
        assert_eq!(record.phone_number.as_deref(), Some("254712345678"));
        assert_eq!(record.raw_response, Some(json!({"partial": true})));
    }

    #[test]
    fn admin_update_overrides_status_and_amount() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(None, now);
        record.apply(&completed_update(), now);

        record.apply_admin(
            &AdminUpdate {
                status: Some(PaymentStatus::Failed),
                amount: Some(BigDecimal::from(5)),
            },
            now,
        );

        assert_eq!(record.status, PaymentStatus::Failed);
        assert_eq!(record.amount, Some(BigDecimal::from(5)));
        assert!(record.mpesa_receipt_number.is_none());
        assert!(record.paid_at.is_none());
    }

    #[test]
    fn admin_completion_stamps_paid_at() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(None, now);
        record.apply(&failed_update("Request cancelled by user"), now);

        record.apply_admin(
            &AdminUpdate {
                status: Some(PaymentStatus::Completed),
                amount: None,
            },
            now,
        );

        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.paid_at, Some(now));
        assert!(record.failure_reason.is_none());
    }

    #[test]
    fn settled_record_ignores_conflicting_callback() {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(Some("ws_1".to_string()), now);
        record.apply(&completed_update(), now);
        let settled = record.clone();

        record.apply(
            &PaymentUpdate {
                status: Some(PaymentStatus::Completed),
                result_code: Some(0),
                mpesa_receipt_number: Some("R2".to_string()),
                amount: Some(BigDecimal::from(5)),
                phone_number: Some("254700000001".to_string()),
                transaction_date: Some(now),
                paid_at: Some(now + chrono::Duration::seconds(60)),
                ..Default::default()
            },
            now,
        );

        assert_eq!(record.mpesa_receipt_number.as_deref(), Some("R1"));
        assert_eq!(record.amount, Some(BigDecimal::from(100)));
        assert_eq!(record.paid_at, settled.paid_at);
        // fields the first callback left empty may still be filled
        assert_eq!(record.phone_number.as_deref(), Some("254700000001"));
    }
}
