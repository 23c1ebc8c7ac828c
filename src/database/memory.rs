//! In-process payment store used when running without Postgres and in tests.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    AdminUpdate, NewPayment, PaymentRecord, PaymentStore, PaymentUpdate,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// All mutations take the single lock, so read-merge-write is atomic here
/// the same way the Postgres upsert is.
#[derive(Default)]
pub struct InMemoryPaymentStore {
    records: Mutex<HashMap<Uuid, PaymentRecord>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<PaymentRecord, DatabaseError> {
        let mut records = self.records.lock().await;

        if let Some(checkout_id) = payment.checkout_request_id.as_deref() {
            if records
                .values()
                .any(|r| r.checkout_request_id.as_deref() == Some(checkout_id))
            {
                return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                    constraint: Some("payments_checkout_request_id_key".to_string()),
                }));
            }
        }

        let record = PaymentRecord::from_new(&payment, Utc::now());
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .find(|r| r.checkout_request_id.as_deref() == Some(checkout_request_id))
            .cloned())
    }

    async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.merchant_request_id.as_deref() == Some(merchant_request_id))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn upsert_by_checkout_id(
        &self,
        checkout_request_id: &str,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let existing = records
            .values_mut()
            .find(|r| r.checkout_request_id.as_deref() == Some(checkout_request_id));

        let record = match existing {
            Some(record) => {
                record.apply(&update, now);
                record.clone()
            }
            None => {
                let mut record = PaymentRecord::pending(Some(checkout_request_id.to_string()), now);
                record.apply(&update, now);
                records.insert(record.id, record.clone());
                record
            }
        };

        Ok(record)
    }

    async fn merge_by_merchant_id(
        &self,
        merchant_request_id: &str,
        update: PaymentUpdate,
    ) -> Result<PaymentRecord, DatabaseError> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let existing = records
            .values_mut()
            .filter(|r| r.merchant_request_id.as_deref() == Some(merchant_request_id))
            .max_by_key(|r| r.created_at);

        let record = match existing {
            Some(record) => {
                record.apply(&update, now);
                record.clone()
            }
            None => {
                let mut record = PaymentRecord::pending(None, now);
                record.merchant_request_id = Some(merchant_request_id.to_string());
                record.apply(&update, now);
                records.insert(record.id, record.clone());
                record
            }
        };

        Ok(record)
    }

    async fn create_from_update(&self, update: PaymentUpdate) -> Result<PaymentRecord, DatabaseError> {
        let now = Utc::now();
        let mut record = PaymentRecord::pending(None, now);
        record.apply(&update, now);
        self.records.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let mut all: Vec<PaymentRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn update_admin(
        &self,
        id: Uuid,
        update: AdminUpdate,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let mut records = self.records.lock().await;
        Ok(records.get_mut(&id).map(|record| {
            record.apply_admin(&update, Utc::now());
            record.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.records.lock().await.remove(&id).is_some())
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "in-memory"
    }
}
