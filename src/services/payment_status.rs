use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::repository::{PaymentRecord, PaymentStore};
use crate::error::AppResult;
use crate::payments::types::PaymentStatus;

/// What a polling client sees for one checkout request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatusView {
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub receipt: Option<String>,
    pub phone: Option<String>,
    pub amount: Option<BigDecimal>,
}

impl From<PaymentRecord> for PaymentStatusView {
    fn from(record: PaymentRecord) -> Self {
        Self {
            status: record.status,
            paid_at: record.paid_at,
            receipt: record.mpesa_receipt_number,
            phone: record.phone_number,
            amount: record.amount,
        }
    }
}

pub struct StatusQueryService {
    store: Arc<dyn PaymentStore>,
}

impl StatusQueryService {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    pub async fn get_status(&self, checkout_request_id: &str) -> AppResult<Option<PaymentStatusView>> {
        let record = self.store.find_by_checkout_id(checkout_request_id).await?;
        Ok(record.map(PaymentStatusView::from))
    }
}
