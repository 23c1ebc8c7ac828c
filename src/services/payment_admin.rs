//! Operator CRUD over payment records.

use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use crate::database::repository::{AdminUpdate, NewPayment, PaymentRecord, PaymentStore};
use crate::error::AppResult;
use crate::logging::mask_phone_number;
use crate::payments::types::{parse_amount, PaymentStatus};
use crate::services::payment_initiation::{validate_request, InitiationRequest};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub amount: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePaymentRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<JsonValue>,
}

pub struct PaymentAdminService {
    store: Arc<dyn PaymentStore>,
}

impl PaymentAdminService {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> AppResult<Vec<PaymentRecord>> {
        Ok(self.store.list().await?)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<PaymentRecord>> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn create(&self, request: CreatePaymentRequest) -> AppResult<PaymentRecord> {
        let (phone, amount) = validate_request(&InitiationRequest {
            phone: request.phone,
            amount: request.amount,
            ..Default::default()
        })?;

        let record = self
            .store
            .create(NewPayment {
                phone_number: Some(phone),
                amount: Some(amount),
                ..Default::default()
            })
            .await?;

        info!(
            payment_id = %record.id,
            phone = ?record.phone_number.as_deref().map(mask_phone_number),
            "payment created manually"
        );
        Ok(record)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdatePaymentRequest,
    ) -> AppResult<Option<PaymentRecord>> {
        let update = AdminUpdate {
            status: request
                .status
                .as_deref()
                .map(PaymentStatus::from_str)
                .transpose()?,
            amount: request
                .amount
                .as_ref()
                .filter(|v| !v.is_null())
                .map(parse_amount)
                .transpose()?,
        };

        let updated = self.store.update_admin(id, update).await?;
        if let Some(record) = &updated {
            info!(payment_id = %record.id, status = %record.status, "payment updated manually");
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(payment_id = %id, "payment deleted");
        }
        Ok(deleted)
    }
}
