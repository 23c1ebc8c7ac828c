//! STK push initiation: validate, authenticate, push, persist PENDING.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MpesaConfig;
use crate::database::error::DatabaseErrorKind;
use crate::database::repository::{NewPayment, PaymentRecord, PaymentStore, PaymentUpdate};
use crate::error::{AppError, AppErrorKind, AppResult};
use crate::logging::mask_phone_number;
use crate::payments::provider::StkPushProvider;
use crate::payments::types::{
    parse_amount, provider_amount, validate_msisdn, StkPushRequest, StkPushResponse,
    TRANSACTION_TYPE_PAYBILL,
};
use crate::payments::utils::{generate_password, provider_timestamp};

pub const DEFAULT_TRANSACTION_DESC: &str = "Payment";

/// Body of `POST /mpesa/stkpush`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitiationRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub account_ref: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiationResult {
    pub payment_id: Uuid,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    /// Provider acknowledgement, verbatim
    pub provider_response: JsonValue,
}

pub struct PaymentInitiationService {
    provider: Arc<dyn StkPushProvider>,
    store: Arc<dyn PaymentStore>,
    config: Arc<MpesaConfig>,
}

impl PaymentInitiationService {
    pub fn new(
        provider: Arc<dyn StkPushProvider>,
        store: Arc<dyn PaymentStore>,
        config: Arc<MpesaConfig>,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub async fn initiate(&self, request: InitiationRequest) -> AppResult<InitiationResult> {
        let (phone, amount) = validate_request(&request)?;
        let push = self.build_push_request(&phone, &amount, &request)?;

        let access_token = self.provider.get_access_token().await.map_err(|e| {
            error!(
                provider = self.provider.name(),
                error = %e,
                retryable = e.is_retryable(),
                "could not obtain access token"
            );
            AppError::new(AppErrorKind::UpstreamAuth {
                details: e.details(),
            })
        })?;

        info!(
            phone = %mask_phone_number(&phone),
            amount = %amount,
            account_reference = %push.account_reference,
            "sending STK push request"
        );

        let ack = self
            .provider
            .initiate_push(&access_token, &push)
            .await
            .map_err(AppError::from)?;

        let record = self.persist_pending(&phone, amount, &ack).await?;

        info!(
            payment_id = %record.id,
            merchant_request_id = ?record.merchant_request_id,
            checkout_request_id = ?record.checkout_request_id,
            "STK push initiated"
        );

        Ok(InitiationResult {
            payment_id: record.id,
            merchant_request_id: ack.merchant_request_id,
            checkout_request_id: ack.checkout_request_id,
            provider_response: ack.raw,
        })
    }

    fn build_push_request(
        &self,
        phone: &str,
        amount: &BigDecimal,
        request: &InitiationRequest,
    ) -> AppResult<StkPushRequest> {
        let now = Utc::now();
        let timestamp = provider_timestamp(now);
        let password = generate_password(&self.config.shortcode, &self.config.passkey, &timestamp);

        Ok(StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            transaction_type: TRANSACTION_TYPE_PAYBILL.to_string(),
            amount: provider_amount(amount)?,
            party_a: phone.to_string(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone.to_string(),
            callback_url: self.config.callback_url.clone(),
            account_reference: non_blank(&request.account_ref)
                .unwrap_or_else(|| format!("PAYMENT_{}", now.timestamp())),
            transaction_desc: non_blank(&request.desc)
                .unwrap_or_else(|| DEFAULT_TRANSACTION_DESC.to_string()),
        })
    }

    /// A callback can beat us to the row; then the initiation data is merged
    /// onto what the callback stored.
    async fn persist_pending(
        &self,
        phone: &str,
        amount: BigDecimal,
        ack: &StkPushResponse,
    ) -> AppResult<PaymentRecord> {
        let created = self
            .store
            .create(NewPayment {
                merchant_request_id: ack.merchant_request_id.clone(),
                checkout_request_id: ack.checkout_request_id.clone(),
                phone_number: Some(phone.to_string()),
                amount: Some(amount.clone()),
                raw_response: Some(ack.raw.clone()),
            })
            .await;

        match (created, ack.checkout_request_id.as_deref()) {
            (Ok(record), _) => Ok(record),
            (Err(e), Some(checkout_id))
                if matches!(e.kind, DatabaseErrorKind::UniqueViolation { .. }) =>
            {
                warn!(
                    checkout_request_id = %checkout_id,
                    "payment row already exists, merging initiation data"
                );
                self.store
                    .upsert_by_checkout_id(
                        checkout_id,
                        PaymentUpdate {
                            merchant_request_id: ack.merchant_request_id.clone(),
                            phone_number: Some(phone.to_string()),
                            amount: Some(amount),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(AppError::from)
            }
            (Err(e), _) => {
                error!(
                    error = %e,
                    merchant_request_id = ?ack.merchant_request_id,
                    checkout_request_id = ?ack.checkout_request_id,
                    "push accepted but payment record could not be stored"
                );
                Err(e.into())
            }
        }
    }
}

/// Phone and amount checks, run before any network call.
pub fn validate_request(request: &InitiationRequest) -> AppResult<(String, BigDecimal)> {
    let phone = request
        .phone
        .as_deref()
        .ok_or_else(|| AppError::validation("phone", "phone is required"))?;
    let phone = validate_msisdn(phone)?;

    let amount = request
        .amount
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::validation("amount", "amount is required"))?;
    let amount = parse_amount(amount)?;

    Ok((phone, amount))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
