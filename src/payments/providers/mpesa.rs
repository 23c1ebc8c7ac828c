use crate::config::MpesaConfig;
use crate::logging::token_prefix;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::StkPushProvider;
use crate::payments::types::{AuthResponse, StkPushRequest, StkPushResponse};
use crate::payments::utils::{HttpAuth, PaymentHttpClient};
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::{error, info};

/// Safaricom Daraja client for OAuth and STK push.
pub struct MpesaProvider {
    config: Arc<MpesaConfig>,
    http: PaymentHttpClient,
}

impl MpesaProvider {
    pub fn new(config: Arc<MpesaConfig>) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(config.timeout())?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl StkPushProvider for MpesaProvider {
    async fn get_access_token(&self) -> PaymentResult<String> {
        let url = self.config.oauth_url();
        info!(url = %url, "requesting OAuth token from M-Pesa");

        let reply = self
            .http
            .send(
                Method::GET,
                &url,
                HttpAuth::Basic {
                    username: &self.config.consumer_key,
                    password: &self.config.consumer_secret,
                },
                None,
            )
            .await?;

        if !reply.is_success() {
            error!(status = reply.status.as_u16(), body = %reply.body, "failed to get OAuth token");
            return Err(PaymentError::AuthFailure {
                status: Some(reply.status.as_u16()),
                body: reply.body,
            });
        }

        let parsed: AuthResponse = serde_json::from_str(&reply.body).map_err(|e| {
            error!(error = %e, body = %reply.body, "unparseable OAuth token response");
            PaymentError::AuthFailure {
                status: Some(reply.status.as_u16()),
                body: reply.body.clone(),
            }
        })?;

        if parsed.access_token.trim().is_empty() {
            return Err(PaymentError::AuthFailure {
                status: Some(reply.status.as_u16()),
                body: reply.body,
            });
        }

        info!(token = %token_prefix(&parsed.access_token), "received OAuth token");
        Ok(parsed.access_token)
    }

    async fn initiate_push(
        &self,
        access_token: &str,
        request: &StkPushRequest,
    ) -> PaymentResult<StkPushResponse> {
        let url = self.config.stk_push_url();
        let payload = serde_json::to_value(request).map_err(|e| PaymentError::ValidationError {
            message: format!("failed to encode STK push payload: {}", e),
            field: None,
        })?;

        let reply = self
            .http
            .send(Method::POST, &url, HttpAuth::Bearer(access_token), Some(&payload))
            .await?;
        let body = reply.json_or_text();

        if !reply.is_success() {
            error!(status = reply.status.as_u16(), response = %body, "STK push failed");
            return Err(PaymentError::PushFailure {
                status: Some(reply.status.as_u16()),
                body,
            });
        }

        if !body.is_object() {
            error!(response = %body, "STK push returned a malformed body");
            return Err(PaymentError::PushFailure {
                status: Some(reply.status.as_u16()),
                body,
            });
        }

        let response = StkPushResponse::from_raw(body);
        if !response.is_accepted() {
            error!(response = %response.raw, "STK push declined by provider");
            return Err(PaymentError::PushFailure {
                status: Some(reply.status.as_u16()),
                body: response.raw,
            });
        }

        info!(
            merchant_request_id = ?response.merchant_request_id,
            checkout_request_id = ?response.checkout_request_id,
            "STK push accepted"
        );
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "mpesa"
    }
}
