use crate::payments::error::PaymentResult;
use crate::payments::types::{StkPushRequest, StkPushResponse};
use async_trait::async_trait;

/// Outbound side of the STK push flow. One network attempt per call.
#[async_trait]
pub trait StkPushProvider: Send + Sync {
    /// Client-credentials token for the configured consumer key/secret.
    async fn get_access_token(&self) -> PaymentResult<String>;

    async fn initiate_push(
        &self,
        access_token: &str,
        request: &StkPushRequest,
    ) -> PaymentResult<StkPushResponse>;

    fn name(&self) -> &'static str;
}
