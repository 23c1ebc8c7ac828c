use crate::payments::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tracing::debug;

/// Daraja timestamps are East Africa Time (UTC+3).
const PROVIDER_UTC_OFFSET_SECS: i32 = 3 * 3600;
const PROVIDER_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub enum HttpAuth<'a> {
    Basic { username: &'a str, password: &'a str },
    Bearer(&'a str),
}

/// Raw reply from the provider; status and body are kept for diagnostics.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub status: StatusCode,
    pub body: String,
}

impl ProviderReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as JSON, or the text wrapped in a JSON string when it is not JSON.
    pub fn json_or_text(&self) -> JsonValue {
        serde_json::from_str(&self.body).unwrap_or_else(|_| JsonValue::String(self.body.clone()))
    }
}

/// Thin single-attempt wrapper over `reqwest`. Retrying is the caller's call.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: Option<&JsonValue>,
    ) -> PaymentResult<ProviderReply> {
        let started = Instant::now();
        let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

        request = match auth {
            HttpAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            HttpAuth::Bearer(token) => request.bearer_auth(token),
        };
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to read provider response (status {}): {}", status, e),
            })?;

        debug!(
            method = %method,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "provider call completed"
        );

        Ok(ProviderReply { status, body })
    }
}

/// `YYYYMMDDHHmmss` in provider time.
pub fn provider_timestamp(now: DateTime<Utc>) -> String {
    now.with_timezone(&provider_offset())
        .format(PROVIDER_TIMESTAMP_FORMAT)
        .to_string()
}

/// STK password: base64(shortcode + passkey + timestamp).
pub fn generate_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Parse a provider `YYYYMMDDHHmmss` value. Accepts the JSON number form the
/// callback metadata uses as well as strings; anything else yields `None`.
pub fn parse_provider_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    let raw = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        _ => return None,
    };
    let naive = NaiveDateTime::parse_from_str(&raw, PROVIDER_TIMESTAMP_FORMAT).ok()?;
    provider_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn provider_offset() -> FixedOffset {
    FixedOffset::east_opt(PROVIDER_UTC_OFFSET_SECS).expect("UTC+3 is within offset bounds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn password_is_base64_of_concatenation() {
        let password = generate_password("174379", "passkey", "20250527104143");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20250527104143");
    }

    #[test]
    fn timestamp_is_rendered_in_provider_time() {
        let now = Utc.with_ymd_and_hms(2025, 5, 27, 7, 41, 43).unwrap();
        assert_eq!(provider_timestamp(now), "20250527104143");
    }

    #[test]
    fn provider_timestamp_parses_number_and_string() {
        let expected = Utc.with_ymd_and_hms(2019, 12, 19, 7, 21, 15).unwrap();
        assert_eq!(parse_provider_timestamp(&json!(20191219102115_u64)), Some(expected));
        assert_eq!(parse_provider_timestamp(&json!("20191219102115")), Some(expected));
    }

    #[test]
    fn malformed_provider_timestamp_is_none() {
        assert_eq!(parse_provider_timestamp(&json!("2019-12-19")), None);
        assert_eq!(parse_provider_timestamp(&json!("20191319102115")), None);
        assert_eq!(parse_provider_timestamp(&json!(null)), None);
        assert_eq!(parse_provider_timestamp(&json!(true)), None);
    }

    #[test]
    fn non_json_reply_is_wrapped_as_text() {
        let reply = ProviderReply {
            status: StatusCode::BAD_GATEWAY,
            body: "<html>upstream down</html>".to_string(),
        };
        assert!(!reply.is_success());
        assert_eq!(reply.json_or_text(), json!("<html>upstream down</html>"));
    }

    #[tokio::test]
    async fn truncated_reply_body_is_a_network_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 100\r\n\r\n{\"error")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let client = PaymentHttpClient::new(Duration::from_secs(5)).unwrap();
        let result = client
            .send(
                Method::GET,
                &format!("http://{}/oauth", addr),
                HttpAuth::Bearer("token"),
                None,
            )
            .await;

        match result {
            Err(PaymentError::NetworkError { message }) => assert!(message.contains("400")),
            other => panic!("expected network error, got {:?}", other),
        }
    }
}
