//! SMS gateway: the remote send/verify calls behind phone verification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CallError;

/// Body of `POST /auth/send-sms`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsRequest {
    pub name: String,
    pub phone_number: String,
    pub resident_number: String,
    pub carrier: String,
}

impl std::fmt::Debug for SendSmsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendSmsRequest")
            .field("name", &self.name)
            .field("phone_number", &self.phone_number)
            .field("resident_number", &"[REDACTED]")
            .field("carrier", &self.carrier)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsResponse {
    pub verification_id: String,
}

#[derive(Debug, Deserialize)]
struct VerifySmsResponse {
    data: bool,
}

/// Remote SMS service.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Dispatch a one-time code to the phone in `request`.
    async fn send_code(&self, request: &SendSmsRequest) -> Result<SendSmsResponse, CallError>;

    /// Check `code` against the last code sent to `phone_number`.
    /// `Ok(false)` is a well-formed mismatch, not a failure.
    async fn verify_code(&self, phone_number: &str, code: &str) -> Result<bool, CallError>;
}

/// JSON-over-HTTPS gateway.
pub struct HttpSmsGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSmsGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Turn a non-2xx response into a `CallError`, preferring the server's message.
async fn status_error(resp: reqwest::Response) -> CallError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(body);
    CallError::status(status, message)
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send_code(&self, request: &SendSmsRequest) -> Result<SendSmsResponse, CallError> {
        let resp = self
            .client
            .post(self.api_url("/auth/send-sms"))
            .json(request)
            .send()
            .await
            .map_err(|e| CallError::transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        debug!(phone = %request.phone_number, "send-sms accepted");
        resp.json::<SendSmsResponse>()
            .await
            .map_err(|e| CallError::transport(format!("Invalid send-sms response: {e}")))
    }

    async fn verify_code(&self, phone_number: &str, code: &str) -> Result<bool, CallError> {
        let resp = self
            .client
            .post(self.api_url("/auth/verify-sms"))
            .query(&[("phoneNumber", phone_number), ("code", code)])
            .send()
            .await
            .map_err(|e| CallError::transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let body = resp
            .json::<VerifySmsResponse>()
            .await
            .map_err(|e| CallError::transport(format!("Invalid verify-sms response: {e}")))?;
        Ok(body.data)
    }
}
