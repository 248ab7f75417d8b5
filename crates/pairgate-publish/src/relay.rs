//! Relay publishing: the session ID, not the creds, goes to the paste endpoint

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pairgate_core::{AuthState, SessionId};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::{extract_path_segment, CredentialPublisher, PublishError, PublishResult, PublishedPointer};

/// Posts `base64({"sessionId": ...})` as form field `content`
pub struct RelayPublisher {
    http: Client,
    endpoint: String,
}

impl RelayPublisher {
    pub fn new(endpoint: impl Into<String>) -> PublishResult<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            endpoint: endpoint.into(),
        })
    }
}

/// Pull the paste URL out of a response body
///
/// Accepts either a bare URL or a JSON object with a `url` field.
fn paste_url(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(Value::String(url)) = map.get("url") {
                return url.clone();
            }
        }
    }
    trimmed.to_string()
}

#[async_trait]
impl CredentialPublisher for RelayPublisher {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn publish(
        &self,
        session_id: &SessionId,
        _auth: &AuthState,
        _creds_file: &str,
    ) -> PublishResult<PublishedPointer> {
        let payload = json!({ "sessionId": session_id }).to_string();
        let encoded = BASE64.encode(payload);

        let response = self
            .http
            .post(&self.endpoint)
            .form(&[("content", encoded.as_str())])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PublishError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let pointer = extract_path_segment(&paste_url(&body))?;
        debug!("Relayed session {} as {}", session_id, pointer);
        Ok(PublishedPointer::new(pointer))
    }
}
