//! Pastebin upload of the stored `creds.json`

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pairgate_core::{AuthState, SessionId};
use reqwest::Client;
use tracing::debug;

use crate::{extract_path_segment, CredentialPublisher, PublishError, PublishResult, PublishedPointer};

/// Pastebin paste creation endpoint
pub const PASTEBIN_API_URL: &str = "https://pastebin.com/api/api_post.php";

/// Prefix pastebin uses for error bodies (they come back as 200)
const BAD_REQUEST_PREFIX: &str = "Bad API request";

/// Uploads creds as an unlisted, never-expiring paste
pub struct PastebinPublisher {
    http: Client,
    api_url: String,
    api_key: String,
    title: String,
}

impl PastebinPublisher {
    pub fn new(api_key: String, title: String) -> PublishResult<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            api_url: PASTEBIN_API_URL.to_string(),
            api_key,
            title,
        })
    }

    /// Point at a different API endpoint
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl CredentialPublisher for PastebinPublisher {
    fn name(&self) -> &'static str {
        "pastebin"
    }

    async fn publish(
        &self,
        session_id: &SessionId,
        _auth: &AuthState,
        creds_file: &str,
    ) -> PublishResult<PublishedPointer> {
        let form = [
            ("api_dev_key", self.api_key.as_str()),
            ("api_option", "paste"),
            ("api_paste_code", creds_file),
            ("api_paste_name", self.title.as_str()),
            // 1 = unlisted
            ("api_paste_private", "1"),
            ("api_paste_expire_date", "N"),
        ];

        let response = self.http.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PublishError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.starts_with(BAD_REQUEST_PREFIX) {
            return Err(PublishError::Rejected(body));
        }

        let key = extract_path_segment(&body)?;
        debug!("Uploaded creds for {} as paste {}", session_id, key);
        Ok(PublishedPointer::new(BASE64.encode(key)))
    }
}
