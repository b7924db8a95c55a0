// Outbound notifications. The engine and the web layer share one Telegram
// notifier; credentials can be swapped live from the settings endpoint.

use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("telegram not configured")]
    NotConfigured,
    #[error("telegram status {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Fire-and-forget text delivery to the configured chat channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
    fn channel(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
struct Credentials {
    token: String,
    chat_id: String,
}

pub struct Telegram {
    creds: RwLock<Credentials>,
    http: reqwest::Client,
}

impl Telegram {
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self {
            creds: RwLock::new(Credentials {
                token: token.to_string(),
                chat_id: chat_id.to_string(),
            }),
            http: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        let creds = self.creds.read().expect("credentials lock poisoned");
        !creds.token.is_empty() && !creds.chat_id.is_empty()
    }

    /// Swap credentials atomically; in-flight sends keep the old pair.
    pub fn update(&self, token: &str, chat_id: &str) {
        let mut creds = self.creds.write().expect("credentials lock poisoned");
        creds.token = token.to_string();
        creds.chat_id = chat_id.to_string();
    }
}

#[async_trait]
impl Notifier for Telegram {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let creds = self
            .creds
            .read()
            .expect("credentials lock poisoned")
            .clone();
        if creds.token.is_empty() || creds.chat_id.is_empty() {
            return Err(NotifyError::NotConfigured);
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", creds.token);
        let payload = serde_json::json!({
            "chat_id": creds.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let res = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(SEND_TIMEOUT)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body: String = res
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(())
    }

    fn channel(&self) -> &'static str {
        "telegram"
    }
}
