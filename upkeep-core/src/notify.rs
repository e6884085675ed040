//! Run-report delivery. Delivery failures are logged and swallowed by
//! callers: a lost notification must never change the run's exit code.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers the rendered report, attaching the image when one is
    /// given and the transport supports it.
    async fn deliver(&self, text: &str, image: Option<&Path>) -> Result<(), NotifyError>;
}

/// Telegram bot delivery. Sends the screenshot as a photo with the
/// report as caption; overlong reports fall back to a separate text
/// message after the photo.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    caption_limit: usize,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        caption_limit: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            caption_limit,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    async fn send_photo(&self, image: &Path, caption: &str) -> Result<(), NotifyError> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot.png".to_string());
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", Part::bytes(bytes).file_name(file_name));
        let response = self
            .client
            .post(self.endpoint("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "sendPhoto returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "sendMessage returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn deliver(&self, text: &str, image: Option<&Path>) -> Result<(), NotifyError> {
        match image {
            Some(path) if path.exists() => {
                let (caption, overflow) = split_caption(text, self.caption_limit);
                self.send_photo(path, caption).await?;
                if let Some(rest) = overflow {
                    self.send_message(rest).await?;
                }
            }
            _ => {
                self.send_message(text).await?;
            }
        }
        info!("report delivered");
        Ok(())
    }
}

/// Splits `text` at the last newline that fits within `limit`
/// characters; the remainder is delivered as a follow-up message.
fn split_caption(text: &str, limit: usize) -> (&str, Option<&str>) {
    if text.chars().count() <= limit {
        return (text, None);
    }
    let byte_limit = text
        .char_indices()
        .nth(limit)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let cut = text[..byte_limit].rfind('\n').unwrap_or(byte_limit);
    let (head, tail) = text.split_at(cut);
    (head, Some(tail.trim_start_matches('\n')))
}

/// Used when delivery is disabled; logs the report at info level so a
/// local run still shows the result.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn deliver(&self, text: &str, _image: Option<&Path>) -> Result<(), NotifyError> {
        for line in text.lines() {
            info!(report = line);
        }
        warn!("notification delivery disabled, report logged only");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_not_split() {
        assert_eq!(split_caption("short report", 100), ("short report", None));
    }

    #[test]
    fn long_text_splits_on_newline_boundary() {
        let text = "line one\nline two\nline three";
        let (head, tail) = split_caption(text, 12);
        assert_eq!(head, "line one");
        assert_eq!(tail, Some("line two\nline three"));
    }

    #[test]
    fn split_handles_multibyte_text() {
        let text = "签到成功\n".repeat(40);
        let (head, tail) = split_caption(&text, 20);
        assert!(head.chars().count() <= 20);
        assert!(tail.is_some());
    }
}
