//! Webhook chat sink
//!
//! Posts each batch as a single JSON payload to a configured HTTPS endpoint.
//! In development mode the sink logs the payload instead of transmitting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use courier_batch::Processor;
use courier_common::{should_log, CourierError, LogLevel, Notification};

/// Wire payload accepted by the chat endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub channel_key: String,
    pub text: String,
    pub format_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSinkConfig {
    /// Full URL of the webhook endpoint.
    pub endpoint: String,
    /// Bearer token, sent when present.
    pub token: Option<String>,
    /// Destination key forwarded in the payload.
    pub channel_key: String,
    /// Messages below this level are dropped before formatting.
    pub min_level: LogLevel,
    /// Log instead of transmitting.
    pub development: bool,
}

impl Default for WebhookSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            channel_key: "default".to_string(),
            min_level: LogLevel::Trace,
            development: false,
        }
    }
}

pub struct WebhookSink {
    name: String,
    config: WebhookSinkConfig,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, config: WebhookSinkConfig) -> Result<Self, CourierError> {
        if config.endpoint.is_empty() {
            return Err(CourierError::Config(
                "webhook sink requires an endpoint".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            config,
            client: reqwest::Client::new(),
        })
    }

    /// One line per notification, with the level upper-cased and any error
    /// description appended.
    fn format_batch(&self, batch: &[&Notification]) -> String {
        batch
            .iter()
            .map(|message| {
                let mut line = format!(
                    "[{}] {}",
                    message.level.to_string().to_uppercase(),
                    message.text
                );
                if let Some(error) = &message.error {
                    line.push_str(&format!(" ({})", error.summary()));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn filtered<'a>(&self, batch: &'a [Notification]) -> Vec<&'a Notification> {
        batch
            .iter()
            .filter(|message| should_log(message.level.as_log_level(), self.config.min_level))
            .collect()
    }

    async fn send(&self, payload: &WebhookPayload) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.config.endpoint).json(payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CourierError::Sink(format!(
                "webhook returned {} for {}: {}",
                status, self.config.endpoint, body
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Processor for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_batch(&self, batch: &[Notification]) -> anyhow::Result<()> {
        let visible = self.filtered(batch);
        if visible.is_empty() {
            debug!(sink = %self.name, "Batch fully filtered, nothing to send");
            return Ok(());
        }

        let text = self.format_batch(&visible);
        let payload = WebhookPayload {
            channel_key: self.config.channel_key.clone(),
            text,
            format_hint: "plain".to_string(),
        };

        if self.config.development {
            info!(
                sink = %self.name,
                payload = %serde_json::to_string(&payload)?,
                "Development mode, skipping transmit"
            );
            return Ok(());
        }

        self.send(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::{ErrorInfo, NotifyLevel};

    fn sink(min_level: LogLevel) -> WebhookSink {
        WebhookSink::new(
            "webhook",
            WebhookSinkConfig {
                endpoint: "https://chat.example/hook".to_string(),
                min_level,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_requires_endpoint() {
        let result = WebhookSink::new("webhook", WebhookSinkConfig::default());
        assert!(matches!(result, Err(CourierError::Config(_))));
    }

    #[test]
    fn test_format_batch_appends_error_summary() {
        let batch = vec![
            Notification::new("default", "m1", NotifyLevel::Info),
            Notification::new("default", "m2", NotifyLevel::Error)
                .with_error(ErrorInfo::detail("TimeoutError", "timed out")),
        ];
        let formatted = sink(LogLevel::Trace).format_batch(&batch.iter().collect::<Vec<_>>());
        assert_eq!(
            formatted,
            "[INFO] m1\n[ERROR] m2 (TimeoutError: timed out)"
        );
    }

    #[test]
    fn test_filter_by_min_level() {
        let batch = vec![
            Notification::new("default", "quiet", NotifyLevel::Info),
            Notification::new("default", "loud", NotifyLevel::Error),
        ];
        let visible = sink(LogLevel::Warn).filtered(&batch);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].text, "loud");
    }
}
