//! Webhook channel.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{ChannelConfig, ChannelKind, Notification, NotificationChannel, check_response};
use crate::error::ChannelError;
use crate::template;

/// Sends alarms as HTTP requests.
///
/// Without a body template the request carries the firing's JSON payload.
#[derive(Debug, Clone, Default)]
pub struct WebhookChannel {
    http: reqwest::Client,
}

impl WebhookChannel {
    /// Creates a webhook channel.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Creates a webhook channel using an existing HTTP client.
    #[must_use]
    pub const fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let ChannelConfig::Webhook(hook) = &notification.config else {
            return Err(ChannelError::InvalidConfig {
                kind: ChannelKind::Webhook,
                reason: format!("received {} configuration", notification.config.kind()),
            });
        };
        let method = Method::from_bytes(hook.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            ChannelError::InvalidConfig {
                kind: ChannelKind::Webhook,
                reason: format!("invalid method '{}'", hook.method),
            }
        })?;

        let body = match hook.body.as_deref().filter(|b| !b.trim().is_empty()) {
            Some(template) if hook.content_type.to_ascii_lowercase().contains("json") => {
                template::expand_json(template, &notification.context)
            }
            Some(template) => template::expand(template, &notification.context),
            None => serde_json::to_string(&notification.default_payload())?,
        };

        let mut request = self
            .http
            .request(method, &hook.url)
            .header(CONTENT_TYPE, &hook.content_type);
        for (name, value) in &hook.headers {
            request = request.header(name, template::expand(value, &notification.context));
        }

        debug!(alarm = %notification.alarm_name, url = %hook.url, "sending webhook");
        let response = request.body(body).send().await.map_err(|e| ChannelError::Delivery {
            kind: ChannelKind::Webhook,
            reason: e.to_string(),
        })?;
        check_response(ChannelKind::Webhook, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::WebhookConfig;
    use crate::channels::test_support::{http_stub, local_client, notification};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn hook(url: String, body: Option<&str>) -> ChannelConfig {
        ChannelConfig::Webhook(WebhookConfig {
            url: format!("{url}/hooks/alarm"),
            method: "post".to_string(),
            headers: BTreeMap::from([("X-Alarm".to_string(), "{{alarm_name}}".to_string())]),
            body: body.map(str::to_string),
            content_type: "application/json".to_string(),
        })
    }

    #[tokio::test]
    async fn posts_template_body_and_headers() {
        let (url, server) = http_stub(200).await;
        let channel = WebhookChannel::with_client(local_client());
        channel
            .send(&notification(hook(url, Some(r#"{"text":"{{message}}"}"#))))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hooks/alarm HTTP/1.1"), "{request}");
        assert!(request.to_ascii_lowercase().contains("x-alarm: high temp"), "{request}");
        assert!(request.ends_with(r#"{"text":"ALARM: High Temp triggered"}"#), "{request}");
    }

    #[tokio::test]
    async fn json_body_escapes_quoted_values() {
        let (url, server) = http_stub(200).await;
        let channel = WebhookChannel::with_client(local_client());
        let mut note = notification(hook(url, Some(r#"{"text":"{{alarm_name}} says {{note}}"}"#)));
        let mut context = (*note.context).clone();
        context.insert("note", "\"hot\" \\ dry\nline");
        note.context = Arc::new(context);
        channel.send(&note).await.unwrap();

        let request = server.await.unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let payload: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["text"], "High Temp says \"hot\" \\ dry\nline");
    }

    #[tokio::test]
    async fn plain_text_body_is_not_escaped() {
        let (url, server) = http_stub(200).await;
        let channel = WebhookChannel::with_client(local_client());
        let mut config = hook(url, Some("{{alarm_name}}: \"{{message}}\""));
        if let ChannelConfig::Webhook(h) = &mut config {
            h.content_type = "text/plain".to_string();
        }
        channel.send(&notification(config)).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.ends_with(r#"High Temp: "ALARM: High Temp triggered""#), "{request}");
    }

    #[tokio::test]
    async fn default_body_is_json_payload() {
        let (url, server) = http_stub(200).await;
        let channel = WebhookChannel::with_client(local_client());
        channel.send(&notification(hook(url, None))).await.unwrap();

        let request = server.await.unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let payload: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["alarm"]["name"], "High Temp");
        assert_eq!(payload["station"], "Backyard");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _server) = http_stub(503).await;
        let channel = WebhookChannel::with_client(local_client());
        let err = channel.send(&notification(hook(url, None))).await.unwrap_err();
        match err {
            ChannelError::Rejected { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "stub");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
