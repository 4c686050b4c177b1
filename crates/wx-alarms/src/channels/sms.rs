//! SMS channel: Twilio or a generic HTTP gateway.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use tracing::warn;

use super::{ChannelConfig, ChannelKind, Notification, NotificationChannel, check_response};
use crate::error::ChannelError;
use crate::settings::{GatewaySettings, SmsSettings, TwilioSettings};
use crate::template::DEFAULT_SMS_TEMPLATE;

/// Longest message sent, in characters.
pub const MAX_SMS_LEN: usize = 1600;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

/// Sends alarms as text messages, one request per recipient.
#[derive(Debug, Clone)]
pub struct SmsChannel {
    settings: SmsSettings,
    http: reqwest::Client,
}

impl SmsChannel {
    /// Creates an SMS channel.
    #[must_use]
    pub fn new(settings: SmsSettings) -> Self {
        Self::with_client(settings, reqwest::Client::new())
    }

    /// Creates an SMS channel using an existing HTTP client.
    #[must_use]
    pub const fn with_client(settings: SmsSettings, http: reqwest::Client) -> Self {
        Self { settings, http }
    }

    async fn send_one(&self, to: &str, text: &str) -> Result<(), ChannelError> {
        if let Some(twilio) = &self.settings.twilio {
            return self.send_twilio(twilio, to, text).await;
        }
        if let Some(gateway) = &self.settings.gateway {
            return self.send_gateway(gateway, to, text).await;
        }
        Err(ChannelError::MissingSetting {
            kind: ChannelKind::Sms,
            setting: "TWILIO_ACCOUNT_SID",
        })
    }

    async fn send_twilio(&self, twilio: &TwilioSettings, to: &str, text: &str) -> Result<(), ChannelError> {
        let response = self
            .http
            .post(format!("{TWILIO_API}/Accounts/{}/Messages.json", twilio.account_sid))
            .basic_auth(&twilio.account_sid, Some(&twilio.auth_token))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(twilio_form(&twilio.from_number, to, text))
            .send()
            .await
            .map_err(transport_error)?;
        check_response(ChannelKind::Sms, response).await
    }

    async fn send_gateway(&self, gateway: &GatewaySettings, to: &str, text: &str) -> Result<(), ChannelError> {
        let mut request = self
            .http
            .post(&gateway.url)
            .json(&json!({ "to": to, "message": text }));
        if let Some(key) = &gateway.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(transport_error)?;
        check_response(ChannelKind::Sms, response).await
    }
}

fn twilio_form(from: &str, to: &str, body: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("From", from)
        .append_pair("To", to)
        .append_pair("Body", body)
        .finish()
}

fn transport_error(err: reqwest::Error) -> ChannelError {
    ChannelError::Delivery {
        kind: ChannelKind::Sms,
        reason: err.to_string(),
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_SMS_LEN {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_SMS_LEN - 3).collect();
    clipped.push_str("...");
    clipped
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let ChannelConfig::Sms(sms) = &notification.config else {
            return Err(ChannelError::InvalidConfig {
                kind: ChannelKind::Sms,
                reason: format!("received {} configuration", notification.config.kind()),
            });
        };
        let text = clip(&notification.render(sms.message.as_deref(), DEFAULT_SMS_TEMPLATE));
        let recipients: Vec<&str> = sms
            .to
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();

        let mut failures = Vec::new();
        for to in &recipients {
            if let Err(e) = self.send_one(to, &text).await {
                warn!(alarm = %notification.alarm_name, recipient = %to, error = %e, "sms delivery failed");
                failures.push(e);
            }
        }

        match failures.len() {
            0 => Ok(()),
            n if n == recipients.len() && n == 1 => Err(failures.remove(0)),
            n => Err(ChannelError::Delivery {
                kind: ChannelKind::Sms,
                reason: format!("{n} of {} recipients failed: {}", recipients.len(), failures[0]),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SmsConfig;
    use crate::channels::test_support::{http_stub, local_client, notification};

    fn sms(to: &[&str]) -> ChannelConfig {
        ChannelConfig::Sms(SmsConfig {
            to: to.iter().map(|s| (*s).to_string()).collect(),
            message: Some("{{alarm_name}} at {{station}}".to_string()),
        })
    }

    #[test]
    fn twilio_form_encoding() {
        assert_eq!(
            twilio_form("+15550001111", "+15552223333", "Hot & humid"),
            "From=%2B15550001111&To=%2B15552223333&Body=Hot+%26+humid"
        );
    }

    #[test]
    fn long_messages_are_clipped() {
        let long = "é".repeat(MAX_SMS_LEN + 10);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_SMS_LEN);
        assert!(clipped.ends_with("..."));
        assert_eq!(clip("short"), "short");
    }

    #[tokio::test]
    async fn unconfigured_provider_is_reported() {
        let channel = SmsChannel::with_client(SmsSettings::default(), local_client());
        let err = channel.send(&notification(sms(&["+15550001111"]))).await.unwrap_err();
        assert!(matches!(err, ChannelError::MissingSetting { kind: ChannelKind::Sms, .. }));
    }

    #[tokio::test]
    async fn gateway_receives_json() {
        let (url, server) = http_stub(200).await;
        let settings = SmsSettings {
            twilio: None,
            gateway: Some(GatewaySettings {
                url: format!("{url}/sms"),
                api_key: Some("secret".to_string()),
            }),
        };
        let channel = SmsChannel::with_client(settings, local_client());
        channel.send(&notification(sms(&["+15550001111"]))).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /sms HTTP/1.1"), "{request}");
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"), "{request}");
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let payload: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["to"], "+15550001111");
        assert_eq!(payload["message"], "High Temp at Backyard");
    }
}
