//! Email channel: Microsoft Graph or SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MessageBuilder};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    ChannelConfig, ChannelKind, EmailConfig, MAX_ERROR_BODY, Notification, NotificationChannel,
    check_response, truncate_string,
};
use crate::error::ChannelError;
use crate::settings::{EmailSettings, GraphSettings, SmtpSettings};
use crate::template::{DEFAULT_EMAIL_BODY, DEFAULT_EMAIL_SUBJECT, looks_like_html};

const GRAPH_AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const SMTPS_PORT: u16 = 465;

/// Sends alarm emails through Microsoft Graph when configured, SMTP otherwise.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    settings: EmailSettings,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl EmailChannel {
    /// Creates an email channel.
    #[must_use]
    pub fn new(settings: EmailSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    async fn send_graph(
        &self,
        graph: &GraphSettings,
        email: &EmailConfig,
        subject: &str,
        body: &str,
        html: bool,
    ) -> Result<(), ChannelError> {
        let from = graph.from_address.as_deref().ok_or(ChannelError::MissingSetting {
            kind: ChannelKind::Email,
            setting: "MS365_FROM_ADDRESS",
        })?;
        let token = self.graph_token(graph).await?;

        let recipients = |list: &[String]| -> Vec<serde_json::Value> {
            list.iter()
                .map(|addr| json!({ "emailAddress": { "address": addr } }))
                .collect()
        };
        let payload = json!({
            "message": {
                "subject": subject,
                "body": {
                    "contentType": if html { "HTML" } else { "Text" },
                    "content": body,
                },
                "toRecipients": recipients(&email.to),
                "ccRecipients": recipients(&email.cc),
                "bccRecipients": recipients(&email.bcc),
            },
            "saveToSentItems": false,
        });

        let response = self
            .http
            .post(format!("{GRAPH_API}/users/{from}/sendMail"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(delivery_error)?;
        check_response(ChannelKind::Email, response).await
    }

    async fn graph_token(&self, graph: &GraphSettings) -> Result<String, ChannelError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &graph.client_id)
            .append_pair("client_secret", &graph.client_secret)
            .append_pair("scope", GRAPH_SCOPE)
            .append_pair("grant_type", "client_credentials")
            .finish();
        let response = self
            .http
            .post(format!("{GRAPH_AUTHORITY}/{}/oauth2/v2.0/token", graph.tenant_id))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(delivery_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                kind: ChannelKind::Email,
                status: status.as_u16(),
                body: truncate_string(&body, MAX_ERROR_BODY),
            });
        }
        let token: TokenResponse = response.json().await.map_err(delivery_error)?;
        Ok(token.access_token)
    }

    async fn send_smtp(
        &self,
        smtp: &SmtpSettings,
        email: &EmailConfig,
        subject: &str,
        body: &str,
        html: bool,
    ) -> Result<(), ChannelError> {
        let message = build_message(smtp, email, subject, body, html)?;
        let transport = smtp_transport(smtp)?;
        transport.send(message).await.map_err(delivery_error)?;
        Ok(())
    }
}

fn smtp_transport(smtp: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelError> {
    let builder = if smtp.port == SMTPS_PORT {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host).map_err(delivery_error)?
    } else if smtp.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host).map_err(delivery_error)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
    };
    let mut builder = builder.port(smtp.port);
    if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }
    Ok(builder.build())
}

fn build_message(
    smtp: &SmtpSettings,
    email: &EmailConfig,
    subject: &str,
    body: &str,
    html: bool,
) -> Result<Message, ChannelError> {
    let from_address = smtp
        .from_address
        .as_deref()
        .or(smtp.username.as_deref())
        .ok_or(ChannelError::MissingSetting {
            kind: ChannelKind::Email,
            setting: "SMTP_FROM_ADDRESS",
        })?;
    let from = Mailbox::new(smtp.from_name.clone(), from_address.parse().map_err(invalid_address)?);

    let mut builder: MessageBuilder = Message::builder().from(from).subject(subject);
    for addr in &email.to {
        builder = builder.to(addr.parse().map_err(invalid_address)?);
    }
    for addr in &email.cc {
        builder = builder.cc(addr.parse().map_err(invalid_address)?);
    }
    for addr in &email.bcc {
        builder = builder.bcc(addr.parse().map_err(invalid_address)?);
    }
    let content_type = if html {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };
    builder
        .header(content_type)
        .body(body.to_string())
        .map_err(delivery_error)
}

fn invalid_address(err: impl std::fmt::Display) -> ChannelError {
    ChannelError::InvalidConfig {
        kind: ChannelKind::Email,
        reason: format!("invalid address: {err}"),
    }
}

fn delivery_error(err: impl std::fmt::Display) -> ChannelError {
    ChannelError::Delivery {
        kind: ChannelKind::Email,
        reason: err.to_string(),
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let ChannelConfig::Email(email) = &notification.config else {
            return Err(ChannelError::InvalidConfig {
                kind: ChannelKind::Email,
                reason: format!("received {} configuration", notification.config.kind()),
            });
        };
        let subject = notification.render(email.subject.as_deref(), DEFAULT_EMAIL_SUBJECT);
        let template = email
            .body
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_EMAIL_BODY);
        let body = notification.render(Some(template), DEFAULT_EMAIL_BODY);
        let html = email.html || looks_like_html(template);

        if let Some(graph) = &self.settings.graph {
            debug!(alarm = %notification.alarm_name, "sending email through Microsoft Graph");
            return self.send_graph(graph, email, &subject, &body, html).await;
        }
        if let Some(smtp) = &self.settings.smtp {
            debug!(alarm = %notification.alarm_name, host = %smtp.host, "sending email through SMTP");
            return self.send_smtp(smtp, email, &subject, &body, html).await;
        }
        Err(ChannelError::MissingSetting {
            kind: ChannelKind::Email,
            setting: "SMTP_HOST",
        })
    }
}
