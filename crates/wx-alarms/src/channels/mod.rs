//! Notification channels for alarm delivery.
//!
//! This module provides the [`NotificationChannel`] trait, the per-alarm
//! [`ChannelConfig`] variants, and a [`ChannelRegistry`] mapping each
//! [`ChannelKind`] to the implementation that delivers it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChannelError;
use crate::settings::ProviderSettings;
use crate::template::{self, TemplateContext};

mod console;
mod email;
mod eventlog;
mod file;
mod oslog;
mod sms;
mod syslog;
mod webhook;

pub use console::ConsoleChannel;
pub use email::EmailChannel;
pub use eventlog::EventLogChannel;
pub use file::{CsvChannel, JsonChannel};
pub use oslog::OsLogChannel;
pub use sms::{MAX_SMS_LEN, SmsChannel};
pub use syslog::{SyslogChannel, SyslogSeverity, format_rfc3164};
pub use webhook::WebhookChannel;

/// Days of history kept by file sinks unless configured otherwise.
pub const DEFAULT_MAX_DAYS: u32 = 30;

/// The closed set of delivery mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Standard output.
    Console,
    /// Local or remote syslog.
    Syslog,
    /// macOS unified log.
    Oslog,
    /// Windows event log (syslog elsewhere).
    Eventlog,
    /// SMTP or Microsoft Graph mail.
    Email,
    /// Text message.
    Sms,
    /// HTTP request.
    Webhook,
    /// Rows appended to a CSV file.
    Csv,
    /// Entries appended to a JSON array file.
    Json,
}

impl ChannelKind {
    /// Every kind.
    pub const ALL: [Self; 9] = [
        Self::Console,
        Self::Syslog,
        Self::Oslog,
        Self::Eventlog,
        Self::Email,
        Self::Sms,
        Self::Webhook,
        Self::Csv,
        Self::Json,
    ];

    /// Returns the kind as it appears in config.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Syslog => "syslog",
            Self::Oslog => "oslog",
            Self::Eventlog => "eventlog",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    /// Kinds that talk to a remote provider and go through the send queue.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Email | Self::Sms | Self::Webhook)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown channel type '{s}'"))
    }
}

// ============ Channel configuration ============

/// Email recipients and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon-copy recipients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    /// Blind carbon-copy recipients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    /// Subject template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Body template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Send the body as HTML.
    #[serde(default)]
    pub html: bool,
}

/// SMS recipients and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Phone numbers in E.164 form.
    pub to: Vec<String>,
    /// Message template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// HTTP request settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Extra headers; values are templates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Body template; a JSON payload is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Content-Type header.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

/// File sink settings shared by CSV and JSON channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSinkConfig {
    /// Output file.
    pub path: PathBuf,
    /// Entries older than this many days are pruned; 0 keeps everything.
    #[serde(default = "default_max_days")]
    pub max_days: u32,
    /// Row or entry template.
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

const fn default_max_days() -> u32 {
    DEFAULT_MAX_DAYS
}

/// One configured delivery for an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Print to standard output.
    Console {
        /// Message template.
        #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Send to syslog.
    Syslog {
        /// Message template.
        #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Send to the macOS unified log.
    Oslog {
        /// Message template.
        #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Send to the Windows event log.
    Eventlog {
        /// Message template.
        #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Send an email.
    Email(EmailConfig),
    /// Send a text message.
    Sms(SmsConfig),
    /// Make an HTTP request.
    Webhook(WebhookConfig),
    /// Append a CSV row.
    Csv(FileSinkConfig),
    /// Append a JSON entry.
    Json(FileSinkConfig),
}

impl ChannelConfig {
    /// Returns the kind of this channel.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::Console { .. } => ChannelKind::Console,
            Self::Syslog { .. } => ChannelKind::Syslog,
            Self::Oslog { .. } => ChannelKind::Oslog,
            Self::Eventlog { .. } => ChannelKind::Eventlog,
            Self::Email(_) => ChannelKind::Email,
            Self::Sms(_) => ChannelKind::Sms,
            Self::Webhook(_) => ChannelKind::Webhook,
            Self::Csv(_) => ChannelKind::Csv,
            Self::Json(_) => ChannelKind::Json,
        }
    }

    /// The message template for single-template kinds.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        match self {
            Self::Console { template }
            | Self::Syslog { template }
            | Self::Oslog { template }
            | Self::Eventlog { template } => template.as_deref(),
            Self::Sms(c) => c.message.as_deref(),
            Self::Email(c) => c.body.as_deref(),
            Self::Webhook(c) => c.body.as_deref(),
            Self::Csv(c) | Self::Json(c) => c.template.as_deref(),
        }
    }

    /// Checks the fields each kind requires.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Console { .. } | Self::Syslog { .. } | Self::Oslog { .. } | Self::Eventlog { .. } => {
                Ok(())
            }
            Self::Email(c) => {
                if c.to.is_empty() {
                    return Err("email channel needs at least one 'to' address".to_string());
                }
                for addr in c.to.iter().chain(&c.cc).chain(&c.bcc) {
                    addr.parse::<lettre::message::Mailbox>()
                        .map_err(|e| format!("invalid email address '{addr}': {e}"))?;
                }
                Ok(())
            }
            Self::Sms(c) => {
                if c.to.iter().all(|n| n.trim().is_empty()) {
                    return Err("sms channel needs at least one 'to' number".to_string());
                }
                Ok(())
            }
            Self::Webhook(c) => {
                let url = url::Url::parse(&c.url)
                    .map_err(|e| format!("invalid webhook url '{}': {e}", c.url))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(format!("webhook url must be http or https, got '{}'", url.scheme()));
                }
                reqwest::Method::from_bytes(c.method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("invalid webhook method '{}'", c.method))?;
                Ok(())
            }
            Self::Csv(c) | Self::Json(c) => {
                if c.path.as_os_str().is_empty() {
                    return Err(format!("{} channel needs a 'path'", self.kind()));
                }
                Ok(())
            }
        }
    }
}

// ============ Delivery ============

/// A single delivery request handed to a channel.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The alarm that fired.
    pub alarm_name: String,
    /// When it fired (observation time).
    pub fired_at: DateTime<Utc>,
    /// The channel's configuration on that alarm.
    pub config: ChannelConfig,
    /// Variables available to templates.
    pub context: Arc<TemplateContext>,
}

impl Notification {
    /// Expands `template`, falling back to `default` when it is absent or blank.
    #[must_use]
    pub fn render(&self, template: Option<&str>, default: &str) -> String {
        let source = template.filter(|t| !t.trim().is_empty()).unwrap_or(default);
        template::expand(source, &self.context)
    }

    /// The structured payload used when no JSON template is configured.
    #[must_use]
    pub fn default_payload(&self) -> serde_json::Value {
        self.context.payload().clone()
    }
}

/// Trait for notification channels.
///
/// One implementation exists per [`ChannelKind`]; it receives every
/// notification of that kind along with the alarm's channel configuration.
#[async_trait]
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// The kind this implementation delivers.
    fn kind(&self) -> ChannelKind;

    /// Delivers one notification.
    async fn send(&self, notification: &Notification) -> Result<(), ChannelError>;

    /// Returns whether the channel can deliver on this host.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Maps channel kinds to their implementations.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in channel using the given provider settings.
    #[must_use]
    pub fn with_defaults(settings: &ProviderSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ConsoleChannel::stdout()));
        registry.register(Arc::new(SyslogChannel::new(settings.syslog.clone())));
        registry.register(Arc::new(OsLogChannel::new(settings.syslog.tag.clone())));
        registry.register(Arc::new(EventLogChannel::new(settings.syslog.clone())));
        registry.register(Arc::new(EmailChannel::new(settings.email.clone())));
        registry.register(Arc::new(SmsChannel::new(settings.sms.clone())));
        registry.register(Arc::new(WebhookChannel::new()));
        registry.register(Arc::new(CsvChannel::new()));
        registry.register(Arc::new(JsonChannel::new()));
        registry
    }

    /// Registers every built-in channel with settings read from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_defaults(&ProviderSettings::from_env())
    }

    /// Adds or replaces the implementation for the channel's kind.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        let kind = channel.kind();
        debug!(channel = %kind, enabled = channel.is_enabled(), "registered notification channel");
        self.channels.insert(kind, channel);
    }

    /// Returns the implementation for a kind.
    #[must_use]
    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(&kind).cloned()
    }

    /// Returns the registered kinds in a stable order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.channels.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// Longest provider error body kept in a [`ChannelError::Rejected`].
pub(crate) const MAX_ERROR_BODY: usize = 512;

/// Maps a non-2xx provider response to [`ChannelError::Rejected`].
pub(crate) async fn check_response(kind: ChannelKind, response: reqwest::Response) -> Result<(), ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Rejected {
        kind,
        status: status.as_u16(),
        body: truncate_string(&body, MAX_ERROR_BODY),
    })
}

/// Runs blocking I/O for a channel on the blocking thread pool.
pub(crate) async fn run_blocking<F>(kind: ChannelKind, job: F) -> Result<(), ChannelError>
where
    F: FnOnce() -> Result<(), ChannelError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ChannelError::Delivery {
            kind,
            reason: format!("blocking writer task failed: {e}"),
        })?
}

/// Shortens `text` to at most `max` bytes on a char boundary, appending `...`.
#[must_use]
pub fn truncate_string(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max.saturating_sub(3);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records every notification it receives; optionally fails.
    #[derive(Debug)]
    pub struct RecordingChannel {
        pub kind: ChannelKind,
        pub fail: bool,
        pub delay: Option<std::time::Duration>,
        pub sent: parking_lot::Mutex<Vec<Notification>>,
    }

    impl RecordingChannel {
        pub fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail: false,
                delay: None,
                sent: parking_lot::Mutex::new(Vec::new()),
            })
        }

        pub fn failing(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail: true,
                delay: None,
                sent: parking_lot::Mutex::new(Vec::new()),
            })
        }

        pub fn slow(kind: ChannelKind, delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail: false,
                delay: Some(delay),
                sent: parking_lot::Mutex::new(Vec::new()),
            })
        }

        pub fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ChannelError::Delivery {
                    kind: self.kind,
                    reason: "simulated failure".to_string(),
                });
            }
            self.sent.lock().push(notification.clone());
            Ok(())
        }
    }

    /// A client that ignores proxy settings from the environment.
    pub fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Accepts one HTTP request, answers with `status`, and yields the raw request.
    pub async fn http_stub(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
                    let length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if data.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let reply = format!("HTTP/1.1 {status} Stub\r\ncontent-length: 4\r\nconnection: close\r\n\r\nstub");
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&data).into_owned()
        });
        (url, handle)
    }

    pub fn fired_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    pub fn notification(config: ChannelConfig) -> Notification {
        let alarm = crate::alarm::Alarm {
            name: "High Temp".to_string(),
            description: "Too hot".to_string(),
            condition_text: "temperature > 30".to_string(),
            condition: crate::condition::parse("temperature > 30").unwrap(),
            tags: Vec::new(),
            cooldown_secs: 0,
            enabled: true,
            schedule: None,
            channels: vec![config.clone()],
        };
        let observation = crate::field::Observation::sample(fired_at());
        let context = TemplateContext::for_firing(&template::FiringDetails {
            alarm: &alarm,
            observation: &observation,
            previous: &crate::evaluator::PreviousValues::new(),
            station: &crate::field::StationInfo::named("Backyard"),
            triggered_count: 1,
            uptime: std::time::Duration::from_secs(60),
        });
        Notification {
            alarm_name: alarm.name,
            fired_at: fired_at(),
            config,
            context: Arc::new(context),
        }
    }
}
