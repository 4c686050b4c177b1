//! Syslog channel (RFC 3164).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use super::{ChannelKind, Notification, NotificationChannel};
use crate::error::ChannelError;
use crate::settings::SyslogSettings;
use crate::template::DEFAULT_MESSAGE_TEMPLATE;

const FACILITY_USER: u8 = 1;

#[cfg(unix)]
const LOCAL_SOCKETS: [&str; 3] = ["/dev/log", "/var/run/syslog", "/var/run/log"];

/// Syslog severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SyslogSeverity {
    /// System is unusable.
    Emergency = 0,
    /// Action must be taken immediately.
    Alert = 1,
    /// Critical conditions.
    Critical = 2,
    /// Error conditions.
    Error = 3,
    /// Warning conditions.
    #[default]
    Warning = 4,
    /// Normal but significant.
    Notice = 5,
    /// Informational.
    Info = 6,
    /// Debug-level messages.
    Debug = 7,
}

impl SyslogSeverity {
    /// Priority value for this severity in the user facility.
    #[must_use]
    pub const fn priority(self) -> u8 {
        FACILITY_USER * 8 + self as u8
    }
}

impl fmt::Display for SyslogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emergency => "emerg",
            Self::Alert => "alert",
            Self::Critical => "crit",
            Self::Error => "err",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

impl FromStr for SyslogSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emerg" | "emergency" | "panic" => Ok(Self::Emergency),
            "alert" => Ok(Self::Alert),
            "crit" | "critical" => Ok(Self::Critical),
            "err" | "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "notice" => Ok(Self::Notice),
            "info" | "informational" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown syslog priority '{other}'")),
        }
    }
}

/// Formats one RFC 3164 message.
#[must_use]
pub fn format_rfc3164(
    severity: SyslogSeverity,
    timestamp: NaiveDateTime,
    hostname: &str,
    tag: &str,
    pid: u32,
    message: &str,
) -> String {
    let single_line = message.replace(['\r', '\n'], " ");
    format!(
        "<{}>{} {hostname} {tag}[{pid}]: {single_line}",
        severity.priority(),
        timestamp.format("%b %e %H:%M:%S"),
    )
}

/// Sends alarms to the local syslog daemon or a remote collector.
#[derive(Debug, Clone)]
pub struct SyslogChannel {
    settings: SyslogSettings,
    hostname: String,
}

impl SyslogChannel {
    /// Creates a syslog channel.
    #[must_use]
    pub fn new(settings: SyslogSettings) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self { settings, hostname }
    }

    /// Formats and sends one message at the configured severity.
    pub(crate) async fn send_message(&self, kind: ChannelKind, message: &str) -> Result<(), ChannelError> {
        let line = format_rfc3164(
            self.settings.severity,
            Local::now().naive_local(),
            &self.hostname,
            &self.settings.tag,
            std::process::id(),
            message,
        );
        match self.settings.address.as_deref() {
            Some(address) => self.send_remote(kind, address, &line).await,
            None => Self::send_local(kind, &line).await,
        }
    }

    async fn send_remote(&self, kind: ChannelKind, address: &str, line: &str) -> Result<(), ChannelError> {
        match self.settings.network.as_deref().unwrap_or("udp") {
            "udp" => {
                let target = tokio::net::lookup_host(address)
                    .await?
                    .next()
                    .ok_or_else(|| ChannelError::InvalidConfig {
                        kind,
                        reason: format!("cannot resolve syslog address '{address}'"),
                    })?;
                let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(bind).await?;
                socket.send_to(line.as_bytes(), target).await?;
                Ok(())
            }
            "tcp" => {
                let mut stream = TcpStream::connect(address).await?;
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await?;
                stream.flush().await?;
                Ok(())
            }
            other => Err(ChannelError::InvalidConfig {
                kind,
                reason: format!("unsupported syslog network '{other}' (use udp or tcp)"),
            }),
        }
    }

    #[cfg(unix)]
    async fn send_local(kind: ChannelKind, line: &str) -> Result<(), ChannelError> {
        let Some(path) = LOCAL_SOCKETS.iter().find(|p| std::path::Path::new(p).exists()) else {
            return Err(ChannelError::Unsupported {
                kind,
                reason: "no local syslog socket found".to_string(),
            });
        };
        let socket = tokio::net::UnixDatagram::unbound()?;
        socket.send_to(line.as_bytes(), path).await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn send_local(kind: ChannelKind, _line: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported {
            kind,
            reason: "local syslog requires SYSLOG_ADDRESS on this platform".to_string(),
        })
    }
}

#[async_trait]
impl NotificationChannel for SyslogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Syslog
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let message = notification.render(notification.config.template(), DEFAULT_MESSAGE_TEMPLATE);
        self.send_message(ChannelKind::Syslog, &message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelConfig;
    use crate::channels::test_support::notification;
    use chrono::NaiveDate;
    use test_case::test_case;

    #[test_case("warning", SyslogSeverity::Warning, 12)]
    #[test_case("err", SyslogSeverity::Error, 11)]
    #[test_case("CRIT", SyslogSeverity::Critical, 10)]
    #[test_case("info", SyslogSeverity::Info, 14)]
    fn severity_parsing(text: &str, expected: SyslogSeverity, priority: u8) {
        let parsed: SyslogSeverity = text.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.priority(), priority);
    }

    #[test]
    fn rfc3164_layout() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        let line = format_rfc3164(SyslogSeverity::Warning, ts, "station", "wx-alarms", 42, "line one\nline two");
        assert_eq!(line, "<12>Mar  5 07:08:09 station wx-alarms[42]: line one line two");
    }

    #[tokio::test]
    async fn udp_delivery() {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = collector.local_addr().unwrap().to_string();
        let channel = SyslogChannel::new(SyslogSettings {
            network: Some("udp".to_string()),
            address: Some(address),
            tag: "backyard".to_string(),
            ..SyslogSettings::default()
        });

        let n = notification(ChannelConfig::Syslog {
            template: Some("{{alarm_name}} fired".to_string()),
        });
        channel.send(&n).await.unwrap();

        let mut buf = [0u8; 1024];
        let len = collector.recv(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..len]);
        assert!(received.starts_with("<12>"), "{received}");
        assert!(received.contains(" backyard["), "{received}");
        assert!(received.ends_with("]: High Temp fired"), "{received}");
    }

    #[tokio::test]
    async fn unknown_network_is_rejected() {
        let channel = SyslogChannel::new(SyslogSettings {
            network: Some("sctp".to_string()),
            address: Some("127.0.0.1:514".to_string()),
            ..SyslogSettings::default()
        });
        let n = notification(ChannelConfig::Syslog { template: None });
        let err = channel.send(&n).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig { .. }));
    }
}
