//! Windows event log channel.
//!
//! On Windows the message is written to the Application log with
//! `eventcreate`. Elsewhere it is sent to syslog instead.

use async_trait::async_trait;

use super::{ChannelKind, Notification, NotificationChannel};
use crate::error::ChannelError;
use crate::settings::SyslogSettings;
use crate::template::DEFAULT_MESSAGE_TEMPLATE;

#[cfg(not(windows))]
use super::SyslogChannel;

/// `eventcreate` rejects descriptions longer than this.
#[cfg(windows)]
const MAX_EVENT_LEN: usize = 4096;

/// Writes alarms to the platform event log.
#[derive(Debug, Clone)]
pub struct EventLogChannel {
    #[cfg(windows)]
    source: String,
    #[cfg(not(windows))]
    fallback: SyslogChannel,
}

impl EventLogChannel {
    /// Creates an event log channel; `settings.tag` is the event source.
    #[must_use]
    pub fn new(settings: SyslogSettings) -> Self {
        #[cfg(windows)]
        {
            Self { source: settings.tag }
        }
        #[cfg(not(windows))]
        {
            Self {
                fallback: SyslogChannel::new(settings),
            }
        }
    }

    #[cfg(windows)]
    async fn write(&self, message: &str) -> Result<(), ChannelError> {
        let description = super::truncate_string(message, MAX_EVENT_LEN);
        let status = tokio::process::Command::new("eventcreate")
            .args(["/T", "WARNING", "/ID", "100", "/L", "APPLICATION", "/SO", &self.source, "/D", &description])
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(ChannelError::Delivery {
                kind: ChannelKind::Eventlog,
                reason: format!("eventcreate exited with {status}"),
            })
        }
    }

    #[cfg(not(windows))]
    async fn write(&self, message: &str) -> Result<(), ChannelError> {
        self.fallback.send_message(ChannelKind::Eventlog, message).await
    }
}

#[async_trait]
impl NotificationChannel for EventLogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Eventlog
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let message = notification.render(notification.config.template(), DEFAULT_MESSAGE_TEMPLATE);
        self.write(&message).await
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::channels::ChannelConfig;
    use crate::channels::test_support::notification;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn falls_back_to_syslog() {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = EventLogChannel::new(SyslogSettings {
            network: Some("udp".to_string()),
            address: Some(collector.local_addr().unwrap().to_string()),
            ..SyslogSettings::default()
        });
        channel
            .send(&notification(ChannelConfig::Eventlog {
                template: Some("{{message}}".to_string()),
            }))
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let len = collector.recv(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..len]);
        assert!(received.ends_with(": ALARM: High Temp triggered"), "{received}");
    }
}
