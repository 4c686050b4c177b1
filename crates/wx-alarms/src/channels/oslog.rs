//! macOS unified logging channel.

use async_trait::async_trait;

use super::{ChannelKind, Notification, NotificationChannel};
use crate::error::ChannelError;
use crate::template::DEFAULT_MESSAGE_TEMPLATE;

/// Writes alarms to the macOS unified log through `/usr/bin/logger`.
#[derive(Debug, Clone)]
pub struct OsLogChannel {
    tag: String,
}

impl OsLogChannel {
    /// Creates a channel logging under `tag`.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    #[cfg(target_os = "macos")]
    async fn log(&self, message: &str) -> Result<(), ChannelError> {
        let status = tokio::process::Command::new("/usr/bin/logger")
            .args(["-t", &self.tag, "-p", "user.warning", message])
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(ChannelError::Delivery {
                kind: ChannelKind::Oslog,
                reason: format!("logger exited with {status}"),
            })
        }
    }

    #[cfg(not(target_os = "macos"))]
    async fn log(&self, _message: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported {
            kind: ChannelKind::Oslog,
            reason: format!("unified logging for '{}' is only available on macOS", self.tag),
        })
    }
}

#[async_trait]
impl NotificationChannel for OsLogChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Oslog
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let message = notification.render(notification.config.template(), DEFAULT_MESSAGE_TEMPLATE);
        self.log(&message).await
    }

    fn is_enabled(&self) -> bool {
        cfg!(target_os = "macos")
    }
}
