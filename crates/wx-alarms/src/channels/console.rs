//! Console channel.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChannelKind, Notification, NotificationChannel, run_blocking};
use crate::error::ChannelError;
use crate::template::DEFAULT_MESSAGE_TEMPLATE;

/// Writes `[ALARM] <timestamp> <message>` lines to a writer, stdout by default.
///
/// Output goes straight to the writer so alarms are visible whatever the
/// log filter is set to.
pub struct ConsoleChannel {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ConsoleChannel {
    /// Creates a console channel writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    /// Creates a console channel writing to `writer`.
    #[must_use]
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(writer))),
        }
    }
}

impl fmt::Debug for ConsoleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleChannel").finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Console
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let message = notification.render(notification.config.template(), DEFAULT_MESSAGE_TEMPLATE);
        let line = format!(
            "[ALARM] {} {message}",
            notification.fired_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let out = Arc::clone(&self.out);
        run_blocking(ChannelKind::Console, move || {
            let mut out = out.lock();
            writeln!(out, "{line}")?;
            out.flush()?;
            Ok(())
        })
        .await
    }
}
