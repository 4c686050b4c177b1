//! Reloads the alarm configuration when its file changes.
//!
//! The watcher polls the file's modification time and length. A change
//! triggers [`AlarmRuntime::reload`]; a failed reload is logged and the
//! running configuration stays in place until the file changes again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::runtime::AlarmRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(Fingerprint {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Polls a configuration file and reloads the runtime on change.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    interval: Duration,
}

impl ConfigWatcher {
    /// Creates a watcher for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// The watched path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts polling until `cancel` fires.
    pub fn spawn(self, runtime: Arc<AlarmRuntime>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(&runtime, &cancel).await })
    }

    async fn run(&self, runtime: &AlarmRuntime, cancel: &CancellationToken) {
        let mut last = fingerprint(&self.path).await;
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        info!(path = %self.path.display(), interval_ms = self.interval.as_millis(), "watching alarm configuration");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = fingerprint(&self.path).await;
            if current == last {
                continue;
            }
            let previous = std::mem::replace(&mut last, current);
            if current.is_none() {
                warn!(path = %self.path.display(), "alarm configuration file disappeared; keeping current alarms");
                continue;
            }
            debug!(path = %self.path.display(), was_present = previous.is_some(), "alarm configuration changed");

            match runtime.reload(&self.path) {
                Ok(summary) => debug!(
                    kept = summary.kept.len(),
                    added = summary.added.len(),
                    removed = summary.removed.len(),
                    "reload applied"
                ),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "alarm configuration reload failed; keeping current alarms"
                ),
            }
        }
        debug!(path = %self.path.display(), "config watcher stopped");
    }
}
