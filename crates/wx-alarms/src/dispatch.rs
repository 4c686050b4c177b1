//! Notification dispatch.
//!
//! Local channels (console, syslog, files, ...) are sent inline. Network
//! channels go through a bounded [`SendQueue`] served by a fixed pool of
//! workers. Delivery is at most once: a full queue drops the job and failed
//! sends are not retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alarm::Alarm;
use crate::channels::{ChannelConfig, ChannelKind, ChannelRegistry, Notification, NotificationChannel};
use crate::error::ChannelError;
use crate::template::TemplateContext;

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// One alarm firing, ready to be fanned out to its channels.
#[derive(Debug, Clone)]
pub struct Firing {
    /// The alarm that fired.
    pub alarm: Arc<Alarm>,
    /// Observation timestamp that triggered it.
    pub fired_at: DateTime<Utc>,
    /// Template variables captured at firing time.
    pub context: Arc<TemplateContext>,
}

impl Firing {
    /// Builds the notification for one of the alarm's channels.
    #[must_use]
    pub fn notification(&self, config: &ChannelConfig) -> Notification {
        Notification {
            alarm_name: self.alarm.name.clone(),
            fired_at: self.fired_at,
            config: config.clone(),
            context: Arc::clone(&self.context),
        }
    }
}

/// Counts from dispatching one or more firings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Sent inline successfully.
    pub delivered: usize,
    /// Handed to the send queue.
    pub queued: usize,
    /// Inline sends that failed, or channels that could not be used.
    pub failed: usize,
    /// Dropped because the send queue was full.
    pub dropped: usize,
}

impl DispatchReport {
    /// Adds another report's counts to this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.queued += other.queued;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

/// Result of sending to one channel synchronously.
#[derive(Debug)]
pub struct ChannelOutcome {
    /// The channel kind.
    pub kind: ChannelKind,
    /// What happened.
    pub result: Result<(), ChannelError>,
}

/// Sends with a deadline, mapping expiry to [`ChannelError::Timeout`].
pub async fn send_with_timeout(
    channel: &dyn NotificationChannel,
    notification: &Notification,
    timeout: Duration,
) -> Result<(), ChannelError> {
    match tokio::time::timeout(timeout, channel.send(notification)).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Timeout {
            kind: channel.kind(),
            seconds: timeout.as_secs(),
        }),
    }
}

// ============ Send queue ============

struct Job {
    channel: Arc<dyn NotificationChannel>,
    notification: Notification,
}

/// Counters kept by the send queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`QueueStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// Jobs accepted.
    pub enqueued: u64,
    /// Jobs sent successfully.
    pub delivered: u64,
    /// Jobs whose send failed or timed out.
    pub failed: u64,
    /// Jobs rejected because the queue was full.
    pub dropped: u64,
}

impl QueueStats {
    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Bounded queue of network sends served by a worker pool.
pub struct SendQueue {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<QueueStats>,
}

impl std::fmt::Debug for SendQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendQueue")
            .field("workers", &self.workers.len())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl SendQueue {
    /// Starts `workers` tasks on the current tokio runtime.
    ///
    /// Capacity and worker count are raised to at least one.
    #[must_use]
    pub fn start(capacity: usize, workers: usize, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(QueueStats::default());
        let workers = (0..workers.max(1))
            .map(|id| tokio::spawn(worker(id, Arc::clone(&rx), Arc::clone(&stats), timeout)))
            .collect();
        Self { tx, workers, stats }
    }

    fn try_enqueue(&self, job: Job) -> bool {
        let kind = job.notification.config.kind();
        let alarm = job.notification.alarm_name.clone();
        match self.tx.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "send queue is full",
                    mpsc::error::TrySendError::Closed(_) => "send queue is closed",
                };
                warn!(alarm = %alarm, channel = %kind, reason, "dropping notification");
                false
            }
        }
    }

    /// Queue counters.
    #[must_use]
    pub fn stats(&self) -> QueueSnapshot {
        self.stats.snapshot()
    }

    /// Closes the queue and waits for workers to drain it.
    pub async fn shutdown(self) {
        let Self { tx, workers, stats } = self;
        drop(tx);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "send worker ended abnormally");
            }
        }
        let snapshot = stats.snapshot();
        info!(
            delivered = snapshot.delivered,
            failed = snapshot.failed,
            dropped = snapshot.dropped,
            "send queue stopped"
        );
    }
}

async fn worker(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    stats: Arc<QueueStats>,
    timeout: Duration,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(Job { channel, notification }) = job else {
            break;
        };
        let kind = channel.kind();
        match send_with_timeout(channel.as_ref(), &notification, timeout).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(worker = id, alarm = %notification.alarm_name, channel = %kind, "notification sent");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = id,
                    alarm = %notification.alarm_name,
                    channel = %kind,
                    error = %e,
                    "notification failed"
                );
            }
        }
    }
    debug!(worker = id, "send worker exiting");
}

// ============ Dispatcher ============

/// Routes firings to channel implementations.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ChannelRegistry>,
    queue: Mutex<Option<SendQueue>>,
    send_timeout: Duration,
}

impl Dispatcher {
    /// A dispatcher that sends every channel inline.
    #[must_use]
    pub fn inline(registry: ChannelRegistry, send_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            queue: Mutex::new(None),
            send_timeout,
        }
    }

    /// A dispatcher that queues network channels.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_queue(registry: ChannelRegistry, capacity: usize, workers: usize, send_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            queue: Mutex::new(Some(SendQueue::start(capacity, workers, send_timeout))),
            send_timeout,
        }
    }

    /// The channel registry.
    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Send queue counters, when a queue is running.
    #[must_use]
    pub fn queue_stats(&self) -> Option<QueueSnapshot> {
        self.queue.lock().as_ref().map(SendQueue::stats)
    }

    fn resolve(&self, alarm: &str, kind: ChannelKind) -> Result<Arc<dyn NotificationChannel>, ChannelError> {
        let channel = self.registry.get(kind).ok_or(ChannelError::NotRegistered { kind })?;
        if !channel.is_enabled() {
            debug!(alarm = %alarm, channel = %kind, "channel disabled on this platform");
            return Err(ChannelError::Unsupported {
                kind,
                reason: "channel is disabled on this platform".to_string(),
            });
        }
        Ok(channel)
    }

    /// Fans a firing out to the alarm's channels in order.
    ///
    /// Failures are logged and never stop the remaining channels.
    pub async fn dispatch(&self, firing: &Firing) -> DispatchReport {
        let mut report = DispatchReport::default();
        let alarm = firing.alarm.name.as_str();

        for config in &firing.alarm.channels {
            let kind = config.kind();
            let channel = match self.resolve(alarm, kind) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(alarm = %alarm, channel = %kind, error = %e, "skipping channel");
                    report.failed += 1;
                    continue;
                }
            };
            let notification = firing.notification(config);

            if kind.is_network() {
                let queue = self.queue.lock();
                if let Some(queue) = queue.as_ref() {
                    if queue.try_enqueue(Job { channel, notification }) {
                        report.queued += 1;
                    } else {
                        report.dropped += 1;
                    }
                    continue;
                }
            }

            match send_with_timeout(channel.as_ref(), &notification, self.send_timeout).await {
                Ok(()) => {
                    debug!(alarm = %alarm, channel = %kind, "notification sent");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(alarm = %alarm, channel = %kind, error = %e, "notification failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Sends to the alarm's channels inline and reports each result.
    ///
    /// With a filter only channels of that kind are used.
    pub async fn dispatch_now(&self, firing: &Firing, filter: Option<ChannelKind>) -> Vec<ChannelOutcome> {
        let mut outcomes = Vec::new();
        for config in &firing.alarm.channels {
            let kind = config.kind();
            if filter.is_some_and(|f| f != kind) {
                continue;
            }
            let result = match self.resolve(&firing.alarm.name, kind) {
                Ok(channel) => {
                    send_with_timeout(channel.as_ref(), &firing.notification(config), self.send_timeout).await
                }
                Err(e) => Err(e),
            };
            outcomes.push(ChannelOutcome { kind, result });
        }
        outcomes
    }

    /// Stops the send queue after draining queued jobs.
    ///
    /// Later network sends run inline.
    pub async fn shutdown(&self) {
        let queue = self.queue.lock().take();
        if let Some(queue) = queue {
            queue.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_support::{RecordingChannel, fired_at};
    use crate::channels::{EmailConfig, WebhookConfig};
    use std::collections::BTreeMap;

    fn webhook() -> ChannelConfig {
        ChannelConfig::Webhook(WebhookConfig {
            url: "http://localhost/hook".to_string(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: None,
            content_type: "application/json".to_string(),
        })
    }

    fn email() -> ChannelConfig {
        ChannelConfig::Email(EmailConfig {
            to: vec!["ops@example.com".to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: None,
            body: None,
            html: false,
        })
    }

    fn firing(channels: Vec<ChannelConfig>) -> Firing {
        let mut builder = Alarm::builder("High Temp", "temperature > 30");
        for channel in channels {
            builder = builder.channel(channel);
        }
        Firing {
            alarm: Arc::new(builder.build().unwrap()),
            fired_at: fired_at(),
            context: Arc::new(TemplateContext::sample_at(fired_at())),
        }
    }

    fn registry(channels: &[Arc<RecordingChannel>]) -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        for channel in channels {
            registry.register(Arc::clone(channel) as Arc<dyn NotificationChannel>);
        }
        registry
    }

    mod inline_tests {
        use super::*;

        #[tokio::test]
        async fn failure_does_not_stop_other_channels() {
            let console = RecordingChannel::failing(ChannelKind::Console);
            let syslog = RecordingChannel::new(ChannelKind::Syslog);
            let dispatcher = Dispatcher::inline(registry(&[console, Arc::clone(&syslog)]), DEFAULT_SEND_TIMEOUT);

            let report = dispatcher
                .dispatch(&firing(vec![
                    ChannelConfig::Console { template: None },
                    ChannelConfig::Syslog { template: None },
                ]))
                .await;
            assert_eq!(report.failed, 1);
            assert_eq!(report.delivered, 1);
            assert_eq!(syslog.count(), 1);
            assert_eq!(syslog.sent.lock()[0].alarm_name, "High Temp");
        }

        #[tokio::test]
        async fn unregistered_kind_counts_as_failed() {
            let dispatcher = Dispatcher::inline(ChannelRegistry::new(), DEFAULT_SEND_TIMEOUT);
            let report = dispatcher
                .dispatch(&firing(vec![ChannelConfig::Console { template: None }]))
                .await;
            assert_eq!(report.failed, 1);
        }

        #[tokio::test]
        async fn network_kinds_run_inline_without_queue() {
            let hook = RecordingChannel::new(ChannelKind::Webhook);
            let dispatcher = Dispatcher::inline(registry(&[Arc::clone(&hook)]), DEFAULT_SEND_TIMEOUT);
            let report = dispatcher.dispatch(&firing(vec![webhook()])).await;
            assert_eq!(report.delivered, 1);
            assert_eq!(hook.count(), 1);
        }

        #[tokio::test]
        async fn slow_send_times_out() {
            let slow = RecordingChannel::slow(ChannelKind::Console, Duration::from_secs(5));
            let dispatcher = Dispatcher::inline(registry(&[slow]), Duration::from_millis(20));
            let outcomes = dispatcher
                .dispatch_now(&firing(vec![ChannelConfig::Console { template: None }]), None)
                .await;
            assert_eq!(outcomes.len(), 1);
            assert!(matches!(
                outcomes[0].result,
                Err(ChannelError::Timeout { kind: ChannelKind::Console, .. })
            ));
        }

        #[tokio::test]
        async fn dispatch_now_filters_by_kind() {
            let console = RecordingChannel::new(ChannelKind::Console);
            let hook = RecordingChannel::new(ChannelKind::Webhook);
            let dispatcher = Dispatcher::inline(
                registry(&[Arc::clone(&console), Arc::clone(&hook)]),
                DEFAULT_SEND_TIMEOUT,
            );
            let outcomes = dispatcher
                .dispatch_now(
                    &firing(vec![ChannelConfig::Console { template: None }, webhook()]),
                    Some(ChannelKind::Webhook),
                )
                .await;
            assert_eq!(outcomes.len(), 1);
            assert_eq!(outcomes[0].kind, ChannelKind::Webhook);
            assert!(outcomes[0].result.is_ok());
            assert_eq!(console.count(), 0);
            assert_eq!(hook.count(), 1);
        }
    }

    mod queue_tests {
        use super::*;

        #[tokio::test]
        async fn network_kinds_are_queued() {
            let hook = RecordingChannel::new(ChannelKind::Webhook);
            let mail = RecordingChannel::failing(ChannelKind::Email);
            let console = RecordingChannel::new(ChannelKind::Console);
            let dispatcher = Dispatcher::with_queue(
                registry(&[Arc::clone(&hook), mail, Arc::clone(&console)]),
                8,
                2,
                DEFAULT_SEND_TIMEOUT,
            );

            let report = dispatcher
                .dispatch(&firing(vec![webhook(), email(), ChannelConfig::Console { template: None }]))
                .await;
            assert_eq!(report.queued, 2);
            assert_eq!(report.delivered, 1);
            assert_eq!(console.count(), 1);

            let stats_before = dispatcher.queue_stats().unwrap();
            assert_eq!(stats_before.enqueued, 2);

            dispatcher.shutdown().await;
            assert_eq!(hook.count(), 1);
            assert!(dispatcher.queue_stats().is_none());
        }

        #[tokio::test]
        async fn full_queue_drops_jobs() {
            let hook = RecordingChannel::new(ChannelKind::Webhook);
            let dispatcher = Dispatcher::with_queue(registry(&[Arc::clone(&hook)]), 1, 1, DEFAULT_SEND_TIMEOUT);

            // The current-thread test runtime does not run workers until the
            // first await, so only the first job fits.
            let report = dispatcher.dispatch(&firing(vec![webhook(), webhook(), webhook()])).await;
            assert_eq!(report.queued, 1);
            assert_eq!(report.dropped, 2);

            dispatcher.shutdown().await;
            assert_eq!(hook.count(), 1);
        }

        #[tokio::test]
        async fn worker_counts_failures() {
            let hook = RecordingChannel::failing(ChannelKind::Webhook);
            let queue = SendQueue::start(4, 1, DEFAULT_SEND_TIMEOUT);
            let f = firing(vec![webhook()]);
            assert!(queue.try_enqueue(Job {
                channel: hook as Arc<dyn NotificationChannel>,
                notification: f.notification(&webhook()),
            }));
            let stats = Arc::clone(&queue.stats);
            queue.shutdown().await;
            let snapshot = stats.snapshot();
            assert_eq!(snapshot.enqueued, 1);
            assert_eq!(snapshot.failed, 1);
            assert_eq!(snapshot.delivered, 0);
        }
    }

    #[test]
    fn report_merge() {
        let mut total = DispatchReport {
            delivered: 1,
            queued: 2,
            failed: 0,
            dropped: 1,
        };
        total.merge(DispatchReport {
            delivered: 2,
            queued: 0,
            failed: 1,
            dropped: 0,
        });
        assert_eq!(
            total,
            DispatchReport {
                delivered: 3,
                queued: 2,
                failed: 1,
                dropped: 1,
            }
        );
    }
}
