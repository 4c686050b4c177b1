//! The alarm runtime: evaluates loaded alarms against observations.
//!
//! Evaluation runs in two phases. The first walks every alarm under the
//! collection read lock, taking one alarm's state mutex at a time, and
//! collects firings. The second dispatches those firings with no locks held.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::alarm::{Alarm, AlarmState};
use crate::channels::{ChannelKind, ChannelRegistry};
use crate::config::AlarmConfig;
use crate::dispatch::{ChannelOutcome, DEFAULT_SEND_TIMEOUT, DispatchReport, Dispatcher, Firing};
use crate::error::{AlarmError, Result};
use crate::evaluator;
use crate::field::{Observation, StationInfo};
use crate::template::{FiringDetails, TemplateContext};

/// Tunables for the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Send queue capacity.
    pub queue_capacity: usize,
    /// Number of send workers.
    pub workers: usize,
    /// Per-send timeout.
    pub send_timeout: Duration,
    /// How often the config watcher polls the file.
    pub watch_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            workers: 4,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            watch_interval: Duration::from_secs(2),
        }
    }
}

impl RuntimeConfig {
    /// Sets the send queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the number of send workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-send timeout.
    #[must_use]
    pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the watcher poll interval.
    #[must_use]
    pub const fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }
}

/// A loaded alarm and its state.
#[derive(Debug, Clone)]
struct AlarmEntry {
    alarm: Arc<Alarm>,
    state: Arc<Mutex<AlarmState>>,
}

impl AlarmEntry {
    fn new(alarm: Alarm) -> Self {
        Self {
            alarm: Arc::new(alarm),
            state: Arc::new(Mutex::new(AlarmState::default())),
        }
    }
}

/// Counts from one [`AlarmRuntime::process_observation`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    /// Alarms whose condition was evaluated.
    pub evaluated: usize,
    /// Alarms skipped because they are disabled.
    pub skipped_disabled: usize,
    /// Alarms skipped because their schedule is inactive.
    pub skipped_schedule: usize,
    /// Alarms whose evaluation failed.
    pub errored: usize,
    /// Alarms that fired.
    pub fired: usize,
    /// Alarms whose condition held but were cooling down.
    pub suppressed: usize,
    /// Channel dispatch counts for the firings.
    pub dispatch: DispatchReport,
}

/// Which alarms a reload kept, added and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    /// Names present before and after; their state was preserved.
    pub kept: Vec<String>,
    /// New names, starting with empty state.
    pub added: Vec<String>,
    /// Names no longer configured.
    pub removed: Vec<String>,
}

/// A snapshot of one alarm for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmStatus {
    /// Alarm name.
    pub name: String,
    /// Whether the alarm is evaluated.
    pub enabled: bool,
    /// Plain-English condition.
    pub condition: String,
    /// Last firing time.
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Time left in the cooldown.
    #[serde(rename = "cooldown_remaining_secs", serialize_with = "serialize_secs")]
    pub cooldown_remaining: Duration,
    /// Whether the alarm is cooling down.
    pub in_cooldown: bool,
    /// Firings since the alarm was loaded.
    pub triggered_count: u64,
    /// Schedule description, if any.
    pub schedule: Option<String>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

enum Outcome {
    Disabled,
    OffSchedule,
    Errored,
    Quiet,
    Suppressed,
    Fired(Firing),
}

/// Owns the loaded alarms and their state.
#[derive(Debug)]
pub struct AlarmRuntime {
    alarms: RwLock<BTreeMap<String, AlarmEntry>>,
    station: RwLock<StationInfo>,
    dispatcher: Dispatcher,
    source: RwLock<Option<PathBuf>>,
    loaded_at: RwLock<DateTime<Utc>>,
    started_at: Instant,
}

impl AlarmRuntime {
    /// Creates a runtime that sends every channel inline.
    #[must_use]
    pub fn new(config: AlarmConfig, station: StationInfo, registry: ChannelRegistry) -> Self {
        Self::with_dispatcher(config, station, Dispatcher::inline(registry, DEFAULT_SEND_TIMEOUT))
    }

    /// Creates a runtime with a send queue for network channels.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_queue(
        config: AlarmConfig,
        station: StationInfo,
        registry: ChannelRegistry,
        runtime: RuntimeConfig,
    ) -> Self {
        let dispatcher = Dispatcher::with_queue(
            registry,
            runtime.queue_capacity,
            runtime.workers,
            runtime.send_timeout,
        );
        Self::with_dispatcher(config, station, dispatcher)
    }

    /// Loads `path` and creates a queued runtime that remembers the file.
    pub fn from_file(
        path: impl AsRef<Path>,
        station: StationInfo,
        registry: ChannelRegistry,
        runtime: RuntimeConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let config = AlarmConfig::load(path)?;
        let this = Self::with_queue(config, station, registry, runtime);
        *this.source.write() = Some(path.to_path_buf());
        Ok(this)
    }

    fn with_dispatcher(config: AlarmConfig, station: StationInfo, dispatcher: Dispatcher) -> Self {
        let alarms = config
            .alarms
            .into_iter()
            .map(|a| (a.name.clone(), AlarmEntry::new(a)))
            .collect::<BTreeMap<_, _>>();
        info!(alarms = alarms.len(), station = %station.name, "alarm runtime started");
        Self {
            alarms: RwLock::new(alarms),
            station: RwLock::new(station),
            dispatcher,
            source: RwLock::new(None),
            loaded_at: RwLock::new(Utc::now()),
            started_at: Instant::now(),
        }
    }

    // ============ Accessors ============

    /// Current station metadata.
    #[must_use]
    pub fn station(&self) -> StationInfo {
        self.station.read().clone()
    }

    /// Replaces the station metadata.
    pub fn set_station(&self, station: StationInfo) {
        *self.station.write() = station;
    }

    /// Names of loaded alarms, sorted.
    #[must_use]
    pub fn alarm_names(&self) -> Vec<String> {
        self.alarms.read().keys().cloned().collect()
    }

    /// Looks up a loaded alarm.
    #[must_use]
    pub fn alarm(&self, name: &str) -> Option<Arc<Alarm>> {
        self.alarms.read().get(name).map(|e| Arc::clone(&e.alarm))
    }

    /// Number of loaded alarms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alarms.read().len()
    }

    /// Whether no alarms are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alarms.read().is_empty()
    }

    /// The file the configuration was last loaded from.
    #[must_use]
    pub fn source(&self) -> Option<PathBuf> {
        self.source.read().clone()
    }

    /// When the current configuration was installed.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        *self.loaded_at.read()
    }

    /// Time since the runtime was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ============ Evaluation ============

    /// Evaluates every alarm against `observation` and dispatches firings.
    ///
    /// `observation.timestamp` is the clock for schedules and cooldowns.
    /// Per-alarm errors are logged and counted; they never abort the pass.
    pub async fn process_observation(&self, observation: &Observation) -> EvaluationSummary {
        let now = observation.timestamp;
        let station = self.station();
        let mut summary = EvaluationSummary::default();
        let mut firings = Vec::new();

        {
            let alarms = self.alarms.read();
            for entry in alarms.values() {
                match self.evaluate_entry(entry, observation, &station) {
                    Outcome::Disabled => summary.skipped_disabled += 1,
                    Outcome::OffSchedule => summary.skipped_schedule += 1,
                    Outcome::Errored => {
                        summary.evaluated += 1;
                        summary.errored += 1;
                    }
                    Outcome::Quiet => summary.evaluated += 1,
                    Outcome::Suppressed => {
                        summary.evaluated += 1;
                        summary.suppressed += 1;
                    }
                    Outcome::Fired(firing) => {
                        summary.evaluated += 1;
                        summary.fired += 1;
                        firings.push(firing);
                    }
                }
            }
        }

        for firing in &firings {
            let report = self.dispatcher.dispatch(firing).await;
            summary.dispatch.merge(report);
        }

        debug!(
            timestamp = %now,
            evaluated = summary.evaluated,
            fired = summary.fired,
            suppressed = summary.suppressed,
            errored = summary.errored,
            "observation processed"
        );
        summary
    }

    fn evaluate_entry(&self, entry: &AlarmEntry, observation: &Observation, station: &StationInfo) -> Outcome {
        let alarm = &entry.alarm;
        let now = observation.timestamp;
        if !alarm.enabled {
            return Outcome::Disabled;
        }
        if let Some(schedule) = &alarm.schedule {
            match schedule.is_active(now, station) {
                Ok(true) => {}
                Ok(false) => return Outcome::OffSchedule,
                Err(e) => {
                    warn!(alarm = %alarm.name, error = %e, "schedule cannot be evaluated; treating alarm as inactive");
                    return Outcome::OffSchedule;
                }
            }
        }

        let mut state = entry.state.lock();
        // `last_<field>` template values are the baselines before this
        // observation; evaluation overwrites them in place. Only alarms with
        // change detection hold baselines, so the map is usually empty.
        let previous = state.previous_values.clone();
        let triggered = match evaluator::evaluate(&alarm.condition, observation, &mut state.previous_values) {
            Ok(triggered) => triggered,
            Err(e) => {
                warn!(alarm = %alarm.name, error = %e, "alarm evaluation failed");
                return Outcome::Errored;
            }
        };
        if !triggered {
            return Outcome::Quiet;
        }

        let remaining = state.cooldown_remaining(alarm.cooldown(), now);
        if !remaining.is_zero() {
            debug!(
                alarm = %alarm.name,
                remaining_secs = remaining.as_secs(),
                "condition met but alarm is cooling down"
            );
            return Outcome::Suppressed;
        }
        state.record_firing(now);
        let triggered_count = state.triggered_count;
        drop(state);

        let context = TemplateContext::for_firing(&FiringDetails {
            alarm,
            observation,
            previous: &previous,
            station,
            triggered_count,
            uptime: self.uptime(),
        });
        info!(
            alarm = %alarm.name,
            condition = %alarm.condition_text,
            triggered_count,
            "alarm fired"
        );
        Outcome::Fired(Firing {
            alarm: Arc::clone(alarm),
            fired_at: now,
            context: Arc::new(context),
        })
    }

    // ============ Status ============

    /// Snapshots every alarm, sorted by name.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> Vec<AlarmStatus> {
        let alarms = self.alarms.read();
        alarms
            .values()
            .map(|entry| {
                let alarm = &entry.alarm;
                let state = entry.state.lock();
                let remaining = state.cooldown_remaining(alarm.cooldown(), now);
                AlarmStatus {
                    name: alarm.name.clone(),
                    enabled: alarm.enabled,
                    condition: alarm.paraphrase(),
                    last_fired_at: state.last_fired_at,
                    cooldown_remaining: remaining,
                    in_cooldown: !remaining.is_zero(),
                    triggered_count: state.triggered_count,
                    schedule: alarm.schedule.as_ref().map(crate::schedule::Schedule::describe),
                }
            })
            .collect()
    }

    fn entry(&self, name: &str) -> Result<AlarmEntry> {
        self.alarms
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AlarmError::AlarmNotFound { name: name.to_string() })
    }

    /// Time left in an alarm's cooldown.
    pub fn cooldown_remaining(&self, name: &str, now: DateTime<Utc>) -> Result<Duration> {
        let entry = self.entry(name)?;
        let remaining = entry.state.lock().cooldown_remaining(entry.alarm.cooldown(), now);
        Ok(remaining)
    }

    /// Whether an alarm is cooling down.
    pub fn is_in_cooldown(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(!self.cooldown_remaining(name, now)?.is_zero())
    }

    /// A copy of an alarm's state.
    pub fn state(&self, name: &str) -> Result<AlarmState> {
        Ok(self.entry(name)?.state.lock().clone())
    }

    // ============ Reload ============

    /// Loads `path` and installs it, keeping state for alarms that survive.
    ///
    /// On any load or validation error the current configuration is untouched.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<ReloadSummary> {
        let path = path.as_ref();
        let config = AlarmConfig::load(path)?;
        let summary = self.replace_config(config);
        *self.source.write() = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            kept = summary.kept.len(),
            added = summary.added.len(),
            removed = summary.removed.len(),
            "alarm configuration reloaded"
        );
        Ok(summary)
    }

    /// Reloads the file the configuration came from.
    pub fn reload_source(&self) -> Result<ReloadSummary> {
        let path = self.source().ok_or(AlarmError::NoConfigSource)?;
        self.reload(path)
    }

    /// Installs an already validated configuration, merging state by name.
    pub fn replace_config(&self, config: AlarmConfig) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut alarms = self.alarms.write();
        let mut next = BTreeMap::new();

        for alarm in config.alarms {
            let name = alarm.name.clone();
            let state = match alarms.remove(&name) {
                Some(existing) => {
                    summary.kept.push(name.clone());
                    existing.state
                }
                None => {
                    summary.added.push(name.clone());
                    Arc::new(Mutex::new(AlarmState::default()))
                }
            };
            next.insert(
                name,
                AlarmEntry {
                    alarm: Arc::new(alarm),
                    state,
                },
            );
        }
        summary.removed = alarms.keys().cloned().collect();
        *alarms = next;
        drop(alarms);

        *self.loaded_at.write() = Utc::now();
        summary
    }

    // ============ Test sends ============

    /// Sends a test notification for one alarm through its channels.
    ///
    /// Uses a representative observation and the alarm's current baselines.
    /// The alarm's state is not changed. With a filter only channels of that
    /// kind are used.
    pub async fn fire_test(&self, name: &str, filter: Option<ChannelKind>) -> Result<Vec<ChannelOutcome>> {
        let entry = self.entry(name)?;
        let now = Utc::now();
        let observation = Observation::sample(now);
        let (previous, count) = {
            let state = entry.state.lock();
            (state.previous_values.clone(), state.triggered_count)
        };
        let station = self.station();
        let context = TemplateContext::for_firing(&FiringDetails {
            alarm: &entry.alarm,
            observation: &observation,
            previous: &previous,
            station: &station,
            triggered_count: count,
            uptime: self.uptime(),
        });
        let firing = Firing {
            alarm: Arc::clone(&entry.alarm),
            fired_at: now,
            context: Arc::new(context),
        };
        info!(alarm = %name, channel = ?filter, "sending test notification");
        Ok(self.dispatcher.dispatch_now(&firing, filter).await)
    }

    /// Drains and stops the send queue.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::NotificationChannel;
    use crate::channels::test_support::RecordingChannel;
    use crate::field::Field;
    use chrono::TimeDelta;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"{"alarms":[
        {"name":"Hot","condition":"temperature > 30","cooldown":60,"channels":[{"type":"console"}]},
        {"name":"Strike","condition":"*lightning_count","channels":[{"type":"console"}]},
        {"name":"Off","condition":"temperature > 0","enabled":false,"channels":[{"type":"console"}]}
    ]}"#;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn obs(secs: i64, temperature: f64, strikes: f64) -> Observation {
        Observation::new(t0() + TimeDelta::seconds(secs))
            .with(Field::Temperature, temperature)
            .with(Field::LightningCount, strikes)
    }

    fn runtime(text: &str) -> (AlarmRuntime, Arc<RecordingChannel>) {
        let console = RecordingChannel::new(ChannelKind::Console);
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::clone(&console) as Arc<dyn NotificationChannel>);
        let config = AlarmConfig::from_json_str(text).unwrap();
        (
            AlarmRuntime::new(config, StationInfo::named("Backyard"), registry),
            console,
        )
    }

    mod evaluation_tests {
        use super::*;

        #[tokio::test]
        async fn fires_and_counts() {
            let (rt, console) = runtime(CONFIG);
            let summary = rt.process_observation(&obs(0, 31.0, 0.0)).await;
            assert_eq!(summary.evaluated, 2);
            assert_eq!(summary.skipped_disabled, 1);
            assert_eq!(summary.fired, 1);
            assert_eq!(summary.dispatch.delivered, 1);
            assert_eq!(console.count(), 1);
            assert_eq!(console.sent.lock()[0].alarm_name, "Hot");
        }

        #[tokio::test]
        async fn cooldown_suppresses_until_elapsed() {
            let (rt, console) = runtime(CONFIG);
            assert_eq!(rt.process_observation(&obs(0, 31.0, 0.0)).await.fired, 1);

            let summary = rt.process_observation(&obs(30, 31.0, 0.0)).await;
            assert_eq!(summary.fired, 0);
            assert_eq!(summary.suppressed, 1);
            assert_eq!(
                rt.cooldown_remaining("Hot", t0() + TimeDelta::seconds(30)).unwrap(),
                Duration::from_secs(30)
            );

            assert_eq!(rt.process_observation(&obs(61, 31.0, 0.0)).await.fired, 1);
            assert_eq!(console.count(), 2);
            assert_eq!(rt.state("Hot").unwrap().triggered_count, 2);
        }

        #[tokio::test]
        async fn change_detection_needs_baseline() {
            let (rt, console) = runtime(CONFIG);
            rt.process_observation(&obs(0, 20.0, 3.0)).await;
            assert_eq!(console.count(), 0);

            rt.process_observation(&obs(10, 20.0, 5.0)).await;
            assert_eq!(console.count(), 1);
            let sent = console.sent.lock()[0].clone();
            assert_eq!(sent.alarm_name, "Strike");
            assert_eq!(sent.context.get("lightning_count"), Some("5"));
            assert_eq!(sent.context.get("last_lightning_count"), Some("3"));
        }

        #[tokio::test]
        async fn missing_field_is_scoped_to_alarm() {
            let (rt, console) = runtime(CONFIG);
            let only_temp = Observation::new(t0()).with(Field::Temperature, 35.0);
            let summary = rt.process_observation(&only_temp).await;
            assert_eq!(summary.errored, 1);
            assert_eq!(summary.fired, 1);
            assert_eq!(console.count(), 1);
        }

        #[tokio::test]
        async fn inactive_schedule_skips() {
            let (rt, console) = runtime(
                r#"{"alarms":[{"name":"Night","condition":"temperature > 0",
                    "schedule":{"type":"time","start_time":"22:00","end_time":"06:00"},
                    "channels":[{"type":"console"}]}]}"#,
            );
            let summary = rt.process_observation(&obs(0, 10.0, 0.0)).await;
            assert_eq!(summary.skipped_schedule, 1);
            assert_eq!(console.count(), 0);

            let late = Observation::new(t0() + TimeDelta::hours(11)).with(Field::Temperature, 10.0);
            assert_eq!(rt.process_observation(&late).await.fired, 1);
        }
    }

    mod status_tests {
        use super::*;

        #[tokio::test]
        async fn reports_cooldown() {
            let (rt, _) = runtime(CONFIG);
            rt.process_observation(&obs(0, 31.0, 0.0)).await;

            let status = rt.status(t0() + TimeDelta::seconds(15));
            let names: Vec<&str> = status.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["Hot", "Off", "Strike"]);

            let hot = &status[0];
            assert!(hot.in_cooldown);
            assert_eq!(hot.cooldown_remaining, Duration::from_secs(45));
            assert_eq!(hot.triggered_count, 1);
            assert_eq!(hot.last_fired_at, Some(t0()));
            assert_eq!(hot.condition, "When temperature exceeds 30");

            let json = serde_json::to_value(hot).unwrap();
            assert_eq!(json["cooldown_remaining_secs"], 45);
        }

        #[test]
        fn unknown_alarm() {
            let (rt, _) = runtime(CONFIG);
            assert!(matches!(
                rt.is_in_cooldown("Nope", t0()),
                Err(AlarmError::AlarmNotFound { .. })
            ));
        }
    }

    mod reload_tests {
        use super::*;

        fn write(file: &mut NamedTempFile, text: &str) {
            file.as_file_mut().write_all(text.as_bytes()).unwrap();
            file.as_file_mut().flush().unwrap();
        }

        #[tokio::test]
        async fn preserves_state_by_name() {
            let (rt, _) = runtime(CONFIG);
            rt.process_observation(&obs(0, 31.0, 4.0)).await;

            let mut file = NamedTempFile::new().unwrap();
            write(
                &mut file,
                r#"{"alarms":[
                    {"name":"Hot","condition":"temperature > 25","cooldown":60,"channels":[{"type":"console"}]},
                    {"name":"Humid","condition":"humidity > 90","channels":[{"type":"console"}]}
                ]}"#,
            );
            let summary = rt.reload(file.path()).unwrap();
            assert_eq!(summary.kept, vec!["Hot".to_string()]);
            assert_eq!(summary.added, vec!["Humid".to_string()]);
            assert_eq!(summary.removed, vec!["Off".to_string(), "Strike".to_string()]);

            let hot = rt.state("Hot").unwrap();
            assert_eq!(hot.last_fired_at, Some(t0()));
            assert_eq!(rt.alarm("Hot").unwrap().condition_text, "temperature > 25");
            assert!(rt.is_in_cooldown("Hot", t0() + TimeDelta::seconds(10)).unwrap());
            assert_eq!(rt.state("Humid").unwrap(), AlarmState::default());
            assert_eq!(rt.source().as_deref(), Some(file.path()));
        }

        #[tokio::test]
        async fn keeps_baselines_when_only_channels_change() {
            let (rt, _) = runtime(CONFIG);
            rt.process_observation(&obs(0, 20.0, 5.0)).await;

            let mut file = NamedTempFile::new().unwrap();
            write(
                &mut file,
                r#"{"alarms":[
                    {"name":"Strike","condition":"*lightning_count","channels":[{"type":"syslog"}]}
                ]}"#,
            );
            rt.reload(file.path()).unwrap();

            let strike = rt.state("Strike").unwrap();
            assert_eq!(strike.previous_values.get(&Field::LightningCount), Some(&5.0));
            let summary = rt.process_observation(&obs(30, 20.0, 5.0)).await;
            assert_eq!(summary.fired, 0);
        }

        #[tokio::test]
        async fn failed_reload_keeps_everything() {
            let (rt, _) = runtime(CONFIG);
            rt.process_observation(&obs(0, 31.0, 0.0)).await;

            let mut file = NamedTempFile::new().unwrap();
            write(&mut file, r#"{"alarms":[{"name":"Hot","condition":"temperature >","channels":[{"type":"console"}]}]}"#);
            assert!(rt.reload(file.path()).is_err());

            assert_eq!(rt.len(), 3);
            assert_eq!(rt.state("Hot").unwrap().triggered_count, 1);
            assert_eq!(rt.alarm("Hot").unwrap().condition_text, "temperature > 30");
            assert!(rt.source().is_none());
        }

        #[test]
        fn reload_source_requires_file() {
            let (rt, _) = runtime(CONFIG);
            assert!(matches!(rt.reload_source(), Err(AlarmError::NoConfigSource)));
        }
    }

    mod fire_test_tests {
        use super::*;

        #[tokio::test]
        async fn sends_without_touching_state() {
            let (rt, console) = runtime(CONFIG);
            let outcomes = rt.fire_test("Hot", None).await.unwrap();
            assert_eq!(outcomes.len(), 1);
            assert!(outcomes[0].result.is_ok());
            assert_eq!(console.count(), 1);
            assert_eq!(rt.state("Hot").unwrap(), AlarmState::default());
        }

        #[tokio::test]
        async fn unknown_alarm_is_error() {
            let (rt, _) = runtime(CONFIG);
            assert!(matches!(
                rt.fire_test("Nope", None).await,
                Err(AlarmError::AlarmNotFound { .. })
            ));
        }

        #[tokio::test]
        async fn filter_excludes_other_kinds() {
            let (rt, console) = runtime(CONFIG);
            let outcomes = rt.fire_test("Hot", Some(ChannelKind::Email)).await.unwrap();
            assert!(outcomes.is_empty());
            assert_eq!(console.count(), 0);
        }
    }

    #[test]
    fn runtime_config_setters() {
        let config = RuntimeConfig::default()
            .with_queue_capacity(8)
            .with_workers(2)
            .with_send_timeout(Duration::from_secs(5))
            .with_watch_interval(Duration::from_millis(500));
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.workers, 2);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.watch_interval, Duration::from_millis(500));
    }
}
