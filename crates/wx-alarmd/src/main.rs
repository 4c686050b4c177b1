//! wx-alarmd - weather alarm daemon
//!
//! Reads sensor observations as JSON lines, evaluates the configured alarm
//! rules and sends notifications through their channels.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use wx_alarms::{
    AlarmConfig, AlarmRuntime, ChannelKind, ChannelRegistry, ConfigWatcher, Location, Observation, RuntimeConfig,
    StationInfo, available_fields, validate_condition, validate_template,
};

use crate::cli::{Cli, Commands, RunArgs, StationArgs};

const DEFAULT_LOG_FILTER: &str = "wx_alarms=info,wx_alarmd=info";

const SAMPLE_CONFIG: &str = r#"{
  "alarms": [
    {
      "name": "High Temperature",
      "description": "Afternoon heat warning",
      "condition": "temperature > 95F && humidity > 40",
      "tags": ["heat"],
      "cooldown": 3600,
      "schedule": { "type": "time", "start_time": "10:00", "end_time": "20:00" },
      "channels": [
        { "type": "console" },
        { "type": "csv", "path": "logs/heat.csv" }
      ]
    },
    {
      "name": "Lightning Nearby",
      "condition": "*lightning_count && lightning_distance < 15",
      "cooldown": 600,
      "channels": [
        { "type": "console", "template": "Lightning {{lightning_distance}} km away ({{lightning_count}} strikes)" },
        { "type": "json", "path": "logs/lightning.json" }
      ]
    },
    {
      "name": "Freeze Overnight",
      "condition": "temperature <= 32F",
      "enabled": false,
      "schedule": { "type": "sun", "sun_event": "sunset", "sun_event_end": "sunrise", "use_station_location": true },
      "channels": [
        { "type": "email", "to": ["you@example.com"], "subject": "Freeze warning at {{station}}" }
      ]
    }
  ]
}
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(format!("wx_alarms={level},wx_alarmd={level}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    // Logs go to stderr; stdout carries console alarms and command output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::Replay { input, config, station } => replay(&input, &config, &station).await?,
        Commands::ValidateCondition { condition } => check_condition(&condition)?,
        Commands::ValidateTemplate { template, kind } => check_template(&template, kind)?,
        Commands::ValidateConfig { config } => check_config(&config)?,
        Commands::TestChannel {
            alarm,
            channel,
            config,
            station,
        } => test_channel(&alarm, channel, &config, &station).await?,
        Commands::Fields => list_fields(),
        Commands::InitConfig { output, force } => init_config(&output, force)?,
    }

    Ok(())
}

fn station_info(args: &StationArgs) -> anyhow::Result<StationInfo> {
    let mut station = StationInfo::named(args.name.clone());
    if let (Some(lat), Some(lon)) = (args.latitude, args.longitude) {
        station = station.with_location(Location::new(lat, lon)?);
    }
    if let Some(tz) = &args.timezone {
        let tz: Tz = tz
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{tz}': {e}"))?;
        station = station.with_timezone(tz);
    }
    Ok(station)
}

// ============ Observation intake ============

#[derive(Debug, Default)]
struct IngestStats {
    observations: u64,
    malformed: u64,
    fired: usize,
    suppressed: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

async fn open_input(input: Option<&Path>) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match input {
        Some(path) if path != Path::new("-") => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

/// Feeds JSON-line observations to the runtime until end of input or cancellation.
async fn ingest(
    runtime: &AlarmRuntime,
    reader: impl AsyncBufRead + Unpin,
    cancel: &CancellationToken,
) -> anyhow::Result<IngestStats> {
    let mut stats = IngestStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read observations")?,
        };
        let Some(line) = line else {
            debug!(lines = line_no, "end of input");
            break;
        };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let observation: Observation = match serde_json::from_str(trimmed) {
            Ok(observation) => observation,
            Err(e) => {
                stats.malformed += 1;
                warn!(line = line_no, error = %e, "skipping malformed observation");
                continue;
            }
        };

        let summary = runtime.process_observation(&observation).await;
        stats.observations += 1;
        stats.fired += summary.fired;
        stats.suppressed += summary.suppressed;
        stats.last_timestamp = Some(observation.timestamp);
    }
    Ok(stats)
}

fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        cancel.cancel();
    });
}

// ============ Commands ============

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let station = station_info(&args.station)?;
    let runtime_config = RuntimeConfig::default()
        .with_queue_capacity(args.queue_capacity)
        .with_workers(args.workers)
        .with_send_timeout(Duration::from_secs(args.send_timeout_secs))
        .with_watch_interval(Duration::from_millis(args.watch_interval_ms));

    info!(config = %args.config.display(), station = %station.name, "starting wx-alarmd");
    let runtime = Arc::new(
        AlarmRuntime::from_file(&args.config, station, ChannelRegistry::from_env(), runtime_config)
            .with_context(|| format!("failed to load {}", args.config.display()))?,
    );
    info!(alarms = runtime.len(), "alarms loaded");

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let watcher = (!args.no_watch).then(|| {
        ConfigWatcher::new(&args.config, runtime_config.watch_interval).spawn(Arc::clone(&runtime), cancel.clone())
    });

    let reader = open_input(args.input.as_deref()).await?;
    let result = ingest(&runtime, reader, &cancel).await;

    cancel.cancel();
    if let Some(handle) = watcher {
        handle.await?;
    }
    runtime.shutdown().await;

    let stats = result?;
    info!(
        observations = stats.observations,
        malformed = stats.malformed,
        fired = stats.fired,
        "wx-alarmd stopped"
    );
    Ok(())
}

async fn replay(input: &Path, config: &Path, station: &StationArgs) -> anyhow::Result<()> {
    let station = station_info(station)?;
    let alarms = AlarmConfig::load(config).with_context(|| format!("failed to load {}", config.display()))?;
    let runtime = AlarmRuntime::new(alarms, station, ChannelRegistry::from_env());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let reader = open_input(Some(input)).await?;
    let stats = ingest(&runtime, reader, &cancel).await?;

    println!(
        "Processed {} observation(s): {} firing(s), {} suppressed by cooldown, {} malformed line(s)",
        stats.observations, stats.fired, stats.suppressed, stats.malformed
    );
    let now = stats.last_timestamp.unwrap_or_else(Utc::now);
    println!("{}", serde_json::to_string_pretty(&runtime.status(now))?);
    Ok(())
}

fn check_condition(condition: &str) -> anyhow::Result<()> {
    match validate_condition(condition) {
        Ok(paraphrase) => {
            println!("Valid: {paraphrase}");
            Ok(())
        }
        Err(e) => {
            if let Some(position) = e.position() {
                println!("  {condition}");
                let column = condition.get(..position).map_or(position, |s| s.chars().count());
                println!("  {}^", " ".repeat(column));
            }
            anyhow::bail!("invalid condition: {e}")
        }
    }
}

fn check_template(template: &str, kind: ChannelKind) -> anyhow::Result<()> {
    let preview = validate_template(template, kind)?;
    println!("{}", preview.sample);
    if !preview.unresolved.is_empty() {
        println!();
        println!("Unknown placeholders: {}", preview.unresolved.join(", "));
    }
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = AlarmConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    println!(
        "{}: {} alarm(s), {} enabled",
        path.display(),
        config.alarms.len(),
        config.enabled_count()
    );
    println!();
    for alarm in &config.alarms {
        let state = if alarm.enabled { "" } else { " (disabled)" };
        println!("  {}{state}", alarm.name);
        println!("    {}", alarm.paraphrase());
        if let Some(schedule) = &alarm.schedule {
            println!("    Schedule: {}", schedule.describe());
        }
        if alarm.cooldown_secs > 0 {
            println!("    Cooldown: {}s", alarm.cooldown_secs);
        }
        let kinds: Vec<&str> = alarm.channels.iter().map(|c| c.kind().as_str()).collect();
        println!("    Channels: {}", kinds.join(", "));
    }
    Ok(())
}

async fn test_channel(
    alarm: &str,
    channel: Option<ChannelKind>,
    config: &Path,
    station: &StationArgs,
) -> anyhow::Result<()> {
    let station = station_info(station)?;
    let alarms = AlarmConfig::load(config).with_context(|| format!("failed to load {}", config.display()))?;
    let runtime = AlarmRuntime::new(alarms, station, ChannelRegistry::from_env());

    let outcomes = runtime.fire_test(alarm, channel).await?;
    if outcomes.is_empty() {
        anyhow::bail!("alarm '{alarm}' has no matching channels");
    }

    let mut failures = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("  {}: sent", outcome.kind),
            Err(e) => {
                failures += 1;
                println!("  {}: FAILED - {e}", outcome.kind);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} test notification(s) failed", outcomes.len());
    }
    Ok(())
}

fn list_fields() {
    println!("Fields usable in conditions and templates:");
    for name in available_fields() {
        println!("  {name}");
    }
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    AlarmConfig::from_json_str(SAMPLE_CONFIG)?;
    std::fs::write(output, SAMPLE_CONFIG).with_context(|| format!("failed to write {}", output.display()))?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the alarms, then run:");
    println!("  wx-alarmd run --config {}", output.display());
    Ok(())
}
