//! File sinks: CSV rows and a JSON array of entries.
//!
//! Both sinks prune entries older than `max_days` (relative to the firing
//! time) whenever they write. Rows whose timestamp cannot be read are kept.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ChannelConfig, ChannelKind, FileSinkConfig, Notification, NotificationChannel, run_blocking};
use crate::error::ChannelError;
use crate::template::{self, DEFAULT_CSV_TEMPLATE};

fn cutoff(config: &FileSinkConfig, fired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (config.max_days > 0).then(|| fired_at - TimeDelta::days(i64::from(config.max_days)))
}

fn is_expired(timestamp: &str, cutoff: Option<DateTime<Utc>>) -> bool {
    let Some(cutoff) = cutoff else {
        return false;
    };
    DateTime::parse_from_rfc3339(timestamp).is_ok_and(|t| t.with_timezone(&Utc) < cutoff)
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sink_config(kind: ChannelKind, notification: &Notification) -> Result<&FileSinkConfig, ChannelError> {
    match (&notification.config, kind) {
        (ChannelConfig::Csv(c), ChannelKind::Csv) | (ChannelConfig::Json(c), ChannelKind::Json) => Ok(c),
        (other, _) => Err(ChannelError::InvalidConfig {
            kind,
            reason: format!("received {} configuration", other.kind()),
        }),
    }
}

// ============ CSV ============

/// Appends one row per firing to a CSV file.
///
/// The template is split on commas into column templates. The header is
/// `timestamp` followed by each column's placeholder name, or `column_N`
/// when a column is not a single placeholder.
#[derive(Debug, Clone, Default)]
pub struct CsvChannel {
    lock: Arc<Mutex<()>>,
}

impl CsvChannel {
    /// Creates a CSV channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn csv_columns(template: &str) -> Vec<&str> {
    template.split(',').map(str::trim).collect()
}

fn column_name(index: usize, column: &str) -> String {
    column
        .strip_prefix("{{")
        .and_then(|c| c.strip_suffix("}}"))
        .filter(|key| !key.is_empty() && !key.contains("{{") && !key.contains("}}"))
        .map_or_else(|| format!("column_{}", index + 1), str::to_string)
}

fn append_csv(
    path: &Path,
    header: &[String],
    row: &[String],
    cutoff: Option<DateTime<Utc>>,
) -> Result<(), ChannelError> {
    ensure_parent(path)?;
    if cutoff.is_some() && path.exists() {
        prune_csv(path, cutoff)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(file);
    if needs_header {
        writer.write_record(header)?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

fn prune_csv(path: &Path, cutoff: Option<DateTime<Utc>>) -> Result<(), ChannelError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let header = reader.headers()?.clone();
    let mut kept = Vec::new();
    let mut removed = 0usize;
    for record in reader.records() {
        let record = record?;
        if record.get(0).is_some_and(|ts| is_expired(ts, cutoff)) {
            removed += 1;
        } else {
            kept.push(record);
        }
    }
    if removed == 0 {
        return Ok(());
    }

    let tmp = temp_path(path);
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&tmp)?;
        writer.write_record(&header)?;
        for record in &kept {
            writer.write_record(record)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), removed, "pruned expired csv rows");
    Ok(())
}

#[async_trait]
impl NotificationChannel for CsvChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Csv
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let config = sink_config(ChannelKind::Csv, notification)?;
        let template = config
            .template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_CSV_TEMPLATE);
        let columns = csv_columns(template);

        let header: Vec<String> = std::iter::once("timestamp".to_string())
            .chain(columns.iter().enumerate().map(|(i, c)| column_name(i, c)))
            .collect();
        let row: Vec<String> = std::iter::once(notification.fired_at.to_rfc3339())
            .chain(columns.iter().map(|c| template::expand(c, &notification.context)))
            .collect();

        let path = config.path.clone();
        let cutoff = cutoff(config, notification.fired_at);
        let lock = Arc::clone(&self.lock);
        run_blocking(ChannelKind::Csv, move || {
            let _guard = lock.lock();
            append_csv(&path, &header, &row, cutoff)
        })
        .await
    }
}

// ============ JSON ============

/// Keeps a JSON array of `{timestamp, alarm, message}` entries.
///
/// `message` holds the expanded template parsed as JSON when it is valid
/// JSON, and the raw string otherwise.
#[derive(Debug, Clone, Default)]
pub struct JsonChannel {
    lock: Arc<Mutex<()>>,
}

impl JsonChannel {
    /// Creates a JSON channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_entries(path: &Path) -> Result<Vec<Value>, ChannelError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }
    match serde_json::from_reader::<_, Vec<Value>>(BufReader::new(file)) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            let mut aside = path.as_os_str().to_os_string();
            aside.push(".corrupt");
            warn!(
                path = %path.display(),
                error = %e,
                "alarm log is not a JSON array; moving it aside"
            );
            fs::rename(path, &aside)?;
            Ok(Vec::new())
        }
    }
}

fn append_json(path: &Path, entry: Value, cutoff: Option<DateTime<Utc>>) -> Result<(), ChannelError> {
    ensure_parent(path)?;
    let mut entries = read_entries(path)?;
    let before = entries.len();
    entries.retain(|e| {
        !e.get("timestamp")
            .and_then(Value::as_str)
            .is_some_and(|ts| is_expired(ts, cutoff))
    });
    if entries.len() < before {
        debug!(path = %path.display(), removed = before - entries.len(), "pruned expired json entries");
    }
    entries.push(entry);

    let tmp = temp_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &entries)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl NotificationChannel for JsonChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Json
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let config = sink_config(ChannelKind::Json, notification)?;
        let message = match config.template.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(t) => {
                let escaped = template::expand_json(t, &notification.context);
                serde_json::from_str(&escaped)
                    .unwrap_or_else(|_| Value::String(template::expand(t, &notification.context)))
            }
            None => notification.default_payload(),
        };
        let entry = json!({
            "timestamp": notification.fired_at.to_rfc3339(),
            "alarm": notification.alarm_name,
            "message": message,
        });

        let path = config.path.clone();
        let cutoff = cutoff(config, notification.fired_at);
        let lock = Arc::clone(&self.lock);
        run_blocking(ChannelKind::Json, move || {
            let _guard = lock.lock();
            append_json(&path, entry, cutoff)
        })
        .await
    }
}
