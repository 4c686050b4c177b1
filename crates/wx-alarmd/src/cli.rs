//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use wx_alarms::ChannelKind;

/// wx-alarmd - weather alarm daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "wx-alarmd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level for wx-alarms and wx-alarmd (overrides RUST_LOG).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Evaluate alarms against observations read as JSON lines.
    Run(RunArgs),

    /// Process a file of observations and print the resulting alarm status.
    Replay {
        /// Observation file (JSON lines).
        input: PathBuf,

        /// Alarm configuration file.
        #[arg(short, long, env = "WX_ALARMS_CONFIG", default_value = "alarms.json")]
        config: PathBuf,

        /// Station details.
        #[command(flatten)]
        station: StationArgs,
    },

    /// Check a condition expression and show its meaning.
    ValidateCondition {
        /// The condition, e.g. "temperature > 85F && humidity > 80".
        condition: String,
    },

    /// Expand a template against sample data.
    ValidateTemplate {
        /// The template text.
        template: String,

        /// Channel kind the template is for (json and webhook must produce JSON).
        #[arg(short, long, default_value = "console")]
        kind: ChannelKind,
    },

    /// Load a configuration file and list its alarms.
    ValidateConfig {
        /// Alarm configuration file.
        #[arg(short, long, env = "WX_ALARMS_CONFIG", default_value = "alarms.json")]
        config: PathBuf,
    },

    /// Send a test notification for one alarm.
    TestChannel {
        /// Alarm name.
        alarm: String,

        /// Only send to channels of this kind.
        #[arg(long)]
        channel: Option<ChannelKind>,

        /// Alarm configuration file.
        #[arg(short, long, env = "WX_ALARMS_CONFIG", default_value = "alarms.json")]
        config: PathBuf,

        /// Station details.
        #[command(flatten)]
        station: StationArgs,
    },

    /// List the sensor fields conditions can reference.
    Fields,

    /// Write a sample configuration file.
    InitConfig {
        /// Path to write.
        #[arg(short, long, default_value = "alarms.json")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Arguments for `run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Alarm configuration file.
    #[arg(short, long, env = "WX_ALARMS_CONFIG", default_value = "alarms.json")]
    pub config: PathBuf,

    /// Observation source (JSON lines); standard input when omitted or "-".
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    pub no_watch: bool,

    /// Config file poll interval in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub watch_interval_ms: u64,

    /// Maximum queued network notifications.
    #[arg(long, default_value_t = 64)]
    pub queue_capacity: usize,

    /// Number of network send workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Per-send timeout in seconds.
    #[arg(long, default_value_t = 15)]
    pub send_timeout_secs: u64,

    /// Station details.
    #[command(flatten)]
    pub station: StationArgs,
}

/// Station metadata used by templates and solar schedules.
#[derive(Args, Debug, Clone)]
pub struct StationArgs {
    /// Station name shown in notifications.
    #[arg(long = "station", env = "WX_STATION_NAME", default_value = "Weather Station")]
    pub name: String,

    /// Station latitude in decimal degrees.
    #[arg(long, env = "WX_STATION_LATITUDE", requires = "longitude", allow_hyphen_values = true)]
    pub latitude: Option<f64>,

    /// Station longitude in decimal degrees.
    #[arg(long, env = "WX_STATION_LONGITUDE", requires = "latitude", allow_hyphen_values = true)]
    pub longitude: Option<f64>,

    /// Station time zone (IANA name, e.g. America/Chicago).
    #[arg(long, env = "WX_STATION_TIMEZONE")]
    pub timezone: Option<String>,
}
