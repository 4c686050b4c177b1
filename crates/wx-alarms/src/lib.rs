//! Alarm rules for weather station observations.
//!
//! `wx-alarms` evaluates user-defined alarm rules against a stream of sensor
//! observations and sends notifications when a rule fires.
//!
//! # Features
//!
//! - **Condition language**: `temperature > 85F && humidity > 80`, with unit
//!   suffixes, `&&`/`||`, parentheses and change detection (`*lightning_count`)
//! - **Schedules**: time windows, weekdays and sunrise/sunset relative windows
//! - **Cooldowns**: minimum time between firings of the same alarm
//! - **Channels**: console, syslog, macOS log, Windows event log, email,
//!   SMS, webhooks, CSV and JSON files, with `{{placeholder}}` templates
//! - **Hot reload**: alarm state survives configuration reloads by name
//!
//! # Example
//!
//! ```rust
//! use wx_alarms::{AlarmConfig, AlarmRuntime, ChannelRegistry, Field, Observation, StationInfo};
//! use chrono::Utc;
//!
//! let config = AlarmConfig::from_json_str(r#"{
//!     "alarms": [{
//!         "name": "High Temp",
//!         "condition": "temperature > 85F",
//!         "cooldown": 1800,
//!         "channels": [{ "type": "console" }]
//!     }]
//! }"#).unwrap();
//!
//! let runtime = AlarmRuntime::new(config, StationInfo::named("Backyard"), ChannelRegistry::new());
//!
//! let observation = Observation::new(Utc::now()).with(Field::Temperature, 31.0);
//! let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! let summary = rt.block_on(runtime.process_observation(&observation));
//! assert_eq!(summary.fired, 1);
//! ```
//!
//! # Validating input
//!
//! ```rust
//! use wx_alarms::{ChannelKind, validate_condition, validate_template};
//!
//! assert_eq!(
//!     validate_condition("wind_gust > 25mph").unwrap(),
//!     "When wind gust exceeds 25 mph"
//! );
//! assert!(validate_template(r#"{"alarm": "{{alarm_name}}"}"#, ChannelKind::Json).is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alarm;
pub mod channels;
pub mod condition;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod field;
pub mod runtime;
pub mod schedule;
pub mod settings;
pub mod solar;
pub mod template;
pub mod watch;

// Re-export main types at crate root
pub use alarm::{Alarm, AlarmBuilder, AlarmDefinition, AlarmState};
pub use channels::{ChannelConfig, ChannelKind, ChannelRegistry, Notification, NotificationChannel};
pub use condition::{Condition, parse, validate_condition};
pub use config::AlarmConfig;
pub use dispatch::{ChannelOutcome, DispatchReport, Dispatcher, Firing};
pub use error::{
    AlarmError, ChannelError, ConditionError, ConfigError, EvaluationError, Result, ScheduleError, TemplateError,
};
pub use evaluator::{PreviousValues, evaluate};
pub use field::{Field, Location, Observation, StationInfo, available_fields};
pub use runtime::{AlarmRuntime, AlarmStatus, EvaluationSummary, ReloadSummary, RuntimeConfig};
pub use schedule::Schedule;
pub use settings::ProviderSettings;
pub use template::{TemplateContext, TemplatePreview, expand, validate_template};
pub use watch::ConfigWatcher;
