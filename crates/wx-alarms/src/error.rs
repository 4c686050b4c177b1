//! Error types for the wx-alarms crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::channels::ChannelKind;
use crate::field::Field;

/// Errors produced while parsing a condition expression.
///
/// Positions are zero-based byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// The condition text is empty or whitespace.
    #[error("condition is empty")]
    Empty,

    /// The text does not match the condition grammar.
    #[error("syntax error at position {position}: {message}")]
    Syntax {
        /// Offset of the offending token.
        position: usize,
        /// What was expected or found.
        message: String,
    },

    /// An identifier that is not a known sensor field.
    #[error("unknown field '{name}' at position {position}")]
    UnknownField {
        /// The identifier as written.
        name: String,
        /// Offset of the identifier.
        position: usize,
    },

    /// A unit suffix that is not valid for the field it is compared with.
    #[error("invalid unit '{unit}' for field '{field}' at position {position}")]
    InvalidUnit {
        /// The suffix as written.
        unit: String,
        /// Canonical name of the field.
        field: String,
        /// Offset of the literal carrying the suffix.
        position: usize,
    },
}

impl ConditionError {
    /// Returns the source offset the error points at, if any.
    #[must_use]
    pub const fn position(&self) -> Option<usize> {
        match self {
            Self::Empty => None,
            Self::Syntax { position, .. }
            | Self::UnknownField { position, .. }
            | Self::InvalidUnit { position, .. } => Some(*position),
        }
    }
}

/// Errors produced while evaluating a parsed condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The observation carries no reading for a referenced field.
    #[error("observation has no value for field '{field}'")]
    MissingField {
        /// The field that was referenced.
        field: Field,
    },
}

/// Errors produced by schedule validation or evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A time of day that is not `HH:MM`.
    #[error("invalid time '{value}' (use HH:MM)")]
    InvalidTime {
        /// The rejected text.
        value: String,
    },

    /// A time window whose start equals its end.
    #[error("time window starting and ending at {time} is empty")]
    EmptyWindow {
        /// The shared start/end time.
        time: String,
    },

    /// Only one side of a time range was supplied.
    #[error("time range needs both start_time and end_time")]
    IncompleteRange,

    /// A weekday number outside 0..=6.
    #[error("invalid day of week {day} (0=Sunday .. 6=Saturday)")]
    InvalidDay {
        /// The rejected day number.
        day: u8,
    },

    /// A weekly schedule with no days.
    #[error("weekly schedule needs at least one day")]
    NoDays,

    /// Coordinates outside the valid range.
    #[error("invalid location: {reason}")]
    InvalidLocation {
        /// Which coordinate is wrong.
        reason: String,
    },

    /// A solar schedule with no usable location.
    #[error("no location available for solar schedule")]
    NoLocation,

    /// A solar offset beyond one day.
    #[error("sun offset {minutes} minutes is out of range (max ±1440)")]
    OffsetOutOfRange {
        /// The rejected offset.
        minutes: i32,
    },
}

/// Errors produced by template validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The expanded template is not valid JSON.
    #[error("template output is not valid JSON at line {line}, column {column}: {message}")]
    InvalidJson {
        /// One-based line of the error in the expanded output.
        line: usize,
        /// One-based column of the error in the expanded output.
        column: usize,
        /// Parser message.
        message: String,
        /// The expanded output that failed to parse.
        sample: String,
    },
}

/// Errors produced by a notification channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel cannot deliver on this platform.
    #[error("{kind} channel is not supported: {reason}")]
    Unsupported {
        /// The channel kind.
        kind: ChannelKind,
        /// Why it is unsupported.
        reason: String,
    },

    /// A provider setting is missing from the environment.
    #[error("{kind} channel is missing setting {setting}")]
    MissingSetting {
        /// The channel kind.
        kind: ChannelKind,
        /// The environment variable that is unset.
        setting: &'static str,
    },

    /// No implementation is registered for the channel kind.
    #[error("no {kind} channel registered")]
    NotRegistered {
        /// The channel kind.
        kind: ChannelKind,
    },

    /// The channel configuration is unusable at send time.
    #[error("invalid {kind} channel configuration: {reason}")]
    InvalidConfig {
        /// The channel kind.
        kind: ChannelKind,
        /// The reason.
        reason: String,
    },

    /// A provider rejected the request.
    #[error("{kind} provider returned status {status}: {body}")]
    Rejected {
        /// The channel kind.
        kind: ChannelKind,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Transport failure talking to a provider.
    #[error("{kind} delivery failed: {reason}")]
    Delivery {
        /// The channel kind.
        kind: ChannelKind,
        /// The reason.
        reason: String,
    },

    /// The send did not complete in time.
    #[error("{kind} delivery timed out after {seconds}s")]
    Timeout {
        /// The channel kind.
        kind: ChannelKind,
        /// The timeout that elapsed.
        seconds: u64,
    },

    /// Local I/O failure (files, sockets, subprocesses).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced while loading or validating alarm configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON or does not match the schema.
    #[error("invalid config at line {line}, column {column}: {message}")]
    Parse {
        /// One-based line.
        line: usize,
        /// One-based column.
        column: usize,
        /// Parser message.
        message: String,
    },

    /// Two alarms share a name.
    #[error("duplicate alarm name '{name}'")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },

    /// An alarm's condition does not parse.
    #[error("alarm '{alarm}': {source}")]
    Condition {
        /// The alarm name.
        alarm: String,
        /// The parse error.
        #[source]
        source: ConditionError,
    },

    /// An alarm's schedule is invalid.
    #[error("alarm '{alarm}': {source}")]
    Schedule {
        /// The alarm name.
        alarm: String,
        /// The schedule error.
        #[source]
        source: ScheduleError,
    },

    /// Any other validation failure.
    #[error("alarm '{alarm}': {reason}")]
    Invalid {
        /// The alarm name (may be empty when the name itself is missing).
        alarm: String,
        /// The reason.
        reason: String,
    },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// Top-level error for alarm operations.
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Configuration load or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A condition failed to parse.
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// A condition failed to evaluate.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// A schedule failed to validate or evaluate.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// A template failed validation.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A channel failed to deliver.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// No alarm with the given name is loaded.
    #[error("alarm not found: {name}")]
    AlarmNotFound {
        /// The requested name.
        name: String,
    },

    /// A reload was requested but no config file has been loaded.
    #[error("no configuration file has been loaded")]
    NoConfigSource,
}

/// Result type for alarm operations.
pub type Result<T> = std::result::Result<T, AlarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_error_display_includes_position() {
        let err = ConditionError::Syntax {
            position: 12,
            message: "expected operator".to_string(),
        };
        assert_eq!(err.to_string(), "syntax error at position 12: expected operator");
        assert_eq!(err.position(), Some(12));
    }

    #[test]
    fn empty_condition_has_no_position() {
        assert_eq!(ConditionError::Empty.position(), None);
    }

    #[test]
    fn invalid_unit_display() {
        let err = ConditionError::InvalidUnit {
            unit: "mph".to_string(),
            field: "humidity".to_string(),
            position: 11,
        };
        assert_eq!(
            err.to_string(),
            "invalid unit 'mph' for field 'humidity' at position 11"
        );
    }

    #[test]
    fn missing_field_display() {
        let err = EvaluationError::MissingField {
            field: Field::WindGust,
        };
        assert_eq!(err.to_string(), "observation has no value for field 'wind_gust'");
    }

    #[test]
    fn channel_error_names_kind() {
        let err = ChannelError::MissingSetting {
            kind: ChannelKind::Email,
            setting: "SMTP_HOST",
        };
        assert_eq!(err.to_string(), "email channel is missing setting SMTP_HOST");
    }

    #[test]
    fn config_error_from_json_keeps_location() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{\n  \"alarms\": [,]\n}");
        let err = ConfigError::from(parse.unwrap_err());
        match err {
            ConfigError::Parse { line, column, .. } => {
                assert_eq!(line, 2);
                assert!(column > 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn alarm_error_is_transparent() {
        let err: AlarmError = ConfigError::DuplicateName {
            name: "Hot".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "duplicate alarm name 'Hot'");
    }
}
