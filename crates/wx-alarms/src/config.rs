//! Alarm configuration file loading.
//!
//! The file is a JSON object with an `alarms` array. Loading is all or
//! nothing: any invalid alarm rejects the whole file.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alarm::{Alarm, AlarmDefinition};
use crate::error::ConfigError;

/// On-disk layout of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Alarm definitions in file order.
    #[serde(default)]
    pub alarms: Vec<AlarmDefinition>,
}

/// A validated set of alarms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmConfig {
    /// Alarms in file order, names unique.
    pub alarms: Vec<Alarm>,
}

impl AlarmConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        debug!(path = %path.display(), alarms = config.alarms.len(), "loaded alarm configuration");
        Ok(config)
    }

    /// Parses and validates configuration JSON.
    ///
    /// Syntax and schema errors carry the one-based line and column.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;
        Self::from_definitions(file.alarms)
    }

    /// Validates definitions, rejecting duplicate names.
    pub fn from_definitions(definitions: Vec<AlarmDefinition>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut alarms = Vec::with_capacity(definitions.len());
        for def in definitions {
            let alarm = Alarm::from_definition(def)?;
            if !seen.insert(alarm.name.clone()) {
                return Err(ConfigError::DuplicateName { name: alarm.name });
            }
            alarms.push(alarm);
        }
        Ok(Self { alarms })
    }

    /// Serializes back to the file layout.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            alarms: self.alarms.iter().map(Alarm::to_definition).collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Looks up an alarm by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Alarm> {
        self.alarms.iter().find(|a| a.name == name)
    }

    /// Number of enabled alarms.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.alarms.iter().filter(|a| a.enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelConfig;
    use crate::schedule::Schedule;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
  "alarms": [
    {
      "name": "High Temp",
      "description": "Too hot",
      "condition": "temperature > 85F",
      "tags": ["heat"],
      "cooldown": 1800,
      "schedule": { "type": "time", "start_time": "08:00", "end_time": "20:00" },
      "channels": [
        { "type": "console" },
        { "type": "email", "to": ["ops@example.com"], "subject": "{{alarm_name}}" }
      ]
    },
    {
      "name": "Lightning",
      "condition": "*lightning_count",
      "enabled": false,
      "channels": [ { "type": "syslog", "message": "strike {{lightning_distance}} km" } ]
    }
  ]
}"#;

    mod load_tests {
        use super::*;

        #[test]
        fn parses_sample() {
            let config = AlarmConfig::from_json_str(SAMPLE).unwrap();
            assert_eq!(config.alarms.len(), 2);
            assert_eq!(config.enabled_count(), 1);

            let hot = config.get("High Temp").unwrap();
            assert_eq!(hot.cooldown_secs, 1800);
            assert!(matches!(hot.schedule, Some(Schedule::Time(_))));
            assert_eq!(hot.channels.len(), 2);

            let lightning = config.get("Lightning").unwrap();
            assert!(!lightning.enabled);
            assert_eq!(
                lightning.channels[0],
                ChannelConfig::Syslog {
                    template: Some("strike {{lightning_distance}} km".to_string())
                }
            );
        }

        #[test]
        fn load_from_file() {
            let mut file = NamedTempFile::new().unwrap();
            file.write_all(SAMPLE.as_bytes()).unwrap();
            let config = AlarmConfig::load(file.path()).unwrap();
            assert_eq!(config.alarms.len(), 2);
        }

        #[test]
        fn missing_file_is_io_error() {
            let dir = tempfile::tempdir().unwrap();
            let err = AlarmConfig::load(dir.path().join("missing.json")).unwrap_err();
            assert!(matches!(err, ConfigError::Io { .. }));
        }

        #[test]
        fn round_trips_through_json() {
            let config = AlarmConfig::from_json_str(SAMPLE).unwrap();
            let text = config.to_json_string().unwrap();
            assert_eq!(AlarmConfig::from_json_str(&text).unwrap(), config);
        }

        #[test]
        fn empty_file_has_no_alarms() {
            let config = AlarmConfig::from_json_str("{}").unwrap();
            assert!(config.alarms.is_empty());
        }
    }

    mod reject_tests {
        use super::*;

        #[test]
        fn syntax_error_has_location() {
            let err = AlarmConfig::from_json_str("{\n  \"alarms\": [\n    { \"name\": }\n  ]\n}").unwrap_err();
            match err {
                ConfigError::Parse { line, .. } => assert_eq!(line, 3),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn unknown_channel_type() {
            let text = r#"{"alarms":[{"name":"A","condition":"temperature > 1","channels":[{"type":"pager"}]}]}"#;
            assert!(matches!(
                AlarmConfig::from_json_str(text),
                Err(ConfigError::Parse { .. })
            ));
        }

        #[test]
        fn duplicate_names() {
            let text = r#"{"alarms":[
                {"name":"A","condition":"temperature > 1","channels":[{"type":"console"}]},
                {"name":"A","condition":"humidity > 1","channels":[{"type":"console"}]}
            ]}"#;
            let err = AlarmConfig::from_json_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::DuplicateName { name } if name == "A"));
        }

        #[test]
        fn bad_condition_names_alarm() {
            let text = r#"{"alarms":[{"name":"Bad","condition":"temprature > 1","channels":[{"type":"console"}]}]}"#;
            let err = AlarmConfig::from_json_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::Condition { ref alarm, .. } if alarm == "Bad"));
            assert!(err.to_string().contains("temprature"));
        }

        #[test]
        fn missing_channels() {
            let text = r#"{"alarms":[{"name":"Lonely","condition":"temperature > 1"}]}"#;
            assert!(matches!(
                AlarmConfig::from_json_str(text),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }
}
