//! Alarm definitions and per-alarm runtime state.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::ChannelConfig;
use crate::condition::{self, Condition};
use crate::error::ConfigError;
use crate::evaluator::PreviousValues;
use crate::schedule::Schedule;

/// An alarm as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    /// Unique name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Condition source text.
    pub condition: String,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Minimum seconds between firings.
    #[serde(default)]
    pub cooldown: u64,
    /// Whether the alarm is evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When the alarm is armed; absent means always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Where notifications go.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

const fn default_enabled() -> bool {
    true
}

/// A validated alarm with its compiled condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    /// Unique name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Condition source text.
    pub condition_text: String,
    /// Compiled condition.
    pub condition: Condition,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Minimum seconds between firings.
    pub cooldown_secs: u64,
    /// Whether the alarm is evaluated.
    pub enabled: bool,
    /// When the alarm is armed; `None` means always.
    pub schedule: Option<Schedule>,
    /// Where notifications go, in dispatch order.
    pub channels: Vec<ChannelConfig>,
}

impl Alarm {
    /// Maximum allowed length for alarm names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates a new alarm builder.
    pub fn builder(name: impl Into<String>, condition: impl Into<String>) -> AlarmBuilder {
        AlarmBuilder::new(name, condition)
    }

    /// Validates a definition and compiles its condition.
    pub fn from_definition(def: AlarmDefinition) -> Result<Self, ConfigError> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::Invalid {
                alarm: String::new(),
                reason: "alarm name cannot be empty".to_string(),
            });
        }
        if name.len() > Self::MAX_NAME_LENGTH {
            return Err(ConfigError::Invalid {
                alarm: name,
                reason: format!(
                    "alarm name exceeds maximum length of {} characters",
                    Self::MAX_NAME_LENGTH
                ),
            });
        }

        let condition = condition::parse(&def.condition).map_err(|source| ConfigError::Condition {
            alarm: name.clone(),
            source,
        })?;

        if def.channels.is_empty() {
            return Err(ConfigError::Invalid {
                alarm: name,
                reason: "at least one channel is required".to_string(),
            });
        }
        for (index, channel) in def.channels.iter().enumerate() {
            channel.validate().map_err(|reason| ConfigError::Invalid {
                alarm: name.clone(),
                reason: format!("channel {} ({}): {reason}", index + 1, channel.kind()),
            })?;
        }

        if let Some(schedule) = &def.schedule {
            schedule.validate().map_err(|source| ConfigError::Schedule {
                alarm: name.clone(),
                source,
            })?;
        }

        Ok(Self {
            name,
            description: def.description,
            condition_text: def.condition,
            condition,
            tags: def.tags,
            cooldown_secs: def.cooldown,
            enabled: def.enabled,
            schedule: def.schedule,
            channels: def.channels,
        })
    }

    /// Converts back to the on-disk form.
    #[must_use]
    pub fn to_definition(&self) -> AlarmDefinition {
        AlarmDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            condition: self.condition_text.clone(),
            tags: self.tags.clone(),
            cooldown: self.cooldown_secs,
            enabled: self.enabled,
            schedule: self.schedule.clone(),
            channels: self.channels.clone(),
        }
    }

    /// Returns the cooldown as a [`Duration`].
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Plain-English rendering of the condition.
    #[must_use]
    pub fn paraphrase(&self) -> String {
        self.condition.paraphrase()
    }
}

/// Builder for creating [`Alarm`] instances.
#[derive(Debug)]
pub struct AlarmBuilder {
    definition: AlarmDefinition,
}

impl AlarmBuilder {
    fn new(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            definition: AlarmDefinition {
                name: name.into(),
                description: String::new(),
                condition: condition.into(),
                tags: Vec::new(),
                cooldown: 0,
                enabled: true,
                schedule: None,
                channels: Vec::new(),
            },
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = description.into();
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.definition.tags.push(tag.into());
        self
    }

    /// Sets the cooldown.
    #[must_use]
    pub const fn cooldown(mut self, cooldown: Duration) -> Self {
        self.definition.cooldown = cooldown.as_secs();
        self
    }

    /// Sets whether the alarm is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.definition.enabled = enabled;
        self
    }

    /// Sets the schedule.
    #[must_use]
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.definition.schedule = Some(schedule);
        self
    }

    /// Adds a channel.
    #[must_use]
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.definition.channels.push(channel);
        self
    }

    /// Builds and validates the [`Alarm`].
    pub fn build(self) -> Result<Alarm, ConfigError> {
        Alarm::from_definition(self.definition)
    }
}

// ============ Runtime state ============

/// Mutable per-alarm state owned by the runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmState {
    /// Change-detection baselines.
    pub previous_values: PreviousValues,
    /// When the alarm last fired.
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Number of firings since the alarm was loaded.
    pub triggered_count: u64,
}

impl AlarmState {
    /// Time left before the alarm may fire again.
    ///
    /// A `last_fired_at` in the future (clock skew) counts as a full cooldown.
    #[must_use]
    pub fn cooldown_remaining(&self, cooldown: Duration, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.last_fired_at else {
            return Duration::ZERO;
        };
        let elapsed = now.signed_duration_since(last);
        if elapsed < TimeDelta::zero() {
            return cooldown;
        }
        let Ok(elapsed) = elapsed.to_std() else {
            return cooldown;
        };
        cooldown.saturating_sub(elapsed)
    }

    /// Returns whether the alarm is still cooling down.
    #[must_use]
    pub fn is_in_cooldown(&self, cooldown: Duration, now: DateTime<Utc>) -> bool {
        !self.cooldown_remaining(cooldown, now).is_zero()
    }

    /// Records a firing at `now`.
    pub fn record_firing(&mut self, now: DateTime<Utc>) {
        self.last_fired_at = Some(now);
        self.triggered_count += 1;
    }
}
