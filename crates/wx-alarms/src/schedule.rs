//! Alarm schedules: when an alarm is allowed to evaluate at all.
//!
//! Every variant except `always` works in local time. The zone is the
//! schedule's own `timezone`, else the station's, else UTC.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::field::{Location, StationInfo};
use crate::solar::{self, Daylight};

/// Largest accepted solar offset, in minutes.
pub const MAX_SUN_OFFSET_MINUTES: i32 = 24 * 60;

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// A wall-clock time with minute resolution, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Creates a time of day, or `None` if out of range.
    #[must_use]
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// Parses `HH:MM` (24-hour clock).
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidTime {
            value: text.to_string(),
        };
        let (h, m) = text.split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }

    fn contains(start: Self, end: Self, t: NaiveTime) -> bool {
        if start <= end {
            start.0 <= t && t < end.0
        } else {
            t >= start.0 || t < end.0
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// A daily time-of-day window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start_time: TimeOfDay,
    /// Exclusive end; earlier than `start_time` wraps past midnight.
    pub end_time: TimeOfDay,
    /// IANA time zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Tz>,
}

/// Active on selected weekdays, optionally within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    /// Day numbers, 0 = Sunday through 6 = Saturday.
    pub days_of_week: Vec<u8>,
    /// Optional window start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<TimeOfDay>,
    /// Optional window end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<TimeOfDay>,
    /// IANA time zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Tz>,
}

/// A solar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunEvent {
    /// Upper limb crosses the horizon in the morning.
    Sunrise,
    /// Upper limb crosses the horizon in the evening.
    Sunset,
}

impl SunEvent {
    const fn instant(self, daylight: Daylight) -> Option<DateTime<Utc>> {
        match self {
            Self::Sunrise => daylight.sunrise(),
            Self::Sunset => daylight.sunset(),
        }
    }
}

impl fmt::Display for SunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sunrise => f.write_str("sunrise"),
            Self::Sunset => f.write_str("sunset"),
        }
    }
}

/// Active relative to sunrise or sunset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunSchedule {
    /// Event that opens the window.
    pub sun_event: SunEvent,
    /// Minutes added to the opening event (may be negative).
    #[serde(default)]
    pub sun_offset: i32,
    /// Event that closes the window; without one the window runs to the end of the local day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sun_event_end: Option<SunEvent>,
    /// Minutes added to the closing event.
    #[serde(default)]
    pub sun_offset_end: i32,
    /// Explicit latitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Explicit longitude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Always use the station's coordinates.
    #[serde(default)]
    pub use_station_location: bool,
    /// IANA time zone used to pick the local date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Tz>,
}

impl SunSchedule {
    fn location(&self, station: &StationInfo) -> Result<Location, ScheduleError> {
        if !self.use_station_location {
            if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
                return Location::new(lat, lon);
            }
        }
        station.location.ok_or(ScheduleError::NoLocation)
    }

    fn is_active(&self, now: DateTime<Utc>, station: &StationInfo) -> Result<bool, ScheduleError> {
        let location = self.location(station)?;
        let local_date = now.with_timezone(&zone(self.timezone, station)).date_naive();
        let daylight = solar::sun_times(local_date, location);

        let Some(start) = self.sun_event.instant(daylight) else {
            return Ok(false);
        };
        let start = start + TimeDelta::minutes(i64::from(self.sun_offset));

        let Some(end_event) = self.sun_event_end else {
            return Ok(now >= start);
        };
        let Some(end) = end_event.instant(daylight) else {
            return Ok(false);
        };
        let end = end + TimeDelta::minutes(i64::from(self.sun_offset_end));

        if start <= end {
            Ok(start <= now && now <= end)
        } else {
            Ok(now >= start || now <= end)
        }
    }

    fn validate(&self) -> Result<(), ScheduleError> {
        for minutes in [self.sun_offset, self.sun_offset_end] {
            if minutes.abs() > MAX_SUN_OFFSET_MINUTES {
                return Err(ScheduleError::OffsetOutOfRange { minutes });
            }
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Location::new(lat, lon).map(|_| ()),
            (None, None) => Ok(()),
            _ => Err(ScheduleError::InvalidLocation {
                reason: "latitude and longitude must be given together".to_string(),
            }),
        }
    }
}

/// When an alarm may evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Always active.
    Always,
    /// Active inside a daily time window.
    #[serde(alias = "daily")]
    Time(TimeWindow),
    /// Active on selected weekdays.
    Weekly(WeeklySchedule),
    /// Active relative to sunrise or sunset.
    Sun(SunSchedule),
}

impl Schedule {
    /// Returns whether the schedule permits evaluation at `now`.
    ///
    /// A solar schedule with no resolvable location returns
    /// [`ScheduleError::NoLocation`].
    pub fn is_active(&self, now: DateTime<Utc>, station: &StationInfo) -> Result<bool, ScheduleError> {
        match self {
            Self::Always => Ok(true),
            Self::Time(w) => {
                let local = now.with_timezone(&zone(w.timezone, station));
                Ok(TimeOfDay::contains(w.start_time, w.end_time, local.time()))
            }
            Self::Weekly(w) => {
                let local = now.with_timezone(&zone(w.timezone, station));
                let day = local.weekday().num_days_from_sunday() as u8;
                if !w.days_of_week.contains(&day) {
                    return Ok(false);
                }
                match (w.start_time, w.end_time) {
                    (Some(start), Some(end)) => Ok(TimeOfDay::contains(start, end, local.time())),
                    _ => Ok(true),
                }
            }
            Self::Sun(s) => s.is_active(now, station),
        }
    }

    /// Checks the schedule for values that can never be active or are malformed.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Self::Always => Ok(()),
            Self::Time(w) => check_window(w.start_time, w.end_time),
            Self::Weekly(w) => {
                if w.days_of_week.is_empty() {
                    return Err(ScheduleError::NoDays);
                }
                if let Some(&day) = w.days_of_week.iter().find(|&&d| d > 6) {
                    return Err(ScheduleError::InvalidDay { day });
                }
                match (w.start_time, w.end_time) {
                    (Some(start), Some(end)) => check_window(start, end),
                    (None, None) => Ok(()),
                    _ => Err(ScheduleError::IncompleteRange),
                }
            }
            Self::Sun(s) => s.validate(),
        }
    }

    /// The schedule's own time zone, if set.
    #[must_use]
    pub const fn timezone(&self) -> Option<Tz> {
        match self {
            Self::Always => None,
            Self::Time(w) => w.timezone,
            Self::Weekly(w) => w.timezone,
            Self::Sun(s) => s.timezone,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        let text = match self {
            Self::Always => return "Always active".to_string(),
            Self::Time(w) => format!("Daily from {} to {}", w.start_time, w.end_time),
            Self::Weekly(w) => {
                let mut days = w.days_of_week.clone();
                days.sort_unstable();
                days.dedup();
                let names: Vec<&str> = days
                    .iter()
                    .filter_map(|&d| DAY_NAMES.get(usize::from(d)).copied())
                    .collect();
                match (w.start_time, w.end_time) {
                    (Some(start), Some(end)) => {
                        format!("Weekly on {} from {start} to {end}", names.join(", "))
                    }
                    _ => format!("Weekly on {} (all day)", names.join(", ")),
                }
            }
            Self::Sun(s) => {
                let mut text = format!("From {}{}", s.sun_event, offset_suffix(s.sun_offset));
                if let Some(end) = s.sun_event_end {
                    text.push_str(&format!(" to {end}{}", offset_suffix(s.sun_offset_end)));
                } else {
                    text.push_str(" until end of day");
                }
                match (s.use_station_location, s.latitude, s.longitude) {
                    (false, Some(lat), Some(lon)) => {
                        text.push_str(&format!(" at {lat:.4}, {lon:.4}"));
                    }
                    _ => text.push_str(" at station location"),
                }
                text
            }
        };
        match self.timezone() {
            Some(tz) => format!("{text} ({tz})"),
            None => text,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn zone(own: Option<Tz>, station: &StationInfo) -> Tz {
    own.or(station.timezone).unwrap_or(Tz::UTC)
}

fn check_window(start: TimeOfDay, end: TimeOfDay) -> Result<(), ScheduleError> {
    if start == end {
        return Err(ScheduleError::EmptyWindow {
            time: start.to_string(),
        });
    }
    Ok(())
}

fn offset_suffix(minutes: i32) -> String {
    match minutes {
        0 => String::new(),
        m if m > 0 => format!(" +{m}m"),
        m => format!(" {m}m"),
    }
}
