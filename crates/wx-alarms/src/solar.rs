//! Sunrise and sunset times from the sunrise equation.
//!
//! Accuracy is within a couple of minutes at mid latitudes, which is enough
//! for schedule windows expressed in whole minutes.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::field::Location;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SUN_ALTITUDE_DEG: f64 = -0.833;
const OBLIQUITY_DEG: f64 = 23.4397;

/// Solar events for one calendar date at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daylight {
    /// The sun rises and sets.
    Normal {
        /// Sunrise instant.
        sunrise: DateTime<Utc>,
        /// Sunset instant.
        sunset: DateTime<Utc>,
    },
    /// The sun stays above the horizon all day.
    PolarDay,
    /// The sun stays below the horizon all day.
    PolarNight,
}

impl Daylight {
    /// Returns the sunrise instant, if the sun rises.
    #[must_use]
    pub const fn sunrise(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Normal { sunrise, .. } => Some(*sunrise),
            _ => None,
        }
    }

    /// Returns the sunset instant, if the sun sets.
    #[must_use]
    pub const fn sunset(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Normal { sunset, .. } => Some(*sunset),
            _ => None,
        }
    }
}

/// Computes sunrise and sunset for `date` (the observer's local calendar date).
#[must_use]
pub fn sun_times(date: NaiveDate, location: Location) -> Daylight {
    let days_since_epoch = date
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp()
        .div_euclid(86_400) as f64;
    let julian_midnight = UNIX_EPOCH_JD + days_since_epoch;
    let n = (julian_midnight - J2000 + 0.0008).ceil();

    let mean_solar_noon = n - location.longitude / 360.0;
    let mean_anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
    let m = mean_anomaly.to_radians();
    let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let ecliptic_longitude = (mean_anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let lambda = ecliptic_longitude.to_radians();
    let transit = J2000 + mean_solar_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * lambda).sin();

    let declination = (lambda.sin() * OBLIQUITY_DEG.to_radians().sin()).asin();
    let latitude = location.latitude.to_radians();
    let cos_hour_angle = (SUN_ALTITUDE_DEG.to_radians().sin()
        - latitude.sin() * declination.sin())
        / (latitude.cos() * declination.cos());

    if cos_hour_angle > 1.0 {
        return Daylight::PolarNight;
    }
    if cos_hour_angle < -1.0 {
        return Daylight::PolarDay;
    }

    let hour_angle_days = cos_hour_angle.acos().to_degrees() / 360.0;
    match (
        julian_to_utc(transit - hour_angle_days),
        julian_to_utc(transit + hour_angle_days),
    ) {
        (Some(sunrise), Some(sunset)) => Daylight::Normal { sunrise, sunset },
        _ => Daylight::PolarNight,
    }
}

fn julian_to_utc(julian: f64) -> Option<DateTime<Utc>> {
    let millis = ((julian - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}
