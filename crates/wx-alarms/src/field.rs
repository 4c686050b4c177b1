//! Sensor fields, observations and station metadata.
//!
//! All readings are stored in canonical units (°C, m/s, mb, mm, km). Unit
//! conversion for display lives here so templates and paraphrases agree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScheduleError;

/// A known sensor quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Air temperature, °C.
    #[serde(alias = "temp")]
    Temperature,
    /// Relative humidity, %.
    Humidity,
    /// Station pressure, mb.
    Pressure,
    /// Average wind speed, m/s.
    #[serde(alias = "wind")]
    WindSpeed,
    /// Wind gust, m/s.
    WindGust,
    /// Wind direction, degrees.
    WindDirection,
    /// Illuminance, lux.
    #[serde(alias = "light")]
    Lux,
    /// UV index.
    #[serde(alias = "uv_index")]
    Uv,
    /// Rain rate, mm/hr.
    #[serde(alias = "rain_accumulated")]
    RainRate,
    /// Rain since local midnight, mm.
    #[serde(alias = "rain_accumulation")]
    RainDaily,
    /// Lightning strikes in the reporting interval.
    LightningCount,
    /// Average lightning strike distance, km.
    LightningDistance,
    /// Precipitation type code.
    PrecipitationType,
}

/// Which unit suffixes a field accepts in condition literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitClass {
    /// Accepts `F`/`C`.
    Temperature,
    /// Accepts `mph`/`m/s`.
    WindSpeed,
    /// Accepts no suffix.
    Plain,
}

impl Field {
    /// Every field, in display order.
    pub const ALL: [Self; 13] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::WindSpeed,
        Self::WindGust,
        Self::WindDirection,
        Self::Lux,
        Self::Uv,
        Self::RainRate,
        Self::RainDaily,
        Self::LightningCount,
        Self::LightningDistance,
        Self::PrecipitationType,
    ];

    /// Canonical identifier used in conditions and templates.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::WindSpeed => "wind_speed",
            Self::WindGust => "wind_gust",
            Self::WindDirection => "wind_direction",
            Self::Lux => "lux",
            Self::Uv => "uv",
            Self::RainRate => "rain_rate",
            Self::RainDaily => "rain_daily",
            Self::LightningCount => "lightning_count",
            Self::LightningDistance => "lightning_distance",
            Self::PrecipitationType => "precipitation_type",
        }
    }

    /// Alternate identifiers accepted by the parser.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Temperature => &["temp"],
            Self::WindSpeed => &["wind"],
            Self::Lux => &["light"],
            Self::Uv => &["uv_index"],
            Self::RainRate => &["rain_accumulated"],
            Self::RainDaily => &["rain_accumulation"],
            _ => &[],
        }
    }

    /// Looks up a field by canonical name or alias.
    ///
    /// Names are trimmed, lowercased and have spaces replaced by `_` first,
    /// so `Wind Gust` and `WIND_GUST` both resolve to [`Field::WindGust`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let key = name.trim().to_ascii_lowercase().replace(' ', "_");
        Self::ALL
            .into_iter()
            .find(|f| f.name() == key || f.aliases().contains(&key.as_str()))
    }

    /// Human-readable name used in paraphrases.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::WindSpeed => "wind speed",
            Self::WindGust => "wind gust",
            Self::WindDirection => "wind direction",
            Self::Lux => "light level",
            Self::Uv => "UV index",
            Self::RainRate => "rain rate",
            Self::RainDaily => "daily rainfall",
            Self::LightningCount => "lightning strike count",
            Self::LightningDistance => "lightning distance",
            Self::PrecipitationType => "precipitation type",
        }
    }

    /// Title-case label used in sensor summaries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
            Self::Pressure => "Pressure",
            Self::WindSpeed => "Wind Speed",
            Self::WindGust => "Wind Gust",
            Self::WindDirection => "Wind Direction",
            Self::Lux => "Illuminance",
            Self::Uv => "UV Index",
            Self::RainRate => "Rain Rate",
            Self::RainDaily => "Daily Rain",
            Self::LightningCount => "Lightning",
            Self::LightningDistance => "Lightning Distance",
            Self::PrecipitationType => "Precipitation Type",
        }
    }

    /// The unit suffixes this field accepts.
    #[must_use]
    pub const fn unit_class(self) -> UnitClass {
        match self {
            Self::Temperature => UnitClass::Temperature,
            Self::WindSpeed | Self::WindGust => UnitClass::WindSpeed,
            _ => UnitClass::Plain,
        }
    }

    /// Canonical unit symbol, empty for unitless fields.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
            Self::Pressure => "mb",
            Self::WindSpeed | Self::WindGust => "m/s",
            Self::WindDirection => "°",
            Self::Lux => "lux",
            Self::RainRate => "mm/hr",
            Self::RainDaily => "mm",
            Self::LightningCount => "strikes",
            Self::LightningDistance => "km",
            Self::Uv | Self::PrecipitationType => "",
        }
    }

    /// Decimal places used when rendering a reading.
    #[must_use]
    pub const fn precision(self) -> usize {
        match self {
            Self::Temperature
            | Self::WindSpeed
            | Self::WindGust
            | Self::LightningDistance => 1,
            Self::Pressure | Self::RainRate | Self::RainDaily => 2,
            _ => 0,
        }
    }

    /// Formats a canonical reading with the field's precision.
    #[must_use]
    pub fn format_value(self, value: f64) -> String {
        format!("{value:.prec$}", prec = self.precision())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown field '{s}'"))
    }
}

/// Returns every accepted identifier, canonical names first.
#[must_use]
pub fn available_fields() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Field::ALL.iter().map(|f| f.name()).collect();
    names.extend(Field::ALL.iter().flat_map(|f| f.aliases().iter().copied()));
    names
}

// ============ Unit conversion ============

/// Converts degrees Fahrenheit to Celsius.
#[must_use]
pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

/// Converts degrees Celsius to Fahrenheit.
#[must_use]
pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Metres per second in one mile per hour.
pub const MS_PER_MPH: f64 = 0.44704;

/// Converts miles per hour to metres per second.
#[must_use]
pub fn mph_to_ms(mph: f64) -> f64 {
    mph * MS_PER_MPH
}

/// Converts metres per second to miles per hour.
#[must_use]
pub fn ms_to_mph(ms: f64) -> f64 {
    ms / MS_PER_MPH
}

/// Converts millimetres to inches.
#[must_use]
pub fn mm_to_inches(mm: f64) -> f64 {
    mm / 25.4
}

/// Converts kilometres to miles.
#[must_use]
pub fn km_to_miles(km: f64) -> f64 {
    km * 0.621_371
}

/// Converts millibars to inches of mercury.
#[must_use]
pub fn mb_to_inhg(mb: f64) -> f64 {
    mb * 0.029_53
}

/// Eight-point compass direction for a bearing in degrees.
#[must_use]
pub fn cardinal(degrees: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let normalized = degrees.rem_euclid(360.0);
    let index = ((normalized + 22.5) / 45.0) as usize % 8;
    POINTS[index]
}

/// Formats a number with thousands separators and no decimals.
#[must_use]
pub fn format_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0.0 && digits != "0" {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ============ Observation ============

/// One timestamped set of sensor readings in canonical units.
///
/// Deserializes from a flat JSON object; keys that are not known fields are
/// ignored and a missing `timestamp` means "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawObservation", into = "RawObservation")]
pub struct Observation {
    /// When the readings were taken.
    pub timestamp: DateTime<Utc>,
    readings: BTreeMap<Field, f64>,
}

impl Observation {
    /// Creates an observation with no readings.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            readings: BTreeMap::new(),
        }
    }

    /// Adds a reading.
    #[must_use]
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.readings.insert(field, value);
        self
    }

    /// Sets a reading in place.
    pub fn set(&mut self, field: Field, value: f64) {
        self.readings.insert(field, value);
    }

    /// Returns the reading for a field.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<f64> {
        self.readings.get(&field).copied()
    }

    /// Iterates readings in field order.
    pub fn readings(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        self.readings.iter().map(|(f, v)| (*f, *v))
    }

    /// A representative observation used for test sends and template previews.
    #[must_use]
    pub fn sample(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp)
            .with(Field::Temperature, 24.5)
            .with(Field::Humidity, 65.0)
            .with(Field::Pressure, 1013.25)
            .with(Field::WindSpeed, 4.2)
            .with(Field::WindGust, 7.8)
            .with(Field::WindDirection, 225.0)
            .with(Field::Lux, 42_000.0)
            .with(Field::Uv, 6.0)
            .with(Field::RainRate, 0.0)
            .with(Field::RainDaily, 1.4)
            .with(Field::LightningCount, 0.0)
            .with(Field::LightningDistance, 0.0)
            .with(Field::PrecipitationType, 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    values: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawObservation> for Observation {
    type Error = String;

    fn try_from(raw: RawObservation) -> Result<Self, Self::Error> {
        let mut obs = Self::new(raw.timestamp.unwrap_or_else(Utc::now));
        // Fields set from their canonical key; aliases never overwrite these.
        let mut canonical = BTreeSet::new();
        for (key, value) in raw.values {
            let Some(field) = Field::from_name(&key) else {
                continue;
            };
            let v = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| format!("field '{key}' is out of range"))?,
                other => return Err(format!("field '{key}' must be a number, got {other}")),
            };
            let is_canonical = key == field.name();
            if obs.get(field).is_some() && (canonical.contains(&field) || !is_canonical) {
                debug!(field = field.name(), key = %key, "duplicate reading ignored");
                continue;
            }
            if is_canonical {
                canonical.insert(field);
            }
            obs.set(field, v);
        }
        Ok(obs)
    }
}

impl From<Observation> for RawObservation {
    fn from(obs: Observation) -> Self {
        let values = obs
            .readings
            .into_iter()
            .map(|(f, v)| (f.name().to_string(), serde_json::Value::from(v)))
            .collect();
        Self {
            timestamp: Some(obs.timestamp),
            values,
        }
    }
}

// ============ Station ============

/// Geographic coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude, positive north.
    pub latitude: f64,
    /// Longitude, positive east.
    pub longitude: f64,
}

impl Location {
    /// Creates a validated location.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ScheduleError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ScheduleError::InvalidLocation {
                reason: format!("latitude {latitude} outside -90..=90"),
            });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ScheduleError::InvalidLocation {
                reason: format!("longitude {longitude} outside -180..=180"),
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Metadata about the reporting station.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationInfo {
    /// Station display name.
    pub name: String,
    /// Station coordinates, used by solar schedules.
    pub location: Option<Location>,
    /// Station time zone, used when a schedule names none.
    pub timezone: Option<Tz>,
}

impl StationInfo {
    /// Creates station info with just a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the location.
    #[must_use]
    pub const fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the time zone.
    #[must_use]
    pub const fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    mod field_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("temperature", Field::Temperature ; "canonical temperature")]
        #[test_case("temp", Field::Temperature ; "temperature alias")]
        #[test_case("wind", Field::WindSpeed ; "wind alias")]
        #[test_case("light", Field::Lux ; "light alias")]
        #[test_case("uv_index", Field::Uv ; "uv alias")]
        #[test_case("rain_accumulated", Field::RainRate ; "rain rate alias")]
        #[test_case("rain_accumulation", Field::RainDaily ; "rain daily alias")]
        fn from_name_resolves(name: &str, expected: Field) {
            assert_eq!(Field::from_name(name), Some(expected));
        }

        #[test_case("Temperature", Field::Temperature ; "title case")]
        #[test_case("HUMIDITY", Field::Humidity ; "upper case")]
        #[test_case("Wind Gust", Field::WindGust ; "spaces become underscores")]
        #[test_case("  TEMP ", Field::Temperature ; "padded alias")]
        fn from_name_normalizes(name: &str, expected: Field) {
            assert_eq!(Field::from_name(name), Some(expected));
        }

        #[test]
        fn from_name_rejects_unknown() {
            assert_eq!(Field::from_name("dewpoint"), None);
            assert_eq!(Field::from_name(""), None);
        }

        #[test]
        fn canonical_names_round_trip() {
            for field in Field::ALL {
                assert_eq!(Field::from_name(field.name()), Some(field));
                assert_eq!(field.to_string(), field.name());
            }
        }

        #[test]
        fn unit_classes() {
            assert_eq!(Field::Temperature.unit_class(), UnitClass::Temperature);
            assert_eq!(Field::WindGust.unit_class(), UnitClass::WindSpeed);
            assert_eq!(Field::Humidity.unit_class(), UnitClass::Plain);
        }

        #[test]
        fn available_fields_lists_aliases() {
            let names = available_fields();
            assert!(names.contains(&"temperature"));
            assert!(names.contains(&"temp"));
            assert_eq!(names.len(), 13 + 6);
        }
    }

    mod conversion_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn temperature_conversions() {
            assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 1e-9);
            assert!((celsius_to_fahrenheit(-40.0) + 40.0).abs() < 1e-9);
        }

        #[test]
        fn wind_conversions() {
            assert!((mph_to_ms(10.0) - 4.4704).abs() < 1e-9);
            assert!((ms_to_mph(mph_to_ms(25.0)) - 25.0).abs() < 1e-9);
        }

        #[test_case(0.0, "N")]
        #[test_case(44.0, "NE")]
        #[test_case(180.0, "S")]
        #[test_case(350.0, "N")]
        #[test_case(-90.0, "W")]
        fn cardinal_points(deg: f64, expected: &str) {
            assert_eq!(cardinal(deg), expected);
        }

        #[test_case(0.0, "0")]
        #[test_case(999.0, "999")]
        #[test_case(42_000.0, "42,000")]
        #[test_case(1_234_567.0, "1,234,567")]
        fn thousands(value: f64, expected: &str) {
            assert_eq!(format_thousands(value), expected);
        }
    }

    mod observation_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn deserializes_known_fields_and_skips_unknown() {
            let json = r#"{
                "timestamp": "2024-06-01T12:00:00Z",
                "temperature": 21.5,
                "wind": 3.0,
                "battery": 2.6,
                "station_id": "ST-1"
            }"#;
            let obs: Observation = serde_json::from_str(json).unwrap();
            assert_eq!(obs.get(Field::Temperature), Some(21.5));
            assert_eq!(obs.get(Field::WindSpeed), Some(3.0));
            assert_eq!(obs.readings().count(), 2);
            assert_eq!(obs.timestamp.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        }

        #[test_case(r#"{"temp": 10.0, "temperature": 21.5}"#, Field::Temperature, 21.5 ; "alias sorts first")]
        #[test_case(r#"{"uv": 3.0, "uv_index": 9.0}"#, Field::Uv, 3.0 ; "alias sorts last")]
        fn canonical_key_beats_alias(json: &str, field: Field, expected: f64) {
            let obs: Observation = serde_json::from_str(json).unwrap();
            assert_eq!(obs.get(field), Some(expected));
        }

        #[test]
        fn keys_are_case_insensitive() {
            let obs: Observation = serde_json::from_str(r#"{"Temperature": 18.0, "Wind Gust": 7.5}"#).unwrap();
            assert_eq!(obs.get(Field::Temperature), Some(18.0));
            assert_eq!(obs.get(Field::WindGust), Some(7.5));
        }

        #[test]
        fn rejects_non_numeric_reading() {
            let result: Result<Observation, _> =
                serde_json::from_str(r#"{"temperature": "hot"}"#);
            assert!(result.is_err());
        }

        #[test]
        fn null_reading_is_absent() {
            let obs: Observation = serde_json::from_str(r#"{"humidity": null}"#).unwrap();
            assert_eq!(obs.get(Field::Humidity), None);
        }

        #[test]
        fn serializes_canonical_names() {
            let ts = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            let obs = Observation::new(ts).with(Field::Lux, 100.0);
            let value = serde_json::to_value(&obs).unwrap();
            assert_eq!(value["lux"], 100.0);
        }
    }

    mod location_tests {
        use super::*;

        #[test]
        fn rejects_out_of_range() {
            assert!(Location::new(91.0, 0.0).is_err());
            assert!(Location::new(0.0, -181.0).is_err());
            assert!(Location::new(45.5, -122.6).is_ok());
        }
    }
}
