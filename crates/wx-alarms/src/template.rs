//! `{{placeholder}}` expansion for notification text.
//!
//! A [`TemplateContext`] holds every variable available to a firing. Keys
//! match case-sensitively; unknown placeholders are left in the output as
//! written so a typo is visible in the delivered message.
//!
//! The composite blocks `alarm_info`, `sensor_info` and `app_info` have a
//! plain-text and an HTML rendering. The HTML one is used when the template
//! itself looks like HTML.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::alarm::Alarm;
use crate::channels::ChannelKind;
use crate::condition::{ChangeDetection, ChangeKind, Condition};
use crate::error::TemplateError;
use crate::evaluator::PreviousValues;
use crate::field::{
    self, Field, Observation, StationInfo, celsius_to_fahrenheit, km_to_miles, mb_to_inhg,
    mm_to_inches, ms_to_mph,
};

/// Upper bound on expanded output, in bytes.
pub const MAX_EXPANDED_LEN: usize = 64 * 1024;

/// Placeholder value for readings that are not available.
pub const NOT_AVAILABLE: &str = "N/A";

/// Default template for single-line channels.
pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "{{message}}: {{alarm_paraphrase}} at {{station}} ({{timestamp}})";

/// Default email subject.
pub const DEFAULT_EMAIL_SUBJECT: &str = "Weather alarm: {{alarm_name}}";

/// Default email body.
pub const DEFAULT_EMAIL_BODY: &str = "{{alarm_info}}\n\n{{sensor_info}}\n\n{{app_info}}";

/// Default SMS text.
pub const DEFAULT_SMS_TEMPLATE: &str = "{{alarm_name}}: {{alarm_paraphrase}} at {{station}}";

/// Default CSV columns.
pub const DEFAULT_CSV_TEMPLATE: &str = "{{alarm_name}},{{alarm_description}},{{alarm_condition}},{{message}}";

const HTML_MARKERS: [&str; 8] = ["<html", "<body", "<table", "<div", "<h1", "<h2", "<p>", "<br"];

/// Variables available to a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
    html: BTreeMap<String, String>,
    payload: Value,
}

/// Inputs for building the context of one firing.
#[derive(Debug, Clone, Copy)]
pub struct FiringDetails<'a> {
    /// The alarm that fired.
    pub alarm: &'a Alarm,
    /// The triggering observation.
    pub observation: &'a Observation,
    /// Change baselines as they were before this evaluation.
    pub previous: &'a PreviousValues,
    /// Station metadata.
    pub station: &'a StationInfo,
    /// Firing count including this one.
    pub triggered_count: u64,
    /// Time since the runtime started.
    pub uptime: Duration,
}

impl TemplateContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a plain value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Sets a block with separate text and HTML renderings.
    pub fn insert_block(&mut self, key: impl Into<String>, text: impl Into<String>, html: impl Into<String>) {
        let key = key.into();
        self.html.insert(key.clone(), html.into());
        self.values.insert(key, text.into());
    }

    /// Returns the plain value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Iterates the available keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Structured form of the firing, used when no JSON template is set.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    fn lookup(&self, key: &str, html: bool) -> Option<&str> {
        if html {
            if let Some(block) = self.html.get(key) {
                return Some(block);
            }
        }
        self.get(key)
    }

    /// Builds the context for one firing.
    #[must_use]
    pub fn for_firing(details: &FiringDetails<'_>) -> Self {
        let FiringDetails {
            alarm,
            observation,
            previous,
            station,
            triggered_count,
            uptime,
        } = *details;

        let mut ctx = Self::new();
        let tz = station.timezone.unwrap_or(Tz::UTC);
        let fired_at = observation.timestamp;
        let message = format!("ALARM: {} triggered", alarm.name);

        ctx.insert("alarm_name", alarm.name.as_str());
        ctx.insert("alarm_description", alarm.description.as_str());
        ctx.insert("alarm_condition", alarm.condition_text.as_str());
        ctx.insert("alarm_paraphrase", alarm.paraphrase());
        ctx.insert("alarm_tags", alarm.tags.join(", "));
        ctx.insert("alarm_cooldown", format_cooldown(alarm.cooldown_secs));
        ctx.insert("triggered_count", triggered_count.to_string());
        ctx.insert("station", station.name.as_str());
        ctx.insert(
            "timestamp",
            fired_at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        );
        ctx.insert("timestamp_iso", fired_at.to_rfc3339());
        ctx.insert("message", message.as_str());

        for field in Field::ALL {
            let current = observation
                .get(field)
                .map_or_else(|| NOT_AVAILABLE.to_string(), |v| field.format_value(v));
            ctx.insert(field.name(), current);
            let last = previous
                .get(&field)
                .map_or_else(|| NOT_AVAILABLE.to_string(), |&v| field.format_value(v));
            ctx.insert(format!("last_{}", field.name()), last);
        }
        insert_conversions(&mut ctx, observation);

        let watched = watched_fields(&alarm.condition);
        ctx.insert_block(
            "alarm_info",
            alarm_info_text(alarm),
            alarm_info_html(alarm),
        );
        ctx.insert_block(
            "sensor_info",
            sensor_info_text(observation, previous),
            sensor_info_html(observation, previous, &watched),
        );
        let app = app_info_text(uptime);
        ctx.insert_block("app_info", app.clone(), format!("<div class=\"app-info\">{}</div>", escape_html(&app)));

        let readings: Map<String, Value> = observation
            .readings()
            .map(|(f, v)| (f.name().to_string(), json!(v)))
            .collect();
        ctx.payload = json!({
            "alarm": {
                "name": alarm.name,
                "description": alarm.description,
                "condition": alarm.condition_text,
                "paraphrase": alarm.paraphrase(),
                "tags": alarm.tags,
                "triggered_count": triggered_count,
            },
            "station": station.name,
            "timestamp": fired_at.to_rfc3339(),
            "message": message,
            "readings": readings,
        });
        ctx
    }

    /// A context built from a synthetic alarm and observation, for previews.
    #[must_use]
    pub fn sample() -> Self {
        Self::sample_at(Utc::now())
    }

    /// Like [`TemplateContext::sample`] with a fixed timestamp.
    #[must_use]
    pub fn sample_at(now: DateTime<Utc>) -> Self {
        let alarm = Alarm {
            name: "Sample Alarm".to_string(),
            description: "Example alarm used for previews".to_string(),
            condition_text: "*lightning_count".to_string(),
            condition: Condition::Change(ChangeDetection {
                field: Field::LightningCount,
                kind: ChangeKind::Any,
            }),
            tags: vec!["sample".to_string()],
            cooldown_secs: 300,
            enabled: true,
            schedule: None,
            channels: Vec::new(),
        };
        let observation = Observation::sample(now);
        let mut previous = PreviousValues::new();
        previous.insert(Field::Temperature, 23.5);
        previous.insert(Field::LightningCount, 0.0);
        let station = StationInfo::named("Sample Station");
        Self::for_firing(&FiringDetails {
            alarm: &alarm,
            observation: &observation,
            previous: &previous,
            station: &station,
            triggered_count: 1,
            uptime: Duration::from_secs(3 * 3600 + 25 * 60),
        })
    }
}

fn insert_conversions(ctx: &mut TemplateContext, observation: &Observation) {
    let conversions: [(&str, Field, fn(f64) -> String); 9] = [
        ("temperature_c", Field::Temperature, |v| format!("{v:.1}")),
        ("temperature_f", Field::Temperature, |v| format!("{:.1}", celsius_to_fahrenheit(v))),
        ("wind_speed_mph", Field::WindSpeed, |v| format!("{:.1}", ms_to_mph(v))),
        ("wind_gust_mph", Field::WindGust, |v| format!("{:.1}", ms_to_mph(v))),
        ("rain_rate_in", Field::RainRate, |v| format!("{:.2}", mm_to_inches(v))),
        ("rain_daily_in", Field::RainDaily, |v| format!("{:.2}", mm_to_inches(v))),
        ("pressure_inhg", Field::Pressure, |v| format!("{:.2}", mb_to_inhg(v))),
        ("lightning_distance_mi", Field::LightningDistance, |v| format!("{:.1}", km_to_miles(v))),
        ("wind_direction_cardinal", Field::WindDirection, |v| field::cardinal(v).to_string()),
    ];
    for (key, field, convert) in conversions {
        let value = observation
            .get(field)
            .map_or_else(|| NOT_AVAILABLE.to_string(), convert);
        ctx.insert(key, value);
    }
}

fn watched_fields(condition: &Condition) -> Vec<Field> {
    let mut fields = Vec::new();
    collect_fields(condition, &mut fields);
    fields
}

fn collect_fields(condition: &Condition, out: &mut Vec<Field>) {
    match condition {
        Condition::And(l, r) | Condition::Or(l, r) => {
            collect_fields(l, out);
            collect_fields(r, out);
        }
        Condition::Compare(c) => out.push(c.field),
        Condition::Change(c) => out.push(c.field),
    }
}

// ============ Composite blocks ============

fn format_cooldown(secs: u64) -> String {
    match secs {
        0 => "none".to_string(),
        s if s % 3600 == 0 => plural(s / 3600, "hour"),
        s if s % 60 == 0 => plural(s / 60, "minute"),
        s => plural(s, "second"),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    if days > 0 {
        format!("{}, {}, {}", plural(days, "day"), plural(hours, "hour"), plural(minutes, "minute"))
    } else if hours > 0 {
        format!("{}, {}", plural(hours, "hour"), plural(minutes, "minute"))
    } else {
        plural(minutes, "minute")
    }
}

fn alarm_info_text(alarm: &Alarm) -> String {
    let tags = if alarm.tags.is_empty() {
        "none".to_string()
    } else {
        alarm.tags.join(", ")
    };
    format!(
        "Alarm: {}\nDescription: {}\nCondition: {}\nStatus: {}\nCooldown: {}\nTags: {}",
        alarm.name,
        alarm.description,
        alarm.condition_text,
        if alarm.enabled { "enabled" } else { "disabled" },
        format_cooldown(alarm.cooldown_secs),
        tags,
    )
}

fn alarm_info_html(alarm: &Alarm) -> String {
    let rows = [
        ("Alarm", alarm.name.clone()),
        ("Description", alarm.description.clone()),
        ("Condition", alarm.condition_text.clone()),
        ("Meaning", alarm.paraphrase()),
        ("Cooldown", format_cooldown(alarm.cooldown_secs)),
        ("Tags", if alarm.tags.is_empty() { "none".to_string() } else { alarm.tags.join(", ") }),
    ];
    let mut html = String::from("<table class=\"alarm-info\">");
    for (label, value) in rows {
        let _ = write!(html, "<tr><th>{label}</th><td>{}</td></tr>", escape_html(&value));
    }
    html.push_str("</table>");
    html
}

fn describe_reading(field: Field, value: f64) -> String {
    match field {
        Field::Temperature => format!("{:.1}°F ({value:.1}°C)", celsius_to_fahrenheit(value)),
        Field::WindSpeed | Field::WindGust => format!("{:.1} mph ({value:.1} m/s)", ms_to_mph(value)),
        Field::WindDirection => format!("{value:.0}° ({})", field::cardinal(value)),
        Field::Lux => format!("{} lux", field::format_thousands(value)),
        Field::Pressure => format!("{:.2} inHg ({value:.1} mb)", mb_to_inhg(value)),
        Field::RainRate => format!("{:.2} in/hr ({value:.1} mm/hr)", mm_to_inches(value)),
        Field::RainDaily => format!("{:.2} in ({value:.1} mm)", mm_to_inches(value)),
        Field::LightningDistance => format!("{:.1} mi ({value:.1} km)", km_to_miles(value)),
        _ => describe_last(field, value),
    }
}

fn describe_last(field: Field, value: f64) -> String {
    let formatted = if field == Field::Lux {
        field::format_thousands(value)
    } else {
        field.format_value(value)
    };
    match field.unit() {
        "" => formatted,
        unit if unit.starts_with('°') || unit == "%" => format!("{formatted}{unit}"),
        unit => format!("{formatted} {unit}"),
    }
}

fn sensor_info_text(observation: &Observation, previous: &PreviousValues) -> String {
    observation
        .readings()
        .map(|(field, value)| {
            let mut line = format!("{}: {}", field.label(), describe_reading(field, value));
            if let Some(&last) = previous.get(&field) {
                let _ = write!(line, " [Last: {}]", describe_last(field, last));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sensor_info_html(observation: &Observation, previous: &PreviousValues, watched: &[Field]) -> String {
    let mut html = String::from("<table class=\"sensor-info\"><tr><th>Sensor</th><th>Current</th><th>Last</th></tr>");
    for (field, value) in observation.readings() {
        let last = previous.get(&field).copied();
        #[allow(clippy::float_cmp)]
        let changed = last.is_some_and(|l| l != value);
        let class = match (changed, watched.contains(&field)) {
            (true, _) => " class=\"changed\"",
            (false, true) => " class=\"watched\"",
            (false, false) => "",
        };
        let _ = write!(
            html,
            "<tr{class}><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(field.label()),
            escape_html(&describe_reading(field, value)),
            escape_html(&last.map_or_else(|| NOT_AVAILABLE.to_string(), |l| describe_last(field, l))),
        );
    }
    html.push_str("</table>");
    html
}

fn app_info_text(uptime: Duration) -> String {
    format!(
        "wx-alarms {} | Uptime: {}",
        env!("CARGO_PKG_VERSION"),
        format_uptime(uptime)
    )
}

/// Escapes text for inclusion in HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// ============ Expansion ============

/// Returns whether a template should receive the HTML block renderings.
#[must_use]
pub fn looks_like_html(template: &str) -> bool {
    let lower = template.to_ascii_lowercase();
    HTML_MARKERS.iter().any(|m| lower.contains(m))
}

/// Substitutes every `{{key}}` found in `context`.
#[must_use]
pub fn expand(template: &str, context: &TemplateContext) -> String {
    expand_with(template, context, false)
}

/// Like [`expand`], but escapes each substituted value for use inside a JSON
/// string. Numeric values are unchanged, so `{"count": {{lightning_count}}}`
/// still yields a number.
#[must_use]
pub fn expand_json(template: &str, context: &TemplateContext) -> String {
    expand_with(template, context, true)
}

fn push_json_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if u32::from(c) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
}

fn expand_with(template: &str, context: &TemplateContext, json: bool) -> String {
    let html = looks_like_html(template);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let key = &after[..end];
        if key.contains("{{") {
            out.push_str("{{");
            rest = after;
            continue;
        }
        match context.lookup(key, html) {
            Some(value) if json => push_json_escaped(&mut out, value),
            Some(value) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(key);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
        if out.len() > MAX_EXPANDED_LEN {
            break;
        }
    }
    out.push_str(rest);
    clamp(out)
}

fn clamp(mut text: String) -> String {
    if text.len() <= MAX_EXPANDED_LEN {
        return text;
    }
    let mut cut = MAX_EXPANDED_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    warn!(
        length = text.len(),
        limit = MAX_EXPANDED_LEN,
        "expanded template truncated"
    );
    text.truncate(cut);
    text
}

/// Returns the distinct placeholder keys in a template, in order of appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let key = &after[..end];
        if key.contains("{{") {
            rest = after;
            continue;
        }
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        rest = &after[end + 2..];
    }
    keys
}

/// Result of a template dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePreview {
    /// The template expanded against a synthetic firing.
    pub sample: String,
    /// Placeholders that no variable matched.
    pub unresolved: Vec<String>,
}

/// Expands `template` against a synthetic firing and checks it suits `kind`.
///
/// JSON and webhook output must parse as JSON.
pub fn validate_template(template: &str, kind: ChannelKind) -> Result<TemplatePreview, TemplateError> {
    let context = TemplateContext::sample();
    let json = matches!(kind, ChannelKind::Json | ChannelKind::Webhook);
    let sample = if json {
        expand_json(template, &context)
    } else {
        expand(template, &context)
    };
    let unresolved = placeholders(template)
        .into_iter()
        .filter(|key| context.get(key).is_none())
        .collect();

    if json && !template.trim().is_empty() {
        if let Err(e) = serde_json::from_str::<Value>(&sample) {
            return Err(TemplateError::InvalidJson {
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
                sample,
            });
        }
    }

    Ok(TemplatePreview { sample, unresolved })
}
