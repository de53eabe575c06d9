//! Common types used across the application

use crate::core::{Error, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp formats accepted from the wire and from CSV files, after RFC 3339
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse a caller supplied timestamp into device-local wall-clock time.
///
/// Offsets in RFC 3339 input are kept as the wall clock of that offset, so the
/// calendar month seen by the thermal rule is the one the sensor reported.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Canonical text form used in CSV output and the event store
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Seconds elapsed from `earlier` to `later` (negative if out of order)
pub fn seconds_between(earlier: NaiveDateTime, later: NaiveDateTime) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// One observation of the monitored circuit and its room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock time of the observation
    pub timestamp: NaiveDateTime,
    /// Active power draw in watts
    pub power_w: f64,
    /// Indoor temperature in °C
    #[serde(default)]
    pub room_temp_c: Option<f64>,
    /// Indoor relative humidity in %
    #[serde(default)]
    pub room_rh_pct: Option<f64>,
    /// Illuminance in lux
    #[serde(default)]
    pub lux: Option<f64>,
    /// Outdoor temperature in °C
    #[serde(default)]
    pub outdoor_temp_c: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, power_w: f64) -> Self {
        Self {
            timestamp,
            power_w,
            room_temp_c: None,
            room_rh_pct: None,
            lux: None,
            outdoor_temp_c: None,
        }
    }

    pub fn with_room(mut self, temp_c: Option<f64>, rh_pct: Option<f64>) -> Self {
        self.room_temp_c = temp_c;
        self.room_rh_pct = rh_pct;
        self
    }

    pub fn with_lux(mut self, lux: Option<f64>) -> Self {
        self.lux = lux;
        self
    }

    pub fn with_outdoor_temp(mut self, outdoor_temp_c: Option<f64>) -> Self {
        self.outdoor_temp_c = outdoor_temp_c;
        self
    }
}

/// Kind of anomaly an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PowerEwmaAnomaly,
    OvercurrentNearLimit,
    ShortSpikeSuspect,
    ThermalSummerRoomHotVsOutdoor,
    ThermalWinterRoomTooColdVsOutdoor,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PowerEwmaAnomaly => "power_ewma_anomaly",
            EventKind::OvercurrentNearLimit => "overcurrent_near_limit",
            EventKind::ShortSpikeSuspect => "short_spike_suspect",
            EventKind::ThermalSummerRoomHotVsOutdoor => "thermal_summer_room_hot_vs_outdoor",
            EventKind::ThermalWinterRoomTooColdVsOutdoor => "thermal_winter_room_too_cold_vs_outdoor",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "power_ewma_anomaly" => Ok(EventKind::PowerEwmaAnomaly),
            "overcurrent_near_limit" => Ok(EventKind::OvercurrentNearLimit),
            "short_spike_suspect" => Ok(EventKind::ShortSpikeSuspect),
            "thermal_summer_room_hot_vs_outdoor" => Ok(EventKind::ThermalSummerRoomHotVsOutdoor),
            "thermal_winter_room_too_cold_vs_outdoor" => Ok(EventKind::ThermalWinterRoomTooColdVsOutdoor),
            other => Err(Error::Serialization(format!("Unknown event kind: {}", other))),
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Alert,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warn => "warn",
            Severity::Alert => "alert",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warn" => Ok(Severity::Warn),
            "alert" => Ok(Severity::Alert),
            other => Err(Error::Serialization(format!("Unknown severity: {}", other))),
        }
    }
}

/// A detected anomaly. Immutable once returned by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub severity: Severity,
    /// Numeric details, keyed by name (e.g. `z_peak`, `current_a`)
    pub info: BTreeMap<String, f64>,
}

impl Event {
    pub fn new(kind: EventKind, start: NaiveDateTime, end: NaiveDateTime, severity: Severity) -> Self {
        Self {
            kind,
            start,
            end,
            severity,
            info: BTreeMap::new(),
        }
    }

    pub fn with_info(mut self, key: &str, value: f64) -> Self {
        self.info.insert(key.to_string(), value);
        self
    }

    /// Look up one info value
    pub fn info_value(&self, key: &str) -> Option<f64> {
        self.info.get(key).copied()
    }

    /// Info map serialized as a JSON object
    pub fn info_json(&self) -> Result<String> {
        serde_json::to_string(&self.info).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Event length in seconds
    pub fn duration_secs(&self) -> f64 {
        seconds_between(self.start, self.end)
    }
}

/// Loosely shaped sensor record as delivered by a transport (HTTP body, socket frame)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorReading {
    /// ISO-8601 timestamp; wall-clock time is used when absent
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, alias = "power_W", alias = "power")]
    pub power_w: Option<f64>,
    #[serde(default, alias = "temp_C", alias = "room_temp_c", alias = "room_temp_C", alias = "temperature")]
    pub temp_c: Option<f64>,
    #[serde(default, alias = "humidity")]
    pub rh_pct: Option<f64>,
    #[serde(default)]
    pub lux: Option<f64>,
    #[serde(default, alias = "outdoor_temp_C", alias = "outside_temp")]
    pub outdoor_temp_c: Option<f64>,
}

impl SensorReading {
    /// Build a sample, using `fallback` when the timestamp is absent.
    ///
    /// The fallback is also used for an unparseable timestamp; the caller is
    /// told through the returned flag so it can log the substitution.
    pub fn into_sample(self, fallback: NaiveDateTime) -> Result<(Sample, bool)> {
        let power_w = self
            .power_w
            .ok_or_else(|| Error::InvalidSample("power_w is required".to_string()))?;

        let (timestamp, substituted) = match self.timestamp.as_deref().map(parse_timestamp) {
            Some(Some(ts)) => (ts, false),
            Some(None) => (fallback, true),
            None => (fallback, false),
        };

        let sample = Sample::new(timestamp, power_w)
            .with_room(self.temp_c, self.rh_pct)
            .with_lux(self.lux)
            .with_outdoor_temp(self.outdoor_temp_c);

        Ok((sample, substituted))
    }
}

/// Running counters reported with every detection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionStats {
    pub current_mean_w: f64,
    pub current_std_w: f64,
    pub total_processed: u64,
    pub total_events: u64,
    pub uptime_minutes: f64,
}

/// Outcome of pushing one reading through the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub timestamp: NaiveDateTime,
    pub is_anomaly: bool,
    pub events: Vec<Event>,
    pub sample: Sample,
    pub stats: DetectionStats,
}

/// Service health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub uptime_minutes: f64,
    pub total_processed: u64,
    pub total_events: u64,
    /// Events per processed sample, in percent
    pub anomaly_rate: f64,
    pub current_mean_w: f64,
    pub current_std_w: f64,
    pub ewma_k: f64,
    pub current_limit_a: f64,
    pub spike_delta_a: f64,
    pub subscribers: usize,
}
