//! Bulk CSV ingestion for offline runs
//!
//! Loads a sensor export, normalizes its column names, optionally joins an
//! outdoor temperature table by nearest timestamp, and replays the result
//! through a detector in time order.

use crate::core::{
    format_timestamp, parse_timestamp, seconds_between, Error, Event, EventKind, IngestConfig,
    Result, Sample, Severity,
};
use crate::detection::Detector;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "time", "ts", "datetime"];
const POWER_COLUMNS: &[&str] = &["power_w", "power", "watts", "w"];
const ROOM_TEMP_COLUMNS: &[&str] = &["temp_c", "room_temp_c"];
const HUMIDITY_COLUMNS: &[&str] = &["rh", "humidity", "rh_pct"];
const LUX_COLUMNS: &[&str] = &["lux"];

/// Progress is logged every this many samples during a batch run
const PROGRESS_EVERY: usize = 10_000;

/// One outdoor temperature observation
pub type WeatherPoint = (NaiveDateTime, Option<f64>);

/// Index of the first header matching any alias, case-insensitively.
/// Aliases are tried in order, so earlier aliases win.
fn find_column<S: AsRef<str>>(headers: &csv::StringRecord, aliases: &[S]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(alias.as_ref()))
    })
}

/// Index of the leftmost header matching any alias, case-insensitively.
/// File order wins over alias order.
fn find_leftmost_column(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| aliases.iter().any(|alias| h.trim().eq_ignore_ascii_case(alias)))
}

/// Parse an optional numeric cell; blanks and non-numbers are absent
fn parse_cell(record: &csv::StringRecord, idx: Option<usize>) -> Option<f64> {
    let raw = record.get(idx?)?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read sensor samples from CSV text, sorted by timestamp
pub fn read_samples<R: Read>(reader: R) -> Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();

    let ts_idx = find_leftmost_column(&headers, TIMESTAMP_COLUMNS).ok_or_else(|| {
        Error::Ingest(format!("Input must contain a timestamp column ({})", TIMESTAMP_COLUMNS.join("/")))
    })?;
    let power_idx = find_leftmost_column(&headers, POWER_COLUMNS).ok_or_else(|| {
        Error::Ingest(format!("Input must contain a power column ({})", POWER_COLUMNS.join("/")))
    })?;
    let temp_idx = find_column(&headers, ROOM_TEMP_COLUMNS);
    let rh_idx = find_column(&headers, HUMIDITY_COLUMNS);
    let lux_idx = find_column(&headers, LUX_COLUMNS);

    log::info!(
        "Columns: timestamp='{}' power='{}' room_temp={} humidity={} lux={}",
        &headers[ts_idx],
        &headers[power_idx],
        temp_idx.is_some(),
        rh_idx.is_some(),
        lux_idx.is_some()
    );

    let mut samples = Vec::new();
    let mut skipped = 0usize;

    for (row, result) in reader.records().enumerate() {
        let record = result?;

        let timestamp = match record.get(ts_idx).and_then(parse_timestamp) {
            Some(ts) => ts,
            None => {
                log::warn!("Row {}: unparseable timestamp, skipped", row + 1);
                skipped += 1;
                continue;
            }
        };
        let power_w = match parse_cell(&record, Some(power_idx)) {
            Some(p) => p,
            None => {
                log::warn!("Row {}: missing power value, skipped", row + 1);
                skipped += 1;
                continue;
            }
        };

        samples.push(
            Sample::new(timestamp, power_w)
                .with_room(parse_cell(&record, temp_idx), parse_cell(&record, rh_idx))
                .with_lux(parse_cell(&record, lux_idx)),
        );
    }

    if skipped > 0 {
        log::warn!("Skipped {} malformed row(s)", skipped);
    }

    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

/// Read an outdoor temperature table, sorted, duplicate timestamps keeping the first row
pub fn read_weather<R: Read>(reader: R, columns: &[String]) -> Result<Vec<WeatherPoint>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();

    let ts_idx = find_leftmost_column(&headers, TIMESTAMP_COLUMNS)
        .ok_or_else(|| Error::Ingest("Weather file must have a timestamp column".to_string()))?;
    let temp_idx = find_column(&headers, columns).ok_or_else(|| {
        Error::Ingest(format!("Weather file must contain one of {:?}", columns))
    })?;

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for result in reader.records() {
        let record = result?;
        match record.get(ts_idx).and_then(parse_timestamp) {
            Some(ts) => points.push((ts, parse_cell(&record, Some(temp_idx)))),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {} weather row(s) with unparseable timestamps", skipped);
    }

    // Stable sort keeps file order among equal timestamps
    points.sort_by_key(|(ts, _)| *ts);
    points.dedup_by_key(|(ts, _)| *ts);
    Ok(points)
}

/// Value of the weather point nearest to `ts`, if within the tolerance.
///
/// On an exact tie the later reading wins.
pub fn nearest_value(weather: &[WeatherPoint], ts: NaiveDateTime, tolerance_secs: f64) -> Option<f64> {
    let idx = weather.partition_point(|(t, _)| *t < ts);

    let before = idx.checked_sub(1).and_then(|i| weather.get(i));
    let after = weather.get(idx);

    let nearest = match (before, after) {
        (Some(b), Some(a)) => {
            if seconds_between(b.0, ts) < seconds_between(ts, a.0) {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    if seconds_between(nearest.0, ts).abs() <= tolerance_secs {
        nearest.1
    } else {
        None
    }
}

/// Fill each sample's outdoor temperature from the weather table
pub fn join_outdoor(samples: &mut [Sample], weather: &[WeatherPoint], tolerance_secs: f64) -> usize {
    let mut matched = 0;
    for sample in samples.iter_mut() {
        sample.outdoor_temp_c = nearest_value(weather, sample.timestamp, tolerance_secs);
        if sample.outdoor_temp_c.is_some() {
            matched += 1;
        }
    }
    matched
}

/// Load the input file and, if given, join the weather file onto it
pub fn load_samples(input: &Path, weather: Option<&Path>, cfg: &IngestConfig) -> Result<Vec<Sample>> {
    let file = File::open(input)
        .map_err(|e| Error::Ingest(format!("Failed to open {}: {}", input.display(), e)))?;
    let mut samples = read_samples(BufReader::new(file))?;

    if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
        log::info!(
            "Loaded {} samples from {} ({} to {})",
            samples.len(),
            input.display(),
            first.timestamp,
            last.timestamp
        );
    }

    match weather {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| Error::Ingest(format!("Failed to open {}: {}", path.display(), e)))?;
            let points = read_weather(BufReader::new(file), &cfg.weather_columns)?;
            let matched = join_outdoor(&mut samples, &points, cfg.join_tolerance_secs);
            log::info!("Outdoor temperature joined: {}/{} samples matched", matched, samples.len());
        }
        None => log::info!("No weather file, thermal rule disabled"),
    }

    Ok(samples)
}

/// Replay samples through the detector in order and collect every event
pub fn run_batch(detector: &mut Detector, samples: &[Sample]) -> Result<Vec<Event>> {
    let mut events = Vec::new();

    for (i, sample) in samples.iter().enumerate() {
        let emitted = detector.update(sample)?;
        for event in &emitted {
            log::debug!("{} ({}) at {}", event.kind, event.severity, event.start);
        }
        events.extend(emitted);

        if (i + 1) % PROGRESS_EVERY == 0 {
            log::info!("Processed {}/{} samples", i + 1, samples.len());
        }
    }

    log::info!("Batch complete: {} event(s) from {} samples", events.len(), samples.len());
    Ok(events)
}

/// Write events as CSV (`type,start,end,severity,info_json`)
pub fn write_events<W: Write>(writer: W, events: &[Event]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["type", "start", "end", "severity", "info_json"])?;

    for event in events {
        writer.write_record([
            event.kind.as_str().to_string(),
            format_timestamp(event.start),
            format_timestamp(event.end),
            event.severity.as_str().to_string(),
            event.info_json()?,
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write events to a CSV file
pub fn write_events_csv(path: &Path, events: &[Event]) -> Result<()> {
    let file = File::create(path)?;
    write_events(file, events)
}

/// Event counts per (kind, severity)
pub fn summarize(events: &[Event]) -> BTreeMap<(EventKind, Severity), usize> {
    let mut summary = BTreeMap::new();
    for event in events {
        *summary.entry((event.kind, event.severity)).or_insert(0) += 1;
    }
    summary
}
