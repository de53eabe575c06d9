//! Database module for persisting detected events
//!
//! Uses SQLite for local storage of:
//! - Anomaly events from every monitored stream
//! - Per-kind counts for reporting

use crate::core::{format_timestamp, parse_timestamp, Error, Event, EventKind, Result, Severity};
use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Event store backed by a single SQLite connection
pub struct EventStore {
    conn: Connection,
}

/// Stored event with its row id and stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub stream_id: String,
    #[serde(flatten)]
    pub event: Event,
}

/// Raw row before kind, severity and info are decoded
type RawRow = (i64, String, String, String, String, String, String);

impl EventStore {
    /// Open (or create) a database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        let store = Self { conn };
        store.init_schema()?;

        log::debug!("Event store opened at {}", path.display());
        Ok(store)
    }

    /// Open the database in the user data directory
    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path()?)
    }

    /// In-memory store, nothing is persisted
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Get the default database file path
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Database(rusqlite::Error::InvalidPath(PathBuf::new())))?;

        Ok(data_dir.join("power-anomaly").join("events.db"))
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_ts TEXT NOT NULL,
                end_ts TEXT NOT NULL,
                severity TEXT NOT NULL,
                info_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_start ON events(start_ts);
            "#,
        )?;

        Ok(())
    }

    /// Insert one event
    pub fn insert_event(&self, event: &Event, stream_id: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO events (stream_id, kind, start_ts, end_ts, severity, info_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stream_id,
                event.kind.as_str(),
                format_timestamp(event.start),
                format_timestamp(event.end),
                event.severity.as_str(),
                event.info_json()?
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Insert many events in one transaction
    pub fn insert_events(&mut self, events: &[Event], stream_id: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (stream_id, kind, start_ts, end_ts, severity, info_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for event in events {
                stmt.execute(params![
                    stream_id,
                    event.kind.as_str(),
                    format_timestamp(event.start),
                    format_timestamp(event.end),
                    event.severity.as_str(),
                    event.info_json()?
                ])?;
            }
        }
        tx.commit()?;

        log::info!("Stored {} event(s) for stream '{}'", events.len(), stream_id);
        Ok(events.len())
    }

    /// Events whose start lies within `[start, end]`, oldest first
    pub fn get_events(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, stream_id, kind, start_ts, end_ts, severity, info_json
             FROM events
             WHERE start_ts >= ?1 AND start_ts <= ?2
             ORDER BY start_ts ASC, id ASC",
        )?;

        let rows: Vec<RawRow> = stmt
            .query_map(params![format_timestamp(start), format_timestamp(end)], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows.into_iter().filter_map(decode_row).collect())
    }

    /// Get total events count
    pub fn get_events_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Stored event counts per kind
    pub fn count_by_kind(&self) -> Result<BTreeMap<EventKind, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM events GROUP BY kind")?;

        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .filter_map(|(kind, n)| kind.parse::<EventKind>().ok().map(|k| (k, n)))
            .collect();

        Ok(counts)
    }

    /// Delete events that started more than `days_to_keep` days before `now`
    pub fn cleanup_old_events(&self, days_to_keep: u32, now: NaiveDateTime) -> Result<u64> {
        let cutoff = now - Duration::days(days_to_keep as i64);

        let deleted = self.conn.execute(
            "DELETE FROM events WHERE start_ts < ?1",
            params![format_timestamp(cutoff)],
        )?;

        if deleted > 0 {
            log::info!("Removed {} event(s) older than {} days", deleted, days_to_keep);
        }
        Ok(deleted as u64)
    }
}

fn decode_row(row: RawRow) -> Option<EventRecord> {
    let (id, stream_id, kind, start, end, severity, info_json) = row;

    let decoded = (|| -> Result<Event> {
        let kind: EventKind = kind.parse()?;
        let severity: Severity = severity.parse()?;
        let start = parse_timestamp(&start)
            .ok_or_else(|| Error::Serialization(format!("Bad start timestamp: {}", start)))?;
        let end = parse_timestamp(&end)
            .ok_or_else(|| Error::Serialization(format!("Bad end timestamp: {}", end)))?;
        let info: BTreeMap<String, f64> = serde_json::from_str(&info_json)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Event {
            kind,
            start,
            end,
            severity,
            info,
        })
    })();

    match decoded {
        Ok(event) => Some(EventRecord { id, stream_id, event }),
        Err(e) => {
            log::warn!("Skipping undecodable event row {}: {}", id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn spike(start: NaiveDateTime) -> Event {
        Event::new(EventKind::ShortSpikeSuspect, start, start + Duration::seconds(2), Severity::Alert)
            .with_info("delta_a", 21.5)
            .with_info("current_a", 30.2)
    }

    #[test]
    fn test_insert_and_get_event() {
        let store = EventStore::open_in_memory().unwrap();

        let event = spike(at(1, 10, 0));
        let id = store.insert_event(&event, "home").unwrap();
        assert!(id > 0);

        let records = store.get_events(at(1, 0, 0), at(1, 23, 59)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stream_id, "home");
        assert_eq!(records[0].event, event);
    }

    #[test]
    fn test_range_and_order() {
        let mut store = EventStore::open_in_memory().unwrap();
        let events = vec![spike(at(3, 9, 0)), spike(at(1, 9, 0)), spike(at(2, 9, 0))];
        assert_eq!(store.insert_events(&events, "a").unwrap(), 3);

        let records = store.get_events(at(1, 0, 0), at(2, 23, 0)).unwrap();
        let starts: Vec<NaiveDateTime> = records.iter().map(|r| r.event.start).collect();
        assert_eq!(starts, vec![at(1, 9, 0), at(2, 9, 0)]);
        assert_eq!(store.get_events_count().unwrap(), 3);
    }

    #[test]
    fn test_count_by_kind() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&spike(at(1, 9, 0)), "a").unwrap();
        store.insert_event(&spike(at(1, 9, 5)), "b").unwrap();
        let over = Event::new(EventKind::OvercurrentNearLimit, at(1, 9, 0), at(1, 9, 1), Severity::Warn);
        store.insert_event(&over, "a").unwrap();

        let counts = store.count_by_kind().unwrap();
        assert_eq!(counts.get(&EventKind::ShortSpikeSuspect), Some(&2));
        assert_eq!(counts.get(&EventKind::OvercurrentNearLimit), Some(&1));
        assert_eq!(counts.get(&EventKind::PowerEwmaAnomaly), None);
    }

    #[test]
    fn test_cleanup_old_events() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert_event(&spike(at(1, 9, 0)), "a").unwrap();
        store.insert_event(&spike(at(20, 9, 0)), "a").unwrap();

        let deleted = store.cleanup_old_events(7, at(21, 0, 0)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.get_events_count().unwrap(), 1);
    }

    #[test]
    fn test_open_file_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("events.db");

        {
            let store = EventStore::open(&path).unwrap();
            store.insert_event(&spike(at(1, 9, 0)), "a").unwrap();
        }

        let store = EventStore::open(&path).unwrap();
        assert_eq!(store.get_events_count().unwrap(), 1);
    }
}
