//! Core module - configuration, errors, and common types

mod config;
mod error;
mod types;

pub use config::{Config, DetectorConfig, GeneralConfig, IngestConfig, StorageConfig};
pub use error::{Error, Result};
pub use types::{
    format_timestamp, parse_timestamp, seconds_between, DetectionResult, DetectionStats, Event, EventKind, Sample,
    SensorReading, ServiceStatus, Severity,
};
