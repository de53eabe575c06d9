//! Configuration management

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        let app_config_dir = config_dir.join("power-anomaly");

        if !app_config_dir.exists() {
            fs::create_dir_all(&app_config_dir)?;
        }

        Ok(app_config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, writing defaults on first run
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.detector.validate()?;

        Ok(config)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Baseline statistics file (JSON with `n`, `sum`, `sum_sqr`)
    #[serde(default = "default_baseline_path")]
    pub baseline_path: PathBuf,
    /// Nominal sensor sampling period in seconds
    #[serde(default = "default_sample_period")]
    pub sample_period_secs: f64,
    /// Log a "normal" heartbeat every N quiet samples
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every: u64,
}

fn default_baseline_path() -> PathBuf { PathBuf::from("ewma_baseline.json") }
fn default_sample_period() -> f64 { 2.0 }
fn default_heartbeat_every() -> u64 { 10 }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            baseline_path: default_baseline_path(),
            sample_period_secs: default_sample_period(),
            heartbeat_every: default_heartbeat_every(),
        }
    }
}

/// Detection thresholds. Immutable for the lifetime of a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Smoothing weight given to the newest sample
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    /// Deviation score beyond which the stream counts as breaching
    #[serde(default = "default_ewma_k")]
    pub ewma_k: f64,
    /// Minimum breach length before an event is emitted
    #[serde(default = "default_ewma_sustain")]
    pub ewma_sustain_secs: f64,
    /// Mains voltage used to derive current from power
    #[serde(default = "default_mains_voltage")]
    pub mains_voltage_v: f64,
    /// Hard current limit of the circuit
    #[serde(default = "default_current_limit")]
    pub current_limit_a: f64,
    /// Fraction of the limit that arms the overcurrent tracker
    #[serde(default = "default_near_limit_ratio")]
    pub near_limit_ratio: f64,
    /// Re-alert interval while the near-limit condition holds
    #[serde(default = "default_near_limit_min")]
    pub near_limit_min_secs: f64,
    /// Sample-to-sample current jump that counts as a spike
    #[serde(default = "default_spike_delta")]
    pub spike_delta_a: f64,
    /// Absolute current that counts as a spike
    #[serde(default = "default_spike_abs")]
    pub spike_abs_a: f64,
    #[serde(default = "default_summer_months")]
    pub summer_months: Vec<u32>,
    #[serde(default = "default_winter_months")]
    pub winter_months: Vec<u32>,
    /// Summer: room warmer than outdoors by at least this much is a warning (°C)
    #[serde(default = "default_summer_warn")]
    pub summer_warn_delta_c: f64,
    #[serde(default = "default_summer_alert")]
    pub summer_alert_delta_c: f64,
    /// Winter: room no warmer than outdoors by this much is a warning (°C)
    #[serde(default = "default_winter_warn")]
    pub winter_warn_delta_c: f64,
    #[serde(default = "default_winter_alert")]
    pub winter_alert_delta_c: f64,
    /// Only evaluate the thermal rule when the room looks occupied
    #[serde(default = "default_true")]
    pub use_lux_gate: bool,
    #[serde(default = "default_occupancy_lux")]
    pub occupancy_lux_threshold: f64,
}

fn default_true() -> bool { true }
fn default_ewma_alpha() -> f64 { 0.2 }
fn default_ewma_k() -> f64 { 3.0 }
fn default_ewma_sustain() -> f64 { 10.0 }
fn default_mains_voltage() -> f64 { 220.0 }
fn default_current_limit() -> f64 { 30.0 }
fn default_near_limit_ratio() -> f64 { 0.9 }
fn default_near_limit_min() -> f64 { 4.0 }
fn default_spike_delta() -> f64 { 10.0 }
fn default_spike_abs() -> f64 { 40.0 }
fn default_summer_months() -> Vec<u32> { vec![6, 7, 8] }
fn default_winter_months() -> Vec<u32> { vec![12, 1, 2] }
fn default_summer_warn() -> f64 { 1.0 }
fn default_summer_alert() -> f64 { 3.0 }
fn default_winter_warn() -> f64 { 5.0 }
fn default_winter_alert() -> f64 { 3.0 }
fn default_occupancy_lux() -> f64 { 20.0 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: default_ewma_alpha(),
            ewma_k: default_ewma_k(),
            ewma_sustain_secs: default_ewma_sustain(),
            mains_voltage_v: default_mains_voltage(),
            current_limit_a: default_current_limit(),
            near_limit_ratio: default_near_limit_ratio(),
            near_limit_min_secs: default_near_limit_min(),
            spike_delta_a: default_spike_delta(),
            spike_abs_a: default_spike_abs(),
            summer_months: default_summer_months(),
            winter_months: default_winter_months(),
            summer_warn_delta_c: default_summer_warn(),
            summer_alert_delta_c: default_summer_alert(),
            winter_warn_delta_c: default_winter_warn(),
            winter_alert_delta_c: default_winter_alert(),
            use_lux_gate: true,
            occupancy_lux_threshold: default_occupancy_lux(),
        }
    }
}

impl DetectorConfig {
    /// Current level at which the overcurrent tracker arms
    pub fn warn_level_a(&self) -> f64 {
        self.near_limit_ratio * self.current_limit_a
    }

    /// Reject settings the detector cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(Error::Config(format!(
                "ewma_alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }

        let finite = [
            ("ewma_k", self.ewma_k),
            ("mains_voltage_v", self.mains_voltage_v),
            ("current_limit_a", self.current_limit_a),
            ("near_limit_ratio", self.near_limit_ratio),
            ("spike_delta_a", self.spike_delta_a),
            ("spike_abs_a", self.spike_abs_a),
            ("summer_warn_delta_c", self.summer_warn_delta_c),
            ("summer_alert_delta_c", self.summer_alert_delta_c),
            ("winter_warn_delta_c", self.winter_warn_delta_c),
            ("winter_alert_delta_c", self.winter_alert_delta_c),
            ("occupancy_lux_threshold", self.occupancy_lux_threshold),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(Error::Config(format!("{} must be finite, got {}", name, value)));
            }
        }

        for (name, value) in [
            ("ewma_sustain_secs", self.ewma_sustain_secs),
            ("near_limit_min_secs", self.near_limit_min_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!("{} must be >= 0, got {}", name, value)));
            }
        }

        for month in self.summer_months.iter().chain(self.winter_months.iter()) {
            if !(1..=12).contains(month) {
                return Err(Error::Config(format!("Invalid month: {}", month)));
            }
        }

        if let Some(month) = self.summer_months.iter().find(|m| self.winter_months.contains(m)) {
            return Err(Error::Config(format!(
                "Month {} is listed as both summer and winter",
                month
            )));
        }

        Ok(())
    }
}

/// Bulk CSV ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum distance for matching an outdoor temperature reading to a sample
    #[serde(default = "default_join_tolerance")]
    pub join_tolerance_secs: f64,
    /// Accepted outdoor temperature column names in the weather file, in priority order
    #[serde(default = "default_weather_columns")]
    pub weather_columns: Vec<String>,
}

fn default_join_tolerance() -> f64 { 600.0 }
fn default_weather_columns() -> Vec<String> {
    vec![
        "outside_temp_c".to_string(),
        "outdoor_temp_c".to_string(),
        "temp_out_c".to_string(),
    ]
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            join_tolerance_secs: default_join_tolerance(),
            weather_columns: default_weather_columns(),
        }
    }
}

/// Event storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for detected events (None = platform data directory)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Days of events kept by cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 { 30 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_documented_table() {
        let cfg = DetectorConfig::default();
        assert_eq!(cfg.ewma_alpha, 0.2);
        assert_eq!(cfg.ewma_k, 3.0);
        assert_eq!(cfg.ewma_sustain_secs, 10.0);
        assert_eq!(cfg.mains_voltage_v, 220.0);
        assert_eq!(cfg.current_limit_a, 30.0);
        assert_eq!(cfg.near_limit_min_secs, 4.0);
        assert_eq!(cfg.summer_months, vec![6, 7, 8]);
        assert_eq!(cfg.winter_months, vec![12, 1, 2]);
        assert!(cfg.use_lux_gate);
        assert!((cfg.warn_level_a() - 27.0).abs() < 1e-9);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[detector]").unwrap();
        writeln!(file, "ewma_k = 2.5").unwrap();
        writeln!(file, "use_lux_gate = false").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.detector.ewma_k, 2.5);
        assert!(!config.detector.use_lux_gate);
        assert_eq!(config.detector.current_limit_a, 30.0);
        assert_eq!(config.ingest.join_tolerance_secs, 600.0);
        assert_eq!(config.storage.retention_days, 30);
    }

    #[test]
    fn test_save_and_reload() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.detector.spike_abs_a = 35.0;
        config.save_to(file.path()).unwrap();

        let loaded = Config::load_from(file.path()).unwrap();
        assert_eq!(loaded.detector, config.detector);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut cfg = DetectorConfig::default();
        cfg.ewma_alpha = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let mut cfg = DetectorConfig::default();
        cfg.winter_months = vec![8, 12];
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::default();
        cfg.summer_months = vec![13];
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::default();
        cfg.near_limit_min_secs = -1.0;
        assert!(cfg.validate().is_err());

        // A zero mains voltage is absorbed by the detector, not rejected
        let mut cfg = DetectorConfig::default();
        cfg.mains_voltage_v = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[detector]\newma_k = \"high\"").unwrap();
        assert!(matches!(Config::load_from(file.path()), Err(Error::Config(_))));
    }
}
