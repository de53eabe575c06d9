//! Pre-computed baseline statistics
//!
//! The baseline is the all-time summary (count, sum, sum of squares) of the
//! monitored power signal. It is computed offline, loaded once at startup and
//! copied into the detector's running accumulator.

use crate::core::{Error, Result};
use crate::detection::accumulator::moments;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Seed statistics for the power signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Number of samples summarized
    pub n: u64,
    /// Sum of samples (W)
    pub sum: f64,
    /// Sum of squared samples (W²)
    pub sum_sqr: f64,
}

impl Baseline {
    pub fn new(n: u64, sum: f64, sum_sqr: f64) -> Self {
        Self { n, sum, sum_sqr }
    }

    /// Load a baseline from its JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Baseline(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse a baseline from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let baseline: Baseline = serde_json::from_str(content)
            .map_err(|e| Error::Baseline(format!("Failed to parse baseline: {}", e)))?;

        if !baseline.sum.is_finite() || !baseline.sum_sqr.is_finite() {
            return Err(Error::Baseline("Baseline sums must be finite".to_string()));
        }

        Ok(baseline)
    }

    /// Write the baseline as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Mean power (W)
    pub fn mean(&self) -> f64 {
        moments(self.n, self.sum, self.sum_sqr).0
    }

    /// Standard deviation of power (W), never negative
    pub fn std(&self) -> f64 {
        moments(self.n, self.sum, self.sum_sqr).1
    }
}
