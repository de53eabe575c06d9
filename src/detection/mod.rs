//! Streaming anomaly detection
//!
//! One [`Detector`] evaluates one power stream. Every sample runs through the
//! evaluators in a fixed order:
//! - all-time statistics update
//! - EWMA deviation tracker
//! - overcurrent tracker (on current derived from power)
//! - spike detector
//! - thermal rule (when temperatures and the lux gate allow)
//!
//! Events come back in that order, 0 to 4 per sample.

mod accumulator;
mod baseline;
mod ewma;
mod overcurrent;
mod spike;
mod thermal;

pub use accumulator::{moments, RunningStats};
pub use baseline::Baseline;
pub use ewma::{deviation_score, BreachPhase, EwmaTracker};
pub use overcurrent::{derive_current, OvercurrentPhase, OvercurrentTracker, VOLTAGE_EPSILON};
pub use spike::SpikeDetector;
pub use thermal::{lux_gate_passes, Season};

use crate::core::{DetectorConfig, Error, Event, Result, Sample};

/// Mutable state of one stream. Owned by exactly one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorState {
    pub stats: RunningStats,
    pub ewma: EwmaTracker,
    pub overcurrent: OvercurrentTracker,
    pub spike: SpikeDetector,
}

impl DetectorState {
    /// Fresh state seeded from a baseline
    pub fn seeded(baseline: &Baseline) -> Self {
        Self {
            stats: RunningStats::from_baseline(baseline),
            ewma: EwmaTracker::new(baseline.mean()),
            overcurrent: OvercurrentTracker::new(),
            spike: SpikeDetector::new(),
        }
    }
}

/// Run every evaluator over one sample, mutating `state` in place.
///
/// The sample must already be validated; see [`check_sample`].
pub fn evaluate(cfg: &DetectorConfig, state: &mut DetectorState, sample: &Sample) -> Vec<Event> {
    let mut events = Vec::new();
    let ts = sample.timestamp;

    state.stats.push(sample.power_w);
    let (mean, std) = (state.stats.mean(), state.stats.std());

    events.extend(state.ewma.observe(cfg, ts, sample.power_w, mean, std));

    let current_a = derive_current(cfg, sample.power_w);
    events.extend(state.overcurrent.observe(cfg, ts, current_a));
    events.extend(state.spike.observe(cfg, ts, current_a));

    events.extend(thermal::evaluate(cfg, sample));

    events
}

/// Reject samples the evaluators cannot fold in
pub fn check_sample(sample: &Sample) -> Result<()> {
    if !sample.power_w.is_finite() {
        return Err(Error::InvalidSample(format!(
            "power_w must be a finite number, got {}",
            sample.power_w
        )));
    }
    Ok(())
}

/// Stateful evaluator for a single power stream.
///
/// Not safe to share between writers: wrap it in a mutex held for one whole
/// [`Detector::update`] call, or keep it on one task.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    state: DetectorState,
}

impl Detector {
    /// Build a detector from a baseline and validated thresholds
    pub fn new(baseline: &Baseline, config: DetectorConfig) -> Result<Self> {
        config.validate()?;

        log::info!(
            "Detector seeded from baseline: mean={:.1}W std={:.1}W n={}",
            baseline.mean(),
            baseline.std(),
            baseline.n
        );

        Ok(Self {
            state: DetectorState::seeded(baseline),
            config,
        })
    }

    /// Evaluate one sample. An invalid sample is rejected without touching state.
    pub fn update(&mut self, sample: &Sample) -> Result<Vec<Event>> {
        check_sample(sample)?;
        Ok(evaluate(&self.config, &mut self.state, sample))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// All-time mean power (W), baseline included
    pub fn mean_w(&self) -> f64 {
        self.state.stats.mean()
    }

    /// All-time standard deviation of power (W), baseline included
    pub fn std_w(&self) -> f64 {
        self.state.stats.std()
    }
}
