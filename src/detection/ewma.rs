//! EWMA deviation tracker with breach hysteresis
//!
//! Each sample updates an exponentially smoothed estimate of power and scores
//! the sample against it, scaled by the all-time standard deviation. A run of
//! samples scoring beyond `ewma_k` is a breach episode; one event is emitted
//! when the episode ends, and only if it lasted `ewma_sustain_secs` or more.

use crate::core::{seconds_between, DetectorConfig, Event, EventKind, Severity};
use chrono::NaiveDateTime;

/// Hysteresis state of the tracker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreachPhase {
    Idle,
    Breaching {
        start: NaiveDateTime,
        /// Largest |z| seen in this episode
        peak: f64,
    },
}

/// Deviation score of `value` against the smoothed estimate.
///
/// Defined as 0 when the standard deviation is 0, so a flat history can never breach.
pub fn deviation_score(value: f64, smoothed: f64, std: f64) -> f64 {
    if std == 0.0 {
        0.0
    } else {
        (value - smoothed) / std
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EwmaTracker {
    smoothed: f64,
    phase: BreachPhase,
}

impl EwmaTracker {
    /// Start idle with the smoothed estimate at `seed` (the baseline mean)
    pub fn new(seed: f64) -> Self {
        Self {
            smoothed: seed,
            phase: BreachPhase::Idle,
        }
    }

    pub fn smoothed(&self) -> f64 {
        self.smoothed
    }

    pub fn phase(&self) -> BreachPhase {
        self.phase
    }

    pub fn is_breaching(&self) -> bool {
        matches!(self.phase, BreachPhase::Breaching { .. })
    }

    /// Fold in one sample. `mean`/`std` are the all-time statistics after
    /// this sample was accumulated.
    pub fn observe(
        &mut self,
        cfg: &DetectorConfig,
        timestamp: NaiveDateTime,
        value: f64,
        mean: f64,
        std: f64,
    ) -> Option<Event> {
        let alpha = cfg.ewma_alpha;
        self.smoothed = alpha * value + (1.0 - alpha) * self.smoothed;

        let z = deviation_score(value, self.smoothed, std).abs();
        let breached = z > cfg.ewma_k;

        match (self.phase, breached) {
            (BreachPhase::Idle, true) => {
                self.phase = BreachPhase::Breaching { start: timestamp, peak: z };
                None
            }
            (BreachPhase::Breaching { start, peak }, true) => {
                self.phase = BreachPhase::Breaching { start, peak: peak.max(z) };
                None
            }
            (BreachPhase::Breaching { start, peak }, false) => {
                // Short episodes are dropped, never carried into the next one
                self.phase = BreachPhase::Idle;

                let duration = seconds_between(start, timestamp);
                if duration >= cfg.ewma_sustain_secs {
                    Some(
                        Event::new(EventKind::PowerEwmaAnomaly, start, timestamp, Severity::Alert)
                            .with_info("z_peak", peak)
                            .with_info("mean_w", mean)
                            .with_info("std_w", std),
                    )
                } else {
                    log::debug!("Dropping {:.1}s EWMA breach (peak z {:.2})", duration, peak);
                    None
                }
            }
            (BreachPhase::Idle, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    const MEAN: f64 = 1000.0;
    const STD: f64 = 100.0;

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_deviation_score_zero_std() {
        assert_eq!(deviation_score(5000.0, 10.0, 0.0), 0.0);
        assert_eq!(deviation_score(300.0, 100.0, 50.0), 4.0);
    }

    #[test]
    fn test_constant_signal_stays_idle() {
        let cfg = DetectorConfig::default();
        let mut tracker = EwmaTracker::new(MEAN);
        for i in 0..100 {
            assert!(tracker.observe(&cfg, t(i), MEAN, MEAN, STD).is_none());
            assert!(!tracker.is_breaching());
        }
        assert!((tracker.smoothed() - MEAN).abs() < 1e-9);
    }

    #[test]
    fn test_zero_std_never_breaches() {
        let cfg = DetectorConfig::default();
        let mut tracker = EwmaTracker::new(0.0);
        for i in 0..20 {
            assert!(tracker.observe(&cfg, t(i), 1.0e6, 0.0, 0.0).is_none());
        }
        assert!(!tracker.is_breaching());
    }

    #[test]
    fn test_sustained_breach_emits_once_on_exit() {
        let cfg = DetectorConfig::default();
        let mut tracker = EwmaTracker::new(MEAN);
        let mut events = Vec::new();

        // 50 sigma above the mean, every 2 seconds
        for i in 0..7 {
            events.extend(tracker.observe(&cfg, t(i * 2), MEAN + 50.0 * STD, MEAN, STD));
            assert!(tracker.is_breaching());
        }
        assert!(events.is_empty(), "no event while still breaching");

        for i in 7..40 {
            events.extend(tracker.observe(&cfg, t(i * 2), MEAN, MEAN, STD));
        }

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, EventKind::PowerEwmaAnomaly);
        assert_eq!(event.severity, Severity::Alert);
        assert_eq!(event.start, t(0));
        assert!(event.duration_secs() >= cfg.ewma_sustain_secs);
        assert!(event.info_value("z_peak").unwrap() >= cfg.ewma_k);
        assert!((event.info_value("z_peak").unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(event.info_value("std_w"), Some(STD));
        assert!(!tracker.is_breaching());
    }

    #[test]
    fn test_short_breach_is_dropped() {
        let cfg = DetectorConfig::default();
        let mut tracker = EwmaTracker::new(MEAN);

        // z = 0.8 * 20 = 16 on entry, then -3.2 and -2.56 on the way back
        assert!(tracker.observe(&cfg, t(0), MEAN + 20.0 * STD, MEAN, STD).is_none());
        assert!(tracker.is_breaching());

        let mut events = Vec::new();
        for i in 1..30 {
            events.extend(tracker.observe(&cfg, t(i), MEAN, MEAN, STD));
        }
        assert!(events.is_empty());
        assert_eq!(tracker.phase(), BreachPhase::Idle);
    }

    #[test]
    fn test_alpha_one_follows_sample() {
        let mut cfg = DetectorConfig::default();
        cfg.ewma_alpha = 1.0;
        let mut tracker = EwmaTracker::new(MEAN);

        // With alpha = 1 the smoothed value equals the sample, so z is always 0
        assert!(tracker.observe(&cfg, t(0), MEAN * 10.0, MEAN, STD).is_none());
        assert!(!tracker.is_breaching());
        assert_eq!(tracker.smoothed(), MEAN * 10.0);
    }

    #[test]
    fn test_peak_tracks_maximum() {
        let cfg = DetectorConfig::default();
        let mut tracker = EwmaTracker::new(MEAN);
        tracker.observe(&cfg, t(0), MEAN + 10.0 * STD, MEAN, STD);
        tracker.observe(&cfg, t(1), MEAN + 30.0 * STD, MEAN, STD);
        tracker.observe(&cfg, t(2), MEAN + 25.0 * STD, MEAN, STD);

        match tracker.phase() {
            BreachPhase::Breaching { start, peak } => {
                assert_eq!(start, t(0));
                // second sample: smoothed = 1000 + 0.2*3000 + 0.8*200 = 1760, z = 22.4
                assert!((peak - 22.4).abs() < 1e-9);
            }
            BreachPhase::Idle => panic!("expected an open breach"),
        }
    }

    #[test]
    fn test_score_exactly_at_k_stays_idle() {
        let cfg = DetectorConfig {
            ewma_alpha: 0.5,
            ewma_k: 3.0,
            ..DetectorConfig::default()
        };

        // smoothed becomes 30, so z = (60 - 30) / 10 = 3 exactly
        let mut tracker = EwmaTracker::new(0.0);
        assert!(tracker.observe(&cfg, t(0), 60.0, 0.0, 10.0).is_none());
        assert_eq!(tracker.smoothed(), 30.0);
        assert!(!tracker.is_breaching());

        let mut tracker = EwmaTracker::new(0.0);
        tracker.observe(&cfg, t(0), 60.0, 0.0, 9.99);
        assert!(tracker.is_breaching());
    }
}
