//! Sample-to-sample current spike detector

use crate::core::{DetectorConfig, Event, EventKind, Severity};
use chrono::NaiveDateTime;

/// Compares each sample's current with the one immediately before it.
///
/// The only state is the previous sample; the first sample of a stream is
/// never evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeDetector {
    last: Option<(NaiveDateTime, f64)>,
}

impl SpikeDetector {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Previous sample's timestamp and current
    pub fn last(&self) -> Option<(NaiveDateTime, f64)> {
        self.last
    }

    pub fn observe(
        &mut self,
        cfg: &DetectorConfig,
        timestamp: NaiveDateTime,
        current_a: f64,
    ) -> Option<Event> {
        let event = self.last.and_then(|(last_ts, last_a)| {
            let delta_a = current_a - last_a;
            let spiked = delta_a.abs() >= cfg.spike_delta_a || current_a >= cfg.spike_abs_a;
            spiked.then(|| {
                Event::new(EventKind::ShortSpikeSuspect, last_ts, timestamp, Severity::Alert)
                    .with_info("delta_a", delta_a)
                    .with_info("current_a", current_a)
            })
        });

        self.last = Some((timestamp, current_a));
        event
    }
}
