//! Near-limit overcurrent tracker
//!
//! Arms when the derived current reaches `near_limit_ratio * current_limit_a`.
//! While the condition holds it re-alerts every `near_limit_min_secs`: each
//! emission re-arms the timer, so a long overload produces a steady stream of
//! events rather than one per episode.

use crate::core::{seconds_between, DetectorConfig, Event, EventKind, Severity};
use chrono::NaiveDateTime;

/// Floor applied to the mains voltage before dividing
pub const VOLTAGE_EPSILON: f64 = 1e-9;

/// Current drawn by `power_w` at the configured mains voltage
pub fn derive_current(cfg: &DetectorConfig, power_w: f64) -> f64 {
    power_w / cfg.mains_voltage_v.max(VOLTAGE_EPSILON)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OvercurrentPhase {
    Inactive,
    Active {
        /// When the current re-alert window opened
        since: NaiveDateTime,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OvercurrentTracker {
    phase: OvercurrentPhase,
}

impl Default for OvercurrentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OvercurrentTracker {
    pub fn new() -> Self {
        Self {
            phase: OvercurrentPhase::Inactive,
        }
    }

    pub fn phase(&self) -> OvercurrentPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, OvercurrentPhase::Active { .. })
    }

    pub fn observe(
        &mut self,
        cfg: &DetectorConfig,
        timestamp: NaiveDateTime,
        current_a: f64,
    ) -> Option<Event> {
        if current_a < cfg.warn_level_a() {
            self.phase = OvercurrentPhase::Inactive;
            return None;
        }

        match self.phase {
            OvercurrentPhase::Inactive => {
                self.phase = OvercurrentPhase::Active { since: timestamp };
                None
            }
            OvercurrentPhase::Active { since } => {
                if seconds_between(since, timestamp) < cfg.near_limit_min_secs {
                    return None;
                }

                let severity = if current_a >= cfg.current_limit_a {
                    Severity::Alert
                } else {
                    Severity::Warn
                };
                let ratio = if cfg.current_limit_a != 0.0 {
                    current_a / cfg.current_limit_a
                } else {
                    f64::INFINITY
                };

                self.phase = OvercurrentPhase::Active { since: timestamp };

                Some(
                    Event::new(EventKind::OvercurrentNearLimit, since, timestamp, severity)
                        .with_info("current_a", current_a)
                        .with_info("limit_a", cfg.current_limit_a)
                        .with_info("ratio", ratio),
                )
            }
        }
    }
}
