//! Indoor vs. outdoor temperature rule, gated by season and occupancy

use crate::core::{DetectorConfig, Event, EventKind, Sample, Severity};
use chrono::Datelike;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Summer,
    Winter,
}

impl Season {
    /// Season of a calendar month (1-12), if it belongs to either set
    pub fn of_month(cfg: &DetectorConfig, month: u32) -> Option<Self> {
        if cfg.summer_months.contains(&month) {
            Some(Season::Summer)
        } else if cfg.winter_months.contains(&month) {
            Some(Season::Winter)
        } else {
            None
        }
    }
}

/// Occupancy proxy: with the gate on, an absent lux reading fails it
pub fn lux_gate_passes(cfg: &DetectorConfig, lux: Option<f64>) -> bool {
    if !cfg.use_lux_gate {
        return true;
    }
    matches!(lux, Some(l) if l >= cfg.occupancy_lux_threshold)
}

/// Evaluate the thermal rule for one sample. Stateless.
pub fn evaluate(cfg: &DetectorConfig, sample: &Sample) -> Option<Event> {
    let (room, outdoor) = match (sample.room_temp_c, sample.outdoor_temp_c) {
        (Some(room), Some(outdoor)) => (room, outdoor),
        _ => return None,
    };
    if !lux_gate_passes(cfg, sample.lux) {
        return None;
    }

    let diff = room - outdoor;
    let (kind, severity) = match Season::of_month(cfg, sample.timestamp.month())? {
        Season::Summer => {
            let severity = if diff >= cfg.summer_alert_delta_c {
                Severity::Alert
            } else if diff >= cfg.summer_warn_delta_c {
                Severity::Warn
            } else {
                return None;
            };
            (EventKind::ThermalSummerRoomHotVsOutdoor, severity)
        }
        Season::Winter => {
            let severity = if diff <= cfg.winter_alert_delta_c {
                Severity::Alert
            } else if diff <= cfg.winter_warn_delta_c {
                Severity::Warn
            } else {
                return None;
            };
            (EventKind::ThermalWinterRoomTooColdVsOutdoor, severity)
        }
    };

    Some(
        Event::new(kind, sample.timestamp, sample.timestamp, severity)
            .with_info("room_c", room)
            .with_info("outdoor_c", outdoor)
            .with_info("delta_c", diff),
    )
}
