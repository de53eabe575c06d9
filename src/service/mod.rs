//! Detector service - the composition root for one monitored stream
//!
//! Owns a single [`Detector`] behind an async mutex that is held for one whole
//! update, keeps running counters, and pushes every result onto a broadcast
//! channel so transports (HTTP, sockets, the CLI) can fan results out.

use crate::core::{
    Config, DetectionResult, DetectionStats, Error, Result, Sample, SensorReading, ServiceStatus,
};
use crate::detection::{Baseline, Detector};
use chrono::Local;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};

/// Results buffered per subscriber before the slowest one starts lagging
const CHANNEL_CAPACITY: usize = 256;

struct Inner {
    detector: Detector,
    total_processed: u64,
    total_events: u64,
    started: Instant,
}

impl Inner {
    fn uptime_minutes(&self) -> f64 {
        (self.started.elapsed().as_secs_f64() / 60.0 * 10.0).round() / 10.0
    }
}

/// Serializes all updates for one stream and publishes their results
pub struct DetectorService {
    inner: Mutex<Inner>,
    results: broadcast::Sender<DetectionResult>,
    heartbeat_every: u64,
}

impl DetectorService {
    pub fn new(detector: Detector, heartbeat_every: u64) -> Self {
        let (results, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                detector,
                total_processed: 0,
                total_events: 0,
                started: Instant::now(),
            }),
            results,
            heartbeat_every: heartbeat_every.max(1),
        }
    }

    /// Build the service from application config, loading the baseline file
    pub fn from_config(config: &Config) -> Result<Self> {
        let baseline = Baseline::load(&config.general.baseline_path)?;
        let detector = Detector::new(&baseline, config.detector.clone())?;
        Ok(Self::new(detector, config.general.heartbeat_every))
    }

    /// Receive every future detection result
    pub fn subscribe(&self) -> broadcast::Receiver<DetectionResult> {
        self.results.subscribe()
    }

    /// Process a loosely shaped reading from a transport.
    ///
    /// A missing or unparseable timestamp is replaced by local wall-clock time.
    pub async fn process(&self, reading: SensorReading) -> Result<DetectionResult> {
        let now = Local::now().naive_local();
        let raw_ts = reading.timestamp.clone();

        let (sample, substituted) = reading.into_sample(now).map_err(|e| {
            log::error!("Rejected reading: {}", e);
            e
        })?;
        if substituted {
            log::warn!(
                "Unparseable timestamp {:?}, using wall clock {}",
                raw_ts.unwrap_or_default(),
                now
            );
        }

        self.process_sample(sample).await
    }

    /// Process an already well-formed sample
    pub async fn process_sample(&self, sample: Sample) -> Result<DetectionResult> {
        let result = {
            let mut inner = self.inner.lock().await;

            let events = match inner.detector.update(&sample) {
                Ok(events) => events,
                Err(e) => {
                    log::error!("Rejected sample at {}: {}", sample.timestamp, e);
                    return Err(e);
                }
            };

            inner.total_processed += 1;
            inner.total_events += events.len() as u64;

            let stats = DetectionStats {
                current_mean_w: inner.detector.mean_w(),
                current_std_w: inner.detector.std_w(),
                total_processed: inner.total_processed,
                total_events: inner.total_events,
                uptime_minutes: inner.uptime_minutes(),
            };

            let result = DetectionResult {
                timestamp: sample.timestamp,
                is_anomaly: !events.is_empty(),
                events,
                sample,
                stats,
            };

            // Published under the lock so subscribers see update order.
            // No subscribers is not an error.
            let _ = self.results.send(result.clone());
            result
        };

        self.log_result(&result);

        Ok(result)
    }

    fn log_result(&self, result: &DetectionResult) {
        if result.is_anomaly {
            log::warn!(
                "{} anomaly event(s) at {} (power {:.1}W)",
                result.events.len(),
                result.timestamp.format("%H:%M:%S"),
                result.sample.power_w
            );
            for event in &result.events {
                log::warn!("  {} ({}) {:?}", event.kind, event.severity, event.info);
            }
        } else if result.stats.total_processed % self.heartbeat_every == 0 {
            log::debug!(
                "Normal at {} - power {:.1}W, processed {}",
                result.timestamp.format("%H:%M:%S"),
                result.sample.power_w,
                result.stats.total_processed
            );
        }
    }

    /// Current health snapshot
    pub async fn status(&self) -> ServiceStatus {
        let inner = self.inner.lock().await;
        let cfg = inner.detector.config();

        ServiceStatus {
            uptime_minutes: inner.uptime_minutes(),
            total_processed: inner.total_processed,
            total_events: inner.total_events,
            anomaly_rate: ((inner.total_events as f64 / inner.total_processed.max(1) as f64)
                * 10_000.0)
                .round()
                / 100.0,
            current_mean_w: inner.detector.mean_w(),
            current_std_w: inner.detector.std_w(),
            ewma_k: cfg.ewma_k,
            current_limit_a: cfg.current_limit_a,
            spike_delta_a: cfg.spike_delta_a,
            subscribers: self.results.receiver_count(),
        }
    }

    /// Zero the counters and uptime. Detector state is kept.
    pub async fn reset_stats(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_processed = 0;
        inner.total_events = 0;
        inner.started = Instant::now();
        log::info!("Service statistics reset");
    }

    /// Parse one JSON line into a reading and process it
    pub async fn process_json(&self, line: &str) -> Result<DetectionResult> {
        let reading: SensorReading = serde_json::from_str(line)
            .map_err(|e| Error::InvalidSample(format!("Malformed reading: {}", e)))?;
        self.process(reading).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DetectorConfig, EventKind};

    fn service() -> DetectorService {
        let baseline = Baseline::new(1_000_000, 1.0e9, 1.01e12);
        let detector = Detector::new(&baseline, DetectorConfig::default()).unwrap();
        DetectorService::new(detector, 10)
    }

    fn reading(ts: &str, power: f64) -> SensorReading {
        SensorReading {
            timestamp: Some(ts.to_string()),
            power_w: Some(power),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_process_counts_and_broadcasts() {
        let service = service();
        let mut rx = service.subscribe();

        service.process(reading("2024-07-15T09:00:00", 1000.0)).await.unwrap();
        let result = service.process(reading("2024-07-15T09:00:02", 9000.0)).await.unwrap();

        assert!(result.is_anomaly);
        assert!(result.events.iter().any(|e| e.kind == EventKind::ShortSpikeSuspect));
        assert_eq!(result.stats.total_processed, 2);

        let first = rx.recv().await.unwrap();
        assert!(!first.is_anomaly);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.events.len(), result.events.len());

        let status = service.status().await;
        assert_eq!(status.total_processed, 2);
        assert_eq!(status.total_events, result.stats.total_events);
        assert_eq!(status.subscribers, 1);
        assert_eq!(status.current_limit_a, 30.0);
    }

    #[tokio::test]
    async fn test_missing_power_rejected_without_counting() {
        let service = service();
        let err = service
            .process(SensorReading {
                timestamp: Some("2024-07-15T09:00:00".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSample(_)));
        assert_eq!(service.status().await.total_processed, 0);
    }

    #[tokio::test]
    async fn test_process_json_line() {
        let service = service();
        let result = service
            .process_json(r#"{"timestamp": "2024-01-10T20:00:00", "power_W": 800, "temp_C": 12.0, "lux": 300, "outdoor_temp_C": 10.0}"#)
            .await
            .unwrap();
        assert_eq!(result.sample.room_temp_c, Some(12.0));
        assert!(result
            .events
            .iter()
            .any(|e| e.kind == EventKind::ThermalWinterRoomTooColdVsOutdoor));

        assert!(service.process_json("{not json").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_timestamp_uses_wall_clock() {
        let service = service();
        let before = Local::now().naive_local();
        let result = service
            .process(SensorReading { power_w: Some(500.0), ..Default::default() })
            .await
            .unwrap();
        assert!(result.timestamp >= before - chrono::Duration::seconds(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_results_arrive_in_update_order() {
        let service = std::sync::Arc::new(service());
        let mut rx = service.subscribe();

        let tasks: Vec<_> = (0..4)
            .map(|task| {
                let service = service.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        let ts = format!("2024-07-15T09:{:02}:{:02}", task * 10 + i / 60, i % 60);
                        service.process(reading(&ts, 1000.0)).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = 0;
        for _ in 0..200 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.stats.total_processed, last + 1);
            last = result.stats.total_processed;
        }
    }

    #[tokio::test]
    async fn test_reset_stats_keeps_detector() {
        let service = service();
        service.process(reading("2024-07-15T09:00:00", 7000.0)).await.unwrap();
        let mean_before = service.status().await.current_mean_w;

        service.reset_stats().await;
        let status = service.status().await;
        assert_eq!(status.total_processed, 0);
        assert_eq!(status.total_events, 0);
        assert_eq!(status.current_mean_w, mean_before);
    }
}
