//! Power Anomaly - Demo CLI
//!
//! Pushes a synthetic day of readings through the detector service and prints
//! every anomaly received on the broadcast channel.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use power_anomaly_lib::core::{format_timestamp, Config, Sample};
use power_anomaly_lib::detection::{Baseline, Detector};
use power_anomaly_lib::service::DetectorService;
use std::collections::BTreeMap;
use tokio::sync::broadcast::error::RecvError;

/// Delay between synthetic samples
const PACE_MS: u64 = 20;

/// Synthetic household circuit: idle load, an overload, a spike, then a hot room
fn synthetic_stream(start: NaiveDateTime, period_secs: f64) -> Vec<(&'static str, Sample)> {
    let step = Duration::milliseconds((period_secs * 1000.0) as i64);
    let mut samples = Vec::new();
    let mut ts = start;

    let mut push = |phase: &'static str, power_w: f64, room: Option<(f64, f64)>| {
        let mut sample = Sample::new(ts, power_w).with_lux(Some(150.0));
        if let Some((room_c, outdoor_c)) = room {
            sample = sample
                .with_room(Some(room_c), Some(50.0))
                .with_outdoor_temp(Some(outdoor_c));
        }
        samples.push((phase, sample));
        ts += step;
    };

    for i in 0..30 {
        push("idle", 1000.0 + 40.0 * (i as f64 * 0.7).sin(), None);
    }
    for _ in 0..20 {
        push("overload", 7000.0, None);
    }
    for i in 0..30 {
        push("idle", 1000.0 + 40.0 * (i as f64 * 0.7).sin(), None);
    }
    push("spike", 9500.0, None);
    for _ in 0..5 {
        push("idle", 1000.0, None);
    }
    for i in 0..10 {
        push("hot room", 1000.0, Some((29.0 + i as f64 * 0.3, 26.0)));
    }

    samples
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("==============================================");
    println!("   Power Anomaly - Demo CLI");
    println!("==============================================\n");

    // 1. Baseline and detector
    println!("[1/3] Seeding detector...");
    let baseline = Baseline::new(1_000_000, 1.0e9, 1.01e12);
    let app_config = Config::load().unwrap_or_else(|e| {
        println!("      Config unavailable ({}), using defaults", e);
        Config::default()
    });
    let config = app_config.detector.clone();
    println!("      Baseline: mean {:.1} W, std {:.1} W", baseline.mean(), baseline.std());
    println!(
        "      Limits:   {:.0} A breaker, warn from {:.1} A, spike delta {:.0} A\n",
        config.current_limit_a,
        config.warn_level_a(),
        config.spike_delta_a
    );

    let detector = match Detector::new(&baseline, config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("      Could not build detector: {}", e);
            return;
        }
    };
    let service = DetectorService::new(detector, app_config.general.heartbeat_every);

    // 2. Subscriber printing events as they arrive
    println!("[2/3] Subscribing to detection results...\n");
    let mut rx = service.subscribe();
    let listener = tokio::spawn(async move {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        loop {
            match rx.recv().await {
                Ok(result) => {
                    for event in &result.events {
                        println!(
                            "  {} | {:<40} | {:<5} | {}",
                            format_timestamp(result.timestamp),
                            event.kind,
                            event.severity,
                            event.info_json().unwrap_or_default()
                        );
                        *counts.entry(event.kind.to_string()).or_insert(0) += 1;
                    }
                }
                Err(RecvError::Lagged(n)) => println!("  (missed {} results)", n),
                Err(RecvError::Closed) => break,
            }
        }
        counts
    });

    // 3. Feed the synthetic stream
    println!("[3/3] Streaming synthetic readings...\n");
    println!("----------------------------------------------");

    let start = NaiveDate::from_ymd_opt(2024, 7, 15)
        .and_then(|d| d.and_hms_opt(14, 0, 0))
        .unwrap_or_default();
    let stream = synthetic_stream(start, app_config.general.sample_period_secs);
    let mut current_phase = "";

    for (phase, sample) in stream {
        if phase != current_phase {
            println!("  -- {} --", phase);
            current_phase = phase;
        }
        if let Err(e) = service.process_sample(sample).await {
            eprintln!("Error processing sample: {}", e);
        }
        // Paced so the listener prints before the next phase marker
        tokio::time::sleep(std::time::Duration::from_millis(PACE_MS)).await;
    }

    let status = service.status().await;
    drop(service);

    let counts = listener.await.unwrap_or_default();

    println!("----------------------------------------------\n");
    println!("=== Session Summary ===\n");
    println!("  Samples:       {}", status.total_processed);
    println!("  Events:        {}", status.total_events);
    println!("  Anomaly rate:  {:.2} %", status.anomaly_rate);
    println!("  Mean power:    {:.1} W", status.current_mean_w);
    for (kind, count) in &counts {
        println!("    {:<40} {}", kind, count);
    }
    println!();
}
