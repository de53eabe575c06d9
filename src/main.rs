//! Power Anomaly - command line entry point
//!
//! Offline batch runs over CSV exports, a JSON-lines streaming mode, and
//! access to the baseline file and the event history.

use anyhow::{bail, Context};
use chrono::{Duration, Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use power_anomaly_lib::core::{format_timestamp, parse_timestamp, Config};
use power_anomaly_lib::db::EventStore;
use power_anomaly_lib::detection::{Baseline, Detector};
use power_anomaly_lib::ingest;
use power_anomaly_lib::service::DetectorService;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "power-anomaly")]
#[command(about = "Streaming power and thermal anomaly detector", long_about = None)]
struct Cli {
    /// Config file (default: user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detector over a CSV export
    Batch {
        /// Input CSV with timestamp and power columns
        #[arg(short, long)]
        input: PathBuf,

        /// Optional outdoor temperature CSV, joined by nearest timestamp
        #[arg(short, long)]
        weather: Option<PathBuf>,

        /// Baseline JSON (overrides the config value)
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Events CSV output
        #[arg(short, long, default_value = "events.csv")]
        output: PathBuf,

        /// Also store events in the SQLite event store
        #[arg(long)]
        store: bool,

        /// Stream identifier used when storing events
        #[arg(long, default_value = "default")]
        stream_id: String,

        /// Write the baseline extended with this run's samples
        #[arg(long)]
        save_baseline: Option<PathBuf>,
    },

    /// Read JSON readings from stdin, write detection results to stdout
    Stream {
        /// Baseline JSON (overrides the config value)
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Also store events in the SQLite event store
        #[arg(long)]
        store: bool,

        /// Stream identifier used when storing events
        #[arg(long, default_value = "default")]
        stream_id: String,
    },

    /// Show baseline statistics
    Baseline {
        /// Baseline JSON (overrides the config value)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// List stored events
    History {
        /// Range start (default: 24 hours ago)
        #[arg(long)]
        from: Option<String>,

        /// Range end (default: now)
        #[arg(long)]
        to: Option<String>,

        /// Delete events older than the configured retention first
        #[arg(long)]
        cleanup: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Batch {
            input,
            weather,
            baseline,
            output,
            store,
            stream_id,
            save_baseline,
        } => {
            if let Some(path) = baseline {
                config.general.baseline_path = path;
            }
            let opts = BatchOptions {
                output: &output,
                store,
                stream_id: &stream_id,
                save_baseline: save_baseline.as_deref(),
            };
            run_batch(&config, &input, weather.as_deref(), &opts)
        }
        Commands::Stream {
            baseline,
            store,
            stream_id,
        } => {
            if let Some(path) = baseline {
                config.general.baseline_path = path;
            }
            run_stream(&config, store, &stream_id).await
        }
        Commands::Baseline { path } => {
            let path = path.unwrap_or_else(|| config.general.baseline_path.clone());
            show_baseline(&path)
        }
        Commands::History { from, to, cleanup } => {
            show_history(&config, from.as_deref(), to.as_deref(), cleanup)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => match Config::load() {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                let config = Config::default();
                config.detector.validate()?;
                Ok(config)
            }
        },
    }
}

fn open_store(config: &Config) -> anyhow::Result<EventStore> {
    let store = match &config.storage.database_path {
        Some(path) => EventStore::open(path),
        None => EventStore::open_default(),
    };
    store.context("Failed to open event store")
}

struct BatchOptions<'a> {
    output: &'a Path,
    store: bool,
    stream_id: &'a str,
    save_baseline: Option<&'a Path>,
}

fn run_batch(
    config: &Config,
    input: &Path,
    weather: Option<&Path>,
    opts: &BatchOptions<'_>,
) -> anyhow::Result<()> {
    let output = opts.output;
    let baseline = Baseline::load(&config.general.baseline_path).with_context(|| {
        format!("Failed to load baseline {}", config.general.baseline_path.display())
    })?;
    let mut detector = Detector::new(&baseline, config.detector.clone())?;

    let samples = ingest::load_samples(input, weather, &config.ingest)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let events = ingest::run_batch(&mut detector, &samples)?;

    ingest::write_events_csv(output, &events)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if opts.store {
        let mut db = open_store(config)?;
        db.insert_events(&events, opts.stream_id)?;
    }

    if let Some(path) = opts.save_baseline {
        let updated = detector.state().stats.to_baseline();
        updated
            .save(path)
            .with_context(|| format!("Failed to write baseline {}", path.display()))?;
        println!("Baseline with {} samples written to {}", updated.n, path.display());
    }

    println!("Samples processed: {}", samples.len());
    println!("Events detected:   {}", events.len());
    for ((kind, severity), count) in ingest::summarize(&events) {
        println!("  {:<42} {:<6} {:>6}", kind, severity, count);
    }
    println!("Events written to {}", output.display());

    Ok(())
}

async fn run_stream(config: &Config, store: bool, stream_id: &str) -> anyhow::Result<()> {
    let service = DetectorService::from_config(config).context("Failed to start detector")?;
    let db = if store { Some(open_store(config)?) } else { None };

    log::info!("Reading JSON readings from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let out = match service.process_json(&line).await {
            Ok(result) => {
                if let Some(db) = &db {
                    for event in &result.events {
                        if let Err(e) = db.insert_event(event, stream_id) {
                            log::error!("Failed to store event: {}", e);
                        }
                    }
                }
                serde_json::to_string(&result)?
            }
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        };

        stdout.write_all(out.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    let status = service.status().await;
    log::info!(
        "Stream closed: {} processed, {} events ({:.2}%)",
        status.total_processed,
        status.total_events,
        status.anomaly_rate
    );

    Ok(())
}

fn show_baseline(path: &Path) -> anyhow::Result<()> {
    let baseline = Baseline::load(path)
        .with_context(|| format!("Failed to load baseline {}", path.display()))?;

    println!("Baseline: {}", path.display());
    println!("  Samples: {}", baseline.n);
    println!("  Mean:    {:.2} W", baseline.mean());
    println!("  Std:     {:.2} W", baseline.std());

    Ok(())
}

fn parse_bound(raw: Option<&str>, default: NaiveDateTime) -> anyhow::Result<NaiveDateTime> {
    match raw {
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => Ok(ts),
            None => bail!("Unrecognized timestamp: {}", raw),
        },
        None => Ok(default),
    }
}

fn show_history(config: &Config, from: Option<&str>, to: Option<&str>, cleanup: bool) -> anyhow::Result<()> {
    let db = open_store(config)?;
    let now = Local::now().naive_local();

    if cleanup {
        let deleted = db.cleanup_old_events(config.storage.retention_days, now)?;
        println!("Removed {} expired event(s)", deleted);
    }

    let start = parse_bound(from, now - Duration::hours(24))?;
    let end = parse_bound(to, now)?;
    let records = db.get_events(start, end)?;

    println!(
        "{} event(s) from {} to {} ({} stored in total)",
        records.len(),
        format_timestamp(start),
        format_timestamp(end),
        db.get_events_count()?
    );
    for (kind, count) in db.count_by_kind()? {
        println!("  {:<42} {:>6} stored", kind, count);
    }
    for record in &records {
        println!(
            "  [{}] {} {:<42} {:<6} {}",
            record.stream_id,
            format_timestamp(record.event.start),
            record.event.kind,
            record.event.severity,
            record.event.info_json()?
        );
    }

    Ok(())
}
