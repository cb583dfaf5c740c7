//! adsb-ingest - Mode S / ADS-B decoding and plane-tracking pipeline
//!
//! Reads AVR/BEAST/SBS1 feeds, decodes Mode S frames, tracks planes,
//! reduces the update stream to significant changes and fans everything
//! out to the configured sinks.

mod config;
mod cpr;
mod dedupe;
mod export;
mod filter;
mod finder;
mod geo;
mod modes;
mod sink;
mod source;
mod tile_grid;
mod tracker;
mod wire;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{FetchSpec, SinkKind, SinkSpec};
use dedupe::DedupeFilter;
use filter::SignificanceFilter;
use finder::ExampleFinder;
use modes::{DecodeError, IcaoRoster};
use sink::{Destination, Event, EventFan, FramePayload, Sink, SinkConfig};
use sink::stdout::StdoutDestination;
use tracker::{IngestOutcome, Tracker};
use wire::{RawModeS, WireFrame, WireProtocol};

/// Bounded queue between producers and decode workers.
const FRAME_QUEUE_CAPACITY: usize = 1024;

/// Bounded queue per sink.
const SINK_QUEUE_CAPACITY: usize = 1024;

/// Parallel decode/ingest workers.
const DECODE_WORKERS: usize = 4;

/// Planes unheard for this long are evicted.
const PLANE_RETENTION_SECS: i64 = 60;

/// Background sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Stats / plane-table report cadence.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(
    name = "adsb-ingest",
    version,
    about = "Tracks planes from BEAST/AVR/SBS1 feeds and publishes decoded location updates"
)]
struct Cli {
    /// Frame sources, URL form: beast://host:port, avr://host:port,
    /// sbs1://host:port, file:///capture.avr?proto=avr
    #[arg(long = "fetch", env = "FETCH")]
    fetch: Vec<String>,

    /// Sinks, URL form: stdout://?queues=location-updates&ttl=60,
    /// file:///out.json
    #[arg(long = "sink", env = "SINK")]
    sink: Vec<String>,

    /// Source tag attached to published records
    #[arg(long, default_value = "", env = "TAG")]
    tag: String,

    /// Default message TTL handed to sinks, seconds
    #[arg(long = "sink-message-ttl", default_value_t = 60)]
    sink_message_ttl: u32,

    /// Suppress identical frames received from multiple receivers
    #[arg(long = "dedupe-filter", env = "DEDUPE")]
    dedupe_filter: bool,

    /// Also publish per-tile <tile>_high / <tile>_low routing keys
    #[arg(long = "spread-updates")]
    spread_updates: bool,

    /// Show extra debug information
    #[arg(long)]
    debug: bool,

    /// Only show important messages
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gather ADS-B data and show a periodic plane table
    Run,
    /// Gather ADS-B data with plain log output, optionally to a file
    Simple { log_file: Option<String> },
    /// Docker daemon mode, JSON logs
    Daemon,
    /// Hunt for example frames from the input
    Filter {
        /// Plane ICAO to filter on, e.g. --icao=E48DF6 --icao=123ABC
        #[arg(long)]
        icao: Vec<String>,
        /// Only location-bearing frames
        #[arg(long)]
        locations_only: bool,
    },
}

struct PipelineOptions {
    sources: Vec<FetchSpec>,
    sinks: Vec<SinkSpec>,
    tag: String,
    dedupe: bool,
    spread_updates: bool,
    finder: Option<ExampleFinder>,
    show_table: bool,
}

#[derive(Default)]
struct PipelineCounters {
    malformed: AtomicU64,
    crc_rejected: AtomicU64,
    duplicates: AtomicU64,
    mode_ac: AtomicU64,
    track_rejected: AtomicU64,
}

impl std::fmt::Display for PipelineCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} malformed, {} crc rejected, {} duplicates, {} mode-ac, {} track rejected",
            self.malformed.load(Ordering::Relaxed),
            self.crc_rejected.load(Ordering::Relaxed),
            self.duplicates.load(Ordering::Relaxed),
            self.mode_ac.load(Ordering::Relaxed),
            self.track_rejected.load(Ordering::Relaxed),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let sources = cli
        .fetch
        .iter()
        .map(|raw| config::parse_fetch(raw))
        .collect::<Result<Vec<_>>>()?;
    if sources.is_empty() {
        bail!("specify at least one --fetch source");
    }

    let mut sinks = cli
        .sink
        .iter()
        .map(|raw| config::parse_sink(raw, cli.sink_message_ttl))
        .collect::<Result<Vec<_>>>()?;
    if sinks.is_empty() {
        sinks.push(SinkSpec {
            kind: SinkKind::Stdout,
            ttl_secs: cli.sink_message_ttl,
            queues: Vec::new(),
        });
    }

    let finder = match &cli.command {
        Command::Filter { icao, locations_only } => {
            Some(ExampleFinder::new(icao, *locations_only)?)
        }
        _ => None,
    };

    run_pipeline(PipelineOptions {
        sources,
        sinks,
        tag: cli.tag.clone(),
        dedupe: cli.dedupe_filter,
        spread_updates: cli.spread_updates,
        finder,
        show_table: matches!(cli.command, Command::Run),
    })
    .await
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &cli.command {
        Command::Daemon => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .init();
        }
        Command::Simple { log_file: Some(path) } => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

#[derive(Clone)]
struct Stage {
    tracker: Arc<Tracker>,
    roster: Arc<IcaoRoster>,
    dedupe: Option<Arc<DedupeFilter>>,
    significance: Arc<SignificanceFilter>,
    finder: Option<Arc<ExampleFinder>>,
    fan: Arc<EventFan>,
    counters: Arc<PipelineCounters>,
    tag: Arc<str>,
}

async fn run_pipeline(opts: PipelineOptions) -> Result<()> {
    let (frame_tx, frame_rx) = mpsc::channel::<WireFrame>(FRAME_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Sinks first so nothing published is lost.
    let mut fan = EventFan::new();
    let mut sinks = Vec::new();
    let mut sink_handles = Vec::new();
    for spec in &opts.sinks {
        let dest: Box<dyn Destination> = match &spec.kind {
            SinkKind::Stdout => Box::new(StdoutDestination::stdout()),
            SinkKind::File { path } => Box::new(StdoutDestination::file(path)?),
        };
        let mut sink_config = SinkConfig::with_queues(&spec.queues);
        sink_config.message_ttl_secs = spec.ttl_secs;
        sink_config.spread_updates = opts.spread_updates;

        let sink = Arc::new(Sink::new(sink_config, dest));
        let rx = fan.subscribe(SINK_QUEUE_CAPACITY);
        let runner = sink.clone();
        sink_handles.push(tokio::spawn(async move { runner.run(rx).await }));
        sinks.push(sink);
    }

    let stage = Stage {
        tracker: Arc::new(Tracker::default()),
        roster: Arc::new(IcaoRoster::default()),
        dedupe: opts.dedupe.then(|| Arc::new(DedupeFilter::default())),
        significance: Arc::new(SignificanceFilter::new()),
        finder: opts.finder.map(Arc::new),
        fan: Arc::new(fan),
        counters: Arc::new(PipelineCounters::default()),
        tag: opts.tag.into(),
    };

    // Producers feed the bounded frame queue.
    let mut producer_handles = Vec::new();
    for spec in opts.sources {
        info!(source = %spec.describe(), "starting producer");
        producer_handles.push(tokio::spawn(source::run_fetch(
            spec,
            frame_tx.clone(),
            shutdown_rx.clone(),
        )));
    }
    drop(frame_tx);

    // Decode workers share the queue; per-ICAO ordering is restored by the
    // tracker's entry locks and per-field timestamps.
    let frame_rx = Arc::new(Mutex::new(frame_rx));
    let mut worker_handles = Vec::new();
    for _ in 0..DECODE_WORKERS {
        let frames = frame_rx.clone();
        let stage = stage.clone();
        worker_handles.push(tokio::spawn(async move {
            decode_worker(frames, stage).await;
        }));
    }

    let sweeper_handle = tokio::spawn(run_sweeper(
        stage.clone(),
        opts.show_table,
        shutdown_rx.clone(),
    ));

    // Run until interrupted or every producer finishes (file replay).
    let producers_done = tokio::spawn(async move {
        for handle in producer_handles {
            let _ = handle.await;
        }
    });
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = producers_done => info!("all sources finished"),
    }
    shutdown_tx.send(true).ok();

    // Producers stop, the frame queue drains, workers exit on close.
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = sweeper_handle.await;

    // Dropping the fan closes sink channels; sinks finish in turn.
    let fan_dropped = stage.fan.dropped();
    drop(stage);
    for handle in sink_handles {
        let _ = handle.await;
    }

    for sink in &sinks {
        if sink.healthy() {
            info!(sink = sink.name(), published = sink.published(), "sink finished");
        } else {
            warn!(sink = sink.name(), published = sink.published(), "finished unhealthy");
        }
    }
    if fan_dropped > 0 {
        warn!(dropped = fan_dropped, "events dropped to back-pressure");
    }
    info!("shutdown complete");
    Ok(())
}

async fn decode_worker(frames: Arc<Mutex<mpsc::Receiver<WireFrame>>>, stage: Stage) {
    loop {
        let frame = { frames.lock().await.recv().await };
        let Some(frame) = frame else { break };

        match frame {
            WireFrame::ModeS { raw, protocol } => {
                process_mode_s(&stage, raw, protocol).await;
            }
            WireFrame::ModeAc { .. } => {
                stage.counters.mode_ac.fetch_add(1, Ordering::Relaxed);
            }
            WireFrame::Sbs1(update) => {
                process_sbs1(&stage, update).await;
            }
        }
    }
}

async fn process_mode_s(stage: &Stage, raw: RawModeS, protocol: WireProtocol) {
    let mut frame = match modes::decode(&raw.payload, raw.received, &stage.roster) {
        Ok(frame) => frame,
        Err(DecodeError::MalformedFrame(reason)) => {
            stage.counters.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(reason, "malformed frame dropped");
            return;
        }
        Err(DecodeError::CrcMismatch { df }) => {
            stage.counters.crc_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(df, "frame failed integrity check");
            return;
        }
    };
    frame.signal_rssi = raw.signal_rssi;
    frame.source_tag = stage.tag.to_string();
    let frame = Arc::new(frame);

    if let Some(finder) = &stage.finder {
        finder.observe(&frame);
    }

    stage
        .fan
        .publish(Event::Frame(FramePayload::ModeS {
            frame: frame.clone(),
            protocol,
        }))
        .await;

    if let Some(dedupe) = &stage.dedupe {
        if !dedupe.check_and_insert(&frame.raw, frame.timestamp) {
            stage.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            return;
        }
        stage
            .fan
            .publish(Event::DedupedFrame(FramePayload::ModeS {
                frame: frame.clone(),
                protocol,
            }))
            .await;
    }

    match stage.tracker.ingest_mode_s(&frame) {
        Ok(outcome) => emit_location(stage, outcome).await,
        Err(err) => {
            stage.counters.track_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(%err, "update rejected");
        }
    }
}

async fn process_sbs1(stage: &Stage, update: wire::Sbs1Update) {
    let update = Arc::new(update);

    stage
        .fan
        .publish(Event::Frame(FramePayload::Sbs1(update.clone())))
        .await;

    if let Some(dedupe) = &stage.dedupe {
        if !dedupe.check_and_insert(update.raw.as_bytes(), update.received) {
            stage.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            return;
        }
        stage
            .fan
            .publish(Event::DedupedFrame(FramePayload::Sbs1(update.clone())))
            .await;
    }

    match stage.tracker.ingest_sbs1(&update) {
        Ok(outcome) => emit_location(stage, outcome).await,
        Err(err) => {
            stage.counters.track_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(%err, "update rejected");
        }
    }
}

async fn emit_location(stage: &Stage, outcome: IngestOutcome) {
    let record = Arc::new(outcome.plane.to_export(outcome.is_new, false, &stage.tag));
    stage.fan.publish(Event::Location(record.clone())).await;

    if let Some(significant) = stage.significance.observe(&record) {
        stage
            .fan
            .publish(Event::Significant(Arc::new(significant)))
            .await;
    }
}

async fn run_sweeper(stage: Stage, show_table: bool, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(SWEEP_INTERVAL);
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let now = Utc::now();

        // Evicted planes publish a removal record and release their final
        // significance candidate.
        for plane in stage
            .tracker
            .evict_older_than(now, ChronoDuration::seconds(PLANE_RETENTION_SECS))
        {
            if let Some(candidate) = stage.significance.flush(&plane.icao_string()) {
                stage
                    .fan
                    .publish(Event::Significant(Arc::new(candidate)))
                    .await;
            }
            let record = Arc::new(plane.to_export(false, true, &stage.tag));
            debug!(plane = %record.display_name(), "evicted");
            stage.fan.publish(Event::Location(record.clone())).await;
            stage.fan.publish(Event::Significant(record)).await;
        }

        if let Some(dedupe) = &stage.dedupe {
            dedupe.sweep(now);
        }
        for candidate in stage
            .significance
            .sweep(now, ChronoDuration::seconds(filter::DEFAULT_RETENTION_SECS))
        {
            stage
                .fan
                .publish(Event::Significant(Arc::new(candidate)))
                .await;
        }
        stage.roster.prune(now);

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = Instant::now();
            info!(
                tracker = %stage.tracker.stats(),
                reducer = %stage.significance.stats(),
                pipeline = %stage.counters,
                "stats"
            );
            if let Some(dedupe) = &stage.dedupe {
                info!(dedupe = %dedupe.stats(), "dedupe");
            }
            if show_table {
                print_plane_table(&stage.tracker);
            }
        }
    }
}

fn print_plane_table(tracker: &Tracker) {
    println!(
        "{:<6} {:<8} {:<5} {:>7} {:>10} {:>10} {:>12} {:>7} {:>6}",
        "ICAO", "FLIGHT", "SQWK", "ALT", "LAT", "LON", "HEADING", "SPEED", "MSGS"
    );
    tracker.for_each(|plane| {
        println!(
            "{:<6} {:<8} {:<5} {:>7} {:>10} {:>10} {:>12} {:>7} {:>6}",
            plane.icao_string(),
            plane.flight_id.as_deref().unwrap_or("?"),
            plane
                .squawk
                .map(|s| format!("{s:04}"))
                .unwrap_or_else(|| "-".into()),
            plane
                .altitude
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".into()),
            plane
                .latitude
                .map(|l| format!("{l:.4}"))
                .unwrap_or_else(|| "-".into()),
            plane
                .longitude
                .map(|l| format!("{l:.4}"))
                .unwrap_or_else(|| "-".into()),
            plane.heading_label(),
            plane
                .velocity
                .map(|v| format!("{v:.0}"))
                .unwrap_or_else(|| "-".into()),
            plane.msg_count,
        );
    });
}
