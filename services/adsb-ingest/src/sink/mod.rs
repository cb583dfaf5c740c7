//! Sink fan-out
//!
//! The pipeline publishes events once; every sink consumes them from its
//! own bounded channel. A sink filters events down to its selected queues,
//! serializes, dedupes repeated payloads, and hands bytes to its
//! [`Destination`] with retry and a health flag.

pub mod stdout;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

use crate::dedupe::DedupeFilter;
use crate::export::PlaneLocation;
use crate::modes::DecodedFrame;
use crate::wire::{Sbs1Update, WireProtocol};

pub const QUEUE_BEAST_ALL: &str = "beast-all";
pub const QUEUE_BEAST_REDUCE: &str = "beast-reduce";
pub const QUEUE_AVR_ALL: &str = "avr-all";
pub const QUEUE_AVR_REDUCE: &str = "avr-reduce";
pub const QUEUE_SBS1_ALL: &str = "sbs1-all";
pub const QUEUE_SBS1_REDUCE: &str = "sbs1-reduce";
pub const QUEUE_LOCATION_UPDATES: &str = "location-updates";
pub const QUEUE_LOCATION_UPDATES_REDUCED: &str = "location-updates-reduced";

pub const ALL_QUEUES: [&str; 8] = [
    QUEUE_BEAST_ALL,
    QUEUE_BEAST_REDUCE,
    QUEUE_AVR_ALL,
    QUEUE_AVR_REDUCE,
    QUEUE_SBS1_ALL,
    QUEUE_SBS1_REDUCE,
    QUEUE_LOCATION_UPDATES,
    QUEUE_LOCATION_UPDATES_REDUCED,
];

/// How long a publish may wait on a saturated sink channel before the
/// event is dropped.
const BACKPRESSURE_DEADLINE: Duration = Duration::from_secs(5);

/// Publish attempts before a sink is marked unhealthy.
const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Window for suppressing byte-identical location publishes.
const PUBLISH_DEDUPE_SECS: i64 = 10;

/// A raw frame flowing through the event bus.
#[derive(Debug, Clone)]
pub enum FramePayload {
    ModeS {
        frame: Arc<DecodedFrame>,
        protocol: WireProtocol,
    },
    Sbs1(Arc<Sbs1Update>),
}

/// Events sinks consume.
#[derive(Debug, Clone)]
pub enum Event {
    /// Every decoded frame.
    Frame(FramePayload),
    /// Frames that survived the short-window dedupe.
    DedupedFrame(FramePayload),
    /// Every post-merge location record (high-rate). `New`/`Removed` ride
    /// inside the record.
    Location(Arc<PlaneLocation>),
    /// Records that passed the significance filter (low-rate).
    Significant(Arc<PlaneLocation>),
}

/// Where serialized messages end up. Implementations are transport
/// adapters; the stdout/log destination ships with the core.
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;
    fn publish(&self, queue: &str, body: &[u8]) -> anyhow::Result<()>;
    fn stop(&self) {}
}

/// Writes events once, lets each sink drain at its own pace. A sink that
/// stays saturated past the deadline loses the event (drop-newest).
#[derive(Default)]
pub struct EventFan {
    senders: Vec<mpsc::Sender<Event>>,
    dropped: AtomicU64,
}

impl EventFan {
    pub fn new() -> Self {
        EventFan::default()
    }

    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(capacity);
        self.senders.push(tx);
        rx
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn publish(&self, event: Event) {
        for sender in &self.senders {
            match timeout(BACKPRESSURE_DEADLINE, sender.send(event.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {} // sink has shut down
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("sink channel saturated past deadline, event dropped");
                }
            }
        }
    }
}

/// Raw-frame message envelope, matching the published JSON contract.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FrameMessage<'a> {
    #[serde(rename = "Type")]
    kind: &'a str,
    body: String,
    route_key: &'a str,
    source: &'a str,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Queues this sink publishes; empty selects all.
    pub queues: HashSet<String>,
    /// Advisory message TTL passed through to the destination contract.
    pub message_ttl_secs: u32,
    /// Also publish per-tile `<tile>_high` / `<tile>_low` routing keys.
    pub spread_updates: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            queues: ALL_QUEUES.iter().map(|q| q.to_string()).collect(),
            message_ttl_secs: 60,
            spread_updates: false,
        }
    }
}

impl SinkConfig {
    pub fn with_queues(queues: &[String]) -> Self {
        let mut config = SinkConfig::default();
        if !queues.is_empty() {
            config.queues = queues
                .iter()
                .filter(|q| {
                    let valid = ALL_QUEUES.contains(&q.as_str());
                    if !valid {
                        error!(queue = %q, "unknown queue type requested");
                    }
                    valid
                })
                .cloned()
                .collect();
        }
        config
    }

    fn wants(&self, queue: &str) -> bool {
        self.queues.contains(queue)
    }
}

pub struct Sink {
    config: SinkConfig,
    dest: Box<dyn Destination>,
    recent: DedupeFilter,
    healthy: AtomicBool,
    published: AtomicU64,
    errors: AtomicU64,
}

impl Sink {
    pub fn new(config: SinkConfig, dest: Box<dyn Destination>) -> Self {
        Sink {
            config,
            dest,
            recent: DedupeFilter::new(ChronoDuration::seconds(PUBLISH_DEDUPE_SECS)),
            healthy: AtomicBool::new(true),
            published: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        self.dest.name()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Drain events until the channel closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        self.dest.stop();
        debug!(
            sink = %self.dest.name(),
            published = self.published.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            "sink finished"
        );
    }

    async fn handle(&self, event: Event) {
        match event {
            Event::Frame(payload) => {
                self.publish_frame(&payload, QUEUE_AVR_ALL, QUEUE_BEAST_ALL, QUEUE_SBS1_ALL)
                    .await;
            }
            Event::DedupedFrame(payload) => {
                self.publish_frame(
                    &payload,
                    QUEUE_AVR_REDUCE,
                    QUEUE_BEAST_REDUCE,
                    QUEUE_SBS1_REDUCE,
                )
                .await;
            }
            Event::Location(location) => {
                self.publish_location(&location, QUEUE_LOCATION_UPDATES, "_high")
                    .await;
            }
            Event::Significant(location) => {
                self.publish_location(&location, QUEUE_LOCATION_UPDATES_REDUCED, "_low")
                    .await;
            }
        }
    }

    async fn publish_frame(
        &self,
        payload: &FramePayload,
        avr_queue: &str,
        beast_queue: &str,
        sbs1_queue: &str,
    ) {
        match payload {
            FramePayload::ModeS { frame, protocol } => {
                let hex_body = hex::encode_upper(&frame.raw);
                if *protocol == WireProtocol::Beast && self.config.wants(beast_queue) {
                    self.send_frame_message(beast_queue, "beast", &hex_body, &frame.source_tag)
                        .await;
                }
                // BEAST frames are republished in AVR form as well.
                if self.config.wants(avr_queue) {
                    self.send_frame_message(avr_queue, "avr", &hex_body, &frame.source_tag)
                        .await;
                }
            }
            FramePayload::Sbs1(update) => {
                if self.config.wants(sbs1_queue) {
                    self.send_frame_message(sbs1_queue, "sbs1", &update.raw, "").await;
                }
            }
        }
    }

    async fn send_frame_message(&self, queue: &str, kind: &str, body: &str, source: &str) {
        let message = FrameMessage {
            kind,
            body: body.to_string(),
            route_key: queue,
            source,
        };
        match serde_json::to_vec(&message) {
            Ok(bytes) => self.publish_with_retry(queue, &bytes).await,
            Err(err) => error!(%err, "could not serialize frame message"),
        }
    }

    async fn publish_location(&self, location: &PlaneLocation, queue: &str, tile_suffix: &str) {
        let bytes = match serde_json::to_vec(location) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(%err, "could not serialize location record");
                return;
            }
        };

        // Identical payloads within the window were already sent.
        if !self.recent.check_and_insert(&bytes, Utc::now()) {
            return;
        }

        if self.config.wants(queue) {
            self.publish_with_retry(queue, &bytes).await;
        }
        if self.config.spread_updates && !location.tile_location.is_empty() {
            let tile_queue = format!("{}{}", location.tile_location, tile_suffix);
            self.publish_with_retry(&tile_queue, &bytes).await;
        }
    }

    async fn publish_with_retry(&self, queue: &str, body: &[u8]) {
        let mut backoff = Duration::from_millis(100);
        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            match self.dest.publish(queue, body) {
                Ok(()) => {
                    self.healthy.store(true, Ordering::Relaxed);
                    self.published.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(err) if attempt < MAX_PUBLISH_ATTEMPTS => {
                    debug!(sink = %self.dest.name(), %queue, %err, attempt, "publish failed, retrying");
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    self.healthy.store(false, Ordering::Relaxed);
                    error!(sink = %self.dest.name(), %queue, %err, "publish failed, sink unhealthy");
                }
            }
        }
    }
}
