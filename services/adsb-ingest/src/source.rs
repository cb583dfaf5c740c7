//! Frame producers
//!
//! Each `--fetch` spec becomes a task that feeds [`WireFrame`]s into the
//! bounded ingest queue: TCP fetchers with reconnect backoff for the three
//! network flavours, and a file replayer with synthetic half-second ticks
//! for offline captures.

use chrono::{Duration as ChronoDuration, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::FetchSpec;
use crate::wire::{avr, sbs1, BeastDecoder, RawModeS, WireFrame, WireProtocol};

/// Reconnect backoff bounds.
const RECONNECT_MIN: Duration = Duration::from_secs(2);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// How long a producer may wait on a full ingest queue before the frame
/// is dropped.
const INGEST_DEADLINE: Duration = Duration::from_secs(5);

enum SendOutcome {
    Sent,
    Dropped,
    Closed,
}

/// Push one frame with the back-pressure deadline applied.
async fn send_frame(
    tx: &mpsc::Sender<WireFrame>,
    frame: WireFrame,
    dropped: &mut u64,
) -> SendOutcome {
    match tokio::time::timeout(INGEST_DEADLINE, tx.send(frame)).await {
        Ok(Ok(())) => SendOutcome::Sent,
        Ok(Err(_)) => SendOutcome::Closed,
        Err(_) => {
            *dropped += 1;
            warn!(dropped = *dropped, "ingest queue saturated past deadline, frame dropped");
            SendOutcome::Dropped
        }
    }
}

/// Run one producer until shutdown (or end of file).
pub async fn run_fetch(
    spec: FetchSpec,
    tx: mpsc::Sender<WireFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    match spec {
        FetchSpec::Network { protocol, host, port } => {
            run_network(protocol, &host, port, tx, &mut shutdown).await;
        }
        FetchSpec::File { path, protocol } => {
            if let Err(err) = run_file(&path, protocol, tx, &mut shutdown).await {
                warn!(%path, %err, "file replay failed");
            }
        }
    }
}

async fn run_network(
    protocol: WireProtocol,
    host: &str,
    port: u16,
    tx: mpsc::Sender<WireFrame>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let endpoint = format!("{host}:{port}");
    let mut backoff = RECONNECT_MIN;

    loop {
        if *shutdown.borrow() {
            return;
        }
        let stream = tokio::select! {
            connected = TcpStream::connect(&endpoint) => connected,
            _ = shutdown.changed() => return,
        };
        let stream = match stream {
            Ok(stream) => {
                info!(%endpoint, protocol = protocol.as_str(), "connected");
                backoff = RECONNECT_MIN;
                stream
            }
            Err(err) => {
                warn!(%endpoint, %err, "connect failed, retrying in {backoff:?}");
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = shutdown.changed() => return,
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
                continue;
            }
        };

        let disconnected = match protocol {
            WireProtocol::Beast => read_beast(stream, &tx, shutdown).await,
            WireProtocol::Avr | WireProtocol::Sbs1 => {
                read_lines(stream, protocol, &tx, shutdown).await
            }
        };
        if !disconnected {
            return; // shutdown or queue closed
        }
        warn!(%endpoint, "disconnected, reconnecting");
    }
}

/// Returns true when the peer went away (reconnect), false on shutdown.
async fn read_beast(
    stream: TcpStream,
    tx: &mpsc::Sender<WireFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut stream = stream;
    let mut decoder = BeastDecoder::new();
    let mut chunk = [0u8; 4096];
    let mut dropped = 0u64;

    loop {
        let read = tokio::select! {
            read = stream.read(&mut chunk) => read,
            _ = shutdown.changed() => return false,
        };
        match read {
            Ok(0) => return true,
            Ok(n) => {
                for frame in decoder.push(&chunk[..n], Utc::now()) {
                    if let SendOutcome::Closed = send_frame(tx, frame, &mut dropped).await {
                        return false;
                    }
                }
            }
            Err(err) => {
                debug!(%err, "beast read error");
                return true;
            }
        }
    }
}

async fn read_lines(
    stream: TcpStream,
    protocol: WireProtocol,
    tx: &mpsc::Sender<WireFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut lines = BufReader::new(stream).lines();
    let mut parse_errors = 0u64;
    let mut dropped = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => return false,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match frame_from_line(&line, protocol) {
                    Some(frame) => {
                        if let SendOutcome::Closed = send_frame(tx, frame, &mut dropped).await {
                            return false;
                        }
                    }
                    None => {
                        parse_errors += 1;
                        debug!(%line, parse_errors, "unparseable line dropped");
                    }
                }
            }
            Ok(None) => return true,
            Err(err) => {
                debug!(%err, "line read error");
                return true;
            }
        }
    }
}

fn frame_from_line(line: &str, protocol: WireProtocol) -> Option<WireFrame> {
    let now = Utc::now();
    match protocol {
        WireProtocol::Avr => avr::parse_line(line).ok().map(|payload| WireFrame::ModeS {
            raw: RawModeS {
                payload,
                received: now,
                signal_rssi: None,
                mlat_counter: None,
            },
            protocol: WireProtocol::Avr,
        }),
        WireProtocol::Sbs1 => sbs1::parse_line(line, now).ok().map(WireFrame::Sbs1),
        WireProtocol::Beast => None,
    }
}

/// Replay a capture file. Timestamps advance half a second per line so
/// CPR pairing and the motion gate behave as they would live.
async fn run_file(
    path: &str,
    protocol: WireProtocol,
    tx: mpsc::Sender<WireFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut timestamp = Utc::now();
    let mut produced = 0u64;
    let mut parse_errors = 0u64;

    while let Some(line) = lines.next_line().await? {
        if *shutdown.borrow() {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        timestamp += ChronoDuration::milliseconds(500);

        let frame = match protocol {
            WireProtocol::Avr => avr::parse_line(&line).ok().map(|payload| WireFrame::ModeS {
                raw: RawModeS {
                    payload,
                    received: timestamp,
                    signal_rssi: None,
                    mlat_counter: None,
                },
                protocol: WireProtocol::Avr,
            }),
            WireProtocol::Sbs1 => sbs1::parse_line(&line, timestamp).ok().map(WireFrame::Sbs1),
            WireProtocol::Beast => None,
        };

        match frame {
            Some(frame) => {
                produced += 1;
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            None => parse_errors += 1,
        }
    }

    info!(%path, produced, parse_errors, "file replay finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn file_replay_produces_frames() {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("adsb-ingest-test-{}.avr", std::process::id()));
        {
            let mut f = std::fs::File::create(&tmp).unwrap();
            writeln!(f, "*8D4840D6202CC371C32CE0576098;").unwrap();
            writeln!(f, "not a frame").unwrap();
            writeln!(f, "*8D485020994409940838175B284F;").unwrap();
        }

        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        run_fetch(
            FetchSpec::File {
                path: tmp.to_string_lossy().into_owned(),
                protocol: WireProtocol::Avr,
            },
            tx,
            shutdown_rx,
        )
        .await;
        std::fs::remove_file(&tmp).ok();

        let mut received = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            received.push(frame);
        }
        assert_eq!(received.len(), 2);
        let WireFrame::ModeS { raw, protocol } = &received[0] else {
            panic!("expected a Mode S frame");
        };
        assert_eq!(raw.payload[0], 0x8D);
        assert_eq!(*protocol, WireProtocol::Avr);
        // Synthetic clock advances between lines.
        let WireFrame::ModeS { raw: second, .. } = &received[1] else {
            panic!("expected a Mode S frame");
        };
        assert!(second.received > raw.received);
    }

    #[tokio::test]
    async fn sbs1_file_replay() {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("adsb-ingest-test-{}.sbs", std::process::id()));
        {
            let mut f = std::fs::File::create(&tmp).unwrap();
            writeln!(
                f,
                "MSG,3,1,1,7C6B28,1,2023/01/01,00:00:00.000,2023/01/01,00:00:00.000,,37000,,,-33.9461,151.1772,,,0,0,0,0"
            )
            .unwrap();
        }

        let (tx, mut rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        run_fetch(
            FetchSpec::File {
                path: tmp.to_string_lossy().into_owned(),
                protocol: WireProtocol::Sbs1,
            },
            tx,
            shutdown_rx,
        )
        .await;
        std::fs::remove_file(&tmp).ok();

        match rx.try_recv().unwrap() {
            WireFrame::Sbs1(update) => assert_eq!(update.icao, 0x7C6B28),
            other => panic!("expected SBS1 update, got {other:?}"),
        }
    }
}
