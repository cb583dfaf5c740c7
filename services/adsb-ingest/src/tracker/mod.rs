//! Plane tracker
//!
//! Sharded map from ICAO address to [`Plane`]. Ingest merges partial
//! updates under the per-key entry lock, resolves CPR pairs, gates
//! position jumps and reports which fields changed so the pipeline can
//! emit events.

pub mod plane;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::cpr::{self, CprError};
use crate::modes::types::special_squawk;
use crate::modes::{CprPosition, DecodedFrame, FrameBody};
use crate::wire::Sbs1Update;

pub use plane::{ChangedFields, FieldTimes, Plane, TrackPoint, DEFAULT_MAX_HISTORY};

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TrackError {
    #[error("{icao:06X} moved {distance_m:.0} m where {allowed_m:.0} m is possible, track closed")]
    ImpossibleMotion {
        icao: u32,
        distance_m: f64,
        allowed_m: f64,
    },
    #[error("coordinates ({lat:.4}, {lon:.4}) are out of range")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("aircraft address could not be established")]
    UnknownIcao,
}

/// Result of one ingest call: the post-merge snapshot and what changed.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub plane: Plane,
    pub changed: ChangedFields,
    pub is_new: bool,
}

/// Counters surfaced by the periodic stats report.
#[derive(Debug, Default)]
pub struct TrackerCounters {
    pub frames: AtomicU64,
    pub planes_created: AtomicU64,
    pub planes_evicted: AtomicU64,
    pub positions_resolved: AtomicU64,
    pub cpr_straddles: AtomicU64,
    pub impossible_motions: AtomicU64,
    pub invalid_coordinates: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerStats {
    pub tracked: usize,
    pub frames: u64,
    pub positions_resolved: u64,
    pub cpr_straddles: u64,
    pub impossible_motions: u64,
}

impl std::fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tracked, {} frames, {} positions, {} straddles, {} impossible moves",
            self.tracked,
            self.frames,
            self.positions_resolved,
            self.cpr_straddles,
            self.impossible_motions
        )
    }
}

pub struct Tracker {
    planes: DashMap<u32, Plane>,
    max_history: usize,
    pub counters: TrackerCounters,
}

impl Default for Tracker {
    fn default() -> Self {
        Tracker::new(DEFAULT_MAX_HISTORY)
    }
}

impl Tracker {
    pub fn new(max_history: usize) -> Self {
        Tracker {
            planes: DashMap::new(),
            max_history,
            counters: TrackerCounters::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Read-only copy of one plane.
    pub fn snapshot(&self, icao: u32) -> Option<Plane> {
        self.planes.get(&icao).map(|p| p.clone())
    }

    /// Visit every plane. Each is observed under its shard lock, so a
    /// single visit sees a consistent instant even during ingest.
    pub fn for_each(&self, mut f: impl FnMut(&Plane)) {
        for entry in self.planes.iter() {
            f(entry.value());
        }
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            tracked: self.planes.len(),
            frames: self.counters.frames.load(Ordering::Relaxed),
            positions_resolved: self.counters.positions_resolved.load(Ordering::Relaxed),
            cpr_straddles: self.counters.cpr_straddles.load(Ordering::Relaxed),
            impossible_motions: self.counters.impossible_motions.load(Ordering::Relaxed),
        }
    }

    /// Remove planes not heard from within `age`. Returns their final
    /// snapshots so the caller can emit removal events.
    pub fn evict_older_than(&self, now: DateTime<Utc>, age: Duration) -> Vec<Plane> {
        let cutoff = now - age;
        let expired: Vec<u32> = self
            .planes
            .iter()
            .filter(|entry| entry.last_seen < cutoff)
            .map(|entry| entry.icao)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for icao in expired {
            if let Some((_, plane)) = self
                .planes
                .remove_if(&icao, |_, plane| plane.last_seen < cutoff)
            {
                removed.push(plane);
            }
        }
        self.counters
            .planes_evicted
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed
    }

    /// Merge one decoded Mode S frame into its plane.
    pub fn ingest_mode_s(&self, frame: &DecodedFrame) -> Result<IngestOutcome, TrackError> {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        let ts = frame.timestamp;

        let mut entry = self.planes.entry(frame.icao).or_insert_with(|| {
            self.counters.planes_created.fetch_add(1, Ordering::Relaxed);
            Plane::new(frame.icao, ts)
        });
        let plane = entry.value_mut();
        let is_new = plane.msg_count == 0;

        if ts > plane.last_seen {
            plane.last_seen = ts;
        }
        plane.msg_count += 1;
        if frame.signal_rssi.is_some() {
            plane.signal_rssi = frame.signal_rssi;
        }

        let mut changed = ChangedFields::default();

        if let Some(fs) = frame.flight_status {
            if ts > plane.updates.flight_status {
                changed.flight_status = plane.flight_status != Some(fs);
                plane.flight_status = Some(fs);
                plane.updates.flight_status = ts;
            }
        }
        if let Some(on_ground) = frame.on_ground {
            if ts > plane.updates.on_ground {
                changed.on_ground = plane.on_ground != Some(on_ground);
                plane.on_ground = Some(on_ground);
                plane.updates.on_ground = ts;
            }
        }

        let mut position_error = None;
        match &frame.body {
            FrameBody::SurveillanceAltitude { altitude, unit } => {
                if let Some(alt) = altitude {
                    if ts > plane.updates.altitude {
                        changed.altitude = plane.altitude != Some(*alt);
                        plane.altitude = Some(*alt);
                        plane.altitude_units = *unit;
                        plane.updates.altitude = ts;
                    }
                }
            }
            FrameBody::SurveillanceIdentity { squawk } => {
                self.merge_squawk(plane, *squawk, ts, &mut changed);
            }
            FrameBody::AllCall { .. } | FrameBody::Other => {}
            FrameBody::Identification { callsign, category } => {
                let trimmed = callsign.trim_end();
                if !trimmed.is_empty() && ts > plane.updates.flight_id {
                    changed.flight_id = plane.flight_id.as_deref() != Some(trimmed);
                    plane.flight_id = Some(trimmed.to_string());
                    plane.updates.flight_id = ts;
                }
                if category.is_some() && plane.category != *category {
                    plane.category = *category;
                    changed.category = true;
                }
            }
            FrameBody::SurfacePosition { speed_kt, track, cpr } => {
                if let Some(speed) = speed_kt {
                    if ts > plane.updates.velocity {
                        changed.velocity = plane.velocity != Some(*speed);
                        plane.velocity = Some(*speed);
                        plane.updates.velocity = ts;
                    }
                }
                if let Some(track) = track {
                    if ts > plane.updates.heading {
                        changed.heading = plane.heading != Some(*track);
                        plane.heading = Some(*track);
                        plane.updates.heading = ts;
                    }
                }
                position_error = self.handle_cpr(plane, *cpr, ts, &mut changed).err();
            }
            FrameBody::AirbornePosition { altitude, unit, cpr, .. } => {
                if let Some(alt) = altitude {
                    if ts > plane.updates.altitude {
                        changed.altitude = plane.altitude != Some(*alt);
                        plane.altitude = Some(*alt);
                        plane.altitude_units = *unit;
                        plane.updates.altitude = ts;
                    }
                }
                position_error = self.handle_cpr(plane, *cpr, ts, &mut changed).err();
            }
            FrameBody::AirborneVelocity {
                velocity_kt,
                heading,
                vertical_rate_fpm,
                ..
            } => {
                if let Some(speed) = velocity_kt {
                    if ts > plane.updates.velocity {
                        changed.velocity = plane.velocity != Some(*speed);
                        plane.velocity = Some(*speed);
                        plane.updates.velocity = ts;
                    }
                }
                if let Some(hdg) = heading {
                    if ts > plane.updates.heading {
                        changed.heading = plane.heading != Some(*hdg);
                        plane.heading = Some(*hdg);
                        plane.updates.heading = ts;
                    }
                }
                if let Some(rate) = vertical_rate_fpm {
                    if ts > plane.updates.vertical_rate {
                        changed.vertical_rate = plane.vertical_rate != Some(*rate);
                        plane.vertical_rate = Some(*rate);
                        plane.updates.vertical_rate = ts;
                    }
                }
            }
            FrameBody::AircraftStatus { special, .. } => {
                let special = if special.is_empty() { None } else { Some(*special) };
                if ts > plane.updates.special {
                    changed.special = plane.special != special;
                    plane.special = special;
                    plane.updates.special = ts;
                }
            }
            FrameBody::OperationalStatus { airframe, .. } => {
                if let Some(size) = airframe {
                    if plane.airframe.is_none() {
                        plane.airframe = Some(*size);
                        changed.airframe = true;
                    }
                }
            }
        }

        let outcome = IngestOutcome {
            plane: plane.clone(),
            changed,
            is_new,
        };
        drop(entry);

        match position_error {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    /// Merge one SBS1 record. These arrive pre-decoded with direct
    /// coordinates, so the position goes straight through the motion gate.
    pub fn ingest_sbs1(&self, update: &Sbs1Update) -> Result<IngestOutcome, TrackError> {
        if update.icao == 0 {
            return Err(TrackError::UnknownIcao);
        }
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        let ts = update.received;

        let mut entry = self.planes.entry(update.icao).or_insert_with(|| {
            self.counters.planes_created.fetch_add(1, Ordering::Relaxed);
            Plane::new(update.icao, ts)
        });
        let plane = entry.value_mut();
        let is_new = plane.msg_count == 0;

        if ts > plane.last_seen {
            plane.last_seen = ts;
        }
        plane.msg_count += 1;

        let mut changed = ChangedFields::default();

        if let Some(cs) = &update.callsign {
            if ts > plane.updates.flight_id {
                changed.flight_id = plane.flight_id.as_deref() != Some(cs.as_str());
                plane.flight_id = Some(cs.clone());
                plane.updates.flight_id = ts;
            }
        }
        if let Some(alt) = update.altitude_ft {
            if ts > plane.updates.altitude {
                changed.altitude = plane.altitude != Some(alt);
                plane.altitude = Some(alt);
                plane.updates.altitude = ts;
            }
        }
        if let Some(speed) = update.ground_speed_kt {
            if ts > plane.updates.velocity {
                changed.velocity = plane.velocity != Some(speed);
                plane.velocity = Some(speed);
                plane.updates.velocity = ts;
            }
        }
        if let Some(track) = update.track {
            if ts > plane.updates.heading {
                changed.heading = plane.heading != Some(track);
                plane.heading = Some(track);
                plane.updates.heading = ts;
            }
        }
        if let Some(rate) = update.vertical_rate_fpm {
            if ts > plane.updates.vertical_rate {
                changed.vertical_rate = plane.vertical_rate != Some(rate);
                plane.vertical_rate = Some(rate);
                plane.updates.vertical_rate = ts;
            }
        }
        if let Some(squawk) = update.squawk {
            self.merge_squawk(plane, squawk, ts, &mut changed);
        }
        if update.emergency && ts > plane.updates.special {
            changed.special = plane.special != Some("General Emergency");
            plane.special = Some("General Emergency");
            plane.updates.special = ts;
        }
        if let Some(on_ground) = update.on_ground {
            if ts > plane.updates.on_ground {
                changed.on_ground = plane.on_ground != Some(on_ground);
                plane.on_ground = Some(on_ground);
                plane.updates.on_ground = ts;
            }
        }

        let mut position_error = None;
        if let (Some(lat), Some(lon)) = (update.latitude, update.longitude) {
            if ts > plane.updates.location {
                match plane.add_position(lat, lon, ts, self.max_history) {
                    Ok(()) => {
                        changed.location = true;
                        plane.cpr.reference = Some((lat, lon));
                        self.counters
                            .positions_resolved
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        self.count_position_error(&err);
                        position_error = Some(err);
                    }
                }
            }
        }

        let outcome = IngestOutcome {
            plane: plane.clone(),
            changed,
            is_new,
        };
        drop(entry);

        match position_error {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    fn merge_squawk(
        &self,
        plane: &mut Plane,
        squawk: u16,
        ts: DateTime<Utc>,
        changed: &mut ChangedFields,
    ) {
        if ts > plane.updates.squawk {
            changed.squawk = plane.squawk != Some(squawk);
            plane.squawk = Some(squawk);
            plane.updates.squawk = ts;
        }
        if let Some(special) = special_squawk(squawk) {
            if ts > plane.updates.special {
                changed.special = plane.special != Some(special);
                plane.special = Some(special);
                plane.updates.special = ts;
            }
        }
    }

    /// Store a CPR half and try to resolve it: globally when the pair is
    /// complete, locally against the last known position otherwise.
    fn handle_cpr(
        &self,
        plane: &mut Plane,
        position: CprPosition,
        ts: DateTime<Utc>,
        changed: &mut ChangedFields,
    ) -> Result<(), TrackError> {
        plane.store_cpr(position, ts);

        let resolved = match (plane.cpr.even, plane.cpr.odd) {
            (Some((even, even_ts)), Some((odd, odd_ts))) => {
                match cpr::decode_global(&even, even_ts, &odd, odd_ts, plane.cpr.reference) {
                    Ok(pos) => {
                        plane.zero_cpr();
                        Some(pos)
                    }
                    Err(CprError::ZoneStraddle) => {
                        // Keep both halves; a fresh pair will resolve.
                        self.counters.cpr_straddles.fetch_add(1, Ordering::Relaxed);
                        debug!(icao = %plane.icao_string(), "CPR pair straddles a zone");
                        None
                    }
                    Err(CprError::MixedVariants) => {
                        plane.zero_cpr();
                        None
                    }
                    Err(CprError::OutOfRange) => {
                        plane.zero_cpr();
                        self.counters
                            .invalid_coordinates
                            .fetch_add(1, Ordering::Relaxed);
                        None
                    }
                    Err(_) => None,
                }
            }
            _ => None,
        };

        // Single-frame fallback against the last resolved position.
        let resolved = resolved.or_else(|| {
            let reference = plane.cpr.reference?;
            cpr::decode_local(&position, reference).ok()
        });

        let Some((lat, lon)) = resolved else {
            return Ok(());
        };
        plane.cpr.reference = Some((lat, lon));

        if ts <= plane.updates.location {
            return Ok(());
        }
        match plane.add_position(lat, lon, ts, self.max_history) {
            Ok(()) => {
                changed.location = true;
                self.counters
                    .positions_resolved
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.count_position_error(&err);
                Err(err)
            }
        }
    }

    fn count_position_error(&self, err: &TrackError) {
        match err {
            TrackError::ImpossibleMotion { .. } => {
                self.counters
                    .impossible_motions
                    .fetch_add(1, Ordering::Relaxed);
            }
            TrackError::InvalidCoordinate { .. } => {
                self.counters
                    .invalid_coordinates
                    .fetch_add(1, Ordering::Relaxed);
            }
            TrackError::UnknownIcao => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{decode, IcaoRoster};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn frame(msg: &str, secs: i64) -> DecodedFrame {
        let payload = hex::decode(msg).unwrap();
        decode(&payload, at(secs), &IcaoRoster::default()).expect("valid frame")
    }

    fn sbs(icao: u32, secs: i64) -> Sbs1Update {
        Sbs1Update {
            icao,
            transmission_type: 3,
            received: at(secs),
            raw: String::new(),
            callsign: None,
            altitude_ft: None,
            ground_speed_kt: None,
            track: None,
            latitude: None,
            longitude: None,
            vertical_rate_fpm: None,
            squawk: None,
            alert: false,
            emergency: false,
            spi: false,
            on_ground: None,
        }
    }

    #[test]
    fn identification_creates_plane() {
        let tracker = Tracker::default();
        let outcome = tracker
            .ingest_mode_s(&frame("8D4840D6202CC371C32CE0576098", 1))
            .unwrap();
        assert!(outcome.is_new);
        assert!(outcome.changed.flight_id);
        assert_eq!(outcome.plane.flight_id.as_deref(), Some("KLM1023"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn cpr_pair_resolves_position() {
        let tracker = Tracker::default();
        let outcome = tracker
            .ingest_mode_s(&frame("8D40621D58C382D690C8AC2863A7", 0))
            .unwrap();
        assert!(!outcome.changed.location, "one half is not enough");

        let outcome = tracker
            .ingest_mode_s(&frame("8D40621D58C386435CC412692AD6", 1))
            .unwrap();
        assert!(outcome.changed.location);
        assert_eq!(outcome.plane.altitude, Some(38000));
        let lat = outcome.plane.latitude.unwrap();
        let lon = outcome.plane.longitude.unwrap();
        assert!((lat - 52.2572).abs() < 0.05, "lat {lat}");
        assert!((lon - 3.9193).abs() < 0.05, "lon {lon}");

        // Pair consumed atomically.
        let plane = tracker.snapshot(0x40621D).unwrap();
        assert!(plane.cpr.even.is_none());
        assert!(plane.cpr.odd.is_none());
    }

    #[test]
    fn velocity_frame_merges() {
        let tracker = Tracker::default();
        let outcome = tracker
            .ingest_mode_s(&frame("8D485020994409940838175B284F", 1))
            .unwrap();
        assert!(outcome.changed.velocity && outcome.changed.heading);
        assert_eq!(outcome.plane.vertical_rate, Some(-832));
    }

    #[test]
    fn impossible_motion_rejected_track_closed() {
        let tracker = Tracker::default();
        let mut p1 = sbs(0xAAAAAA, 0);
        p1.latitude = Some(0.0);
        p1.longitude = Some(0.0);
        tracker.ingest_sbs1(&p1).unwrap();

        let mut p2 = sbs(0xAAAAAA, 1);
        p2.latitude = Some(10.0);
        p2.longitude = Some(10.0);
        let err = tracker.ingest_sbs1(&p2).unwrap_err();
        assert!(matches!(err, TrackError::ImpossibleMotion { icao: 0xAAAAAA, .. }));

        let plane = tracker.snapshot(0xAAAAAA).unwrap();
        assert_eq!(plane.latitude, Some(0.0));
        assert!(plane.history.back().unwrap().track_finished);
        assert_eq!(tracker.stats().impossible_motions, 1);
        // The rejected frame still counted as a message.
        assert_eq!(plane.msg_count, 2);
    }

    #[test]
    fn per_field_timestamps_are_monotonic() {
        let tracker = Tracker::default();
        let mut newer = sbs(0x123456, 10);
        newer.altitude_ft = Some(30000);
        tracker.ingest_sbs1(&newer).unwrap();

        let mut older = sbs(0x123456, 5);
        older.altitude_ft = Some(11111);
        let outcome = tracker.ingest_sbs1(&older).unwrap();

        assert_eq!(outcome.plane.altitude, Some(30000));
        assert_eq!(outcome.plane.updates.altitude, at(10));
        // last_seen never decreases either.
        assert_eq!(outcome.plane.last_seen, at(10));
        assert!(!outcome.changed.altitude);
    }

    #[test]
    fn squawk_special_is_derived() {
        let tracker = Tracker::default();
        let mut update = sbs(0x123456, 1);
        update.squawk = Some(7700);
        let outcome = tracker.ingest_sbs1(&update).unwrap();
        assert_eq!(outcome.plane.squawk, Some(7700));
        assert_eq!(outcome.plane.special, Some("General Emergency"));
        assert!(outcome.changed.special);
    }

    #[test]
    fn unknown_icao_rejected() {
        let tracker = Tracker::default();
        assert_eq!(
            tracker.ingest_sbs1(&sbs(0, 1)).unwrap_err(),
            TrackError::UnknownIcao
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn eviction_returns_final_snapshots() {
        let tracker = Tracker::default();
        tracker
            .ingest_mode_s(&frame("8D4840D6202CC371C32CE0576098", 0))
            .unwrap();
        tracker
            .ingest_mode_s(&frame("8D485020994409940838175B284F", 25))
            .unwrap();

        let removed = tracker.evict_older_than(at(31), Duration::seconds(30));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].icao, 0x4840D6);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.stats().tracked, 1);
    }

    #[test]
    fn for_each_visits_all() {
        let tracker = Tracker::default();
        tracker
            .ingest_mode_s(&frame("8D4840D6202CC371C32CE0576098", 0))
            .unwrap();
        tracker
            .ingest_mode_s(&frame("8D485020994409940838175B284F", 1))
            .unwrap();

        let mut seen = Vec::new();
        tracker.for_each(|p| seen.push(p.icao));
        seen.sort_unstable();
        assert_eq!(seen, vec![0x4840D6, 0x485020]);
    }

    #[test]
    fn local_decode_continues_after_pair() {
        let tracker = Tracker::default();
        tracker
            .ingest_mode_s(&frame("8D40621D58C382D690C8AC2863A7", 0))
            .unwrap();
        tracker
            .ingest_mode_s(&frame("8D40621D58C386435CC412692AD6", 1))
            .unwrap();

        // A repeat of the even frame decodes alone via the local path. The
        // even and odd solutions sit ~1.6 km apart, so leave enough time
        // for the motion gate.
        let outcome = tracker
            .ingest_mode_s(&frame("8D40621D58C382D690C8AC2863A7", 8))
            .unwrap();
        assert!(outcome.changed.location);
        let lat = outcome.plane.latitude.unwrap();
        assert!((lat - 52.2572).abs() < 0.05, "lat {lat}");
    }
}
