//! Significance filter
//!
//! Downstream consumers fall into two camps: those that want every
//! post-merge record (high-rate) and those that only care when something
//! meaningfully changed (low-rate). This stage keeps the last significant
//! record per aircraft, promotes a new record when any threshold trips,
//! and otherwise parks it as the current candidate. Evicting an aircraft
//! releases its final candidate so the last word is never lost.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::trace;

use crate::export::PlaneLocation;
use crate::geo;

/// Significance cache retention.
pub const DEFAULT_RETENTION_SECS: i64 = 30;

/// Position delta that always counts, metres.
const POSITION_THRESHOLD_M: f64 = 250.0;

/// Heading delta, degrees.
const HEADING_THRESHOLD_DEG: f64 = 1.0;

/// Altitude delta in feet, and its metric equivalent.
const ALTITUDE_THRESHOLD_FT: i32 = 100;
const ALTITUDE_THRESHOLD_M: i32 = 30;

/// Vertical rate delta, feet per minute.
const VERTICAL_RATE_THRESHOLD_FPM: i32 = 64;

/// Velocity delta, knots.
const VELOCITY_THRESHOLD_KT: f64 = 5.0;

/// Records further apart than this are always significant.
const MAX_QUIET_SECS: i64 = 5;

struct SigState {
    last_significant: PlaneLocation,
    candidate: Option<PlaneLocation>,
}

pub struct SignificanceFilter {
    cache: DashMap<String, SigState>,
    processed: AtomicU64,
    significant: AtomicU64,
    ignored: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterStats {
    pub tracked: usize,
    pub processed: u64,
    pub significant: u64,
    pub ignored: u64,
}

impl std::fmt::Display for FilterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tracked, {} processed, {} significant, {} ignored",
            self.tracked, self.processed, self.significant, self.ignored
        )
    }
}

impl SignificanceFilter {
    pub fn new() -> Self {
        SignificanceFilter {
            cache: DashMap::new(),
            processed: AtomicU64::new(0),
            significant: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    /// Consider one enriched record. Returns the record when it should be
    /// published on the low-rate channel. The first record for an aircraft
    /// is always significant.
    pub fn observe(&self, location: &PlaneLocation) -> Option<PlaneLocation> {
        self.processed.fetch_add(1, Ordering::Relaxed);

        match self.cache.entry(location.icao.clone()) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(SigState {
                    last_significant: location.clone(),
                    candidate: None,
                });
                self.significant.fetch_add(1, Ordering::Relaxed);
                Some(location.clone())
            }
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if is_significant(&state.last_significant, location) {
                    self.significant.fetch_add(1, Ordering::Relaxed);
                    state.last_significant = location.clone();
                    state.candidate = None;
                    Some(location.clone())
                } else {
                    self.ignored.fetch_add(1, Ordering::Relaxed);
                    state.candidate = Some(location.clone());
                    None
                }
            }
        }
    }

    /// Remove an aircraft, releasing its unpublished candidate.
    pub fn flush(&self, icao: &str) -> Option<PlaneLocation> {
        self.cache.remove(icao).and_then(|(_, state)| state.candidate)
    }

    /// Evict entries whose last record is older than `retention`. Returns
    /// the final candidates to publish.
    pub fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> Vec<PlaneLocation> {
        let cutoff = now - retention;
        let expired: Vec<String> = self
            .cache
            .iter()
            .filter(|e| e.value().last_significant.last_msg < cutoff
                && e.value().candidate.as_ref().map_or(true, |c| c.last_msg < cutoff))
            .map(|e| e.key().clone())
            .collect();

        let mut flushed = Vec::new();
        for icao in expired {
            if let Some((_, state)) = self.cache.remove(&icao) {
                if let Some(candidate) = state.candidate {
                    flushed.push(candidate);
                }
            }
        }
        flushed
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            tracked: self.cache.len(),
            processed: self.processed.load(Ordering::Relaxed),
            significant: self.significant.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

impl Default for SignificanceFilter {
    fn default() -> Self {
        SignificanceFilter::new()
    }
}

/// Whether `next` differs enough from the last significant record.
fn is_significant(prev: &PlaneLocation, next: &PlaneLocation) -> bool {
    if next.last_msg - prev.last_msg >= Duration::seconds(MAX_QUIET_SECS) {
        trace!(icao = %next.icao, "significant: quiet period elapsed");
        return true;
    }

    if prev.has_location && next.has_location {
        let moved = geo::haversine_m(prev.lat, prev.lon, next.lat, next.lon);
        if moved >= POSITION_THRESHOLD_M {
            trace!(icao = %next.icao, moved, "significant: moved");
            return true;
        }
    }

    if prev.has_heading
        && next.has_heading
        && (next.heading - prev.heading).abs() >= HEADING_THRESHOLD_DEG
    {
        return true;
    }

    if prev.has_altitude && next.has_altitude {
        let threshold = if next.altitude_units == "metres" {
            ALTITUDE_THRESHOLD_M
        } else {
            ALTITUDE_THRESHOLD_FT
        };
        if (next.altitude - prev.altitude).abs() >= threshold {
            return true;
        }
    }

    if prev.has_vertical_rate
        && next.has_vertical_rate
        && (next.vertical_rate - prev.vertical_rate).abs() >= VERTICAL_RATE_THRESHOLD_FPM
    {
        return true;
    }

    if prev.has_velocity
        && next.has_velocity
        && (next.velocity - prev.velocity).abs() >= VELOCITY_THRESHOLD_KT
    {
        return true;
    }

    // Status changes always matter.
    prev.on_ground != next.on_ground
        || prev.squawk != next.squawk
        || prev.special != next.special
        || prev.flight_status != next.flight_status
        || prev.call_sign != next.call_sign
}
