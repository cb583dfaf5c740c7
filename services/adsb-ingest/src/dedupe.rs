//! Short-window frame dedupe
//!
//! Combined feeds deliver the same squitter from several receivers within
//! a second of each other. A forgetful map keyed by the raw frame bytes
//! (which embed the ICAO) suppresses the copies; a background task sweeps
//! expired entries.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Default suppression window.
pub const DEFAULT_WINDOW_SECS: i64 = 1;

pub struct DedupeFilter {
    window: Duration,
    seen: DashMap<Vec<u8>, DateTime<Utc>>,
    duplicates: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct DedupeStats {
    pub entries: usize,
    pub duplicates: u64,
    pub evictions: u64,
}

impl std::fmt::Display for DedupeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries, {} duplicates suppressed, {} evicted",
            self.entries, self.duplicates, self.evictions
        )
    }
}

impl DedupeFilter {
    pub fn new(window: Duration) -> Self {
        DedupeFilter {
            window,
            seen: DashMap::new(),
            duplicates: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// True when this payload has not been seen within the window. Either
    /// way the sighting is recorded.
    pub fn check_and_insert(&self, payload: &[u8], now: DateTime<Utc>) -> bool {
        match self.seen.entry(payload.to_vec()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if now - *entry.get() <= self.window {
                    self.duplicates.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Drop entries older than the window. Returns the eviction count.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        let window = self.window;
        self.seen.retain(|_, seen_at| now - *seen_at <= window);
        let evicted = before - self.seen.len();
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub fn stats(&self) -> DedupeStats {
        DedupeStats {
            entries: self.seen.len(),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for DedupeFilter {
    fn default() -> Self {
        DedupeFilter::new(Duration::seconds(DEFAULT_WINDOW_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn duplicates_within_window_suppressed() {
        let filter = DedupeFilter::default();
        let payload = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();

        assert!(filter.check_and_insert(&payload, at_ms(0)));
        for ms in [100, 400, 900] {
            assert!(!filter.check_and_insert(&payload, at_ms(ms)));
        }
        assert_eq!(filter.stats().duplicates, 3);
    }

    #[test]
    fn fresh_after_window() {
        let filter = DedupeFilter::default();
        let payload = [1u8, 2, 3, 4, 5, 6, 7];
        assert!(filter.check_and_insert(&payload, at_ms(0)));
        assert!(filter.check_and_insert(&payload, at_ms(1500)));
    }

    #[test]
    fn different_payloads_pass() {
        let filter = DedupeFilter::default();
        assert!(filter.check_and_insert(&[1, 2, 3], at_ms(0)));
        assert!(filter.check_and_insert(&[1, 2, 4], at_ms(0)));
    }

    #[test]
    fn sweep_evicts_and_counts() {
        let filter = DedupeFilter::default();
        filter.check_and_insert(&[1], at_ms(0));
        filter.check_and_insert(&[2], at_ms(200));
        filter.check_and_insert(&[3], at_ms(1800));

        assert_eq!(filter.sweep(at_ms(2000)), 2);
        let stats = filter.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.evictions, 2);
    }
}
