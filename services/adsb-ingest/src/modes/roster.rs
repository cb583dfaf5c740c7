//! Roster of recently-confirmed ICAO addresses
//!
//! DF 0/4/5/16/20/21 overlay the CRC with the aircraft address, so a lone
//! frame cannot prove its own integrity; receiver noise produces plausible
//! looking residuals. The roster accepts a residual-recovered address only
//! when a CRC-validated DF11/17/18 frame vouched for it recently.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Default vouching window in seconds.
const DEFAULT_TTL_SECS: i64 = 60;

pub struct IcaoRoster {
    ttl: Duration,
    seen: DashMap<u32, DateTime<Utc>>,
}

impl IcaoRoster {
    pub fn new(ttl: Duration) -> Self {
        IcaoRoster {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Record an address confirmed by a zero-residual frame.
    pub fn register(&self, icao: u32, seen_at: DateTime<Utc>) {
        self.seen
            .entry(icao)
            .and_modify(|t| {
                if seen_at > *t {
                    *t = seen_at;
                }
            })
            .or_insert(seen_at);
    }

    /// Whether the address was vouched for within the window.
    pub fn contains(&self, icao: u32, now: DateTime<Utc>) -> bool {
        match self.seen.get(&icao) {
            Some(entry) => now - *entry <= self.ttl,
            None => false,
        }
    }

    /// Drop entries older than the window. Returns the eviction count.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| now - *seen_at <= self.ttl);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for IcaoRoster {
    fn default() -> Self {
        IcaoRoster::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}
