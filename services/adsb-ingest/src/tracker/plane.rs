//! Per-aircraft state
//!
//! A `Plane` owns everything known about one ICAO address: identity,
//! current location with per-field update times, the CPR pairing substate
//! and a bounded track history with segment markers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::cpr;
use crate::export;
use crate::geo;
use crate::modes::{AirframeSize, AltitudeUnit, CprPosition};
use crate::tile_grid;

use super::TrackError;

/// Track history entries kept per plane.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Speed gate for the impossible-motion check, metres per second (Mach 1).
const MAX_SPEED_M_S: f64 = 343.0;

/// Hard ceiling on distance between consecutive positions, metres.
const MAX_JUMP_M: f64 = 50_000.0;

/// Per-field last-updated timestamps. The epoch default means "never".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTimes {
    pub location: DateTime<Utc>,
    pub altitude: DateTime<Utc>,
    pub velocity: DateTime<Utc>,
    pub heading: DateTime<Utc>,
    pub vertical_rate: DateTime<Utc>,
    pub on_ground: DateTime<Utc>,
    pub squawk: DateTime<Utc>,
    pub flight_status: DateTime<Utc>,
    pub special: DateTime<Utc>,
    pub flight_id: DateTime<Utc>,
}

/// One accepted position on the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<i32>,
    pub heading: Option<f64>,
    pub velocity: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Marks the end of a segment; the next point starts a fresh track.
    pub track_finished: bool,
}

/// Which fields an ingest call touched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChangedFields {
    pub location: bool,
    pub altitude: bool,
    pub velocity: bool,
    pub heading: bool,
    pub vertical_rate: bool,
    pub on_ground: bool,
    pub squawk: bool,
    pub flight_id: bool,
    pub flight_status: bool,
    pub special: bool,
    pub category: bool,
    pub airframe: bool,
}

impl ChangedFields {
    pub fn any(&self) -> bool {
        self.location
            || self.altitude
            || self.velocity
            || self.heading
            || self.vertical_rate
            || self.on_ground
            || self.squawk
            || self.flight_id
            || self.flight_status
            || self.special
            || self.category
            || self.airframe
    }
}

/// CPR pairing substate: the stored halves and the reference used for
/// surface and local decoding.
#[derive(Debug, Clone, Default)]
pub struct CprState {
    pub even: Option<(CprPosition, DateTime<Utc>)>,
    pub odd: Option<(CprPosition, DateTime<Utc>)>,
    /// Last resolved position.
    pub reference: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub icao: u32,
    pub flight_id: Option<String>,
    pub squawk: Option<u16>,
    pub category: Option<&'static str>,
    pub airframe: Option<AirframeSize>,
    pub special: Option<&'static str>,
    pub flight_status: Option<u8>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub altitude_units: AltitudeUnit,
    pub heading: Option<f64>,
    pub velocity: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub on_ground: Option<bool>,
    pub signal_rssi: Option<f64>,

    pub updates: FieldTimes,
    pub tracked_since: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub msg_count: u64,

    pub cpr: CprState,
    pub history: VecDeque<TrackPoint>,
}

impl Plane {
    pub fn new(icao: u32, now: DateTime<Utc>) -> Self {
        Plane {
            icao,
            flight_id: None,
            squawk: None,
            category: None,
            airframe: None,
            special: None,
            flight_status: None,
            latitude: None,
            longitude: None,
            altitude: None,
            altitude_units: AltitudeUnit::Feet,
            heading: None,
            velocity: None,
            vertical_rate: None,
            on_ground: None,
            signal_rssi: None,
            updates: FieldTimes::default(),
            tracked_since: now,
            last_seen: now,
            msg_count: 0,
            cpr: CprState::default(),
            history: VecDeque::new(),
        }
    }

    pub fn icao_string(&self) -> String {
        format!("{:06X}", self.icao)
    }

    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Printable heading with its compass point.
    pub fn heading_label(&self) -> String {
        match self.heading {
            Some(h) => format!("{} ({h:.2})", geo::compass_label(h)),
            None => "?".to_string(),
        }
    }

    /// Accept a resolved position, guarding against impossible motion.
    ///
    /// Rejection closes the current track segment and leaves the location
    /// untouched; the next accepted point starts a new segment.
    pub fn add_position(
        &mut self,
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
        max_history: usize,
    ) -> Result<(), TrackError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(TrackError::InvalidCoordinate { lat, lon });
        }

        if let (Some(cur_lat), Some(cur_lon)) = (self.latitude, self.longitude) {
            let mut duration = (timestamp - self.updates.location).num_milliseconds() as f64
                / 1000.0;
            if duration <= 0.0 {
                duration = 1.0;
            }
            let allowed = (duration * MAX_SPEED_M_S).min(MAX_JUMP_M);
            let travelled = geo::haversine_m(lat, lon, cur_lat, cur_lon);
            if travelled > allowed {
                if let Some(last) = self.history.back_mut() {
                    last.track_finished = true;
                }
                return Err(TrackError::ImpossibleMotion {
                    icao: self.icao,
                    distance_m: travelled,
                    allowed_m: allowed,
                });
            }
        }

        self.latitude = Some(lat);
        self.longitude = Some(lon);
        self.updates.location = timestamp;

        self.history.push_back(TrackPoint {
            lat,
            lon,
            altitude: self.altitude,
            heading: self.heading,
            velocity: self.velocity,
            timestamp,
            track_finished: false,
        });
        while self.history.len() > max_history {
            self.history.pop_front();
        }
        Ok(())
    }

    /// Clear both CPR halves. Called after a successful pair decode so a
    /// stale half cannot combine with a future frame.
    pub fn zero_cpr(&mut self) {
        self.cpr.even = None;
        self.cpr.odd = None;
    }

    /// Store one CPR half, discarding an opposite half that is too old to
    /// ever pair.
    pub fn store_cpr(&mut self, position: CprPosition, timestamp: DateTime<Utc>) {
        let stale = |other: &Option<(CprPosition, DateTime<Utc>)>| {
            other.is_some_and(|(_, t)| {
                (timestamp - t).num_seconds().abs() > cpr::MAX_PAIR_AGE_SECS
            })
        };
        if position.odd {
            if stale(&self.cpr.even) {
                self.cpr.even = None;
            }
            self.cpr.odd = Some((position, timestamp));
        } else {
            if stale(&self.cpr.odd) {
                self.cpr.odd = None;
            }
            self.cpr.even = Some((position, timestamp));
        }
    }

    /// Export snapshot in the published JSON shape.
    pub fn to_export(&self, new: bool, removed: bool, source_tag: &str) -> export::PlaneLocation {
        let mut out = export::PlaneLocation {
            new,
            removed,
            icao: self.icao_string(),
            source_tag: source_tag.to_string(),
            tracked_since: self.tracked_since,
            last_msg: self.last_seen,
            signal_rssi: self.signal_rssi,
            call_sign: self.flight_id.clone(),
            ..Default::default()
        };

        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            out.lat = lat;
            out.lon = lon;
            out.has_location = true;
            out.tile_location = tile_grid::lookup_tile(lat, lon).to_string();
        }
        if let Some(alt) = self.altitude {
            out.altitude = alt;
            out.has_altitude = true;
        }
        out.altitude_units = self.altitude_units.as_str().to_string();
        if let Some(heading) = self.heading {
            out.heading = heading;
            out.has_heading = true;
        }
        if let Some(velocity) = self.velocity {
            out.velocity = velocity;
            out.has_velocity = true;
        }
        if let Some(rate) = self.vertical_rate {
            out.vertical_rate = rate;
            out.has_vertical_rate = true;
        }
        if let Some(on_ground) = self.on_ground {
            out.on_ground = on_ground;
            out.has_on_ground = true;
        }
        if let Some(fs) = self.flight_status {
            out.flight_status = crate::modes::types::flight_status_text(fs).to_string();
            out.has_flight_status = true;
        }
        if let Some(squawk) = self.squawk {
            out.squawk = format!("{squawk:04}");
        }
        if let Some(special) = self.special {
            out.special = special.to_string();
        }
        if let Some(size) = self.airframe {
            out.aircraft_length = Some(size.length_m);
            out.aircraft_width = Some(size.width_m);
        }
        if let Some(category) = self.category {
            out.airframe_type = category.to_string();
        }

        out.updates = export::FieldUpdates {
            location: self.updates.location,
            altitude: self.updates.altitude,
            velocity: self.updates.velocity,
            heading: self.updates.heading,
            on_ground: self.updates.on_ground,
            vertical_rate: self.updates.vertical_rate,
            flight_status: self.updates.flight_status,
            special: self.updates.special,
            squawk: self.updates.squawk,
        };
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_position_accepted_without_gate() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        plane.add_position(-33.9, 151.2, at(1), 10).unwrap();
        assert_eq!(plane.latitude, Some(-33.9));
        assert_eq!(plane.history.len(), 1);
    }

    #[test]
    fn impossible_motion_closes_track() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        plane.add_position(0.0, 0.0, at(1), 10).unwrap();

        let err = plane.add_position(10.0, 10.0, at(2), 10).unwrap_err();
        assert!(matches!(err, TrackError::ImpossibleMotion { .. }), "{err}");

        // Location unchanged, segment closed.
        assert_eq!(plane.latitude, Some(0.0));
        assert_eq!(plane.longitude, Some(0.0));
        assert!(plane.history.back().unwrap().track_finished);
    }

    #[test]
    fn plausible_motion_accepted() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        plane.add_position(0.0, 0.0, at(1), 10).unwrap();
        // ~250 m/s for 10 s is well under the gate.
        plane.add_position(0.0225, 0.0, at(11), 10).unwrap();
        assert_eq!(plane.latitude, Some(0.0225));
        assert_eq!(plane.history.len(), 2);
        assert!(!plane.history.back().unwrap().track_finished);
    }

    #[test]
    fn jump_ceiling_caps_long_gaps() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        plane.add_position(0.0, 0.0, at(0), 10).unwrap();
        // 10 minutes at Mach 1 would allow 205 km, but the ceiling is 50 km.
        let err = plane.add_position(0.9, 0.0, at(600), 10).unwrap_err();
        assert!(matches!(err, TrackError::ImpossibleMotion { allowed_m, .. }
            if allowed_m == 50_000.0));
    }

    #[test]
    fn invalid_coordinates_rejected() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        assert!(matches!(
            plane.add_position(90.5, 0.0, at(1), 10),
            Err(TrackError::InvalidCoordinate { .. })
        ));
        assert!(plane.latitude.is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        for i in 0..20 {
            plane
                .add_position(0.001 * i as f64, 0.0, at(i * 10), 5)
                .unwrap();
        }
        assert_eq!(plane.history.len(), 5);
        // Oldest entries rolled off the front.
        assert!((plane.history.front().unwrap().lat - 0.015).abs() < 1e-9);
    }

    #[test]
    fn stale_cpr_half_discarded_on_store() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        let even = CprPosition { odd: false, lat: 1, lon: 2, surface: false };
        let odd = CprPosition { odd: true, lat: 3, lon: 4, surface: false };

        plane.store_cpr(even, at(0));
        plane.store_cpr(odd, at(20)); // 20 s later: even half is unusable
        assert!(plane.cpr.even.is_none());
        assert!(plane.cpr.odd.is_some());
    }

    #[test]
    fn export_snapshot_fields() {
        let mut plane = Plane::new(0x7C6B28, at(0));
        plane.add_position(-33.9461, 151.1772, at(1), 10).unwrap();
        plane.altitude = Some(37000);
        plane.squawk = Some(1200);
        plane.flight_id = Some("QFA1".into());
        plane.heading = Some(270.0);

        let out = plane.to_export(true, false, "sdr-01");
        assert!(out.new);
        assert_eq!(out.icao, "7C6B28");
        assert_eq!(out.squawk, "1200");
        assert_eq!(out.call_sign.as_deref(), Some("QFA1"));
        assert!(out.has_location);
        assert!(!out.tile_location.is_empty());
        assert_eq!(out.source_tag, "sdr-01");
        assert_eq!(out.updates.location, at(1));
    }

    #[test]
    fn heading_label_compass() {
        let mut plane = Plane::new(1, at(0));
        assert_eq!(plane.heading_label(), "?");
        plane.heading = Some(182.88);
        assert_eq!(plane.heading_label(), "S (182.88)");
    }
}
