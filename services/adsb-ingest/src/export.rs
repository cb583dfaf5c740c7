//! Exported location records
//!
//! `PlaneLocation` is the JSON shape published to sinks and consumed by the
//! significance filter. Field names are part of the wire contract, so they
//! are pinned with serde renames rather than derived from struct layout
//! alone.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("impossible location")]
    ImpossibleLocation,
}

/// Last-updated timestamps for the fields they are named after.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FieldUpdates {
    pub location: DateTime<Utc>,
    pub altitude: DateTime<Utc>,
    pub velocity: DateTime<Utc>,
    pub heading: DateTime<Utc>,
    pub on_ground: DateTime<Utc>,
    pub vertical_rate: DateTime<Utc>,
    pub flight_status: DateTime<Utc>,
    pub special: DateTime<Utc>,
    pub squawk: DateTime<Utc>,
}

/// One aircraft's exported state. Encodes to the stable JSON field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaneLocation {
    pub new: bool,
    pub removed: bool,
    pub icao: String,
    pub lat: f64,
    pub lon: f64,
    pub heading: f64,
    pub velocity: f64,
    pub altitude: i32,
    pub vertical_rate: i32,
    pub altitude_units: String,
    pub flight_status: String,
    pub on_ground: bool,
    pub airframe: String,
    pub airframe_type: String,
    pub has_altitude: bool,
    pub has_location: bool,
    pub has_heading: bool,
    pub has_vertical_rate: bool,
    pub has_velocity: bool,
    pub has_on_ground: bool,
    pub has_flight_status: bool,
    pub source_tag: String,
    pub squawk: String,
    pub special: String,
    pub tile_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tags: Option<HashMap<String, u32>>,
    /// When this run first started tracking the aircraft.
    pub tracked_since: DateTime<Utc>,
    /// When the aircraft was last heard from.
    pub last_msg: DateTime<Utc>,
    pub updates: FieldUpdates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_rssi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_length: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sign: Option<String>,
}

impl PlaneLocation {
    /// Best human identifier for logs: callsign, then ICAO.
    pub fn display_name(&self) -> String {
        match &self.call_sign {
            Some(cs) if !cs.is_empty() => cs.clone(),
            _ => format!("ICAO: {}", self.icao),
        }
    }
}

/// Merge two records for the same aircraft from different receivers.
///
/// Newest-wins per field by the `Updates` timestamps. The merged record is
/// tagged `"merged"` and counts observations per receiver in `SourceTags`.
pub fn merge_plane_locations(
    prev: &PlaneLocation,
    next: &PlaneLocation,
) -> Result<PlaneLocation, ExportError> {
    if !is_location_possible(prev, next) {
        return Err(ExportError::ImpossibleLocation);
    }

    let mut merged = prev.clone();
    merged.new = false;
    merged.removed = false;
    merged.last_msg = next.last_msg;
    // Per-receiver readings make no sense on a merged record.
    merged.signal_rssi = None;

    let tags = merged.source_tags.get_or_insert_with(HashMap::new);
    *tags.entry(next.source_tag.clone()).or_insert(0) += 1;

    if next.tracked_since < prev.tracked_since {
        merged.tracked_since = next.tracked_since;
    }

    if next.has_location && next.updates.location > prev.updates.location {
        merged.lat = next.lat;
        merged.lon = next.lon;
        merged.updates.location = next.updates.location;
        merged.has_location = true;
    }
    if next.has_heading && next.updates.heading > prev.updates.heading {
        merged.heading = next.heading;
        // TODO: this keeps the older heading timestamp; confirm downstream
        // consumers tolerate the heading timestamp advancing before
        // changing it.
        merged.updates.heading = prev.updates.heading;
        merged.has_heading = true;
    }
    if next.has_velocity && next.updates.velocity > prev.updates.velocity {
        merged.velocity = next.velocity;
        merged.updates.velocity = next.updates.velocity;
        merged.has_velocity = true;
    }
    if next.has_altitude && next.updates.altitude > prev.updates.altitude {
        merged.altitude = next.altitude;
        merged.altitude_units = next.altitude_units.clone();
        merged.updates.altitude = next.updates.altitude;
        merged.has_altitude = true;
    }
    if next.has_vertical_rate && next.updates.vertical_rate > prev.updates.vertical_rate {
        merged.vertical_rate = next.vertical_rate;
        merged.updates.vertical_rate = next.updates.vertical_rate;
        merged.has_vertical_rate = true;
    }
    if next.has_flight_status && next.updates.flight_status > prev.updates.flight_status {
        merged.flight_status = next.flight_status.clone();
        merged.updates.flight_status = next.updates.flight_status;
    }
    if next.has_on_ground && next.updates.on_ground > prev.updates.on_ground {
        merged.on_ground = next.on_ground;
        merged.updates.on_ground = next.updates.on_ground;
    }

    if merged.airframe.is_empty() {
        merged.airframe = next.airframe.clone();
    }
    if merged.airframe_type.is_empty() {
        // TODO: copies the airframe type into Airframe; pinned by test
        // until the downstream schema is clarified.
        merged.airframe = next.airframe_type.clone();
    }

    if let Some(cs) = &next.call_sign {
        if !cs.is_empty() {
            merged.call_sign = Some(cs.clone());
        }
    }
    merged.source_tag = "merged".to_string();

    if next.updates.squawk > prev.updates.squawk {
        merged.squawk = next.squawk.clone();
        merged.updates.squawk = next.updates.squawk;
    }
    if next.updates.special > prev.updates.special {
        merged.special = next.special.clone();
        merged.updates.special = next.updates.special;
    }

    if !next.tile_location.is_empty() {
        merged.tile_location = next.tile_location.clone();
    }
    if next.aircraft_width.unwrap_or(0.0) != 0.0 {
        merged.aircraft_width = next.aircraft_width;
    }
    if next.aircraft_length.unwrap_or(0.0) != 0.0 {
        merged.aircraft_length = next.aircraft_length;
    }

    Ok(merged)
}

/// Plausibility check between consecutive records: the bearing from the
/// previous position must lie within 90 degrees of the previously reported
/// heading, provided the records are close enough in time to compare.
pub fn is_location_possible(prev: &PlaneLocation, next: &PlaneLocation) -> bool {
    if !(prev.has_location && next.has_location && prev.has_heading && next.has_heading) {
        // cannot check, fail open
        return true;
    }
    if prev.last_msg > next.last_msg {
        return false;
    }
    if prev.last_msg + Duration::seconds(3) > next.last_msg {
        return true;
    }

    let bearing = geo::bearing(prev.lat, prev.lon, next.lat, next.lon);
    bearing > prev.heading - 90.0 && bearing < prev.heading + 90.0
}
