//! Compact Position Reporting resolution
//!
//! CPR splits the world into latitude zones and transmits 17-bit fractions
//! within a zone. An even/odd frame pair resolves globally; a single frame
//! resolves against a nearby reference. Surface frames use zone sizes a
//! quarter of the airborne ones and inherit a 90 degree ambiguity that the
//! reference resolves.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::geo;
use crate::modes::CprPosition;

/// Latitude zones per hemisphere.
const NZ: f64 = 15.0;

/// 2^17, the CPR coordinate resolution.
const CPR_MAX: f64 = 131_072.0;

/// Maximum age difference for a global even/odd pair.
pub const MAX_PAIR_AGE_SECS: i64 = 10;

/// Local decode reference limit, airborne.
const LOCAL_LIMIT_AIRBORNE_NM: f64 = 180.0;

/// Local decode reference limit, surface.
const LOCAL_LIMIT_SURFACE_NM: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CprError {
    #[error("even/odd pair straddles a longitude zone boundary")]
    ZoneStraddle,
    #[error("even/odd pair is more than {MAX_PAIR_AGE_SECS}s apart")]
    StalePair,
    #[error("pair mixes surface and airborne encodings")]
    MixedVariants,
    #[error("surface decode requires a reference position")]
    NoReference,
    #[error("reference is {distance_nm:.1} NM away, limit {limit_nm:.0} NM")]
    ReferenceTooFar { distance_nm: f64, limit_nm: f64 },
    #[error("resolved position is outside valid coordinates")]
    OutOfRange,
}

/// Number of longitude zones at a latitude. 59 at the equator, 1 near the
/// poles.
pub fn nl(lat: f64) -> i32 {
    if lat.abs() >= 87.0 {
        return 1;
    }
    let a = 1.0 - (std::f64::consts::PI / (2.0 * NZ)).cos();
    let b = (lat.abs().to_radians()).cos().powi(2);
    let zones = (2.0 * std::f64::consts::PI / (1.0 - a / b).acos()).floor() as i32;
    zones.max(1)
}

/// Modulo with a non-negative result.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

fn check_range(lat: f64, lon: f64) -> Result<(f64, f64), CprError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(CprError::OutOfRange);
    }
    Ok((lat, lon))
}

/// Globally-unambiguous decode from an even/odd pair.
///
/// The more recent frame supplies the position. Surface pairs need
/// `reference` to pick among the 90 degree latitude/longitude ambiguities;
/// airborne pairs ignore it.
pub fn decode_global(
    even: &CprPosition,
    even_time: DateTime<Utc>,
    odd: &CprPosition,
    odd_time: DateTime<Utc>,
    reference: Option<(f64, f64)>,
) -> Result<(f64, f64), CprError> {
    if even.odd || !odd.odd {
        return Err(CprError::MixedVariants);
    }
    if even.surface != odd.surface {
        return Err(CprError::MixedVariants);
    }
    if (even_time - odd_time).num_seconds().abs() > MAX_PAIR_AGE_SECS {
        return Err(CprError::StalePair);
    }

    let surface = even.surface;
    let base = if surface { 90.0 } else { 360.0 };
    let surface_reference = if surface {
        Some(reference.ok_or(CprError::NoReference)?)
    } else {
        None
    };

    let lat_even = even.lat as f64 / CPR_MAX;
    let lon_even = even.lon as f64 / CPR_MAX;
    let lat_odd = odd.lat as f64 / CPR_MAX;
    let lon_odd = odd.lon as f64 / CPR_MAX;

    let dlat_even = base / (4.0 * NZ);
    let dlat_odd = base / (4.0 * NZ - 1.0);

    let j = (59.0 * lat_even - 60.0 * lat_odd + 0.5).floor();
    let mut rlat_even = dlat_even * (modulo(j, 60.0) + lat_even);
    let mut rlat_odd = dlat_odd * (modulo(j, 59.0) + lat_odd);

    if let Some((ref_lat, _)) = surface_reference {
        // Surface latitudes land in [0, 90); the southern solution is 90
        // degrees below. Pick whichever is nearer the reference.
        rlat_even = nearer(rlat_even, rlat_even - 90.0, ref_lat);
        rlat_odd = nearer(rlat_odd, rlat_odd - 90.0, ref_lat);
    } else {
        if rlat_even >= 270.0 {
            rlat_even -= 360.0;
        }
        if rlat_odd >= 270.0 {
            rlat_odd -= 360.0;
        }
    }

    if nl(rlat_even) != nl(rlat_odd) {
        return Err(CprError::ZoneStraddle);
    }

    let use_odd = odd_time >= even_time;
    let (rlat, lon_frac, f) = if use_odd {
        (rlat_odd, lon_odd, 1)
    } else {
        (rlat_even, lon_even, 0)
    };

    let nl_val = nl(rlat);
    let n_lon = (nl_val - f).max(1);
    let dlon = base / n_lon as f64;
    let m = (lon_even * (nl_val - 1) as f64 - lon_odd * nl_val as f64 + 0.5).floor();
    let mut rlon = dlon * (modulo(m, n_lon as f64) + lon_frac);

    if let Some((_, ref_lon)) = surface_reference {
        // Longitude also repeats every 90 degrees on the surface.
        rlon = (-3..=1)
            .map(|k| rlon + 90.0 * k as f64)
            .filter(|c| (-180.0..=180.0).contains(c))
            .min_by(|a, b| (a - ref_lon).abs().total_cmp(&(b - ref_lon).abs()))
            .unwrap_or(rlon);
    } else if rlon >= 180.0 {
        rlon -= 360.0;
    }

    check_range(rlat, rlon)
}

/// Locally-referenced decode of a single frame.
///
/// Valid while the reference lies within 180 NM (airborne) or 45 NM
/// (surface) of the decoded position.
pub fn decode_local(
    position: &CprPosition,
    reference: (f64, f64),
) -> Result<(f64, f64), CprError> {
    let i = if position.odd { 1.0 } else { 0.0 };
    let base = if position.surface { 90.0 } else { 360.0 };
    let (ref_lat, ref_lon) = reference;

    let lat_frac = position.lat as f64 / CPR_MAX;
    let lon_frac = position.lon as f64 / CPR_MAX;

    let dlat = base / (4.0 * NZ - i);
    let j = (ref_lat / dlat).floor() + (modulo(ref_lat, dlat) / dlat - lat_frac + 0.5).floor();
    let lat = dlat * (j + lat_frac);

    let n_lon = (nl(lat) - i as i32).max(1);
    let dlon = base / n_lon as f64;
    let m = (ref_lon / dlon).floor() + (modulo(ref_lon, dlon) / dlon - lon_frac + 0.5).floor();
    let lon = dlon * (m + lon_frac);

    let (lat, lon) = check_range(lat, lon)?;

    let limit_nm = if position.surface {
        LOCAL_LIMIT_SURFACE_NM
    } else {
        LOCAL_LIMIT_AIRBORNE_NM
    };
    let distance_nm = geo::haversine_m(ref_lat, ref_lon, lat, lon) / geo::METRES_PER_NM;
    if distance_nm > limit_nm {
        return Err(CprError::ReferenceTooFar { distance_nm, limit_nm });
    }

    Ok((lat, lon))
}

fn nearer(a: f64, b: f64, reference: f64) -> f64 {
    if (a - reference).abs() <= (b - reference).abs() {
        a
    } else {
        b
    }
}

/// Encode a position into one CPR half. Test support for round-trip checks.
#[cfg(test)]
pub fn encode(lat: f64, lon: f64, odd: bool, surface: bool) -> CprPosition {
    let i = if odd { 1.0 } else { 0.0 };
    let base = if surface { 90.0 } else { 360.0 };

    let dlat = base / (4.0 * NZ - i);
    let yz = (CPR_MAX * modulo(lat, dlat) / dlat + 0.5).floor();
    let rlat = dlat * (yz / CPR_MAX + (lat / dlat).floor());

    let n_lon = (nl(rlat) - i as i32).max(1);
    let dlon = base / n_lon as f64;
    let xz = (CPR_MAX * modulo(lon, dlon) / dlon + 0.5).floor();

    CprPosition {
        odd,
        lat: (yz as u32) & 0x1FFFF,
        lon: (xz as u32) & 0x1FFFF,
        surface,
    }
}
