//! Great-circle helpers shared by the CPR resolver, tracker and export merge.

/// Earth radius in metres for the haversine distance.
const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Metres per nautical mile.
pub const METRES_PER_NM: f64 = 1852.0;

/// Haversine great-circle distance in metres.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let la1 = lat1.to_radians();
    let la2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + la1.cos() * la2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from point 1 to point 2, degrees in [0, 360).
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let la1 = lat1.to_radians();
    let la2 = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let y = dlon.sin() * la2.cos();
    let x = la1.cos() * la2.sin() - la1.sin() * la2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Compass label for a heading, sixteen-point rose.
pub fn compass_label(heading: f64) -> &'static str {
    const LABELS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let heading = heading.rem_euclid(360.0);
    LABELS[((heading + 11.25) / 22.5) as usize % 16]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_distance() {
        assert!(haversine_m(52.0, 4.0, 52.0, 4.0) < 1e-6);
    }

    #[test]
    fn haversine_one_degree_lat() {
        // One degree of latitude is about 111 km on this sphere.
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_319.0).abs() < 500.0, "got {d}");
    }

    #[test]
    fn bearing_cardinals() {
        assert!((bearing(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 0.01);
        assert!((bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 0.01);
        assert!((bearing(0.0, 0.0, -1.0, 0.0) - 180.0).abs() < 0.01);
        assert!((bearing(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 0.01);
    }

    #[test]
    fn compass_labels() {
        assert_eq!(compass_label(0.0), "N");
        assert_eq!(compass_label(359.0), "N");
        assert_eq!(compass_label(45.0), "NE");
        assert_eq!(compass_label(182.9), "S");
        assert_eq!(compass_label(270.0), "W");
    }
}
