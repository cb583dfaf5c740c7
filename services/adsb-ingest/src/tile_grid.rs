//! World tile grid for routing keys
//!
//! A fixed set of named lat/lon rectangles. The table is parsed once on
//! first use and flattened into a 180x360 one-degree lookup so the hot
//! path is an array index.

use std::sync::OnceLock;

use serde::Deserialize;

/// Tile definitions, globe-index layout.
const TILE_DATA: &str = r#"[
{"south":60,"east":0,"north":90,"west":-126},{"south":60,"east":150,"north":90,"west":0},
{"south":51,"east":-126,"north":90,"west":150},{"south":9,"east":-126,"north":51,"west":150},
{"south":51,"east":-69,"north":60,"west":-126},{"south":45,"east":-114,"north":51,"west":-120},
{"south":45,"east":-102,"north":51,"west":-114},{"south":45,"east":-90,"north":51,"west":-102},
{"south":45,"east":-75,"north":51,"west":-90},{"south":45,"east":-69,"north":51,"west":-75},
{"south":42,"east":18,"north":48,"west":12},{"south":42,"east":24,"north":48,"west":18},
{"south":48,"east":24,"north":54,"west":18},{"south":54,"east":24,"north":60,"west":12},
{"south":54,"east":12,"north":60,"west":3},{"south":54,"east":3,"north":60,"west":-9},
{"south":42,"east":0,"north":48,"west":-9},{"south":42,"east":51,"north":51,"west":24},
{"south":51,"east":51,"north":60,"west":24},{"south":30,"east":90,"north":60,"west":51},
{"south":30,"east":120,"north":60,"west":90},{"south":30,"east":129,"north":39,"west":120},
{"south":30,"east":138,"north":39,"west":129},{"south":30,"east":150,"north":39,"west":138},
{"south":39,"east":150,"north":60,"west":120},{"south":9,"east":111,"north":21,"west":90},
{"south":21,"east":111,"north":30,"west":90},{"south":9,"east":129,"north":24,"west":111},
{"south":24,"east":120,"north":30,"west":111},{"south":24,"east":129,"north":30,"west":120},
{"south":9,"east":150,"north":30,"west":129},{"south":9,"east":69,"north":30,"west":51},
{"south":9,"east":90,"north":30,"west":69},{"south":-90,"east":51,"north":9,"west":-30},
{"south":-90,"east":111,"north":9,"west":51},{"south":-90,"east":160,"north":-18,"west":111},
{"south":-18,"east":160,"north":9,"west":111},{"south":-90,"east":-90,"north":-42,"west":160},
{"south":-42,"east":-90,"north":9,"west":160},{"south":-9,"east":-42,"north":9,"west":-90},
{"south":-90,"east":-63,"north":-9,"west":-90},{"south":-21,"east":-42,"north":-9,"west":-63},
{"south":-90,"east":-42,"north":-21,"west":-63},{"south":-90,"east":-30,"north":9,"west":-42},
{"south":9,"east":-117,"north":33,"west":-126},{"south":9,"east":-102,"north":30,"west":-117},
{"south":9,"east":-90,"north":27,"west":-102},{"south":24,"east":-84,"north":30,"west":-90},
{"south":9,"east":-69,"north":18,"west":-90},{"south":18,"east":-69,"north":24,"west":-90},
{"south":36,"east":18,"north":42,"west":6},{"south":36,"east":30,"north":42,"west":18},
{"south":9,"east":6,"north":39,"west":-9},{"south":9,"east":30,"north":36,"west":6},
{"south":9,"east":51,"north":42,"west":30},{"south":24,"east":-69,"north":39,"west":-75},
{"south":9,"east":-33,"north":30,"west":-69},{"south":30,"east":-33,"north":60,"west":-69},
{"south":9,"east":-9,"north":30,"west":-33},{"south":30,"east":-9,"north":60,"west":-33}
]"#;

const UNKNOWN_TILE: &str = "tileUnknown";

#[derive(Debug, Clone, Copy, Deserialize)]
struct Tile {
    north: f64,
    east: f64,
    south: f64,
    west: f64,
}

impl Tile {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        lat <= self.north && lat > self.south && lon >= self.west && lon < self.east
    }
}

struct Grid {
    names: Vec<String>,
    tiles: Vec<Tile>,
    /// Index into `names` per one-degree cell; `u8::MAX` marks no tile.
    precalc: Vec<u8>,
}

static GRID: OnceLock<Grid> = OnceLock::new();

fn grid() -> &'static Grid {
    GRID.get_or_init(|| {
        let tiles: Vec<Tile> =
            serde_json::from_str(TILE_DATA).expect("embedded tile table is valid JSON");
        let names = (0..tiles.len()).map(|i| format!("tile{i}")).collect();

        let mut precalc = vec![u8::MAX; 180 * 360];
        for lat in -90..90 {
            for lon in -180..180 {
                let slot = ((lat + 90) * 360 + (lon + 180)) as usize;
                if let Some(idx) = tiles
                    .iter()
                    .position(|t| t.contains(lat as f64, lon as f64))
                {
                    precalc[slot] = idx as u8;
                }
            }
        }

        Grid { names, tiles, precalc }
    })
}

/// Tile name containing a coordinate, or `"tileUnknown"`.
pub fn lookup_tile(lat: f64, lon: f64) -> &'static str {
    let lat_idx = lat.floor() as i32;
    let lon_idx = lon.floor() as i32;
    if !(-90..90).contains(&lat_idx) || !(-180..180).contains(&lon_idx) {
        return UNKNOWN_TILE;
    }
    let grid = grid();
    let slot = ((lat_idx + 90) * 360 + (lon_idx + 180)) as usize;
    match grid.precalc[slot] {
        u8::MAX => UNKNOWN_TILE,
        idx => &grid.names[idx as usize],
    }
}

/// Whether the coordinate falls inside the named tile.
pub fn in_grid_location(lat: f64, lon: f64, tile_name: &str) -> bool {
    let grid = grid();
    match grid.names.iter().position(|n| n == tile_name) {
        Some(idx) => grid.tiles[idx].contains(lat, lon),
        None => false,
    }
}

/// All tile names, for queue registration.
pub fn grid_location_names() -> Vec<&'static str> {
    grid().names.iter().map(|n| n.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_locations() {
        // Sydney sits in the south-east Australia tile.
        let sydney = lookup_tile(-33.9, 151.2);
        assert_ne!(sydney, UNKNOWN_TILE);
        assert!(in_grid_location(-33.9, 151.2, sydney));

        // Mid-Atlantic equator and central Asia land in different tiles.
        let atlantic = lookup_tile(0.5, 0.5);
        let asia = lookup_tile(30.5, 60.0);
        assert_ne!(atlantic, UNKNOWN_TILE);
        assert_ne!(asia, UNKNOWN_TILE);
        assert_ne!(atlantic, asia);

        // High northern latitudes fall into the polar bands.
        assert_ne!(lookup_tile(61.0, -120.0), UNKNOWN_TILE);
        assert_ne!(lookup_tile(89.0, 10.0), UNKNOWN_TILE);
    }

    #[test]
    fn out_of_range_is_unknown() {
        assert_eq!(lookup_tile(91.0, 0.0), UNKNOWN_TILE);
        assert_eq!(lookup_tile(0.0, 181.0), UNKNOWN_TILE);
        assert_eq!(lookup_tile(-91.0, -181.0), UNKNOWN_TILE);
    }

    #[test]
    fn dateline_band_has_no_tile() {
        // Tiles whose rectangle crosses the antimeridian store west > east
        // and never match; those bands resolve to the unknown tile.
        assert_eq!(lookup_tile(89.0, 179.0), UNKNOWN_TILE);
        assert_eq!(lookup_tile(10.0, 155.0), UNKNOWN_TILE);
    }

    #[test]
    fn names_are_stable() {
        let names = grid_location_names();
        assert_eq!(names.len(), 60);
        assert_eq!(names[0], "tile0");
        assert!(!in_grid_location(0.0, 0.0, "no-such-tile"));
    }
}
