//! Web-Mercator tile math: lat/lon <-> tile coordinate conversions and bbox
//! tile enumeration. Pure functions, no state.
//!
//! Grounded on `tiles.rs`'s `tile_to_bbox`/`latlng_to_tile_coords` in the
//! teacher repo, generalised from a fixed MVT tile extent to plain tile
//! indices, and extended with the inverse (`latlon_to_tile`) and bbox
//! enumeration (`bounds_to_tiles`) this spec requires.

pub const Z_MIN: u32 = 6;
pub const Z_MAX: u32 = 14;

/// Clamp used before any trig so poles don't blow up `atan`/`sec`.
const MAX_LAT: f64 = 85.051_128_78;
const MIN_LAT: f64 = -85.051_128_78;

/// Caller-visible cap on the number of tiles `bounds_to_tiles` will return.
pub const MAX_TILES_PER_QUERY: usize = 200;

/// Tile bbox: `(lat_min, lat_max, lon_min, lon_max)`.
pub fn tile_to_bbox(z: u32, x: u32, y: u32) -> (f64, f64, f64, f64) {
    let n = 2_f64.powi(i32::try_from(z).unwrap_or(i32::MAX));

    let lon_min = (f64::from(x) / n) * 360.0 - 180.0;
    let lon_max = (f64::from(x + 1) / n) * 360.0 - 180.0;

    let lat_max = (std::f64::consts::PI * (1.0 - 2.0 * f64::from(y) / n))
        .sinh()
        .atan()
        .to_degrees();
    let lat_min = (std::f64::consts::PI * (1.0 - 2.0 * f64::from(y + 1) / n))
        .sinh()
        .atan()
        .to_degrees();

    (lat_min, lat_max, lon_min, lon_max)
}

/// Tile containing `(lat, lon)` at zoom `z`.
pub fn latlon_to_tile(lat: f64, lon: f64, z: u32) -> (u32, u32) {
    let n = 2_f64.powi(i32::try_from(z).unwrap_or(i32::MAX));
    let lat = lat.clamp(MIN_LAT, MAX_LAT);

    let x = (((lon + 180.0) / 360.0) * n).floor();

    let lat_rad = lat.to_radians();
    let tan_sec = lat_rad.tan() + 1.0 / lat_rad.cos();
    let y = if tan_sec <= 0.0 {
        0.0
    } else {
        (((1.0 - tan_sec.ln() / std::f64::consts::PI) / 2.0) * n).floor()
    };

    let max_index = (n - 1.0).max(0.0);
    (
        x.clamp(0.0, max_index) as u32,
        y.clamp(0.0, max_index) as u32,
    )
}

/// The inclusive tile rectangle `(x_lo, x_hi, y_lo, y_hi)` covering
/// `(min_lat, max_lat, min_lon, max_lon)` at zoom `z`.
pub fn tile_range(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64, z: u32) -> (u32, u32, u32, u32) {
    // The y axis increases southward, so max_lat gives the smaller y.
    let (x0, y0) = latlon_to_tile(max_lat, min_lon, z);
    let (x1, y1) = latlon_to_tile(min_lat, max_lon, z);

    (x0.min(x1), x0.max(x1), y0.min(y1), y0.max(y1))
}

/// Enumerates the tiles whose bbox intersects `(min_lat, max_lat, min_lon,
/// max_lon)` at zoom `z`, as the inclusive rectangle between the two corner
/// tiles. Capped at `MAX_TILES_PER_QUERY`; callers must tolerate a
/// truncated result. Background jobs that need the full, uncapped
/// rectangle should iterate `tile_range` directly instead.
pub fn bounds_to_tiles(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64, z: u32) -> Vec<(u32, u32)> {
    let (x_lo, x_hi, y_lo, y_hi) = tile_range(min_lat, max_lat, min_lon, max_lon, z);

    let mut tiles = Vec::new();
    'outer: for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            tiles.push((x, y));
            if tiles.len() >= MAX_TILES_PER_QUERY {
                break 'outer;
            }
        }
    }
    tiles
}
