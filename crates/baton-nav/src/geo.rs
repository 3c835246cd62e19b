/// Mean Earth radius used for great-circle distances.
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_000.0;

/// WGS84 semi-major axis used for local offsets.
pub const WGS84_RADIUS_M: f64 = 6_378_137.0;

/// Great-circle (haversine) distance in metres.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    MEAN_EARTH_RADIUS_M * c
}

/// East/north offset in metres from an origin to lat/lon degrees.
/// First-order planar approximation, only good for offsets of a few km.
pub fn local_offset_to_lat_lon(origin_lat: f64, origin_lon: f64, east_m: f64, north_m: f64) -> (f64, f64) {
    let dlat = north_m / WGS84_RADIUS_M;
    let dlon = east_m / (WGS84_RADIUS_M * origin_lat.to_radians().cos());
    (origin_lat + dlat.to_degrees(), origin_lon + dlon.to_degrees())
}
