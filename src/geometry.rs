use geo::HaversineDistance;
use geo_types::{Coord, LineString, Point};

use crate::error::{TripError, TripResult};

/// Precision used by the route provider's encoded polylines.
const POLYLINE_PRECISION: u32 = 5;

/// Decodes an encoded polyline into an ordered (lon, lat) sequence.
///
/// Malformed input is an error; a partially decodable string must never be
/// silently truncated into a shorter route.
pub fn decode_path(encoded: &str) -> TripResult<LineString<f64>> {
    validate_encoding(encoded)?;
    polyline::decode_polyline(encoded, POLYLINE_PRECISION)
        .map_err(|e| TripError::Decode(e.to_string()))
}

/// Structural check on an encoded polyline.
///
/// Each value is a run of 5-bit chunks; every chunk except the last carries
/// the 0x20 continuation bit, and values come in (lat, lon) pairs. The decoder
/// crate tolerates a string that ends mid-value, reading the dangling chunks
/// as a wrong final coordinate, so truncation has to be caught here.
fn validate_encoding(encoded: &str) -> TripResult<()> {
    let mut values = 0usize;
    let mut mid_value = false;

    for byte in encoded.bytes() {
        if !(63..=126).contains(&byte) {
            return Err(TripError::Decode(format!(
                "invalid polyline character {:#04x}",
                byte
            )));
        }
        if (byte - 63) & 0x20 != 0 {
            mid_value = true;
        } else {
            mid_value = false;
            values += 1;
        }
    }

    if mid_value {
        return Err(TripError::Decode("polyline ends mid-value".to_string()));
    }
    if values % 2 != 0 {
        return Err(TripError::Decode(
            "polyline has an unpaired coordinate value".to_string(),
        ));
    }
    Ok(())
}

/// Range check shared by every inbound coordinate pair.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Total geodesic length of a route in meters.
pub fn route_length_meters(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|w| Point::from(w[0]).haversine_distance(&Point::from(w[1])))
        .sum()
}

/// Result of projecting a point onto a route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteProjection {
    /// Geodesic distance from the point to its projection, in meters.
    pub distance_meters: f64,
    /// Normalized arc-length position of the projection: 0.0 at route start,
    /// 1.0 at route end.
    pub fraction: f64,
}

/// Projects `point` (lon, lat) onto the route and returns the corridor
/// distance together with the fractional position along the route.
///
/// Segments are short enough in practice that a local equirectangular
/// approximation per segment is accurate to well under a meter; the reported
/// distance itself is geodesic.
pub fn project_onto_route(line: &LineString<f64>, point: Coord<f64>) -> Option<RouteProjection> {
    if line.0.len() < 2 {
        return None;
    }

    let p = Point::from(point);
    let total_length = route_length_meters(line);

    let mut best_distance = f64::INFINITY;
    let mut best_offset = 0.0;
    let mut cumulative = 0.0;

    for w in line.0.windows(2) {
        let (a, b) = (w[0], w[1]);
        let segment_length = Point::from(a).haversine_distance(&Point::from(b));

        let t = segment_parameter(a, b, point);
        let projected = Coord {
            x: a.x + t * (b.x - a.x),
            y: a.y + t * (b.y - a.y),
        };
        let distance = p.haversine_distance(&Point::from(projected));

        if distance < best_distance {
            best_distance = distance;
            best_offset = cumulative + t * segment_length;
        }
        cumulative += segment_length;
    }

    let fraction = if total_length > 0.0 {
        (best_offset / total_length).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(RouteProjection {
        distance_meters: best_distance,
        fraction,
    })
}

/// Clamped projection parameter of `p` onto segment `a -> b`, computed in a
/// local planar frame with longitude scaled by cos(latitude).
fn segment_parameter(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> f64 {
    let k = a.y.to_radians().cos();
    let vx = (b.x - a.x) * k;
    let vy = b.y - a.y;
    let wx = (p.x - a.x) * k;
    let wy = p.y - a.y;

    let len2 = vx * vx + vy * vy;
    if len2 == 0.0 {
        return 0.0;
    }
    ((wx * vx + wy * vy) / len2).clamp(0.0, 1.0)
}
