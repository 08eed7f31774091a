//! # Geographic Utilities
//!
//! Local flat-earth projection and the planar helpers built on it.
//!
//! Every distance in this crate is measured on the projected plane, so these
//! functions are the single source of geometry for routes, notifications and
//! pings alike.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`flat`] | Project latitude/longitude (degrees) onto a local plane (meters) |
//! | [`unflat`] | Exact inverse of [`flat`] |
//! | [`distance`] | Euclidean distance between two projected coordinates |
//! | [`resample`] | Evenly spaced points between two projected coordinates |
//!
//! ## Example
//!
//! ```rust
//! use route_notifier::geo_utils;
//!
//! let a = geo_utils::flat(51.5000, -0.1278);
//! let b = geo_utils::flat(51.5010, -0.1278);
//!
//! // ~111 m between the two points
//! let d = geo_utils::distance(a, b);
//! assert!((d - 111.2).abs() < 1.0);
//!
//! let points = geo_utils::resample(a, b, 10.0).unwrap();
//! assert_eq!(points.first(), Some(&a));
//! assert_eq!(points.last(), Some(&b));
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Equirectangular projection
//!
//! `y = lat * R` and `x = lng * cos(lat) * R` with angles in radians and
//! `R = 6_371_008 m` (mean Earth radius). The scale of `x` depends on the
//! point's own latitude, which keeps [`unflat`] an exact algebraic inverse.
//! Accuracy degrades with distance from the route, which is acceptable for
//! the short spans between consecutive pings and route points.

use geo::{Coord, Distance, Euclidean, Point};
use log::debug;

use crate::error::{GeoError, Result};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.0;

/// Upper bound on pieces a single segment may be split into.
pub const MAX_SEGMENTS: usize = 1 << 24;

// =============================================================================
// Projection
// =============================================================================

/// Project a latitude/longitude pair (degrees) onto the local plane.
///
/// Returns planar coordinates in meters with `x` pointing east and `y` north.
#[inline]
pub fn flat(lat: f64, lng: f64) -> Coord {
    let r_lat = lat.to_radians();
    let r_lng = lng.to_radians();
    Coord {
        x: r_lng * r_lat.cos() * EARTH_RADIUS_M,
        y: r_lat * EARTH_RADIUS_M,
    }
}

/// Inverse of [`flat`]: planar coordinates (meters) back to `(lat, lng)` degrees.
#[inline]
pub fn unflat(xy: Coord) -> (f64, f64) {
    let r_lat = xy.y / EARTH_RADIUS_M;
    let r_lng = xy.x / (EARTH_RADIUS_M * r_lat.cos());
    (r_lat.to_degrees(), r_lng.to_degrees())
}

// =============================================================================
// Distance
// =============================================================================

/// Planar Euclidean distance between two projected coordinates, in meters.
///
/// Only meaningful for short spans near the route.
#[inline]
pub fn distance(a: Coord, b: Coord) -> f64 {
    Euclidean::distance(Point::from(a), Point::from(b))
}

// =============================================================================
// Resampling
// =============================================================================

/// Resample the straight segment `p1 -> p2` at roughly `segment_length` meters.
///
/// Both endpoints are included and preserved exactly. When the two points
/// are no further apart than `segment_length` the result is `[p1, p2]`.
/// Otherwise the segment is cut into `floor(d / segment_length) + 1` equal
/// pieces, stepping along whichever axis has the larger span and deriving
/// the other coordinate from the slope.
///
/// # Errors
///
/// [`GeoError::InvalidConfig`] if `segment_length` is not a positive finite
/// number or too small to split the span, [`GeoError::DegenerateSegment`] if
/// the span is not finite or the chosen axis has zero span.
///
/// # Example
///
/// ```rust
/// use geo::Coord;
/// use route_notifier::geo_utils::resample;
///
/// let p1 = Coord { x: 0.0, y: 0.0 };
/// let p2 = Coord { x: 0.0, y: 100.0 };
/// let points = resample(p1, p2, 10.0).unwrap();
///
/// // floor(100 / 10) + 1 = 11 pieces, 12 points
/// assert_eq!(points.len(), 12);
/// ```
pub fn resample(p1: Coord, p2: Coord, segment_length: f64) -> Result<Vec<Coord>> {
    let span = distance(p1, p2);
    debug!("resampling segment of {:.2}m at {:.2}m", span, segment_length);

    if !(segment_length.is_finite() && segment_length > 0.0) {
        return Err(GeoError::InvalidConfig(format!(
            "segment length must be positive, got {}",
            segment_length
        )));
    }
    if !span.is_finite() {
        return Err(GeoError::DegenerateSegment);
    }
    if span <= segment_length {
        return Ok(vec![p1, p2]);
    }

    let pieces = (span / segment_length).floor();
    if pieces >= MAX_SEGMENTS as f64 {
        return Err(GeoError::InvalidConfig(format!(
            "{:.2}m segments split a {:.2}m span into too many pieces",
            segment_length, span
        )));
    }
    let segment_quantity = pieces as usize + 1;
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;

    let mut points = Vec::with_capacity(segment_quantity + 1);
    points.push(p1);

    if dx.abs() <= dy.abs() {
        if dy == 0.0 {
            return Err(GeoError::DegenerateSegment);
        }
        let step = dy / segment_quantity as f64;
        let slope = dx / dy;
        for i in 1..segment_quantity {
            let y = p1.y + step * i as f64;
            points.push(Coord { x: p1.x + slope * (y - p1.y), y });
        }
    } else {
        if dx == 0.0 {
            return Err(GeoError::DegenerateSegment);
        }
        let step = dx / segment_quantity as f64;
        let slope = dy / dx;
        for i in 1..segment_quantity {
            let x = p1.x + step * i as f64;
            points.push(Coord { x, y: p1.y + slope * (x - p1.x) });
        }
    }

    points.push(p2);
    Ok(points)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_flat_origin() {
        let xy = flat(0.0, 0.0);
        assert_eq!(xy.x, 0.0);
        assert_eq!(xy.y, 0.0);
    }

    #[test]
    fn test_flat_one_degree_latitude() {
        // One degree of latitude is R * pi / 180 ~ 111.2 km
        let xy = flat(1.0, 0.0);
        assert!(approx_eq(xy.y, 111_195.0, 1.0));
        assert_eq!(xy.x, 0.0);
    }

    #[test]
    fn test_flat_unflat_round_trip() {
        for &(lat, lng) in &[
            (51.5074, -0.1278),
            (-33.8688, 151.2093),
            (84.9, 179.9),
            (-84.9, -179.9),
            (0.0001, 0.0001),
        ] {
            let (back_lat, back_lng) = unflat(flat(lat, lng));
            assert!(approx_eq(back_lat, lat, 1e-9), "lat {} -> {}", lat, back_lat);
            assert!(approx_eq(back_lng, lng, 1e-9), "lng {} -> {}", lng, back_lng);
        }
    }

    #[test]
    fn test_distance_pythagoras() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 3.0, y: 4.0 };
        assert!(approx_eq(distance(a, b), 5.0, 1e-12));
        assert_eq!(distance(a, a), 0.0);
    }

    #[test]
    fn test_resample_short_segment() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 3.0, y: 4.0 };
        assert_eq!(resample(a, b, 10.0).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_resample_same_point() {
        let a = Coord { x: 10.0, y: 10.0 };
        assert_eq!(resample(a, a, 10.0).unwrap(), vec![a, a]);
    }

    #[test]
    fn test_resample_even_spacing() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 95.0, y: 0.0 };
        let points = resample(a, b, 10.0).unwrap();

        // floor(9.5) + 1 = 10 pieces
        assert_eq!(points.len(), 11);
        for w in points.windows(2) {
            assert!(approx_eq(distance(w[0], w[1]), 9.5, 1e-9));
        }
        assert_eq!(points[0], a);
        assert_eq!(points[10], b);
    }

    #[test]
    fn test_resample_diagonal_uses_major_axis() {
        let a = Coord { x: 10.0, y: -5.0 };
        let b = Coord { x: 13.0, y: -105.0 };
        let points = resample(a, b, 10.0).unwrap();
        let expected_step = distance(a, b) / (points.len() - 1) as f64;

        for w in points.windows(2) {
            assert!(w[1].y < w[0].y);
            assert!(approx_eq(distance(w[0], w[1]), expected_step, 1e-9));
        }
        assert_eq!(*points.last().unwrap(), b);
    }

    #[test]
    fn test_resample_non_finite() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: f64::INFINITY, y: 0.0 };
        assert!(matches!(resample(a, b, 10.0), Err(GeoError::DegenerateSegment)));
    }

    #[test]
    fn test_resample_rejects_bad_segment_length() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 0.0, y: 100.0 };
        for length in [0.0, -10.0, f64::NAN, f64::INFINITY, 1e-12] {
            assert!(
                matches!(resample(a, b, length), Err(GeoError::InvalidConfig(_))),
                "segment length {} accepted",
                length
            );
        }
    }
}
