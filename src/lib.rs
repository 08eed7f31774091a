//! # Route Notifier
//!
//! Map-matching of noisy GPS pings onto predefined routes, with entry/leave
//! notifications for zones along the route.
//!
//! This library provides:
//! - Route densification with cumulative arc-length positions
//! - Forward/backward voting to pick the route an entity is travelling on
//! - Layered notification zones with a silent period against repeat firing
//! - Optional snapping of the reported position between notifications
//!
//! ## Features
//!
//! - **`serde`** - Serialize/Deserialize for configs and value types
//!
//! ## Quick Start
//!
//! ```rust
//! use route_notifier::notification::sink_fn;
//! use route_notifier::{Direction, DirectionConfig, Geo, GeoConfig, NotificationZone};
//!
//! let route = vec![(51.5000, -0.1000), (51.5090, -0.1000)];
//! let mut direction = Direction::from_coordinates("line-1", &route, DirectionConfig::default()).unwrap();
//!
//! let sink = sink_fn(|kind, event| {
//!     println!("{:?} {}", kind, event.notification.id());
//! });
//! direction
//!     .add_notification("stop-1", "stops", 51.5005, -0.1000, NotificationZone::new(50.0, 10.0, 50.0), Some(sink))
//!     .unwrap();
//!
//! let mut geo = Geo::new(GeoConfig { buffer_limit: 3, ..Default::default() });
//! geo.add_direction(direction);
//!
//! for (i, lat) in [51.5001, 51.5002, 51.5003].into_iter().enumerate() {
//!     match geo.ping_at(lat, -0.1000, i as f64) {
//!         Ok(point) => println!("{:.0}m along the route", point.on_direction_position().unwrap()),
//!         Err(err) => println!("skipped: {}", err),
//!     }
//! }
//! ```

use geo::Coord;

pub mod direction;
pub mod error;
pub mod geo_utils;
pub mod history;
pub mod notification;
pub mod pipeline;

pub use crate::direction::{
    Bound, Bracket, Direction, DirectionConfig, Projection, RoutePoint, Zone,
};
pub use crate::error::{GeoError, Result};
pub use crate::notification::{
    sink_fn, Notification, NotificationEvent, NotificationSink, NotificationZone, TriggerKind,
};
pub use crate::pipeline::{Geo, GeoConfig, Point, RouteMatch, Vote};

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate together with its flat projection.
///
/// Built either from latitude/longitude or from planar coordinates; the
/// other pair is always derived, so both stay consistent.
///
/// # Example
/// ```
/// use route_notifier::GeoPoint;
///
/// let p = GeoPoint::from_latlng(51.5074, -0.1278);
/// let q = GeoPoint::from_xy(p.xy());
/// assert!((q.lat() - p.lat()).abs() < 1e-9);
/// assert!((q.lng() - p.lng()).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
    x: f64,
    y: f64,
}

impl GeoPoint {
    pub fn from_latlng(lat: f64, lng: f64) -> Self {
        let xy = geo_utils::flat(lat, lng);
        Self { lat, lng, x: xy.x, y: xy.y }
    }

    pub fn from_xy(xy: Coord) -> Self {
        let (lat, lng) = geo_utils::unflat(xy);
        Self { lat, lng, x: xy.x, y: xy.y }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    pub fn latlng(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn xy(&self) -> Coord {
        Coord { x: self.x, y: self.y }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_from_latlng() {
        let p = GeoPoint::from_latlng(51.5074, -0.1278);
        assert_eq!(p.latlng(), (51.5074, -0.1278));
        assert_eq!(p.xy(), geo_utils::flat(51.5074, -0.1278));
    }

    #[test]
    fn test_geo_point_from_xy() {
        let xy = Coord { x: -8_000.0, y: 5_700_000.0 };
        let p = GeoPoint::from_xy(xy);
        assert_eq!(p.xy(), xy);
        assert_eq!(p.latlng(), geo_utils::unflat(xy));
        assert!(p.lat() > 51.0 && p.lat() < 52.0);
    }
}
