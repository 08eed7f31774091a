//! # Directions
//!
//! A direction is a predefined route densified into evenly spaced points,
//! each carrying its arc-length position from the route start. Pings are
//! matched to the nearest route point and notifications are anchored at
//! fixed positions along the route, grouped into independent layers.
//!
//! ## Example
//!
//! ```rust
//! use route_notifier::{Direction, DirectionConfig, NotificationZone};
//!
//! let route = vec![(51.5000, -0.1000), (51.5090, -0.1000)];
//! let mut direction = Direction::from_coordinates("north", &route, DirectionConfig::default()).unwrap();
//!
//! assert!((direction.length() - 1000.0).abs() < 5.0);
//!
//! direction
//!     .add_notification("stop-1", "stops", 51.5045, -0.1000, NotificationZone::new(50.0, 10.0, 50.0), None)
//!     .unwrap();
//! assert_eq!(direction.notifications("stops").len(), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use geo::Coord;
use log::{debug, info};

use crate::error::{GeoError, Result};
use crate::geo_utils::{distance, resample};
use crate::notification::{
    Notification, NotificationEvent, NotificationSink, NotificationZone, TriggerKind,
};
use crate::pipeline::{Point, RouteMatch};
use crate::GeoPoint;

/// Configuration for building a direction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DirectionConfig {
    /// Spacing of resampled route points in meters.
    /// Default: 10.0
    pub segment_length: f64,
    /// Maximum distance of a notification anchor from the route in meters.
    /// Default: 200.0
    pub notification_distance_limit: f64,
    /// Minimum seconds between two firings of the same notification event.
    /// Default: 1800.0
    pub silent_limit: f64,
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            segment_length: 10.0,
            notification_distance_limit: 200.0,
            silent_limit: 1800.0,
        }
    }
}

/// A densified route point with its arc-length position.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutePoint {
    point: GeoPoint,
    position: f64,
}

impl RoutePoint {
    pub fn point(&self) -> &GeoPoint {
        &self.point
    }

    pub fn xy(&self) -> Coord {
        self.point.xy()
    }

    /// Meters from the route start.
    pub fn position(&self) -> f64 {
        self.position
    }
}

/// Nearest route point for a coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Index into [`Direction::points`]
    pub index: usize,
    /// Distance to that point in meters
    pub distance: f64,
}

/// One side of a bracketing pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bound {
    Notification { id: String, position: f64 },
    Point { position: f64 },
}

impl Bound {
    fn of(notification: &Notification) -> Self {
        Bound::Notification {
            id: notification.id().to_string(),
            position: notification.position(),
        }
    }

    pub fn position(&self) -> f64 {
        match self {
            Bound::Notification { position, .. } | Bound::Point { position } => *position,
        }
    }
}

/// Which part of a layer a point fell into.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Zone {
    /// Entry zone of a notification; `fired` is false when suppressed
    Entry { notification: String, fired: bool },
    /// Leave zone of a notification; `fired` is false when suppressed
    Leave { notification: String, fired: bool },
    /// Outside every zone
    Between,
}

/// Result of [`Direction::notify`] for one layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bracket {
    pub previous: Option<Bound>,
    pub next: Option<Bound>,
    pub zone: Zone,
}

impl Bracket {
    fn empty() -> Self {
        Self { previous: None, next: None, zone: Zone::Between }
    }

    /// Positions of the surrounding notifications when both sides are notifications.
    pub fn notification_span(&self) -> Option<(f64, f64)> {
        match (&self.previous, &self.next) {
            (
                Some(Bound::Notification { position: a, .. }),
                Some(Bound::Notification { position: b, .. }),
            ) => Some((*a, *b)),
            _ => None,
        }
    }
}

/// A route with cumulative arc-length positions and layered notifications.
#[derive(Debug, Clone)]
pub struct Direction {
    id: String,
    config: DirectionConfig,
    points: Vec<RoutePoint>,
    layers: BTreeMap<String, Vec<Notification>>,
}

impl Direction {
    /// Create an empty direction. Use [`Direction::from_coordinates`] or
    /// [`Direction::from_encoded_polyline`] to get one with points.
    pub fn new(id: impl Into<String>, config: DirectionConfig) -> Self {
        Self {
            id: id.into(),
            config,
            points: Vec::new(),
            layers: BTreeMap::new(),
        }
    }

    /// Build a direction from `(lat, lng)` coordinates in travel order.
    pub fn from_coordinates(
        id: impl Into<String>,
        coordinates: &[(f64, f64)],
        config: DirectionConfig,
    ) -> Result<Self> {
        let mut direction = Self::new(id, config);
        direction.build(coordinates)?;
        Ok(direction)
    }

    /// Build a direction from a Google encoded polyline (precision 5).
    pub fn from_encoded_polyline(
        id: impl Into<String>,
        encoded: &str,
        config: DirectionConfig,
    ) -> Result<Self> {
        let line = polyline::decode_polyline(encoded, 5)
            .map_err(|e| GeoError::Polyline(e.to_string()))?;
        let coordinates: Vec<(f64, f64)> = line.coords().map(|c| (c.y, c.x)).collect();
        Self::from_coordinates(id, &coordinates, config)
    }

    fn build(&mut self, coordinates: &[(f64, f64)]) -> Result<()> {
        if coordinates.len() < 2 {
            return Err(GeoError::NotEnoughCoordinates(coordinates.len()));
        }
        let segment_length = self.config.segment_length;
        if !(segment_length > 0.0 && segment_length.is_finite()) {
            return Err(GeoError::InvalidConfig(format!(
                "segment length must be positive, got {}",
                segment_length
            )));
        }

        let (lat, lng) = coordinates[0];
        let mut points = vec![RoutePoint { point: GeoPoint::from_latlng(lat, lng), position: 0.0 }];
        let mut total_distance = 0.0;

        for pair in coordinates.windows(2) {
            let start = GeoPoint::from_latlng(pair[0].0, pair[0].1);
            let end = GeoPoint::from_latlng(pair[1].0, pair[1].1);
            let between = resample(start.xy(), end.xy(), segment_length)?;
            let last = between.len() - 1;

            for j in 1..between.len() {
                total_distance += distance(between[j - 1], between[j]);
                // Segment ends keep their exact input coordinates
                let point = if j == last { end } else { GeoPoint::from_xy(between[j]) };
                points.push(RoutePoint { point, position: total_distance });
            }
        }

        info!(
            "[Direction] {} built: {} coordinates -> {} points, {:.0}m",
            self.id,
            coordinates.len(),
            points.len(),
            total_distance
        );
        self.points = points;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &DirectionConfig {
        &self.config
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&RoutePoint> {
        self.points.get(index)
    }

    /// Total route length in meters.
    pub fn length(&self) -> f64 {
        self.points.last().map(|p| p.position).unwrap_or(0.0)
    }

    /// Find the nearest route point by linear scan. Ties keep the first point.
    ///
    /// Non-finite distances never match, so a NaN ping has no projection.
    pub fn nearest(&self, xy: Coord) -> Option<Projection> {
        let mut best: Option<Projection> = None;
        for (index, route_point) in self.points.iter().enumerate() {
            let d = distance(xy, route_point.xy());
            if !d.is_finite() {
                continue;
            }
            if best.map_or(true, |b| d < b.distance) {
                best = Some(Projection { index, distance: d });
            }
        }
        best
    }

    /// Nearest route point and its distance in meters.
    pub fn project(&self, xy: Coord) -> Option<(&RoutePoint, f64)> {
        self.nearest(xy).map(|p| (&self.points[p.index], p.distance))
    }

    /// First route point at or beyond `meters` from the start.
    pub fn point_by_position(&self, meters: f64) -> Option<&RoutePoint> {
        let index = self.points.partition_point(|p| p.position < meters);
        self.points.get(index)
    }

    /// Project a standalone ping onto this direction and store the match on it.
    ///
    /// Returns the projection distance, or `None` for an empty direction.
    pub fn match_point(&self, point: &mut Point) -> Option<f64> {
        let projection = self.nearest(point.original().xy())?;
        point.set_route_match(self.route_match(projection));
        Some(projection.distance)
    }

    pub(crate) fn route_match(&self, projection: Projection) -> RouteMatch {
        let route_point = &self.points[projection.index];
        RouteMatch {
            direction_id: self.id.clone(),
            point: route_point.point,
            position: route_point.position,
            distance: projection.distance,
        }
    }

    /// Anchor a notification on this direction.
    ///
    /// The anchor is projected once; its position never changes afterwards.
    /// Notifications inside a layer stay sorted by position.
    pub fn add_notification(
        &mut self,
        id: impl Into<String>,
        layer: impl Into<String>,
        lat: f64,
        lng: f64,
        zone: NotificationZone,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Result<()> {
        let id = id.into();
        let layer = layer.into();
        let anchor = GeoPoint::from_latlng(lat, lng);
        let limit = self.config.notification_distance_limit;

        let (position, distance) = match self.project(anchor.xy()) {
            Some((route_point, distance)) => (route_point.position, distance),
            None => (0.0, f64::INFINITY),
        };
        if distance > limit {
            return Err(GeoError::NotificationDistanceLimitExceeded { id, distance, limit });
        }

        let notification =
            Notification::new(id, anchor, position, zone, sink, self.config.silent_limit)?;
        debug!(
            "[Direction] {} layer {}: notification {} at {:.1}m",
            self.id,
            layer,
            notification.id(),
            position
        );

        let notifications = self.layers.entry(layer).or_default();
        notifications.push(notification);
        notifications.sort_by(|a, b| a.position().total_cmp(&b.position()));
        Ok(())
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Notifications of a layer sorted by position; empty for unknown layers.
    pub fn notifications(&self, layer: &str) -> &[Notification] {
        self.layers.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Evaluate every layer for a matched ping, firing entry/leave triggers.
    ///
    /// Within a layer notifications are scanned in position order and the
    /// first one whose entry zone (checked first) or leave zone contains the
    /// ping wins. Otherwise the bracket is the pair of adjacent notifications
    /// around the ping. Pings without a route position yield no brackets.
    pub fn notify(&mut self, point: &Point) -> BTreeMap<String, Bracket> {
        let mut brackets = BTreeMap::new();
        let Some(position) = point.on_direction_position() else {
            return brackets;
        };

        let mut fired = Vec::new();
        for (layer, notifications) in self.layers.iter_mut() {
            let (bracket, trigger) = scan_layer(notifications, position, point.timestamp());
            if let Some((index, kind)) = trigger {
                fired.push((layer.clone(), index, kind));
            }
            brackets.insert(layer.clone(), bracket);
        }

        for (layer, index, kind) in fired {
            self.fire(&layer, index, kind, point);
        }
        brackets
    }

    fn fire(&self, layer: &str, index: usize, kind: TriggerKind, point: &Point) {
        let notifications = self.notifications(layer);
        let Some(notification) = notifications.get(index) else {
            return;
        };
        let neighbour = match kind {
            TriggerKind::Entry => index.checked_sub(1).and_then(|i| notifications.get(i)),
            TriggerKind::Leave => notifications.get(index + 1),
        };

        info!(
            "[Direction] {} layer {}: {:?} {} at {:.1}m",
            self.id,
            layer,
            kind,
            notification.id(),
            point.on_direction_position().unwrap_or_default()
        );
        notification.fire(
            kind,
            &NotificationEvent { layer, notification, neighbour, direction: self, point },
        );
    }
}

/// Find the zone of `position` in one layer, arming the matching trigger.
fn scan_layer(
    notifications: &mut [Notification],
    position: f64,
    timestamp: f64,
) -> (Bracket, Option<(usize, TriggerKind)>) {
    for index in 0..notifications.len() {
        if notifications[index].in_entry_zone(position) {
            let fired = notifications[index].notify_entry(timestamp);
            let bracket = Bracket {
                previous: index.checked_sub(1).map(|i| Bound::of(&notifications[i])),
                next: Some(Bound::Point { position }),
                zone: Zone::Entry { notification: notifications[index].id().to_string(), fired },
            };
            return (bracket, fired.then_some((index, TriggerKind::Entry)));
        }
        if notifications[index].in_leave_zone(position) {
            let fired = notifications[index].notify_leave(timestamp);
            let bracket = Bracket {
                previous: Some(Bound::Point { position }),
                next: notifications.get(index + 1).map(Bound::of),
                zone: Zone::Leave { notification: notifications[index].id().to_string(), fired },
            };
            return (bracket, fired.then_some((index, TriggerKind::Leave)));
        }
    }

    let bracket = notifications
        .windows(2)
        .find(|w| w[0].position() <= position && position <= w[1].position())
        .map(|w| Bracket {
            previous: Some(Bound::of(&w[0])),
            next: Some(Bound::of(&w[1])),
            zone: Zone::Between,
        })
        .unwrap_or_else(Bracket::empty);
    (bracket, None)
}
