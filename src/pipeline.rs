//! # Ping Pipeline
//!
//! [`Geo`] tracks one moving entity against a set of candidate directions.
//! Each ping goes through the same steps:
//!
//! 1. Validation: zero coordinates, duplicates, time gaps and (optionally)
//!    distance gaps are rejected. The ping is buffered once it passes.
//! 2. Direction selection: with no active direction every candidate is voted
//!    over the whole buffer and the first one with net forward movement wins.
//!    With an active direction only the newest pair is voted; if the clean
//!    buffer no longer sums to forward movement the selection runs again.
//! 3. Notifications: the newest ping is evaluated against every layer of
//!    the active direction, and optionally snapped to the middle of the
//!    surrounding notifications of the adjustment layer.
//!
//! Failures leave the pipeline either untouched or fully reset, see
//! [`GeoError::resets_state`].
//!
//! ## Example
//!
//! ```rust
//! use route_notifier::{Direction, DirectionConfig, Geo, GeoConfig, GeoError};
//!
//! let route = vec![(51.5000, -0.1000), (51.5090, -0.1000)];
//! let direction = Direction::from_coordinates("north", &route, DirectionConfig::default()).unwrap();
//!
//! let mut geo = Geo::new(GeoConfig { buffer_limit: 3, ..Default::default() });
//! geo.add_direction(direction);
//!
//! assert!(matches!(geo.ping_at(51.5001, -0.1, 0.0), Err(GeoError::BufferNotFull { .. })));
//! assert!(matches!(geo.ping_at(51.5002, -0.1, 1.0), Err(GeoError::BufferNotFull { .. })));
//!
//! let point = geo.ping_at(51.5003, -0.1, 2.0).unwrap();
//! assert_eq!(point.route_match().unwrap().direction_id, "north");
//! assert!(point.on_direction_position().unwrap() > 20.0);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use geo::Coord;
use log::{debug, info, warn};

use crate::direction::{Bracket, Direction, Projection};
use crate::error::{GeoError, Result};
use crate::geo_utils::distance;
use crate::history::History;
use crate::GeoPoint;

/// Configuration for the ping pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GeoConfig {
    /// Number of pings needed before a direction can be determined.
    /// Values below 2 are raised to 2. Default: 10
    pub buffer_limit: usize,
    /// Maximum seconds between consecutive pings before the pipeline resets.
    /// Default: 300.0
    pub pings_time_limit: f64,
    /// Maximum jump between consecutive pings in meters.
    /// Only enforced when `check_pings_distance` is set. Default: 300.0
    pub pings_distance_limit: f64,
    /// Enables the `pings_distance_limit` check. Default: false
    pub check_pings_distance: bool,
    /// Maximum distance of a ping from the active direction in meters.
    /// Default: 300.0
    pub out_of_route_distance_limit: f64,
    /// Layer whose notifications are used to snap the returned position.
    /// Default: None
    pub adjustment_layer: Option<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            buffer_limit: 10,
            pings_time_limit: 300.0,
            pings_distance_limit: 300.0,
            check_pings_distance: false,
            out_of_route_distance_limit: 300.0,
            adjustment_layer: None,
        }
    }
}

/// Movement of a ping relative to its predecessor along one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Vote {
    Forward,
    Backward,
    Stationary,
    /// The ping was too far from the direction; counts as backward
    OffRoute,
}

impl Vote {
    fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Vote::Forward
        } else if delta < 0.0 {
            Vote::Backward
        } else {
            Vote::Stationary
        }
    }

    pub fn value(self) -> i32 {
        match self {
            Vote::Forward => 1,
            Vote::Stationary => 0,
            Vote::Backward | Vote::OffRoute => -1,
        }
    }

    fn into_result(self) -> Result<Vote> {
        match self {
            Vote::OffRoute => Err(GeoError::OutOfRoute),
            vote => Ok(vote),
        }
    }
}

/// Route-derived fields of a matched ping.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteMatch {
    pub direction_id: String,
    /// Nearest route point
    pub point: GeoPoint,
    /// Arc-length position of that point in meters
    pub position: f64,
    /// Distance from the raw ping to that point in meters
    pub distance: f64,
}

/// A single position observation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    seq: u64,
    timestamp: f64,
    original: GeoPoint,
    route_match: Option<RouteMatch>,
    adjusted: Option<GeoPoint>,
    brackets: BTreeMap<String, Bracket>,
    direction_changed: bool,
}

impl Point {
    /// Create a standalone ping, e.g. for [`Direction::match_point`].
    pub fn new(lat: f64, lng: f64, timestamp: f64) -> Self {
        Self::ingest(0, lat, lng, timestamp)
    }

    fn ingest(seq: u64, lat: f64, lng: f64, timestamp: f64) -> Self {
        Self {
            seq,
            timestamp,
            original: GeoPoint::from_latlng(lat, lng),
            route_match: None,
            adjusted: None,
            brackets: BTreeMap::new(),
            direction_changed: false,
        }
    }

    /// Ingestion sequence number, unique within one [`Geo`].
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Seconds, as given to [`Geo::ping_at`].
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// The raw observation, never modified.
    pub fn original(&self) -> &GeoPoint {
        &self.original
    }

    pub fn route_match(&self) -> Option<&RouteMatch> {
        self.route_match.as_ref()
    }

    pub(crate) fn set_route_match(&mut self, route_match: RouteMatch) {
        self.route_match = Some(route_match);
    }

    /// Matched route point if any, otherwise the raw observation.
    pub fn location(&self) -> &GeoPoint {
        self.route_match.as_ref().map_or(&self.original, |m| &m.point)
    }

    pub fn lat(&self) -> f64 {
        self.location().lat()
    }

    pub fn lng(&self) -> f64 {
        self.location().lng()
    }

    pub fn xy(&self) -> Coord {
        self.location().xy()
    }

    /// Meters along the matched direction.
    pub fn on_direction_position(&self) -> Option<f64> {
        self.route_match.as_ref().map(|m| m.position)
    }

    /// Position snapped to the middle of the adjustment layer's notifications.
    pub fn adjusted(&self) -> Option<&GeoPoint> {
        self.adjusted.as_ref()
    }

    /// Per-layer brackets from the notification pass.
    pub fn brackets(&self) -> &BTreeMap<String, Bracket> {
        &self.brackets
    }

    /// Whether the active direction switched on this ping.
    pub fn direction_changed(&self) -> bool {
        self.direction_changed
    }
}

type CacheKey = (u64, String);

/// Tracks one entity's pings against a set of candidate directions.
#[derive(Debug)]
pub struct Geo {
    config: GeoConfig,
    directions: Vec<Direction>,
    active: Option<String>,
    buffer: History<Point>,
    /// Sequence numbers of pings with a definite forward/backward vote
    clean: History<u64>,
    projections: HashMap<CacheKey, Projection>,
    votes: HashMap<CacheKey, Vote>,
    vector: i32,
    next_seq: u64,
}

impl Default for Geo {
    fn default() -> Self {
        Self::new(GeoConfig::default())
    }
}

impl Geo {
    pub fn new(config: GeoConfig) -> Self {
        let capacity = config.buffer_limit.max(2);
        Self {
            config,
            directions: Vec::new(),
            active: None,
            buffer: History::with_capacity(capacity),
            clean: History::with_capacity(capacity),
            projections: HashMap::new(),
            votes: HashMap::new(),
            vector: 0,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &GeoConfig {
        &self.config
    }

    /// Register a candidate direction, replacing one with the same id.
    pub fn add_direction(&mut self, direction: Direction) {
        if self.remove_direction(direction.id()).is_some() {
            warn!("[Geo] Replacing direction {}", direction.id());
        }
        self.directions.push(direction);
    }

    /// Unregister a direction and forget everything cached for it.
    pub fn remove_direction(&mut self, id: &str) -> Option<Direction> {
        let index = self.directions.iter().position(|d| d.id() == id)?;
        let direction = self.directions.remove(index);
        self.projections.retain(|(_, route), _| route != id);
        self.votes.retain(|(_, route), _| route != id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        Some(direction)
    }

    /// Unregister every direction and reset tracking state.
    pub fn clear_directions(&mut self) {
        self.directions.clear();
        self.clear();
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    pub fn direction(&self, id: &str) -> Option<&Direction> {
        self.directions.iter().find(|d| d.id() == id)
    }

    /// Mutable access, e.g. to add notifications after registration.
    pub fn direction_mut(&mut self, id: &str) -> Option<&mut Direction> {
        self.directions.iter_mut().find(|d| d.id() == id)
    }

    pub fn active_direction(&self) -> Option<&Direction> {
        self.active.as_deref().and_then(|id| self.direction(id))
    }

    /// Net vote of the most recent direction decision; positive means forward.
    pub fn vector(&self) -> i32 {
        self.vector
    }

    /// Buffered pings, newest first.
    pub fn buffer(&self) -> impl Iterator<Item = &Point> {
        self.buffer.iter()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clean_len(&self) -> usize {
        self.clean.len()
    }

    /// Cached vote of a buffered ping against a direction.
    pub fn vote(&self, point: &Point, direction_id: &str) -> Option<Vote> {
        self.votes.get(&(point.seq, direction_id.to_string())).copied()
    }

    /// Drop buffers, caches and the active direction. Directions stay registered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.clean.clear();
        self.projections.clear();
        self.votes.clear();
        self.active = None;
        self.vector = 0;
    }

    /// Process a ping stamped with the current wall-clock time.
    pub fn ping(&mut self, lat: f64, lng: f64) -> Result<Point> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GeoError::Clock(e.to_string()))?
            .as_secs_f64();
        self.ping_at(lat, lng, now)
    }

    /// Process a ping with an explicit timestamp in seconds.
    ///
    /// Returns the ping matched onto the active direction, or the reason it
    /// could not be matched.
    pub fn ping_at(&mut self, lat: f64, lng: f64, timestamp: f64) -> Result<Point> {
        self.pretty_point(lat, lng, timestamp)?;
        let (route, changed) = self.point_on_direction()?;
        self.finish(route, changed)
    }

    /// Validate and buffer a ping. Succeeds once the buffer is full.
    fn pretty_point(&mut self, lat: f64, lng: f64, timestamp: f64) -> Result<()> {
        if !timestamp.is_finite() {
            return Err(GeoError::InvalidTimestamp(timestamp));
        }
        if !lat.is_finite() || !lng.is_finite() {
            warn!("[Geo] Non-finite coordinate {}, {}, resetting", lat, lng);
            self.clear();
            return Err(GeoError::InvalidCoordinate { lat, lng });
        }
        if lat.round() == 0.0 && lng.round() == 0.0 {
            warn!("[Geo] Zero coordinate, resetting");
            self.clear();
            return Err(GeoError::ZeroCoordinate);
        }

        let point = Point::ingest(self.next_seq, lat, lng, timestamp);
        self.next_seq += 1;
        let capacity = self.buffer.capacity();

        let Some((previous, previous_timestamp)) =
            self.buffer.front().map(|p| (p.original, p.timestamp))
        else {
            self.push(point);
            return Err(GeoError::BufferNotFull { len: 1, capacity });
        };

        if previous.latlng() == point.original.latlng() {
            debug!("[Geo] Duplicate ping {}, {}", lat, lng);
            return Err(GeoError::DuplicateCoordinate { lat, lng });
        }

        let elapsed = timestamp - previous_timestamp;
        if elapsed < 0.0 {
            warn!("[Geo] Timestamp went back {:.0}s, resetting", -elapsed);
            self.clear();
            return Err(GeoError::TimestampRegression { previous: previous_timestamp, timestamp });
        }
        let limit = self.config.pings_time_limit;
        if elapsed > limit {
            warn!("[Geo] {:.0}s without pings, resetting", elapsed);
            self.clear();
            return Err(GeoError::TimeGapExceeded { elapsed, limit });
        }

        if self.config.check_pings_distance {
            let jump = distance(previous.xy(), point.original.xy());
            let limit = self.config.pings_distance_limit;
            if jump > limit {
                warn!("[Geo] {:.0}m jump between pings, resetting", jump);
                self.clear();
                return Err(GeoError::DistanceGapExceeded { distance: jump, limit });
            }
        }

        self.push(point);
        if !self.buffer.is_full() {
            return Err(GeoError::BufferNotFull { len: self.buffer.len(), capacity });
        }
        Ok(())
    }

    fn push(&mut self, point: Point) {
        if self.buffer.push(point).is_some() {
            self.prune_caches();
        }
    }

    /// Forget cached projections and votes of pings no longer buffered.
    fn prune_caches(&mut self) {
        let oldest = self
            .buffer
            .back()
            .map(|p| p.seq)
            .into_iter()
            .chain(self.clean.back().copied())
            .min();
        match oldest {
            Some(oldest) => {
                self.projections.retain(|(seq, _), _| *seq >= oldest);
                self.votes.retain(|(seq, _), _| *seq >= oldest);
            }
            None => {
                self.projections.clear();
                self.votes.clear();
            }
        }
    }

    /// Settle the active direction. Returns its index and whether it changed.
    fn point_on_direction(&mut self) -> Result<(usize, bool)> {
        let active = self
            .active
            .as_deref()
            .and_then(|id| self.directions.iter().position(|d| d.id() == id));

        let Some(route) = active else {
            let route = self.determine_direction()?;
            info!(
                "[Geo] Direction {} determined (vector {})",
                self.directions[route].id(),
                self.vector
            );
            self.active = Some(self.directions[route].id().to_string());
            return Ok((route, false));
        };

        if let Err(err) = self.going_by_direction(route, 1, 0) {
            warn!("[Geo] Left direction {}, resetting", self.directions[route].id());
            self.clear();
            return Err(err);
        }

        self.vector = self.clean_vector(route);
        if self.vector > 0 {
            return Ok((route, false));
        }

        debug!(
            "[Geo] Net movement on {} is {}, determining again",
            self.directions[route].id(),
            self.vector
        );
        let next = self.determine_direction()?;
        let changed = next != route;
        if changed {
            info!(
                "[Geo] Direction changed from {} to {}",
                self.directions[route].id(),
                self.directions[next].id()
            );
        }
        self.active = Some(self.directions[next].id().to_string());
        Ok((next, changed))
    }

    /// Vote every candidate over the whole buffer, oldest pair first.
    ///
    /// Out-of-route pairs count against the candidate instead of aborting,
    /// but a candidate the newest ping is off is never selected. The first
    /// remaining candidate with a positive total wins; otherwise the
    /// pipeline resets.
    fn determine_direction(&mut self) -> Result<usize> {
        let pairs = self.buffer.len().saturating_sub(1);
        let mut newest_off_everywhere = true;

        for route in 0..self.directions.len() {
            let mut total = 0;
            let mut newest_off = false;
            for current in (0..pairs).rev() {
                let vote = match self.going_by_direction(route, current + 1, current) {
                    Ok(vote) => vote,
                    Err(GeoError::OutOfRoute) => {
                        newest_off |= current == 0;
                        Vote::OffRoute
                    }
                    Err(err) => {
                        self.clear();
                        return Err(err);
                    }
                };
                total += vote.value();
            }

            debug!("[Geo] Candidate {} voted {}", self.directions[route].id(), total);
            if newest_off {
                continue;
            }
            newest_off_everywhere = false;
            if total > 0 {
                self.vector = total;
                return Ok(route);
            }
        }

        self.clear();
        if newest_off_everywhere && !self.directions.is_empty() {
            warn!("[Geo] Out of every direction, resetting");
            Err(GeoError::OutOfRoute)
        } else {
            warn!("[Geo] No direction found, resetting");
            Err(GeoError::DirectionNotFound)
        }
    }

    /// Vote the buffered pair `(previous, current)` against one direction.
    ///
    /// Buffer indices count from the newest ping. Projections and votes are
    /// cached per ping and direction; definite votes enter the clean buffer.
    fn going_by_direction(&mut self, route: usize, previous: usize, current: usize) -> Result<Vote> {
        let direction = &self.directions[route];
        let (Some(prev), Some(cur)) = (self.buffer.get(previous), self.buffer.get(current)) else {
            return Ok(Vote::Stationary);
        };

        let key = (cur.seq, direction.id().to_string());
        if let Some(vote) = self.votes.get(&key) {
            return vote.into_result();
        }

        let prev_projection = cached_projection(&mut self.projections, direction, prev);
        let cur_projection = cached_projection(&mut self.projections, direction, cur);
        let limit = self.config.out_of_route_distance_limit;

        let (Some(prev_projection), Some(cur_projection)) = (prev_projection, cur_projection) else {
            self.votes.insert(key, Vote::OffRoute);
            return Err(GeoError::OutOfRoute);
        };
        if cur_projection.distance > limit {
            debug!(
                "[Geo] Ping {} is {:.0}m from {}",
                cur.seq,
                cur_projection.distance,
                direction.id()
            );
            self.votes.insert(key, Vote::OffRoute);
            return Err(GeoError::OutOfRoute);
        }

        let points = direction.points();
        let delta = points[cur_projection.index].position() - points[prev_projection.index].position();
        let vote = Vote::from_delta(delta);
        self.votes.insert(key, vote);

        if vote != Vote::Stationary && !self.clean.iter().any(|seq| *seq == cur.seq) {
            self.clean.push(cur.seq);
        }
        Ok(vote)
    }

    /// Sum of votes for a direction over the clean buffer.
    fn clean_vector(&self, route: usize) -> i32 {
        let id = self.directions[route].id();
        self.clean
            .iter()
            .filter_map(|seq| self.votes.get(&(*seq, id.to_string())))
            .map(|vote| vote.value())
            .sum()
    }

    /// Match the newest ping, run notifications and the optional adjustment.
    fn finish(&mut self, route: usize, changed: bool) -> Result<Point> {
        let route_match = {
            let direction = &self.directions[route];
            let front = self.buffer.front().ok_or(GeoError::BufferNotFull {
                len: 0,
                capacity: self.buffer.capacity(),
            })?;
            cached_projection(&mut self.projections, direction, front)
                .filter(|p| p.distance <= self.config.out_of_route_distance_limit)
                .map(|p| direction.route_match(p))
        };
        let Some(route_match) = route_match else {
            warn!("[Geo] Newest ping is off {}, resetting", self.directions[route].id());
            self.clear();
            return Err(GeoError::OutOfRoute);
        };

        let mut point = match self.buffer.front() {
            Some(front) => front.clone(),
            None => return Err(GeoError::BufferNotFull { len: 0, capacity: self.buffer.capacity() }),
        };
        point.set_route_match(route_match);
        point.direction_changed = changed;

        let direction = &mut self.directions[route];
        point.brackets = direction.notify(&point);

        if let Some(layer) = &self.config.adjustment_layer {
            if let Some((a, b)) = point.brackets.get(layer).and_then(Bracket::notification_span) {
                let middle = (a + b) / 2.0;
                point.adjusted = direction.point_by_position(middle).map(|p| *p.point());
            }
        }

        debug!(
            "[Geo] Ping {} at {:.1}m on {}",
            point.seq,
            point.on_direction_position().unwrap_or_default(),
            direction.id()
        );
        if let Some(front) = self.buffer.front_mut() {
            *front = point.clone();
        }
        Ok(point)
    }
}

fn cached_projection(
    cache: &mut HashMap<CacheKey, Projection>,
    direction: &Direction,
    point: &Point,
) -> Option<Projection> {
    let key = (point.seq, direction.id().to_string());
    if let Some(projection) = cache.get(&key) {
        return Some(*projection);
    }
    let projection = direction.nearest(point.original.xy())?;
    cache.insert(key, projection);
    Some(projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::DirectionConfig;
    use crate::geo_utils::EARTH_RADIUS_M;

    const START_LAT: f64 = 51.5;
    const LNG: f64 = -0.1;

    fn lat_at(meters: f64) -> f64 {
        START_LAT + (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn north() -> Direction {
        let coordinates = vec![(START_LAT, LNG), (lat_at(1000.0), LNG)];
        Direction::from_coordinates("north", &coordinates, DirectionConfig::default()).unwrap()
    }

    fn south() -> Direction {
        let coordinates = vec![(lat_at(1000.0), LNG), (START_LAT, LNG)];
        Direction::from_coordinates("south", &coordinates, DirectionConfig::default()).unwrap()
    }

    fn geo(buffer_limit: usize) -> Geo {
        let mut geo = Geo::new(GeoConfig { buffer_limit, ..Default::default() });
        geo.add_direction(north());
        geo
    }

    #[test]
    fn test_vote_values() {
        assert_eq!(Vote::from_delta(3.0), Vote::Forward);
        assert_eq!(Vote::from_delta(-0.1), Vote::Backward);
        assert_eq!(Vote::from_delta(0.0), Vote::Stationary);
        assert_eq!(Vote::OffRoute.value(), -1);
        assert_eq!(Vote::Forward.value(), 1);
    }

    #[test]
    fn test_first_ping_fills_buffer() {
        let mut geo = geo(3);
        let err = geo.ping_at(lat_at(100.0), LNG, 0.0).unwrap_err();
        assert_eq!(err, GeoError::BufferNotFull { len: 1, capacity: 3 });
        assert_eq!(geo.buffer_len(), 1);
    }

    #[test]
    fn test_time_gap_resets() {
        let mut geo = geo(3);
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let err = geo.ping_at(lat_at(110.0), LNG, 301.0).unwrap_err();
        assert!(matches!(err, GeoError::TimeGapExceeded { .. }));
        assert!(err.resets_state());
        assert_eq!(geo.buffer_len(), 0);
    }

    #[test]
    fn test_timestamp_regression_resets() {
        let mut geo = geo(3);
        let _ = geo.ping_at(lat_at(100.0), LNG, 10.0);
        let err = geo.ping_at(lat_at(110.0), LNG, 4.0).unwrap_err();
        assert_eq!(err, GeoError::TimestampRegression { previous: 10.0, timestamp: 4.0 });
        assert!(err.resets_state());
        assert_eq!(geo.buffer_len(), 0);
    }

    #[test]
    fn test_non_finite_timestamp_rejected() {
        let mut geo = geo(3);
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let err = geo.ping_at(lat_at(110.0), LNG, f64::NAN).unwrap_err();
        assert!(matches!(err, GeoError::InvalidTimestamp(_)));
        assert!(!err.resets_state());
        assert_eq!(geo.buffer_len(), 1);
    }

    #[test]
    fn test_non_finite_coordinates_reset() {
        let mut geo = geo(3);
        for (i, meters) in [100.0, 115.0, 130.0].iter().enumerate() {
            let _ = geo.ping_at(lat_at(*meters), LNG, i as f64);
        }
        assert!(geo.active_direction().is_some());

        let err = geo.ping_at(f64::NAN, LNG, 3.0).unwrap_err();
        assert!(matches!(err, GeoError::InvalidCoordinate { .. }));
        assert!(err.resets_state());
        assert_eq!(geo.buffer_len(), 0);
        assert!(geo.active_direction().is_none());

        let err = geo.ping_at(lat_at(100.0), f64::INFINITY, 4.0).unwrap_err();
        assert!(matches!(err, GeoError::InvalidCoordinate { .. }));
        assert_eq!(geo.buffer_len(), 0);
    }

    #[test]
    fn test_newest_off_route_ping_fails_determination() {
        let mut geo = geo(4);
        for (i, meters) in [100.0, 115.0, 130.0].iter().enumerate() {
            let _ = geo.ping_at(lat_at(*meters), LNG, i as f64);
        }
        // Older pairs vote forward twice, the newest ping is ~1.4 km east
        let err = geo.ping_at(lat_at(145.0), LNG + 0.02, 3.0).unwrap_err();
        assert_eq!(err, GeoError::OutOfRoute);
        assert_eq!(geo.buffer_len(), 0);
        assert!(geo.active_direction().is_none());
    }

    #[test]
    fn test_older_off_route_ping_is_outvoted() {
        let mut geo = geo(4);
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let _ = geo.ping_at(lat_at(115.0), LNG + 0.02, 1.0);
        let _ = geo.ping_at(lat_at(130.0), LNG, 2.0);
        let point = geo.ping_at(lat_at(145.0), LNG, 3.0).unwrap();

        assert_eq!(geo.vector(), 1);
        let matched = point.route_match().unwrap();
        assert_eq!(matched.direction_id, "north");
        assert!(matched.distance < 1.0);
    }

    #[test]
    fn test_distance_gap_only_when_enabled() {
        let mut lenient = geo(3);
        let _ = lenient.ping_at(lat_at(100.0), LNG, 0.0);
        let err = lenient.ping_at(lat_at(900.0), LNG, 1.0).unwrap_err();
        assert!(matches!(err, GeoError::BufferNotFull { len: 2, .. }));

        let mut strict = Geo::new(GeoConfig {
            buffer_limit: 3,
            check_pings_distance: true,
            ..Default::default()
        });
        strict.add_direction(north());
        let _ = strict.ping_at(lat_at(100.0), LNG, 0.0);
        let err = strict.ping_at(lat_at(900.0), LNG, 1.0).unwrap_err();
        assert!(matches!(err, GeoError::DistanceGapExceeded { .. }));
        assert_eq!(strict.buffer_len(), 0);
    }

    #[test]
    fn test_buffer_limit_floor() {
        let mut geo = geo(1);
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let point = geo.ping_at(lat_at(120.0), LNG, 1.0).unwrap();
        assert_eq!(point.route_match().unwrap().direction_id, "north");
    }

    #[test]
    fn test_votes_are_cached_per_direction() {
        let mut geo = geo(3);
        geo.add_direction(south());
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let _ = geo.ping_at(lat_at(120.0), LNG, 1.0);
        let point = geo.ping_at(lat_at(140.0), LNG, 2.0).unwrap();

        assert_eq!(geo.vote(&point, "north"), Some(Vote::Forward));
        // North wins first, south is never evaluated
        assert_eq!(geo.vote(&point, "south"), None);
        assert_eq!(geo.vector(), 2);
        assert_eq!(geo.clean_len(), 2);
    }

    #[test]
    fn test_backward_movement_selects_reverse_direction() {
        let mut geo = geo(3);
        geo.add_direction(south());
        let _ = geo.ping_at(lat_at(300.0), LNG, 0.0);
        let _ = geo.ping_at(lat_at(280.0), LNG, 1.0);
        let point = geo.ping_at(lat_at(260.0), LNG, 2.0).unwrap();

        assert_eq!(geo.active_direction().unwrap().id(), "south");
        assert_eq!(geo.vote(&point, "north"), Some(Vote::Backward));
        assert!(!point.direction_changed());
    }

    #[test]
    fn test_direction_change_while_tracking() {
        let mut geo = geo(3);
        geo.add_direction(south());
        for (i, meters) in [100.0, 120.0, 140.0, 160.0].iter().enumerate() {
            let _ = geo.ping_at(lat_at(*meters), LNG, i as f64);
        }
        assert_eq!(geo.active_direction().unwrap().id(), "north");

        // Turn around: one backward ping is outvoted, two are not
        let point = geo.ping_at(lat_at(140.0), LNG, 4.0).unwrap();
        assert_eq!(geo.active_direction().unwrap().id(), "north");
        assert!(!point.direction_changed());

        let point = geo.ping_at(lat_at(120.0), LNG, 5.0).unwrap();
        assert_eq!(geo.active_direction().unwrap().id(), "south");
        assert!(point.direction_changed());
        assert_eq!(point.route_match().unwrap().direction_id, "south");

        let point = geo.ping_at(lat_at(100.0), LNG, 6.0).unwrap();
        assert!(!point.direction_changed());
        assert_eq!(geo.vector(), 3);
    }

    #[test]
    fn test_stationary_pings_not_found() {
        let mut geo = geo(3);
        // Sideways jitter projects onto the same route point
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let _ = geo.ping_at(lat_at(100.0), LNG + 0.00001, 1.0);
        let err = geo.ping_at(lat_at(100.0), LNG - 0.00001, 2.0).unwrap_err();
        assert_eq!(err, GeoError::DirectionNotFound);
        assert_eq!(geo.buffer_len(), 0);
        assert!(geo.active_direction().is_none());
    }

    #[test]
    fn test_no_directions() {
        let mut geo = Geo::new(GeoConfig { buffer_limit: 2, ..Default::default() });
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        let err = geo.ping_at(lat_at(120.0), LNG, 1.0).unwrap_err();
        assert_eq!(err, GeoError::DirectionNotFound);
    }

    #[test]
    fn test_remove_active_direction() {
        let mut geo = geo(2);
        let _ = geo.ping_at(lat_at(100.0), LNG, 0.0);
        geo.ping_at(lat_at(120.0), LNG, 1.0).unwrap();
        assert!(geo.active_direction().is_some());

        let removed = geo.remove_direction("north").unwrap();
        assert_eq!(removed.id(), "north");
        assert!(geo.active_direction().is_none());
        assert!(geo.directions().is_empty());
    }

    #[test]
    fn test_add_direction_replaces_same_id() {
        let mut geo = geo(3);
        geo.add_direction(north());
        assert_eq!(geo.directions().len(), 1);
    }

    #[test]
    fn test_caches_bounded_by_buffer() {
        let mut geo = geo(3);
        geo.add_direction(south());
        for i in 0..30 {
            let _ = geo.ping_at(lat_at(100.0 + 15.0 * i as f64), LNG, i as f64);
        }
        assert_eq!(geo.buffer_len(), 3);
        assert!(geo.projections.len() <= 2 * 4);
        assert!(geo.votes.len() <= 2 * 4);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_partial_deserialize() {
        let config: GeoConfig =
            serde_json::from_str(r#"{"buffer_limit": 4, "adjustment_layer": "stops"}"#).unwrap();
        assert_eq!(config.buffer_limit, 4);
        assert_eq!(config.adjustment_layer.as_deref(), Some("stops"));
        assert_eq!(config.pings_time_limit, 300.0);
    }
}
