//! Error taxonomy for route construction and ping processing.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    /// Both coordinates round to zero, the "no fix" sentinel of most receivers.
    #[error("zero coordinate received")]
    ZeroCoordinate,
    #[error("invalid coordinate {lat}, {lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(f64),
    #[error("timestamp {timestamp} precedes previous ping at {previous}")]
    TimestampRegression { previous: f64, timestamp: f64 },
    #[error("system clock unavailable: {0}")]
    Clock(String),
    #[error("duplicate coordinate {lat}, {lng}")]
    DuplicateCoordinate { lat: f64, lng: f64 },
    #[error("{elapsed:.1}s since previous ping exceeds limit of {limit:.1}s")]
    TimeGapExceeded { elapsed: f64, limit: f64 },
    #[error("{distance:.1}m jump from previous ping exceeds limit of {limit:.1}m")]
    DistanceGapExceeded { distance: f64, limit: f64 },
    #[error("buffer holds {len} of {capacity} pings")]
    BufferNotFull { len: usize, capacity: usize },
    #[error("ping is out of route")]
    OutOfRoute,
    #[error("no direction with net forward movement")]
    DirectionNotFound,
    #[error("notification {id} is {distance:.1}m from route, limit is {limit:.1}m")]
    NotificationDistanceLimitExceeded { id: String, distance: f64, limit: f64 },
    #[error("invalid notification zone: {0}")]
    InvalidZone(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("route needs at least 2 coordinates, got {0}")]
    NotEnoughCoordinates(usize),
    #[error("cannot resample a degenerate segment")]
    DegenerateSegment,
    #[error("polyline decode failed: {0}")]
    Polyline(String),
}

impl GeoError {
    /// Whether the pipeline dropped its buffers and active route before
    /// returning this error.
    pub fn resets_state(&self) -> bool {
        matches!(
            self,
            GeoError::ZeroCoordinate
                | GeoError::InvalidCoordinate { .. }
                | GeoError::TimestampRegression { .. }
                | GeoError::TimeGapExceeded { .. }
                | GeoError::DistanceGapExceeded { .. }
                | GeoError::OutOfRoute
                | GeoError::DirectionNotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, GeoError>;
