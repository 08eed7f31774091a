//! # Notifications
//!
//! A notification is a zone anchored to a point on a route. Entities
//! approaching the anchor fire the entry trigger, entities that just passed
//! it fire the leave trigger.
//!
//! ```text
//!        entry zone          leave zone
//!   |<-- entry -->|     |<-- near .. far -->|
//! --a-------------P-----b-------------------c-->  route position
//! ```
//!
//! Each event is suppressed while its previous firing is younger than the
//! silent period, so a vehicle lingering inside a zone fires once.

use std::fmt;
use std::sync::Arc;

use crate::direction::Direction;
use crate::error::{GeoError, Result};
use crate::pipeline::Point;
use crate::GeoPoint;

/// Which trigger of a notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriggerKind {
    Entry,
    Leave,
}

/// Everything a sink gets to see when a notification fires.
pub struct NotificationEvent<'a> {
    /// Layer the notification belongs to
    pub layer: &'a str,
    /// The notification that fired
    pub notification: &'a Notification,
    /// Previous notification in the layer for entry, next one for leave
    pub neighbour: Option<&'a Notification>,
    /// Route that owns the notification
    pub direction: &'a Direction,
    /// Ping that triggered the event
    pub point: &'a Point,
}

/// Receiver of entry/leave events, implemented by the host application.
///
/// Closures taking `(TriggerKind, &NotificationEvent)` implement it directly.
pub trait NotificationSink: Send + Sync {
    fn on_entry(&self, event: &NotificationEvent<'_>);
    fn on_leave(&self, event: &NotificationEvent<'_>);
}

impl<F> NotificationSink for F
where
    F: Fn(TriggerKind, &NotificationEvent<'_>) + Send + Sync,
{
    fn on_entry(&self, event: &NotificationEvent<'_>) {
        self(TriggerKind::Entry, event)
    }

    fn on_leave(&self, event: &NotificationEvent<'_>) {
        self(TriggerKind::Leave, event)
    }
}

/// Wrap a closure as a shareable sink.
///
/// ```rust
/// use route_notifier::notification::sink_fn;
///
/// let sink = sink_fn(|kind, event| println!("{:?} {}", kind, event.notification.id()));
/// ```
pub fn sink_fn<F>(f: F) -> Arc<dyn NotificationSink>
where
    F: Fn(TriggerKind, &NotificationEvent<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Distances (meters) around the anchor that make up the zones.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NotificationZone {
    /// Distance before the anchor where the entry zone starts
    pub entry: f64,
    /// Distance past the anchor where the leave zone starts
    pub leave_near: f64,
    /// Distance past the anchor where the leave zone ends
    pub leave_far: f64,
}

impl NotificationZone {
    pub fn new(entry: f64, leave_near: f64, leave_far: f64) -> Self {
        Self { entry, leave_near, leave_far }
    }

    /// Check `entry > 0` and `0 < leave_near <= leave_far`.
    pub fn validate(&self) -> Result<()> {
        if !(self.entry > 0.0) {
            return Err(GeoError::InvalidZone(format!(
                "entry must be positive, got {}",
                self.entry
            )));
        }
        if !(self.leave_near > 0.0 && self.leave_far > 0.0) {
            return Err(GeoError::InvalidZone(format!(
                "leave interval must be positive, got ({}, {})",
                self.leave_near, self.leave_far
            )));
        }
        if self.leave_near > self.leave_far {
            return Err(GeoError::InvalidZone(format!(
                "leave interval is reversed: ({}, {})",
                self.leave_near, self.leave_far
            )));
        }
        Ok(())
    }
}

/// A zone anchor on a route with hysteretic entry/leave triggers.
#[derive(Clone)]
pub struct Notification {
    id: String,
    anchor: GeoPoint,
    position: f64,
    zone: NotificationZone,
    sink: Option<Arc<dyn NotificationSink>>,
    silent_limit: f64,
    last_enter_notified: Option<f64>,
    last_leave_notified: Option<f64>,
}

impl Notification {
    /// Create a notification at a fixed route position.
    ///
    /// `position` is the arc-length of the anchor's projection and is never
    /// recomputed.
    pub(crate) fn new(
        id: String,
        anchor: GeoPoint,
        position: f64,
        zone: NotificationZone,
        sink: Option<Arc<dyn NotificationSink>>,
        silent_limit: f64,
    ) -> Result<Self> {
        zone.validate()?;
        Ok(Self {
            id,
            anchor,
            position,
            zone,
            sink,
            silent_limit,
            last_enter_notified: None,
            last_leave_notified: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn anchor(&self) -> &GeoPoint {
        &self.anchor
    }

    /// Route position of the anchor in meters.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn zone(&self) -> NotificationZone {
        self.zone
    }

    pub fn silent_limit(&self) -> f64 {
        self.silent_limit
    }

    pub fn last_enter_notified(&self) -> Option<f64> {
        self.last_enter_notified
    }

    pub fn last_leave_notified(&self) -> Option<f64> {
        self.last_leave_notified
    }

    /// Whether `position` lies in `[anchor - entry, anchor]`.
    pub fn in_entry_zone(&self, position: f64) -> bool {
        self.position - self.zone.entry <= position && position <= self.position
    }

    /// Whether `position` lies in `[anchor + near, anchor + far]`.
    pub fn in_leave_zone(&self, position: f64) -> bool {
        self.position + self.zone.leave_near <= position
            && position <= self.position + self.zone.leave_far
    }

    /// Stamp the entry event at `timestamp` unless it fired within the silent
    /// period. Returns whether the trigger should fire.
    pub fn notify_entry(&mut self, timestamp: f64) -> bool {
        Self::arm(&mut self.last_enter_notified, timestamp, self.silent_limit)
    }

    /// Leave counterpart of [`Notification::notify_entry`], with its own timestamp.
    pub fn notify_leave(&mut self, timestamp: f64) -> bool {
        Self::arm(&mut self.last_leave_notified, timestamp, self.silent_limit)
    }

    fn arm(last: &mut Option<f64>, timestamp: f64, silent_limit: f64) -> bool {
        match *last {
            Some(previous) if timestamp - previous <= silent_limit => false,
            _ => {
                *last = Some(timestamp);
                true
            }
        }
    }

    /// Hand an event to the sink, if one is attached.
    pub(crate) fn fire(&self, kind: TriggerKind, event: &NotificationEvent<'_>) {
        if let Some(sink) = &self.sink {
            match kind {
                TriggerKind::Entry => sink.on_entry(event),
                TriggerKind::Leave => sink.on_leave(event),
            }
        }
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("anchor", &self.anchor)
            .field("position", &self.position)
            .field("zone", &self.zone)
            .field("has_sink", &self.sink.is_some())
            .field("silent_limit", &self.silent_limit)
            .field("last_enter_notified", &self.last_enter_notified)
            .field("last_leave_notified", &self.last_leave_notified)
            .finish()
    }
}
