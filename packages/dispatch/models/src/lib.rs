#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared domain types for the dispatch and corridor coordination engine.
//!
//! Units, incidents, grid cells and alerts are the records every other
//! crate in the workspace reads and writes. The enums here are the
//! canonical wire vocabulary: all of them serialize as `snake_case`
//! strings, both through serde and through their `Display`/`FromStr`
//! implementations.

pub mod clock;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Identifier of a dispatchable unit.
pub type UnitId = Uuid;

/// Identifier of a reported incident.
pub type IncidentId = Uuid;

/// Identifier of a patrol alert.
pub type AlertId = Uuid;

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

impl GeoPoint {
    /// Creates a point from latitude and longitude in degrees.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Midpoint of the box.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            f64::midpoint(self.south, self.north),
            f64::midpoint(self.west, self.east),
        )
    }

    /// Whether `point` lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.south..=self.north).contains(&point.lat) && (self.west..=self.east).contains(&point.lng)
    }

    /// The closed exterior ring SW -> SE -> NE -> NW -> SW.
    #[must_use]
    pub fn ring(&self) -> [GeoPoint; 5] {
        [
            GeoPoint::new(self.south, self.west),
            GeoPoint::new(self.south, self.east),
            GeoPoint::new(self.north, self.east),
            GeoPoint::new(self.north, self.west),
            GeoPoint::new(self.south, self.west),
        ]
    }
}

/// Opaque identifier of a grid cell.
///
/// Stable for a given resolution and coordinate: the grid index always
/// produces the same id for the same input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Wraps an already-formatted cell id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of emergency vehicle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitCategory {
    Police,
    Ambulance,
    Fire,
    Municipal,
}

impl UnitCategory {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Police, Self::Ambulance, Self::Fire, Self::Municipal]
    }
}

/// Operational status of a unit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitStatus {
    /// Idle and stationary.
    Available,
    /// Idle and moving through the city.
    Patrolling,
    /// Reserved for an incident.
    Busy,
}

impl UnitStatus {
    /// Whether a unit in this status may be selected for a dispatch.
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Available | Self::Patrolling)
    }
}

/// Canonical incident category.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentCategory {
    Fire,
    Medical,
    Accident,
    Crime,
    Civic,
}

impl IncidentCategory {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Fire,
            Self::Medical,
            Self::Accident,
            Self::Crime,
            Self::Civic,
        ]
    }

    /// Maps a free-form reported type (as sent by reporting channels) to a
    /// canonical category.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Anything unrecognised is filed as [`Self::Civic`].
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fire" => Self::Fire,
            "medical" => Self::Medical,
            "road_accident" | "accident" => Self::Accident,
            "theft" | "suspicious" | "crime" => Self::Crime,
            _ => Self::Civic,
        }
    }

    /// Default unit categories able to respond, in preference order.
    #[must_use]
    pub const fn default_unit_categories(self) -> &'static [UnitCategory] {
        match self {
            Self::Fire => &[UnitCategory::Fire],
            Self::Medical | Self::Accident => &[UnitCategory::Ambulance],
            Self::Crime => &[UnitCategory::Police],
            Self::Civic => &[UnitCategory::Municipal],
        }
    }

    /// Whether an ambulance responding to this incident continues on to a
    /// hospital after reaching the scene.
    #[must_use]
    pub const fn needs_hospital(self) -> bool {
        matches!(self, Self::Medical | Self::Accident)
    }
}

/// Lifecycle status of an incident.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentStatus {
    New,
    Assigned,
    Resolved,
}

/// Which leg of a response the assigned unit is travelling.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LegPhase {
    #[default]
    ToScene,
    ToHospital,
}

/// Kind of patrol alert.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    /// Too many incidents in a single cell.
    HighDensity,
    /// Accidents keep happening in the same cell.
    RepeatedAccidents,
}

/// A dispatchable emergency vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub category: UnitCategory,
    pub position: GeoPoint,
    pub status: UnitStatus,
    /// Cell the unit was last placed in or dispatched to.
    pub current_cell_id: Option<CellId>,
}

/// A reported incident.
///
/// `attended == true` implies `status == Resolved`; use [`Incident::resolve`]
/// rather than setting the fields independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub category: IncidentCategory,
    pub position: GeoPoint,
    pub cell_id: CellId,
    pub assigned_unit_id: Option<UnitId>,
    pub status: IncidentStatus,
    pub attended: bool,
    pub leg_phase: LegPhase,
    /// Hospital chosen for the second leg, once the scene is reached.
    pub hospital: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Creates a fresh, unassigned incident.
    #[must_use]
    pub fn new(
        category: IncidentCategory,
        position: GeoPoint,
        cell_id: CellId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            position,
            cell_id,
            assigned_unit_id: None,
            status: IncidentStatus::New,
            attended: false,
            leg_phase: LegPhase::ToScene,
            hospital: None,
            created_at,
        }
    }

    /// Marks the incident attended and resolved.
    pub const fn resolve(&mut self) {
        self.attended = true;
        self.status = IncidentStatus::Resolved;
    }

    /// Whether a dispatch sweep should still try to find a unit for it.
    #[must_use]
    pub const fn awaits_unit(&self) -> bool {
        !self.attended && self.assigned_unit_id.is_none()
    }
}

/// A persisted grid cell with its running counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub center: GeoPoint,
    pub boundary: Vec<GeoPoint>,
    /// Number of incidents ever recorded against this cell.
    pub incident_count: u64,
    /// Grows by a fixed step each time the cell is found above the density
    /// threshold. Never decreases except on a full reset.
    pub patrol_priority_score: f64,
}

impl Cell {
    /// Creates a cell record with zeroed counters.
    #[must_use]
    pub const fn new(id: CellId, center: GeoPoint, boundary: Vec<GeoPoint>) -> Self {
        Self {
            id,
            center,
            boundary,
            incident_count: 0,
            patrol_priority_score: 0.0,
        }
    }
}

/// An operator-facing patrol alert. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub cell_id: CellId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Where a route's geometry came from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RouteSource {
    /// Computed by the external routing service.
    External,
    /// Two-point straight line used when routing is unavailable.
    Fallback,
}

/// A driving route between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub distance_meters: Option<f64>,
    pub duration_seconds: Option<f64>,
    /// Ordered route geometry, start to end.
    pub polyline: Vec<GeoPoint>,
    pub source: RouteSource,
}

impl Route {
    /// The straight-line route used whenever the routing service cannot
    /// answer.
    #[must_use]
    pub fn straight_line(start: GeoPoint, end: GeoPoint) -> Self {
        Self {
            distance_meters: None,
            duration_seconds: None,
            polyline: vec![start, end],
            source: RouteSource::Fallback,
        }
    }
}
