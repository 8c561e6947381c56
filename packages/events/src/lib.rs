#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dispatch notifications.
//!
//! Every state change the engine makes is announced through an
//! [`EventSink`]. Delivery is best-effort: callers go through [`fire`],
//! which logs and drops any delivery failure so that a missing listener can
//! never abort a dispatch.

pub mod sinks;

use civic_dispatch_models::{
    Alert, CellId, GeoPoint, Incident, IncidentId, Route, UnitCategory, UnitId, UnitStatus,
};
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;

pub use sinks::{BroadcastSink, LogSink, MemorySink};

/// Errors from delivering an event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event could not be encoded for the sink.
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Nobody is listening on the sink.
    #[error("No subscribers for {event} event")]
    NoSubscribers {
        /// Name of the dropped event.
        event: String,
    },
}

/// A notification emitted by the engine.
///
/// Serialized with a `type` tag holding the snake-case event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DispatchEvent {
    /// An incident was accepted.
    NewIncident {
        incident: Incident,
    },
    /// A unit was reserved for an incident.
    VehicleDispatched {
        incident_id: IncidentId,
        unit_id: UnitId,
        unit_category: UnitCategory,
        cell_id: CellId,
        distance_meters: Option<f64>,
        duration_seconds: Option<f64>,
    },
    /// A unit has a new route and the corridor was re-derived from it.
    RouteUpdate {
        unit_id: UnitId,
        incident_id: IncidentId,
        route: Route,
        corridor_cells: Vec<CellId>,
    },
    /// Density alerting raised an alert.
    PatrolAlert {
        alert: Alert,
    },
    /// An incident was attended and its unit released.
    IncidentAttended {
        incident_id: IncidentId,
        unit_id: Option<UnitId>,
    },
    /// A unit moved, was deployed or changed status.
    VehiclePosition {
        unit_id: UnitId,
        category: UnitCategory,
        position: GeoPoint,
        status: UnitStatus,
        cell_id: Option<CellId>,
    },
    /// A unit was taken out of service.
    VehicleRemoved {
        unit_id: UnitId,
    },
    /// A simulation scenario finished a step.
    SimulationUpdate {
        scenario: String,
        incidents: usize,
        dispatched: usize,
        message: String,
    },
}

impl DispatchEvent {
    /// Wire name of the event, e.g. `vehicle_dispatched`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.as_ref()
    }
}

/// Destination for engine notifications.
pub trait EventSink: Send + Sync {
    /// Delivers `event`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if the sink could not accept the event.
    fn publish(&self, event: &DispatchEvent) -> Result<(), EventError>;
}

/// Publishes `event` and discards any failure after logging it.
pub fn fire(sink: &dyn EventSink, event: &DispatchEvent) {
    if let Err(e) = sink.publish(event) {
        log::warn!("Dropped {} event: {e}", event.name());
    }
}
