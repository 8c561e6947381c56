//! Nearest-unit allocation.
//!
//! For an incident, picks the closest dispatchable unit of an acceptable
//! category, reserves it, routes it to the scene and turns the route into
//! the new green corridor.
//!
//! Reservation is a conditional update in the store. If another dispatch
//! claimed the chosen unit first, that unit is set aside and the next
//! nearest candidate is tried, so a unit is never assigned twice.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use civic_dispatch_corridor::CorridorState;
use civic_dispatch_events::{DispatchEvent, EventSink, fire};
use civic_dispatch_grid::{GridIndex, distance_km};
use civic_dispatch_models::{CellId, GeoPoint, Incident, IncidentId, Route, Unit, UnitId};
use civic_dispatch_routing::{RouteProvider, route_within};
use civic_dispatch_store::{DispatchStore, Reservation};
use serde::Serialize;

use crate::DispatchError;
use crate::capability::CapabilityMap;

/// A successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    /// The incident after assignment.
    pub incident: Incident,
    /// The reserved unit.
    pub unit: Unit,
    /// Route from the unit to the scene.
    pub route: Route,
    /// Cells of the corridor activated for this route.
    pub corridor_cells: Vec<CellId>,
    pub corridor_expires_at: DateTime<Utc>,
}

/// Result of a dispatch attempt. Only store and grid faults are errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A unit was reserved and routed.
    Dispatched(Assignment),
    /// No acceptable unit is free. Nothing was changed.
    NoUnitAvailable { incident_id: IncidentId },
    /// The incident was attended or assigned by someone else meanwhile.
    AlreadyHandled { incident_id: IncidentId },
}

impl DispatchOutcome {
    /// The reserved unit, if any.
    #[must_use]
    pub const fn unit(&self) -> Option<&Unit> {
        match self {
            Self::Dispatched(assignment) => Some(&assignment.unit),
            Self::NoUnitAvailable { .. } | Self::AlreadyHandled { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }
}

/// Picks, reserves and routes units.
pub struct Allocator {
    store: Arc<dyn DispatchStore>,
    routes: Arc<dyn RouteProvider>,
    events: Arc<dyn EventSink>,
    corridor: Arc<CorridorState>,
    grid: GridIndex,
    capabilities: CapabilityMap,
    route_timeout: Duration,
}

impl Allocator {
    #[must_use]
    pub fn new(
        store: Arc<dyn DispatchStore>,
        routes: Arc<dyn RouteProvider>,
        events: Arc<dyn EventSink>,
        corridor: Arc<CorridorState>,
        grid: GridIndex,
        capabilities: CapabilityMap,
        route_timeout: Duration,
    ) -> Self {
        Self {
            store,
            routes,
            events,
            corridor,
            grid,
            capabilities,
            route_timeout,
        }
    }

    /// Dispatches the nearest acceptable unit to `incident`.
    ///
    /// The corridor is only touched after the reservation is persisted; a
    /// store failure leaves it as it was.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the store fails.
    pub async fn dispatch(&self, incident: &Incident) -> Result<DispatchOutcome, DispatchError> {
        let mut passed_over = BTreeSet::new();

        let (unit, incident) = loop {
            let units = self.store.list_units().await?;
            let candidates = units.iter().filter(|u| {
                u.status.is_dispatchable()
                    && self.capabilities.accepts(incident.category, u.category)
                    && !passed_over.contains(&u.id)
            });

            let Some(candidate) = nearest(candidates, incident.position) else {
                log::info!(
                    "No {} unit available for incident {}",
                    incident.category,
                    incident.id
                );
                return Ok(DispatchOutcome::NoUnitAvailable {
                    incident_id: incident.id,
                });
            };

            match self.store.reserve_unit(candidate.id, incident.id).await? {
                Reservation::Reserved { unit, incident } => break (unit, incident),
                Reservation::UnitTaken => {
                    log::debug!("Unit {} was claimed concurrently, retrying", candidate.id);
                    passed_over.insert(candidate.id);
                }
                Reservation::IncidentTaken => {
                    log::debug!("Incident {} no longer awaits a unit", incident.id);
                    return Ok(DispatchOutcome::AlreadyHandled {
                        incident_id: incident.id,
                    });
                }
            }
        };

        let route = route_within(
            self.routes.as_ref(),
            unit.position,
            incident.position,
            self.route_timeout,
        )
        .await;
        let corridor_cells = corridor_cells(&self.grid, &route);
        let corridor_expires_at = self.corridor.activate(corridor_cells.iter().cloned());

        log::info!(
            "Dispatched {} unit {} to {} incident {} ({} corridor cells, {} route)",
            unit.category,
            unit.id,
            incident.category,
            incident.id,
            corridor_cells.len(),
            route.source,
        );

        fire(
            self.events.as_ref(),
            &DispatchEvent::VehicleDispatched {
                incident_id: incident.id,
                unit_id: unit.id,
                unit_category: unit.category,
                cell_id: incident.cell_id.clone(),
                distance_meters: route.distance_meters,
                duration_seconds: route.duration_seconds,
            },
        );
        fire(
            self.events.as_ref(),
            &DispatchEvent::RouteUpdate {
                unit_id: unit.id,
                incident_id: incident.id,
                route: route.clone(),
                corridor_cells: corridor_cells.clone(),
            },
        );

        Ok(DispatchOutcome::Dispatched(Assignment {
            incident,
            unit,
            route,
            corridor_cells,
            corridor_expires_at,
        }))
    }

    /// Routes `unit_id` from `start` to `end` and replaces the corridor
    /// with the new route's cells. Used when a run continues to a second
    /// destination.
    pub(crate) async fn reroute(
        &self,
        unit_id: UnitId,
        incident_id: IncidentId,
        start: GeoPoint,
        end: GeoPoint,
    ) -> Route {
        let route = route_within(self.routes.as_ref(), start, end, self.route_timeout).await;
        let corridor_cells = corridor_cells(&self.grid, &route);
        self.corridor.activate(corridor_cells.iter().cloned());

        fire(
            self.events.as_ref(),
            &DispatchEvent::RouteUpdate {
                unit_id,
                incident_id,
                route: route.clone(),
                corridor_cells,
            },
        );

        route
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("grid", &self.grid)
            .field("capabilities", &self.capabilities)
            .field("route_timeout", &self.route_timeout)
            .finish_non_exhaustive()
    }
}

/// The candidate closest to `target`. The first of equally close
/// candidates wins. Units with unusable positions are skipped.
fn nearest<'a>(candidates: impl Iterator<Item = &'a Unit>, target: GeoPoint) -> Option<&'a Unit> {
    let mut best: Option<(&Unit, f64)> = None;

    for unit in candidates {
        let distance = match distance_km(unit.position, target) {
            Ok(distance) => distance,
            Err(e) => {
                log::warn!("Skipping unit {}: {e}", unit.id);
                continue;
            }
        };

        if best.is_none_or(|(_, closest)| distance < closest) {
            best = Some((unit, distance));
        }
    }

    best.map(|(unit, _)| unit)
}

/// Distinct cells under the route's polyline, in id order.
#[must_use]
pub fn corridor_cells(grid: &GridIndex, route: &Route) -> Vec<CellId> {
    route
        .polyline
        .iter()
        .filter_map(|point| match grid.cell_for_point(*point) {
            Ok(cell) => Some(cell),
            Err(e) => {
                log::warn!("Dropping route point from corridor: {e}");
                None
            }
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
