//! Incident intake, unit lifecycle and grid views.
//!
//! [`DispatchService`] owns the grid, the corridor, density alerting and
//! the allocator, and exposes the operations a transport layer would call.
//! All shared state is injected; nothing here is global.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use civic_dispatch_alerting::{AlertThresholds, DensityAlerter};
use civic_dispatch_corridor::signals::{SignalBoard, SignalReading};
use civic_dispatch_corridor::{CorridorState, CorridorStatus};
use civic_dispatch_events::{DispatchEvent, EventSink, fire};
use civic_dispatch_grid::labels::LabelMap;
use civic_dispatch_grid::{GridIndex, cell_record, distance_km};
use civic_dispatch_models::clock::Clock;
use civic_dispatch_models::{
    Alert, Cell, CellId, GeoPoint, Incident, IncidentCategory, IncidentId, LegPhase, Route,
    Unit, UnitCategory, UnitId, UnitStatus,
};
use civic_dispatch_routing::RouteProvider;
use civic_dispatch_store::{DispatchStore, StoreError};
use serde::Serialize;
use uuid::Uuid;

use crate::allocator::{Allocator, DispatchOutcome};
use crate::capability::CapabilityMap;
use crate::config::{DispatchConfig, Hospital};
use crate::DispatchError;

/// Most units a single deployment request may create.
pub const MAX_DEPLOY: usize = 50;

/// What happened to a reported incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentReport {
    /// The incident as stored after dispatch.
    pub incident: Incident,
    pub dispatch: DispatchOutcome,
    pub alerts: Vec<Alert>,
}

/// Where newly deployed units are placed.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Centre of the operational area.
    RegionCenter,
    /// Centroid of a known cell.
    Cell(CellId),
    /// An explicit position.
    Point(GeoPoint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub category: UnitCategory,
    /// Clamped to `1..=MAX_DEPLOY`.
    pub count: usize,
    /// Must be available or patrolling.
    pub status: UnitStatus,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BootstrapSummary {
    /// Cells needed to cover the region.
    pub target_cells: usize,
    /// Cells newly written.
    pub inserted: usize,
    /// Whether the existing table was stale and wiped first.
    pub rebuilt: bool,
}

/// A cell as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellView {
    pub id: CellId,
    pub label: String,
    pub center: GeoPoint,
    pub boundary: Vec<GeoPoint>,
    pub incident_count: u64,
    pub patrol_priority_score: f64,
    pub in_corridor: bool,
}

impl CellView {
    fn new(cell: Cell, label: String, in_corridor: bool) -> Self {
        Self {
            id: cell.id,
            label,
            center: cell.center,
            boundary: cell.boundary,
            incident_count: cell.incident_count,
            patrol_priority_score: cell.patrol_priority_score,
            in_corridor,
        }
    }
}

/// Progress of a unit's run after a position update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "progress", rename_all = "snake_case")]
pub enum RunProgress {
    /// The ambulance reached the scene and now heads to a hospital.
    HeadingToHospital {
        incident_id: IncidentId,
        hospital: String,
        route: Route,
    },
    /// The run is over and the unit is patrolling again.
    Resolved { incident_id: IncidentId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    /// The unit after the update.
    pub unit: Unit,
    /// Set when the move completed a leg.
    pub progress: Option<RunProgress>,
}

/// The dispatch engine.
pub struct DispatchService {
    config: DispatchConfig,
    grid: GridIndex,
    store: Arc<dyn DispatchStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    corridor: Arc<CorridorState>,
    alerter: DensityAlerter,
    allocator: Allocator,
}

impl DispatchService {
    /// Builds the engine from validated configuration and its
    /// collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the configuration is invalid.
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn DispatchStore>,
        routes: Arc<dyn RouteProvider>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let grid = GridIndex::new(config.resolution)?;

        let corridor_duration = i64::try_from(config.corridor_duration_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| DispatchError::InvalidRequest {
                message: format!(
                    "corridor duration {}s is out of range",
                    config.corridor_duration_secs
                ),
            })?;
        let corridor = Arc::new(CorridorState::new(clock.clone(), corridor_duration));

        let alerter = DensityAlerter::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            AlertThresholds {
                density: config.density_threshold,
                accidents: config.accident_threshold,
            },
        );

        let allocator = Allocator::new(
            store.clone(),
            routes,
            events.clone(),
            corridor.clone(),
            grid,
            CapabilityMap::new(&config.capabilities),
            Duration::from_secs(config.routing.timeout_secs),
        );

        Ok(Self {
            config,
            grid,
            store,
            events,
            clock,
            corridor,
            alerter,
            allocator,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub const fn grid(&self) -> &GridIndex {
        &self.grid
    }

    #[must_use]
    pub fn store(&self) -> &dyn DispatchStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    #[must_use]
    pub fn corridor(&self) -> &CorridorState {
        &self.corridor
    }

    /// Records an incident reported with a free-form type, then alerts and
    /// dispatches for it.
    ///
    /// # Errors
    ///
    /// See [`Self::report_incident`].
    pub async fn report(
        &self,
        reported_type: &str,
        position: GeoPoint,
    ) -> Result<IncidentReport, DispatchError> {
        self.report_incident(IncidentCategory::normalize(reported_type), position)
            .await
    }

    /// Records an incident, runs density alerting and dispatches a unit.
    ///
    /// Not finding a unit is reported in the returned outcome; the incident
    /// stays `new` for a later [`Self::dispatch_unassigned`] sweep.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Grid`] for an invalid position, or a store
    /// or alerting error if persistence fails.
    pub async fn report_incident(
        &self,
        category: IncidentCategory,
        position: GeoPoint,
    ) -> Result<IncidentReport, DispatchError> {
        let cell_id = self.grid.cell_for_point(position)?;
        let incident = Incident::new(category, position, cell_id, self.clock.now());
        let alerts = self.alerter.record_incident(&incident).await?;
        let dispatch = self.allocator.dispatch(&incident).await?;

        let incident = self
            .store
            .get_incident(incident.id)
            .await?
            .unwrap_or(incident);

        Ok(IncidentReport {
            incident,
            dispatch,
            alerts,
        })
    }

    /// Retries dispatch for every unattended incident without a unit and
    /// returns how many got one.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the store fails.
    pub async fn dispatch_unassigned(&self) -> Result<usize, DispatchError> {
        let pending: Vec<Incident> = self
            .store
            .list_incidents()
            .await?
            .into_iter()
            .filter(Incident::awaits_unit)
            .collect();

        let mut dispatched = 0;
        for incident in &pending {
            if self.allocator.dispatch(incident).await?.is_dispatched() {
                dispatched += 1;
            }
        }

        log::info!(
            "Dispatch sweep assigned {dispatched} of {} waiting incidents",
            pending.len()
        );
        Ok(dispatched)
    }

    /// Marks an incident attended, releases its unit and clears the
    /// corridor. Already attended incidents are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] (wrapped) for an unknown incident.
    pub async fn mark_attended(&self, incident_id: IncidentId) -> Result<Incident, DispatchError> {
        let incident = self
            .store
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| StoreError::incident_not_found(incident_id))?;

        if incident.attended {
            return Ok(incident);
        }

        self.resolve(incident).await
    }

    /// Deploys `request.count` identical units at one position.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for a busy status,
    /// [`StoreError::NotFound`] (wrapped) for an unknown cell, or a grid
    /// error for an invalid point.
    pub async fn deploy_units(&self, request: DeployRequest) -> Result<Vec<Unit>, DispatchError> {
        if !request.status.is_dispatchable() {
            return Err(DispatchError::InvalidRequest {
                message: format!("units cannot be deployed as {}", request.status),
            });
        }

        let count = request.count.clamp(1, MAX_DEPLOY);
        let position = match &request.placement {
            Placement::RegionCenter => self.config.region.bbox().center(),
            Placement::Cell(id) => {
                self.store
                    .get_cell(id)
                    .await?
                    .ok_or_else(|| StoreError::cell_not_found(id))?
                    .center
            }
            Placement::Point(point) => *point,
        };
        let cell_id = self.grid.cell_for_point(position)?;

        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            let unit = Unit {
                id: Uuid::new_v4(),
                category: request.category,
                position,
                status: request.status,
                current_cell_id: Some(cell_id.clone()),
            };
            self.store.insert_unit(unit.clone()).await?;
            self.announce_position(&unit);
            units.push(unit);
        }

        log::info!(
            "Deployed {count} {} units in cell {cell_id}",
            request.category
        );
        Ok(units)
    }

    /// Takes a unit out of service. Its incidents go back to `new` first,
    /// and their ids are returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] (wrapped) for an unknown unit.
    pub async fn remove_unit(&self, unit_id: UnitId) -> Result<Vec<IncidentId>, DispatchError> {
        let detached = self.store.remove_unit(unit_id).await?;

        log::info!(
            "Removed unit {unit_id}, {} incidents returned to the queue",
            detached.len()
        );
        fire(
            self.events.as_ref(),
            &DispatchEvent::VehicleRemoved { unit_id },
        );

        Ok(detached)
    }

    /// Wipes incidents, frees every unit, zeroes cell counters and clears
    /// the corridor. Cells and alerts are kept.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the store fails.
    pub async fn reset(&self) -> Result<(), DispatchError> {
        let incidents = self.store.delete_all_incidents().await?;
        let units = self.store.set_all_unit_status(UnitStatus::Available).await?;
        self.store.reset_cell_counters().await?;
        self.corridor.clear();

        log::info!("Reset: removed {incidents} incidents, freed {units} units");
        Ok(())
    }

    /// Makes the stored cell table cover the operational area exactly at
    /// the configured resolution.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the region can't be covered or the
    /// store fails.
    pub async fn bootstrap_grid(&self) -> Result<BootstrapSummary, DispatchError> {
        let target = self.grid.cells_covering_bbox(&self.config.region.bbox())?;
        let existing: Vec<CellId> = self
            .store
            .list_cells()
            .await?
            .into_iter()
            .map(|cell| cell.id)
            .collect();

        let plan = self.grid.ensure_coverage(&existing, &target);
        if plan.rebuild {
            let removed = self.store.delete_all_cells().await?;
            log::warn!("Dropped {removed} cells from a different resolution");
        }

        let cells = plan
            .to_insert
            .iter()
            .map(cell_record)
            .collect::<Result<Vec<_>, _>>()?;
        let inserted = self.store.insert_cells(cells).await?;

        log::info!(
            "Grid bootstrap: {inserted} new cells, {} total at resolution {}",
            target.len(),
            self.grid.resolution()
        );

        Ok(BootstrapSummary {
            target_cells: target.len(),
            inserted,
            rebuilt: plan.rebuild,
        })
    }

    /// The cell containing `position`, created if it isn't stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Grid`] for an invalid position.
    pub async fn cell_lookup(&self, position: GeoPoint) -> Result<CellView, DispatchError> {
        let id = self.grid.cell_for_point(position)?;
        let cell = self.ensure_cell(&id).await?;
        let labels = LabelMap::new(self.store.list_cells().await?.into_iter().map(|c| c.id));
        let in_corridor = self.corridor.is_active(&id);

        Ok(CellView::new(cell, labels.label(&id), in_corridor))
    }

    /// Every stored cell, in id order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the store fails.
    pub async fn grid_cells(&self) -> Result<Vec<CellView>, DispatchError> {
        let cells = self.store.list_cells().await?;
        let labels = LabelMap::new(cells.iter().map(|c| c.id.clone()));
        let active: BTreeSet<CellId> = self.corridor.active_cells().into_iter().collect();

        Ok(cells
            .into_iter()
            .map(|cell| {
                let label = labels.label(&cell.id);
                let in_corridor = active.contains(&cell.id);
                CellView::new(cell, label, in_corridor)
            })
            .collect())
    }

    #[must_use]
    pub fn corridor_status(&self) -> CorridorStatus {
        self.corridor.status()
    }

    /// Evaluates `board` against the corridor at the current time.
    #[must_use]
    pub fn signal_states(&self, board: &SignalBoard) -> Vec<SignalReading> {
        board.evaluate(&self.corridor, self.clock.now())
    }

    /// Moves a unit and advances its run if the move completed a leg.
    ///
    /// An ambulance on a medical or accident incident continues from the
    /// scene to the nearest hospital and is released there. Every other
    /// run ends at the scene. At most one incident changes per update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] (wrapped) for an unknown unit, or a
    /// grid error for an invalid position.
    pub async fn update_unit_position(
        &self,
        unit_id: UnitId,
        position: GeoPoint,
    ) -> Result<PositionUpdate, DispatchError> {
        let mut unit = self
            .store
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| StoreError::unit_not_found(unit_id))?;

        unit.current_cell_id = Some(self.grid.cell_for_point(position)?);
        unit.position = position;
        self.store.update_unit(unit.clone()).await?;
        self.announce_position(&unit);

        let assigned: Vec<Incident> = self
            .store
            .list_incidents()
            .await?
            .into_iter()
            .filter(|i| i.assigned_unit_id == Some(unit_id) && !i.attended)
            .collect();

        for incident in assigned {
            if let Some(progress) = self.advance_run(&unit, incident).await? {
                let unit = self.store.get_unit(unit_id).await?.unwrap_or(unit);
                return Ok(PositionUpdate {
                    unit,
                    progress: Some(progress),
                });
            }
        }

        Ok(PositionUpdate {
            unit,
            progress: None,
        })
    }

    async fn advance_run(
        &self,
        unit: &Unit,
        mut incident: Incident,
    ) -> Result<Option<RunProgress>, DispatchError> {
        let destination = match incident.leg_phase {
            LegPhase::ToScene => incident.position,
            LegPhase::ToHospital => incident.hospital.unwrap_or(incident.position),
        };

        if distance_km(unit.position, destination)? > self.config.arrival_threshold_km {
            return Ok(None);
        }

        let continues_to_hospital = unit.category == UnitCategory::Ambulance
            && incident.category.needs_hospital()
            && incident.leg_phase == LegPhase::ToScene;

        if continues_to_hospital {
            if let Some(hospital) = self.nearest_hospital(incident.position) {
                incident.hospital = Some(hospital.position());
                incident.leg_phase = LegPhase::ToHospital;
                self.store.update_incident(incident.clone()).await?;

                log::info!(
                    "Unit {} at scene of {}, heading to {}",
                    unit.id,
                    incident.id,
                    hospital.name
                );
                let route = self
                    .allocator
                    .reroute(unit.id, incident.id, unit.position, hospital.position())
                    .await;

                return Ok(Some(RunProgress::HeadingToHospital {
                    incident_id: incident.id,
                    hospital: hospital.name.clone(),
                    route,
                }));
            }
            log::warn!("No hospital configured, closing {} at the scene", incident.id);
        }

        let incident = self.resolve(incident).await?;
        Ok(Some(RunProgress::Resolved {
            incident_id: incident.id,
        }))
    }

    async fn resolve(&self, mut incident: Incident) -> Result<Incident, DispatchError> {
        incident.resolve();
        self.store.update_incident(incident.clone()).await?;

        if let Some(unit_id) = incident.assigned_unit_id {
            if let Some(mut unit) = self.store.get_unit(unit_id).await? {
                unit.status = UnitStatus::Patrolling;
                self.store.update_unit(unit.clone()).await?;
                self.announce_position(&unit);
            }
        }

        self.corridor.clear();
        log::info!("Incident {} attended", incident.id);
        fire(
            self.events.as_ref(),
            &DispatchEvent::IncidentAttended {
                incident_id: incident.id,
                unit_id: incident.assigned_unit_id,
            },
        );

        Ok(incident)
    }

    fn nearest_hospital(&self, from: GeoPoint) -> Option<&Hospital> {
        let mut best: Option<(&Hospital, f64)> = None;
        for hospital in &self.config.hospitals {
            let Ok(distance) = distance_km(from, hospital.position()) else {
                log::warn!("Ignoring hospital {} with invalid position", hospital.name);
                continue;
            };
            if best.is_none_or(|(_, closest)| distance < closest) {
                best = Some((hospital, distance));
            }
        }
        best.map(|(hospital, _)| hospital)
    }

    async fn ensure_cell(&self, id: &CellId) -> Result<Cell, DispatchError> {
        if let Some(cell) = self.store.get_cell(id).await? {
            return Ok(cell);
        }
        Ok(self.store.insert_cell_if_absent(cell_record(id)?).await?)
    }

    fn announce_position(&self, unit: &Unit) {
        fire(
            self.events.as_ref(),
            &DispatchEvent::VehiclePosition {
                unit_id: unit.id,
                category: unit.category,
                position: unit.position,
                status: unit.status,
                cell_id: unit.current_cell_id.clone(),
            },
        );
    }
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("config", &self.config)
            .field("grid", &self.grid)
            .finish_non_exhaustive()
    }
}
