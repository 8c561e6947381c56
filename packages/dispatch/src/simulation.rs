//! Scripted load scenarios for drills and demos.
//!
//! Uses `ChaCha8Rng` so a seed reproduces the same incident positions on
//! every platform.

use std::sync::Arc;

use civic_dispatch_events::{DispatchEvent, fire};
use civic_dispatch_grid::centroid_of;
use civic_dispatch_models::{CellId, GeoPoint, IncidentCategory, UnitStatus};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::service::DispatchService;
use crate::DispatchError;

/// Most incidents one surge may generate.
pub const MAX_SURGE: usize = 100;

const CONGESTION_MESSAGE: &str =
    "Congestion simulation active; corridor travel expected to slow down.";

#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    /// `count` incidents of one category, at random points in the region
    /// or all at the centroid of `cell`.
    Surge {
        category: IncidentCategory,
        count: usize,
        cell: Option<CellId>,
    },
    /// Every unit is marked busy.
    VehicleUnavailability,
    /// Announced only; routing is not affected.
    Congestion,
}

impl Scenario {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Surge { .. } => "surge",
            Self::VehicleUnavailability => "vehicle_unavailability",
            Self::Congestion => "congestion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    /// Incidents created.
    pub incidents: usize,
    /// Incidents that got a unit.
    pub dispatched: usize,
    pub message: String,
}

pub struct Simulator {
    service: Arc<DispatchService>,
    rng: ChaCha8Rng,
}

impl Simulator {
    #[must_use]
    pub fn new(service: Arc<DispatchService>, seed: u64) -> Self {
        Self {
            service,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Runs `scenario` and announces the result as a `simulation_update`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if incident intake or the store fails.
    pub async fn run(&mut self, scenario: Scenario) -> Result<SimulationReport, DispatchError> {
        let report = match &scenario {
            Scenario::Surge {
                category,
                count,
                cell,
            } => self.surge(*category, *count, cell.as_ref()).await?,
            Scenario::VehicleUnavailability => {
                let units = self
                    .service
                    .store()
                    .set_all_unit_status(UnitStatus::Busy)
                    .await?;
                SimulationReport {
                    scenario: scenario.name().to_string(),
                    incidents: 0,
                    dispatched: 0,
                    message: format!("All {units} units marked busy"),
                }
            }
            Scenario::Congestion => SimulationReport {
                scenario: scenario.name().to_string(),
                incidents: 0,
                dispatched: 0,
                message: CONGESTION_MESSAGE.to_string(),
            },
        };

        log::info!("Simulation {}: {}", report.scenario, report.message);
        self.announce(&report);
        Ok(report)
    }

    /// Resets the service's incident state and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the store fails.
    pub async fn reset(&self) -> Result<SimulationReport, DispatchError> {
        self.service.reset().await?;
        let report = SimulationReport {
            scenario: "reset".to_string(),
            incidents: 0,
            dispatched: 0,
            message: "simulation_reset".to_string(),
        };
        self.announce(&report);
        Ok(report)
    }

    async fn surge(
        &mut self,
        category: IncidentCategory,
        count: usize,
        cell: Option<&CellId>,
    ) -> Result<SimulationReport, DispatchError> {
        let count = count.clamp(1, MAX_SURGE);
        let anchor = match cell {
            Some(id) => self.cell_center(id).await?,
            None => None,
        };

        let mut dispatched = 0;
        for _ in 0..count {
            let position = anchor.unwrap_or_else(|| self.random_point());
            let report = self.service.report_incident(category, position).await?;
            if report.dispatch.is_dispatched() {
                dispatched += 1;
            }
        }

        Ok(SimulationReport {
            scenario: "surge".to_string(),
            incidents: count,
            dispatched,
            message: format!("Generated {count} {category} incidents, {dispatched} dispatched"),
        })
    }

    async fn cell_center(&self, id: &CellId) -> Result<Option<GeoPoint>, DispatchError> {
        if let Some(cell) = self.service.store().get_cell(id).await? {
            return Ok(Some(cell.center));
        }
        match centroid_of(id) {
            Ok(center) => Ok(Some(center)),
            Err(e) => {
                log::warn!("Surge cell {id} unusable ({e}); using random points");
                Ok(None)
            }
        }
    }

    fn random_point(&mut self) -> GeoPoint {
        let region = &self.service.config().region;
        GeoPoint::new(
            self.rng.gen_range(region.south..=region.north),
            self.rng.gen_range(region.west..=region.east),
        )
    }

    fn announce(&self, report: &SimulationReport) {
        fire(
            self.service.events(),
            &DispatchEvent::SimulationUpdate {
                scenario: report.scenario.clone(),
                incidents: report.incidents,
                dispatched: report.dispatched,
                message: report.message.clone(),
            },
        );
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::service::{DeployRequest, Placement};
    use civic_dispatch_events::MemorySink;
    use civic_dispatch_models::UnitCategory;
    use civic_dispatch_models::clock::ManualClock;
    use civic_dispatch_routing::StraightLineRouteProvider;
    use civic_dispatch_store::{DispatchStore, MemoryStore};

    fn setup() -> (Arc<DispatchService>, Arc<MemoryStore>, Arc<MemorySink>) {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemorySink::new());
        let service = DispatchService::new(
            DispatchConfig::default(),
            store.clone(),
            Arc::new(StraightLineRouteProvider),
            events.clone(),
            Arc::new(ManualClock::default()),
        )
        .unwrap();
        (Arc::new(service), store, events)
    }

    async fn deploy_police(service: &DispatchService, count: usize) {
        service
            .deploy_units(DeployRequest {
                category: UnitCategory::Police,
                count,
                status: UnitStatus::Patrolling,
                placement: Placement::RegionCenter,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn surge_stays_inside_region() {
        let (service, store, events) = setup();
        deploy_police(&service, 2).await;
        let mut sim = Simulator::new(service.clone(), 7);

        let report = sim
            .run(Scenario::Surge {
                category: IncidentCategory::Crime,
                count: 5,
                cell: None,
            })
            .await
            .unwrap();

        assert_eq!(report.incidents, 5);
        assert_eq!(report.dispatched, 2);

        let bbox = service.config().region.bbox();
        let incidents = store.list_incidents().await.unwrap();
        assert_eq!(incidents.len(), 5);
        assert!(incidents.iter().all(|i| bbox.contains(i.position)));
        assert_eq!(events.names().last().unwrap(), "simulation_update");
    }

    #[tokio::test]
    async fn same_seed_same_positions() {
        let mut positions = Vec::new();
        for _ in 0..2 {
            let (service, store, _) = setup();
            let mut sim = Simulator::new(service, 42);
            sim.run(Scenario::Surge {
                category: IncidentCategory::Civic,
                count: 3,
                cell: None,
            })
            .await
            .unwrap();
            let run: Vec<GeoPoint> = store
                .list_incidents()
                .await
                .unwrap()
                .into_iter()
                .map(|i| i.position)
                .collect();
            positions.push(run);
        }
        assert_eq!(positions[0], positions[1]);
    }

    #[tokio::test]
    async fn surge_on_cell_lands_in_that_cell() {
        let (service, store, _) = setup();
        let cell = service
            .grid()
            .cell_for_point(GeoPoint::new(13.05, 80.25))
            .unwrap();
        let mut sim = Simulator::new(service, 1);

        sim.run(Scenario::Surge {
            category: IncidentCategory::Accident,
            count: 4,
            cell: Some(cell.clone()),
        })
        .await
        .unwrap();

        let incidents = store.list_incidents().await.unwrap();
        assert!(incidents.iter().all(|i| i.cell_id == cell));
        let stored = store.get_cell(&cell).await.unwrap().unwrap();
        assert_eq!(stored.incident_count, 4);
        assert_eq!(store.list_alerts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unavailability_blocks_dispatch_until_reset() {
        let (service, store, events) = setup();
        deploy_police(&service, 3).await;
        let mut sim = Simulator::new(service.clone(), 3);

        let report = sim.run(Scenario::VehicleUnavailability).await.unwrap();
        assert_eq!(report.message, "All 3 units marked busy");

        let report = sim
            .run(Scenario::Surge {
                category: IncidentCategory::Crime,
                count: 2,
                cell: None,
            })
            .await
            .unwrap();
        assert_eq!(report.dispatched, 0);

        let reset = sim.reset().await.unwrap();
        assert_eq!(reset.message, "simulation_reset");
        assert!(store.list_incidents().await.unwrap().is_empty());
        assert!(
            store
                .list_units()
                .await
                .unwrap()
                .iter()
                .all(|u| u.status == UnitStatus::Available)
        );
        assert_eq!(events.names().last().unwrap(), "simulation_update");
    }

    #[tokio::test]
    async fn congestion_only_reports() {
        let (service, store, _) = setup();
        let mut sim = Simulator::new(service, 0);
        let report = sim.run(Scenario::Congestion).await.unwrap();
        assert_eq!(report.message, CONGESTION_MESSAGE);
        assert!(store.list_incidents().await.unwrap().is_empty());
    }
}
