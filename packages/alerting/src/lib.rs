#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Density alerting.
//!
//! Runs once for every recorded incident. Recounts the incident's cell,
//! bumps the cell's patrol priority when it is at or above the density
//! threshold, and raises alerts for operators. Counts only ever grow, so
//! once a cell crosses a threshold every further incident there raises
//! another alert. Alerts are never merged or de-duplicated.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use civic_dispatch_events::{DispatchEvent, EventSink, fire};
use civic_dispatch_grid::{GridError, cell_record};
use civic_dispatch_models::clock::Clock;
use civic_dispatch_models::{Alert, AlertType, CellId, Incident, IncidentCategory};
use civic_dispatch_store::{DispatchStore, StoreError};
use uuid::Uuid;

/// Amount added to a cell's patrol priority each time it is found at or
/// above the density threshold.
pub const PRIORITY_INCREMENT: f64 = 1.0;

/// Default incident count at which a cell is considered dense.
pub const DEFAULT_DENSITY_THRESHOLD: u64 = 5;

/// Default accident count at which pre-stationing is suggested.
pub const DEFAULT_ACCIDENT_THRESHOLD: u64 = 3;

/// Errors that can occur while evaluating an incident.
#[derive(Debug, thiserror::Error)]
pub enum AlertingError {
    /// Reading or writing counters failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The incident's cell id could not be resolved.
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Alert thresholds. Both comparisons are `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertThresholds {
    /// Incidents per cell.
    pub density: u64,
    /// Accident-category incidents per cell.
    pub accidents: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            density: DEFAULT_DENSITY_THRESHOLD,
            accidents: DEFAULT_ACCIDENT_THRESHOLD,
        }
    }
}

/// Evaluates recorded incidents against the thresholds.
pub struct DensityAlerter {
    store: Arc<dyn DispatchStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    thresholds: AlertThresholds,
    cell_locks: Mutex<BTreeMap<CellId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DensityAlerter {
    #[must_use]
    pub fn new(
        store: Arc<dyn DispatchStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            thresholds,
            cell_locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Persists a new incident, announces it and returns any alerts it
    /// raises.
    ///
    /// Recording is serialized per cell from insert through evaluation, so
    /// the n-th incident in a cell always sees a count of exactly n.
    /// Different cells proceed independently. The cell record is created if
    /// this is the first incident in it.
    ///
    /// # Errors
    ///
    /// Returns [`AlertingError`] if the store fails or the incident's cell
    /// id is malformed. Alerts raised before the failure are kept.
    pub async fn record_incident(&self, incident: &Incident) -> Result<Vec<Alert>, AlertingError> {
        let cell_id = &incident.cell_id;
        let lock = self.cell_lock(cell_id);
        let _guard = lock.lock().await;

        if self.store.get_cell(cell_id).await?.is_none() {
            self.store.insert_cell_if_absent(cell_record(cell_id)?).await?;
        }

        self.store.insert_incident(incident.clone()).await?;
        log::info!(
            "Recorded {} incident {} in cell {cell_id}",
            incident.category,
            incident.id
        );
        fire(
            self.events.as_ref(),
            &DispatchEvent::NewIncident {
                incident: incident.clone(),
            },
        );

        self.evaluate(incident).await
    }

    async fn evaluate(&self, incident: &Incident) -> Result<Vec<Alert>, AlertingError> {
        let cell_id = &incident.cell_id;
        let count = self.store.count_incidents_in_cell(cell_id, None).await?;
        self.store.set_cell_incident_count(cell_id, count).await?;

        let mut alerts = Vec::new();

        if count >= self.thresholds.density {
            let score = self
                .store
                .add_cell_priority(cell_id, PRIORITY_INCREMENT)
                .await?;
            log::info!("Cell {cell_id} at {count} incidents, patrol priority now {score}");

            alerts.push(
                self.raise(
                    cell_id,
                    AlertType::HighDensity,
                    format!("High incident density in cell {cell_id}. Increase patrol frequency."),
                )
                .await?,
            );
        }

        if incident.category == IncidentCategory::Accident {
            let accidents = self
                .store
                .count_incidents_in_cell(cell_id, Some(IncidentCategory::Accident))
                .await?;

            if accidents >= self.thresholds.accidents {
                alerts.push(
                    self.raise(
                        cell_id,
                        AlertType::RepeatedAccidents,
                        format!(
                            "Repeated accidents detected in cell {cell_id}. \
                             Consider ambulance pre-stationing nearby."
                        ),
                    )
                    .await?,
                );
            }
        }

        Ok(alerts)
    }

    async fn raise(
        &self,
        cell_id: &CellId,
        alert_type: AlertType,
        message: String,
    ) -> Result<Alert, AlertingError> {
        let alert = Alert {
            id: Uuid::new_v4(),
            cell_id: cell_id.clone(),
            alert_type,
            message,
            created_at: self.clock.now(),
        };

        self.store.insert_alert(alert.clone()).await?;
        log::info!("{alert_type} alert for cell {cell_id}");
        fire(
            self.events.as_ref(),
            &DispatchEvent::PatrolAlert {
                alert: alert.clone(),
            },
        );

        Ok(alert)
    }

    fn cell_lock(&self, cell_id: &CellId) -> Arc<tokio::sync::Mutex<()>> {
        self.cell_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cell_id.clone())
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for DensityAlerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DensityAlerter")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}
