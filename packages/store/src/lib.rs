#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistence for units, incidents, cells and alerts.
//!
//! The engine only talks to storage through [`DispatchStore`]. Each method
//! is atomic on its own; nothing spans calls. The one operation that must
//! be a conditional update is [`DispatchStore::reserve_unit`], which is how
//! concurrent dispatches are kept from claiming the same unit.

pub mod memory;

use async_trait::async_trait;
use civic_dispatch_models::{
    Alert, Cell, CellId, Incident, IncidentCategory, IncidentId, Unit, UnitId, UnitStatus,
};

pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record, e.g. `"unit"`.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The backing store failed.
    #[error("Store backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for a missing unit.
    #[must_use]
    pub fn unit_not_found(id: UnitId) -> Self {
        Self::NotFound {
            entity: "unit",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing incident.
    #[must_use]
    pub fn incident_not_found(id: IncidentId) -> Self {
        Self::NotFound {
            entity: "incident",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing cell.
    #[must_use]
    pub fn cell_not_found(id: &CellId) -> Self {
        Self::NotFound {
            entity: "cell",
            id: id.to_string(),
        }
    }
}

/// Result of trying to reserve a unit for an incident.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The unit is now busy and the incident assigned to it.
    Reserved {
        /// The unit after reservation.
        unit: Unit,
        /// The incident after assignment.
        incident: Incident,
    },
    /// The unit was no longer available or patrolling.
    UnitTaken,
    /// The incident was attended or already had a unit.
    IncidentTaken,
}

/// Storage interface used by the dispatch engine.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Adds a newly deployed unit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_unit(&self, unit: Unit) -> Result<(), StoreError>;

    /// Looks up a unit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError>;

    /// All units in deployment order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn list_units(&self) -> Result<Vec<Unit>, StoreError>;

    /// Overwrites an existing unit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the unit does not exist.
    async fn update_unit(&self, unit: Unit) -> Result<(), StoreError>;

    /// Takes a unit out of service in one step: every incident assigned to
    /// it is detached (unresolved ones go back to `new`) and the unit is
    /// deleted. No reservation can land in between. Returns the ids that
    /// were detached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the unit does not exist; nothing
    /// is changed in that case.
    async fn remove_unit(&self, id: UnitId) -> Result<Vec<IncidentId>, StoreError>;

    /// Sets every unit to `status`, returning how many were touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn set_all_unit_status(&self, status: UnitStatus) -> Result<usize, StoreError>;

    /// Atomically claims `unit_id` for `incident_id`.
    ///
    /// Succeeds only if the unit is still dispatchable and the incident
    /// still awaits a unit. On success the unit becomes busy in the
    /// incident's cell and the incident becomes assigned, in one step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if either record does not exist.
    async fn reserve_unit(
        &self,
        unit_id: UnitId,
        incident_id: IncidentId,
    ) -> Result<Reservation, StoreError>;

    /// Adds a new incident.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_incident(&self, incident: Incident) -> Result<(), StoreError>;

    /// Looks up an incident.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError>;

    /// All incidents in intake order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn list_incidents(&self) -> Result<Vec<Incident>, StoreError>;

    /// Overwrites an existing incident.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the incident does not exist.
    async fn update_incident(&self, incident: Incident) -> Result<(), StoreError>;

    /// Deletes every incident, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn delete_all_incidents(&self) -> Result<usize, StoreError>;

    /// Number of incidents ever recorded in `cell_id`, optionally only of
    /// one category.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn count_incidents_in_cell(
        &self,
        cell_id: &CellId,
        category: Option<IncidentCategory>,
    ) -> Result<u64, StoreError>;

    /// Looks up a cell.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_cell(&self, id: &CellId) -> Result<Option<Cell>, StoreError>;

    /// Stores `cell` unless a cell with the same id exists, and returns
    /// whichever record is now stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_cell_if_absent(&self, cell: Cell) -> Result<Cell, StoreError>;

    /// Stores every cell not already present, returning how many were new.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_cells(&self, cells: Vec<Cell>) -> Result<usize, StoreError>;

    /// All cells in id order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn list_cells(&self) -> Result<Vec<Cell>, StoreError>;

    /// Deletes every cell, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn delete_all_cells(&self) -> Result<usize, StoreError>;

    /// Persists a recomputed incident count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the cell does not exist.
    async fn set_cell_incident_count(&self, id: &CellId, count: u64) -> Result<(), StoreError>;

    /// Adds `delta` to the cell's patrol priority and returns the new score.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the cell does not exist.
    async fn add_cell_priority(&self, id: &CellId, delta: f64) -> Result<f64, StoreError>;

    /// Zeroes every cell's incident count and patrol priority.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn reset_cell_counters(&self) -> Result<(), StoreError>;

    /// Appends an alert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_alert(&self, alert: Alert) -> Result<(), StoreError>;

    /// All alerts in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn list_alerts(&self) -> Result<Vec<Alert>, StoreError>;
}
