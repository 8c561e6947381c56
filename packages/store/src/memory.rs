//! In-memory [`DispatchStore`].
//!
//! Units and incidents are kept in insertion order so that "first seen"
//! means the same thing on every call. All tables sit behind a single
//! [`RwLock`], which makes every trait method trivially atomic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use civic_dispatch_models::{
    Alert, Cell, CellId, Incident, IncidentCategory, IncidentId, IncidentStatus, Unit, UnitId,
    UnitStatus,
};
use tokio::sync::RwLock;

use crate::{DispatchStore, Reservation, StoreError};

#[derive(Debug, Default)]
struct Tables {
    units: Vec<Unit>,
    incidents: Vec<Incident>,
    cells: BTreeMap<CellId, Cell>,
    alerts: Vec<Alert>,
}

impl Tables {
    fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit, StoreError> {
        self.units
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::unit_not_found(id))
    }

    fn incident_mut(&mut self, id: IncidentId) -> Result<&mut Incident, StoreError> {
        self.incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::incident_not_found(id))
    }

    fn cell_mut(&mut self, id: &CellId) -> Result<&mut Cell, StoreError> {
        self.cells
            .get_mut(id)
            .ok_or_else(|| StoreError::cell_not_found(id))
    }
}

/// A process-local store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn insert_unit(&self, unit: Unit) -> Result<(), StoreError> {
        self.tables.write().await.units.push(unit);
        Ok(())
    }

    async fn get_unit(&self, id: UnitId) -> Result<Option<Unit>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .units
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn list_units(&self) -> Result<Vec<Unit>, StoreError> {
        Ok(self.tables.read().await.units.clone())
    }

    async fn update_unit(&self, unit: Unit) -> Result<(), StoreError> {
        let id = unit.id;
        let mut tables = self.tables.write().await;
        *tables.unit_mut(id)? = unit;
        Ok(())
    }

    async fn remove_unit(&self, id: UnitId) -> Result<Vec<IncidentId>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(index) = tables.units.iter().position(|u| u.id == id) else {
            return Err(StoreError::unit_not_found(id));
        };

        let mut detached = Vec::new();
        for incident in &mut tables.incidents {
            if incident.assigned_unit_id == Some(id) {
                incident.assigned_unit_id = None;
                if incident.status == IncidentStatus::Assigned {
                    incident.status = IncidentStatus::New;
                }
                detached.push(incident.id);
            }
        }

        tables.units.remove(index);
        Ok(detached)
    }

    async fn set_all_unit_status(&self, status: UnitStatus) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        for unit in &mut tables.units {
            unit.status = status;
        }
        Ok(tables.units.len())
    }

    async fn reserve_unit(
        &self,
        unit_id: UnitId,
        incident_id: IncidentId,
    ) -> Result<Reservation, StoreError> {
        let mut tables = self.tables.write().await;

        let incident = tables.incident_mut(incident_id)?;
        if !incident.awaits_unit() {
            return Ok(Reservation::IncidentTaken);
        }
        let cell_id = incident.cell_id.clone();

        let unit = tables.unit_mut(unit_id)?;
        if !unit.status.is_dispatchable() {
            log::debug!("Unit {unit_id} already {}", unit.status);
            return Ok(Reservation::UnitTaken);
        }
        unit.status = UnitStatus::Busy;
        unit.current_cell_id = Some(cell_id);
        let unit = unit.clone();

        let incident = tables.incident_mut(incident_id)?;
        incident.assigned_unit_id = Some(unit_id);
        incident.status = IncidentStatus::Assigned;
        let incident = incident.clone();

        Ok(Reservation::Reserved { unit, incident })
    }

    async fn insert_incident(&self, incident: Incident) -> Result<(), StoreError> {
        self.tables.write().await.incidents.push(incident);
        Ok(())
    }

    async fn get_incident(&self, id: IncidentId) -> Result<Option<Incident>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .incidents
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn list_incidents(&self) -> Result<Vec<Incident>, StoreError> {
        Ok(self.tables.read().await.incidents.clone())
    }

    async fn update_incident(&self, incident: Incident) -> Result<(), StoreError> {
        let id = incident.id;
        let mut tables = self.tables.write().await;
        *tables.incident_mut(id)? = incident;
        Ok(())
    }

    async fn delete_all_incidents(&self) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.incidents.len();
        tables.incidents.clear();
        Ok(removed)
    }

    async fn count_incidents_in_cell(
        &self,
        cell_id: &CellId,
        category: Option<IncidentCategory>,
    ) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        let count = tables
            .incidents
            .iter()
            .filter(|i| &i.cell_id == cell_id)
            .filter(|i| category.is_none_or(|c| i.category == c))
            .count();
        Ok(count as u64)
    }

    async fn get_cell(&self, id: &CellId) -> Result<Option<Cell>, StoreError> {
        Ok(self.tables.read().await.cells.get(id).cloned())
    }

    async fn insert_cell_if_absent(&self, cell: Cell) -> Result<Cell, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.cells.entry(cell.id.clone()).or_insert(cell).clone())
    }

    async fn insert_cells(&self, cells: Vec<Cell>) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for cell in cells {
            if !tables.cells.contains_key(&cell.id) {
                tables.cells.insert(cell.id.clone(), cell);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_cells(&self) -> Result<Vec<Cell>, StoreError> {
        Ok(self.tables.read().await.cells.values().cloned().collect())
    }

    async fn delete_all_cells(&self) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.cells.len();
        tables.cells.clear();
        Ok(removed)
    }

    async fn set_cell_incident_count(&self, id: &CellId, count: u64) -> Result<(), StoreError> {
        self.tables.write().await.cell_mut(id)?.incident_count = count;
        Ok(())
    }

    async fn add_cell_priority(&self, id: &CellId, delta: f64) -> Result<f64, StoreError> {
        let mut tables = self.tables.write().await;
        let cell = tables.cell_mut(id)?;
        cell.patrol_priority_score += delta;
        Ok(cell.patrol_priority_score)
    }

    async fn reset_cell_counters(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for cell in tables.cells.values_mut() {
            cell.incident_count = 0;
            cell.patrol_priority_score = 0.0;
        }
        Ok(())
    }

    async fn insert_alert(&self, alert: Alert) -> Result<(), StoreError> {
        self.tables.write().await.alerts.push(alert);
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self.tables.read().await.alerts.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use chrono::{DateTime, Utc};
    use civic_dispatch_models::{GeoPoint, UnitCategory};

    fn unit(status: UnitStatus) -> Unit {
        Unit {
            id: UnitId::new_v4(),
            category: UnitCategory::Ambulance,
            position: GeoPoint::new(13.08, 80.27),
            status,
            current_cell_id: None,
        }
    }

    fn incident(cell: &str, category: IncidentCategory) -> Incident {
        Incident::new(
            category,
            GeoPoint::new(13.09, 80.28),
            CellId::new(cell),
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }

    #[tokio::test]
    async fn reserve_flips_unit_and_incident_together() {
        let store = MemoryStore::new();
        let u = unit(UnitStatus::Patrolling);
        let i = incident("c1", IncidentCategory::Medical);
        store.insert_unit(u.clone()).await.unwrap();
        store.insert_incident(i.clone()).await.unwrap();

        let Reservation::Reserved { unit, incident } =
            store.reserve_unit(u.id, i.id).await.unwrap()
        else {
            panic!("expected reservation");
        };
        assert_eq!(unit.status, UnitStatus::Busy);
        assert_eq!(unit.current_cell_id, Some(CellId::new("c1")));
        assert_eq!(incident.status, IncidentStatus::Assigned);
        assert_eq!(incident.assigned_unit_id, Some(u.id));

        let second = incident_with_new_id(&store).await;
        assert_eq!(
            store.reserve_unit(u.id, second).await.unwrap(),
            Reservation::UnitTaken
        );
        assert_eq!(
            store.reserve_unit(u.id, i.id).await.unwrap(),
            Reservation::IncidentTaken
        );
    }

    async fn incident_with_new_id(store: &MemoryStore) -> IncidentId {
        let i = incident("c2", IncidentCategory::Fire);
        let id = i.id;
        store.insert_incident(i).await.unwrap();
        id
    }

    #[tokio::test]
    async fn reserve_missing_records_is_not_found() {
        let store = MemoryStore::new();
        let i = incident("c1", IncidentCategory::Medical);
        store.insert_incident(i.clone()).await.unwrap();
        assert!(matches!(
            store.reserve_unit(UnitId::new_v4(), i.id).await,
            Err(StoreError::NotFound { entity: "unit", .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_claim_unit_once() {
        let store = Arc::new(MemoryStore::new());
        let u = unit(UnitStatus::Available);
        store.insert_unit(u.clone()).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..16 {
            ids.push(incident_with_new_id(&store).await);
        }

        let unit_id = u.id;
        let mut set = tokio::task::JoinSet::new();
        for id in ids {
            let store = store.clone();
            set.spawn(async move { store.reserve_unit(unit_id, id).await.unwrap() });
        }

        let mut reserved = 0;
        while let Some(result) = set.join_next().await {
            if matches!(result.unwrap(), Reservation::Reserved { .. }) {
                reserved += 1;
            }
        }
        assert_eq!(reserved, 1);
    }

    #[tokio::test]
    async fn removing_unit_returns_incidents_to_new() {
        let store = MemoryStore::new();
        let u = unit(UnitStatus::Available);
        let i = incident("c1", IncidentCategory::Medical);
        store.insert_unit(u.clone()).await.unwrap();
        store.insert_incident(i.clone()).await.unwrap();
        store.reserve_unit(u.id, i.id).await.unwrap();

        let detached = store.remove_unit(u.id).await.unwrap();
        assert_eq!(detached, vec![i.id]);
        assert!(store.get_unit(u.id).await.unwrap().is_none());

        let i = store.get_incident(i.id).await.unwrap().unwrap();
        assert_eq!(i.status, IncidentStatus::New);
        assert!(i.assigned_unit_id.is_none());

        assert!(matches!(
            store.remove_unit(u.id).await,
            Err(StoreError::NotFound { entity: "unit", .. })
        ));
    }

    #[tokio::test]
    async fn update_replaces_stored_records() {
        let store = MemoryStore::new();
        let mut u = unit(UnitStatus::Available);
        let mut i = incident("c1", IncidentCategory::Crime);
        store.insert_unit(u.clone()).await.unwrap();
        store.insert_incident(i.clone()).await.unwrap();

        u.status = UnitStatus::Patrolling;
        store.update_unit(u.clone()).await.unwrap();
        i.resolve();
        store.update_incident(i.clone()).await.unwrap();

        assert_eq!(store.get_unit(u.id).await.unwrap(), Some(u));
        assert_eq!(store.get_incident(i.id).await.unwrap(), Some(i));
        assert!(matches!(
            store.update_unit(unit(UnitStatus::Available)).await,
            Err(StoreError::NotFound { entity: "unit", .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn removal_racing_reservations_leaves_no_dangling_assignment() {
        for _ in 0..50 {
            let store = Arc::new(MemoryStore::new());
            let u = unit(UnitStatus::Available);
            let unit_id = u.id;
            store.insert_unit(u).await.unwrap();

            let mut ids = Vec::new();
            for _ in 0..4 {
                ids.push(incident_with_new_id(&store).await);
            }

            let mut set = tokio::task::JoinSet::new();
            for id in ids {
                let store = store.clone();
                set.spawn(async move {
                    // The unit may already be gone; that is an allowed outcome.
                    let _ = store.reserve_unit(unit_id, id).await;
                });
            }
            let remover = store.clone();
            set.spawn(async move {
                remover.remove_unit(unit_id).await.unwrap();
            });
            while let Some(result) = set.join_next().await {
                result.unwrap();
            }

            assert!(store.get_unit(unit_id).await.unwrap().is_none());
            for incident in store.list_incidents().await.unwrap() {
                assert!(incident.assigned_unit_id.is_none());
                assert_eq!(incident.status, IncidentStatus::New);
            }
        }
    }

    #[tokio::test]
    async fn counts_incidents_per_cell_and_category() {
        let store = MemoryStore::new();
        for category in [
            IncidentCategory::Accident,
            IncidentCategory::Accident,
            IncidentCategory::Fire,
        ] {
            store.insert_incident(incident("c1", category)).await.unwrap();
        }
        store
            .insert_incident(incident("c2", IncidentCategory::Accident))
            .await
            .unwrap();

        let c1 = CellId::new("c1");
        assert_eq!(store.count_incidents_in_cell(&c1, None).await.unwrap(), 3);
        assert_eq!(
            store
                .count_incidents_in_cell(&c1, Some(IncidentCategory::Accident))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn cells_are_inserted_once_and_reset() {
        let store = MemoryStore::new();
        let cell = Cell::new(CellId::new("c1"), GeoPoint::new(13.0, 80.0), vec![]);

        store.insert_cell_if_absent(cell.clone()).await.unwrap();
        store.add_cell_priority(&cell.id, 1.0).await.unwrap();
        let stored = store.insert_cell_if_absent(cell.clone()).await.unwrap();
        assert!((stored.patrol_priority_score - 1.0).abs() < f64::EPSILON);

        assert_eq!(store.insert_cells(vec![cell.clone()]).await.unwrap(), 0);

        store.set_cell_incident_count(&cell.id, 4).await.unwrap();
        store.reset_cell_counters().await.unwrap();
        let stored = store.get_cell(&cell.id).await.unwrap().unwrap();
        assert_eq!(stored.incident_count, 0);
        assert!(stored.patrol_priority_score.abs() < f64::EPSILON);

        assert!(matches!(
            store.set_cell_incident_count(&CellId::new("nope"), 1).await,
            Err(StoreError::NotFound { entity: "cell", .. })
        ));
    }
}
