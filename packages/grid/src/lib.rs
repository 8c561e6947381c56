#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fixed-resolution spatial grid for incident and corridor cells.
//!
//! Wraps the H3 hexagonal grid at a single configured resolution. Every
//! coordinate maps to exactly one cell id, and the same coordinate always
//! maps to the same id for as long as the resolution is unchanged, which
//! is what lets incident counters and corridor cells be compared across
//! restarts.
//!
//! Geometry (boundary rings, centroids) is a pure function of the cell id
//! and is exposed as free functions so callers don't need a [`GridIndex`]
//! to draw a cell.

pub mod labels;

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::str::FromStr;

use civic_dispatch_models::{BoundingBox, Cell, CellId, GeoPoint};
use geo::{Intersects, LineString, Polygon};
use h3o::{CellIndex, LatLng, Resolution};

/// Errors that can occur during grid operations.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Resolution outside the H3 range.
    #[error("Invalid grid resolution {resolution}: expected 0-15")]
    InvalidResolution {
        /// The rejected resolution.
        resolution: u8,
    },

    /// Latitude/longitude not finite or out of range.
    #[error("Invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lng: f64,
    },

    /// A cell id that is not a valid H3 cell index.
    #[error("Malformed cell id: {id}")]
    MalformedCellId {
        /// The offending id.
        id: String,
    },

    /// A region polygon with an empty exterior ring.
    #[error("Region polygon has no vertices")]
    EmptyRegion,
}

/// What has to happen to a persisted cell table to match the configured
/// grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveragePlan {
    /// The existing cells were produced at another resolution (or are not
    /// cells at all) and must be wiped before inserting.
    pub rebuild: bool,
    /// Cells to insert after the optional wipe.
    pub to_insert: BTreeSet<CellId>,
}

/// Maps coordinates to cells at one fixed resolution.
#[derive(Debug, Clone, Copy)]
pub struct GridIndex {
    resolution: Resolution,
}

impl GridIndex {
    /// Creates an index at the given H3 resolution.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidResolution`] if `resolution` is above 15.
    pub fn new(resolution: u8) -> Result<Self, GridError> {
        let resolution = Resolution::try_from(resolution)
            .map_err(|_| GridError::InvalidResolution { resolution })?;
        Ok(Self { resolution })
    }

    /// The configured resolution.
    #[must_use]
    pub fn resolution(&self) -> u8 {
        u8::from(self.resolution)
    }

    /// Resolves the cell containing a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidCoordinate`] for non-finite or
    /// out-of-range input.
    pub fn cell_for(&self, lat: f64, lng: f64) -> Result<CellId, GridError> {
        Ok(to_cell_id(self.cell_index(lat, lng)?))
    }

    /// Resolves the cell containing `point`.
    ///
    /// # Errors
    ///
    /// See [`GridIndex::cell_for`].
    pub fn cell_for_point(&self, point: GeoPoint) -> Result<CellId, GridError> {
        self.cell_for(point.lat, point.lng)
    }

    fn cell_index(&self, lat: f64, lng: f64) -> Result<CellIndex, GridError> {
        Ok(to_latlng(lat, lng)?.to_cell(self.resolution))
    }

    /// Every cell needed to cover `region` without gaps.
    ///
    /// Includes every cell whose centroid lies inside the polygon, plus the
    /// edge cells whose centroid falls just outside but whose area still
    /// overlaps it, so that any point inside the region resolves (through
    /// [`GridIndex::cell_for`]) to a cell in the returned set. The walk
    /// starts from the cells of the exterior vertices and floods outward
    /// through neighbours for as long as they overlap the region.
    ///
    /// Re-running against the same region returns the same set.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::EmptyRegion`] for a polygon with no vertices and
    /// [`GridError::InvalidCoordinate`] if any vertex is not a valid
    /// coordinate.
    pub fn cells_covering_region(
        &self,
        region: &Polygon<f64>,
    ) -> Result<BTreeSet<CellId>, GridError> {
        let mut seen: HashSet<CellIndex> = HashSet::new();
        let mut queue: VecDeque<CellIndex> = VecDeque::new();

        for coord in region.exterior().coords() {
            let cell = self.cell_index(coord.y, coord.x)?;
            if seen.insert(cell) {
                queue.push_back(cell);
            }
        }

        if queue.is_empty() {
            return Err(GridError::EmptyRegion);
        }

        let mut covered = BTreeSet::new();

        while let Some(cell) = queue.pop_front() {
            if !cell_polygon(cell).intersects(region) {
                continue;
            }
            covered.insert(to_cell_id(cell));

            for neighbor in cell.grid_disk_safe(1) {
                if seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        log::debug!(
            "Region covered by {} cells at resolution {}",
            covered.len(),
            self.resolution()
        );

        Ok(covered)
    }

    /// Every cell needed to cover a bounding box.
    ///
    /// # Errors
    ///
    /// See [`GridIndex::cells_covering_region`].
    pub fn cells_covering_bbox(&self, bbox: &BoundingBox) -> Result<BTreeSet<CellId>, GridError> {
        self.cells_covering_region(&bbox_polygon(bbox))
    }

    /// Compares a persisted cell table against the target coverage.
    ///
    /// Resolutions are never mixed within one grid: if any existing id was
    /// produced at a different resolution (or doesn't parse at all) the
    /// whole existing set is stale and the plan asks for a full rebuild.
    #[must_use]
    pub fn ensure_coverage<'a>(
        &self,
        existing: impl IntoIterator<Item = &'a CellId>,
        target: &BTreeSet<CellId>,
    ) -> CoveragePlan {
        let mut present = BTreeSet::new();

        let expected = self.resolution();
        for id in existing {
            match resolution_of(id) {
                Ok(resolution) if resolution == expected => {
                    present.insert(id.clone());
                }
                Ok(_) | Err(_) => {
                    log::warn!(
                        "Cell {id} does not match resolution {expected}; rebuilding grid"
                    );
                    return CoveragePlan {
                        rebuild: true,
                        to_insert: target.clone(),
                    };
                }
            }
        }

        CoveragePlan {
            rebuild: false,
            to_insert: target.difference(&present).cloned().collect(),
        }
    }
}

/// Boundary ring of a cell, in order, not closed.
///
/// # Errors
///
/// Returns [`GridError::MalformedCellId`] if `id` is not an H3 cell.
pub fn boundary_of(id: &CellId) -> Result<Vec<GeoPoint>, GridError> {
    let cell = parse_cell(id)?;
    Ok(cell
        .boundary()
        .iter()
        .map(|ll| GeoPoint::new(ll.lat(), ll.lng()))
        .collect())
}

/// Centroid of a cell.
///
/// # Errors
///
/// Returns [`GridError::MalformedCellId`] if `id` is not an H3 cell.
pub fn centroid_of(id: &CellId) -> Result<GeoPoint, GridError> {
    let center = LatLng::from(parse_cell(id)?);
    Ok(GeoPoint::new(center.lat(), center.lng()))
}

/// A fresh cell record (zeroed counters) with its geometry filled in.
///
/// # Errors
///
/// Returns [`GridError::MalformedCellId`] if `id` is not an H3 cell.
pub fn cell_record(id: &CellId) -> Result<Cell, GridError> {
    Ok(Cell::new(id.clone(), centroid_of(id)?, boundary_of(id)?))
}

/// Resolution a cell id was produced at.
///
/// # Errors
///
/// Returns [`GridError::MalformedCellId`] if `id` is not an H3 cell.
pub fn resolution_of(id: &CellId) -> Result<u8, GridError> {
    Ok(u8::from(parse_cell(id)?.resolution()))
}

/// Great-circle distance between two points in kilometres.
///
/// # Errors
///
/// Returns [`GridError::InvalidCoordinate`] if either point is invalid.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> Result<f64, GridError> {
    Ok(to_latlng(a.lat, a.lng)?.distance_km(to_latlng(b.lat, b.lng)?))
}

/// The closed polygon of a bounding box, in (lng, lat) order.
#[must_use]
pub fn bbox_polygon(bbox: &BoundingBox) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = bbox.ring().iter().map(|p| (p.lng, p.lat)).collect();
    Polygon::new(LineString::from(ring), vec![])
}

fn cell_polygon(cell: CellIndex) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = cell.boundary().iter().map(|ll| (ll.lng(), ll.lat())).collect();
    Polygon::new(LineString::from(ring), vec![])
}

fn parse_cell(id: &CellId) -> Result<CellIndex, GridError> {
    CellIndex::from_str(id.as_str()).map_err(|_| GridError::MalformedCellId {
        id: id.to_string(),
    })
}

fn to_cell_id(cell: CellIndex) -> CellId {
    CellId::new(cell.to_string())
}

fn to_latlng(lat: f64, lng: f64) -> Result<LatLng, GridError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(GridError::InvalidCoordinate { lat, lng });
    }
    LatLng::new(lat, lng).map_err(|_| GridError::InvalidCoordinate { lat, lng })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Contains, Point};

    const CHENNAI: BoundingBox = BoundingBox::new(79.95, 12.80, 80.35, 13.30);

    fn grid() -> GridIndex {
        GridIndex::new(7).unwrap()
    }

    #[test]
    fn cell_ids_are_stable() {
        let grid = grid();
        let first = grid.cell_for(13.0827, 80.2707).unwrap();
        let second = grid.cell_for(13.0827, 80.2707).unwrap();
        assert_eq!(first, second);

        // A separately constructed index at the same resolution agrees.
        let other = GridIndex::new(7).unwrap();
        assert_eq!(other.cell_for(13.0827, 80.2707).unwrap(), first);
        assert_eq!(resolution_of(&first).unwrap(), 7);
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            GridIndex::new(16),
            Err(GridError::InvalidResolution { resolution: 16 })
        ));
        assert!(matches!(
            grid().cell_for(f64::NAN, 80.0),
            Err(GridError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            grid().cell_for(95.0, 80.0),
            Err(GridError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            centroid_of(&CellId::new("not-a-cell")),
            Err(GridError::MalformedCellId { .. })
        ));
    }

    #[test]
    fn coverage_has_no_gaps() {
        let grid = grid();
        let cells = grid.cells_covering_bbox(&CHENNAI).unwrap();
        assert!(!cells.is_empty());

        let steps = 40_u32;
        for i in 0..=steps {
            for j in 0..=steps {
                let lat = CHENNAI.south
                    + (CHENNAI.north - CHENNAI.south) * f64::from(i) / f64::from(steps);
                let lng =
                    CHENNAI.west + (CHENNAI.east - CHENNAI.west) * f64::from(j) / f64::from(steps);
                let cell = grid.cell_for(lat, lng).unwrap();
                assert!(
                    cells.contains(&cell),
                    "point ({lat}, {lng}) maps to {cell}, which is not in the coverage"
                );
            }
        }
    }

    #[test]
    fn coverage_includes_every_centroid_inside_region() {
        let grid = grid();
        let region = bbox_polygon(&CHENNAI);
        let cells = grid.cells_covering_region(&region).unwrap();

        let mut centroid_inside = 0;
        for id in &cells {
            let center = centroid_of(id).unwrap();
            if region.contains(&Point::new(center.lng, center.lat)) {
                centroid_inside += 1;
            }
        }
        assert!(centroid_inside > 0);

        // Every cell whose centroid is in the box must be present: sample the
        // cells of a dense lattice and check their centroids.
        for i in 0..=20_u32 {
            for j in 0..=20_u32 {
                let lat = 12.81 + 0.48 * f64::from(i) / 20.0;
                let lng = 79.96 + 0.38 * f64::from(j) / 20.0;
                let id = grid.cell_for(lat, lng).unwrap();
                let center = centroid_of(&id).unwrap();
                if CHENNAI.contains(center) {
                    assert!(cells.contains(&id));
                }
            }
        }
    }

    #[test]
    fn coverage_is_idempotent() {
        let grid = grid();
        let first = grid.cells_covering_bbox(&CHENNAI).unwrap();
        let second = grid.cells_covering_bbox(&CHENNAI).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn boundary_surrounds_centroid() {
        let id = grid().cell_for(13.09, 80.28).unwrap();
        let boundary = boundary_of(&id).unwrap();
        assert!(boundary.len() >= 6);

        let ring: Vec<(f64, f64)> = boundary.iter().map(|p| (p.lng, p.lat)).collect();
        let polygon = Polygon::new(LineString::from(ring), vec![]);
        let center = centroid_of(&id).unwrap();
        assert!(polygon.contains(&Point::new(center.lng, center.lat)));
    }

    #[test]
    fn cell_record_starts_with_zeroed_counters() {
        let id = grid().cell_for(13.09, 80.28).unwrap();
        let cell = cell_record(&id).unwrap();
        assert_eq!(cell.id, id);
        assert_eq!(cell.incident_count, 0);
        assert_eq!(cell.boundary, boundary_of(&id).unwrap());
        assert!(cell_record(&CellId::new("zz")).is_err());
    }

    #[test]
    fn ensure_coverage_inserts_only_missing_cells() {
        let grid = grid();
        let target = grid.cells_covering_bbox(&CHENNAI).unwrap();
        let existing: Vec<CellId> = target.iter().take(10).cloned().collect();

        let plan = grid.ensure_coverage(&existing, &target);
        assert!(!plan.rebuild);
        assert_eq!(plan.to_insert.len(), target.len() - 10);
        for id in &existing {
            assert!(!plan.to_insert.contains(id));
        }

        let complete = grid.ensure_coverage(&target, &target);
        assert!(complete.to_insert.is_empty());
    }

    #[test]
    fn ensure_coverage_rebuilds_on_stale_resolution() {
        let grid = grid();
        let target = grid.cells_covering_bbox(&CHENNAI).unwrap();
        let mut existing: Vec<CellId> = target.iter().take(5).cloned().collect();
        existing.push(GridIndex::new(8).unwrap().cell_for(13.0, 80.2).unwrap());

        let plan = grid.ensure_coverage(&existing, &target);
        assert!(plan.rebuild);
        assert_eq!(plan.to_insert, target);
    }

    #[test]
    fn distance_matches_known_separation() {
        let a = GeoPoint::new(13.0827, 80.2707);
        let b = GeoPoint::new(13.09, 80.28);
        let km = distance_km(a, b).unwrap();
        assert!((1.0..1.5).contains(&km), "unexpected distance {km}");
        assert!(distance_km(a, a).unwrap().abs() < 1e-9);
    }
}
