//! Which unit categories may respond to which incident categories.

use std::collections::BTreeMap;

use civic_dispatch_models::{IncidentCategory, UnitCategory};

/// Total mapping from incident category to an ordered, non-empty list of
/// acceptable unit categories.
///
/// Starts from [`IncidentCategory::default_unit_categories`]; configured
/// overrides replace individual rows. A row left empty by configuration
/// accepts every unit category, so a dispatch is always attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMap {
    table: BTreeMap<IncidentCategory, Vec<UnitCategory>>,
}

impl Default for CapabilityMap {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl CapabilityMap {
    #[must_use]
    pub fn new(overrides: &BTreeMap<IncidentCategory, Vec<UnitCategory>>) -> Self {
        let table = IncidentCategory::all()
            .iter()
            .map(|&category| {
                let row = overrides.get(&category).map_or_else(
                    || category.default_unit_categories().to_vec(),
                    |row| dedup_in_order(row),
                );
                let row = if row.is_empty() {
                    log::warn!("No unit categories configured for {category}; accepting any");
                    UnitCategory::all().to_vec()
                } else {
                    row
                };
                (category, row)
            })
            .collect();

        Self { table }
    }

    /// Acceptable unit categories for `category`, in preference order.
    #[must_use]
    pub fn acceptable(&self, category: IncidentCategory) -> &[UnitCategory] {
        self.table
            .get(&category)
            .map_or(UnitCategory::all(), Vec::as_slice)
    }

    /// Whether a unit of `unit` may respond to an incident of `incident`.
    #[must_use]
    pub fn accepts(&self, incident: IncidentCategory, unit: UnitCategory) -> bool {
        self.acceptable(incident).contains(&unit)
    }
}

fn dedup_in_order(row: &[UnitCategory]) -> Vec<UnitCategory> {
    let mut out = Vec::with_capacity(row.len());
    for category in row {
        if !out.contains(category) {
            out.push(*category);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_incident_defaults() {
        let map = CapabilityMap::default();
        assert_eq!(
            map.acceptable(IncidentCategory::Fire),
            &[UnitCategory::Fire]
        );
        assert_eq!(
            map.acceptable(IncidentCategory::Accident),
            &[UnitCategory::Ambulance]
        );
        assert!(map.accepts(IncidentCategory::Crime, UnitCategory::Police));
        assert!(!map.accepts(IncidentCategory::Crime, UnitCategory::Fire));
    }

    #[test]
    fn every_category_resolves_to_something() {
        let mut overrides = BTreeMap::new();
        overrides.insert(IncidentCategory::Civic, vec![]);
        let map = CapabilityMap::new(&overrides);

        for category in IncidentCategory::all() {
            assert!(!map.acceptable(*category).is_empty());
        }
        assert_eq!(map.acceptable(IncidentCategory::Civic), UnitCategory::all());
    }

    #[test]
    fn overrides_replace_rows_without_duplicates() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            IncidentCategory::Medical,
            vec![
                UnitCategory::Ambulance,
                UnitCategory::Fire,
                UnitCategory::Ambulance,
            ],
        );
        let map = CapabilityMap::new(&overrides);
        assert_eq!(
            map.acceptable(IncidentCategory::Medical),
            &[UnitCategory::Ambulance, UnitCategory::Fire]
        );
        assert_eq!(
            map.acceptable(IncidentCategory::Fire),
            &[UnitCategory::Fire]
        );
    }
}
