//! Short human-readable labels for cells.
//!
//! Operators read "B-2" over the radio, not `872a10089ffffff`. Cells are
//! sorted by id and numbered `A..Z`, then `A-1..Z-1`, and so on.

use std::collections::BTreeMap;

use civic_dispatch_models::CellId;

const ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Label for the `index`-th cell in id order.
#[must_use]
pub fn label_for_index(index: usize) -> String {
    let letter = char::from(ALPHABET[index % ALPHABET.len()]);
    let group = index / ALPHABET.len();
    if group == 0 {
        letter.to_string()
    } else {
        format!("{letter}-{group}")
    }
}

/// Labels for a fixed set of cells.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    labels: BTreeMap<CellId, String>,
}

impl LabelMap {
    /// Builds labels for `cells`, numbering them in id order. Duplicates are
    /// ignored.
    #[must_use]
    pub fn new(cells: impl IntoIterator<Item = CellId>) -> Self {
        let mut ids: Vec<CellId> = cells.into_iter().collect();
        ids.sort();
        ids.dedup();

        let labels = ids
            .into_iter()
            .enumerate()
            .map(|(idx, id)| (id, label_for_index(idx)))
            .collect();

        Self { labels }
    }

    /// Label for `id`, or the first 8 characters of the id when the cell is
    /// not part of the map.
    #[must_use]
    pub fn label(&self, id: &CellId) -> String {
        self.labels.get(id).cloned().unwrap_or_else(|| {
            let raw = id.as_str();
            if raw.is_empty() {
                "?".to_string()
            } else {
                raw.chars().take(8).collect()
            }
        })
    }

    /// Number of labelled cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether no cell is labelled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_wrap_into_groups() {
        assert_eq!(label_for_index(0), "A");
        assert_eq!(label_for_index(25), "Z");
        assert_eq!(label_for_index(26), "A-1");
        assert_eq!(label_for_index(53), "B-2");
    }

    #[test]
    fn labels_follow_id_order() {
        let map = LabelMap::new(vec![
            CellId::new("872a1008bffffff"),
            CellId::new("872a10089ffffff"),
            CellId::new("872a10089ffffff"),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.label(&CellId::new("872a10089ffffff")), "A");
        assert_eq!(map.label(&CellId::new("872a1008bffffff")), "B");
        assert_eq!(map.label(&CellId::new("872a100d3ffffff")), "872a100d");
        assert_eq!(map.label(&CellId::new("")), "?");
    }
}
