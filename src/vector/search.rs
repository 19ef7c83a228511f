//! Vector Search Module
//!
//! Exact k-nearest-neighbor lookup by squared Euclidean distance.

use super::{squared_l2, VectorIndex};
use crate::models::FingerprintedEntry;

/// A search hit: index position, squared distance and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<'a> {
    pub position: usize,
    pub distance: f32,
    pub entry: &'a FingerprintedEntry,
}

impl VectorIndex {
    /// The `k` nearest entries to `query`, closest first
    ///
    /// Returns nothing when the index is empty or the query dimension does
    /// not match. Ties keep index order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor<'_>> {
        if k == 0 || self.dimension() != Some(query.len()) {
            return Vec::new();
        }

        let mut hits: Vec<(usize, f32)> = self
            .vectors()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);

        hits.into_iter()
            .filter_map(|(position, distance)| {
                self.entry(position).map(|entry| Neighbor {
                    position,
                    distance,
                    entry,
                })
            })
            .collect()
    }

    /// The single nearest entry to `query`
    pub fn nearest(&self, query: &[f32]) -> Option<Neighbor<'_>> {
        self.search(query, 1).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn index() -> VectorIndex {
        let root = Path::new("/d/Docs");
        VectorIndex::from_entries(vec![
            FingerprintedEntry::file(&root.join("a.txt"), root, "1".into(), vec![1.0, 0.0]),
            FingerprintedEntry::file(&root.join("b.txt"), root, "2".into(), vec![0.0, 1.0]),
            FingerprintedEntry::file(&root.join("c.txt"), root, "3".into(), vec![0.7, 0.7]),
        ])
        .unwrap()
    }

    #[test]
    fn test_nearest_by_squared_distance() {
        let index = index();
        let hit = index.nearest(&[0.1, 0.9]).unwrap();
        assert_eq!(hit.position, 1);
        assert_eq!(hit.entry.name(), "b.txt");
    }

    #[test]
    fn test_search_orders_closest_first() {
        let index = index();
        let hits = index.search(&[0.9, 0.2], 3);
        let names: Vec<_> = hits.iter().map(|h| h.entry.name()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt", "b.txt"]);
    }

    #[test]
    fn test_search_empty_or_wrong_dimension() {
        assert!(VectorIndex::new().nearest(&[1.0]).is_none());
        assert!(index().nearest(&[1.0, 0.0, 0.0]).is_none());
    }
}
