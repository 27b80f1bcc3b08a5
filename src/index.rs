use std::collections::HashMap;

use crate::geom::Point;
use crate::mesh::{Vertex, VertexHandle};

type CellKey = (i64, i64, i64);

/// Uniform-grid spatial index that enforces a minimum 3D spacing between
/// accepted points while streaming new candidates in.
///
/// Cell size is `4 * min_merge_distance`: any point within
/// `min_merge_distance` of a candidate lies in one of the candidate
/// cell's 27 neighbors (itself plus the 26 adjacent cells), so a 3x3x3
/// neighborhood search is exhaustive without needing to search further.
pub struct PointIndex {
    min_merge_distance: f64,
    min_merge_distance_sq: f64,
    cell_size: f64,
    points: Vec<Vertex>,
    cells: HashMap<CellKey, Vec<VertexHandle>>,
}

impl PointIndex {
    pub fn new(min_merge_distance: f64) -> Self {
        Self {
            min_merge_distance,
            min_merge_distance_sq: min_merge_distance * min_merge_distance,
            cell_size: 4.0 * min_merge_distance,
            points: Vec::new(),
            cells: HashMap::new(),
        }
    }

    pub fn min_merge_distance(&self) -> f64 {
        self.min_merge_distance
    }

    pub fn points(&self) -> &[Vertex] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn cell_key(&self, p: &Point) -> CellKey {
        (
            (p.x / self.cell_size).floor() as i64,
            (p.y / self.cell_size).floor() as i64,
            (p.z / self.cell_size).floor() as i64,
        )
    }

    /// Attempt to insert `candidate`. Rejects (first-seen-wins) if any
    /// existing point lies within `min_merge_distance` in 3D.
    pub fn try_add(&mut self, candidate: Vertex) -> bool {
        let (kx, ky, kz) = self.cell_key(&candidate.position);

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = (kx + dx, ky + dy, kz + dz);
                    if let Some(handles) = self.cells.get(&key) {
                        for &h in handles {
                            let existing = &self.points[h as usize];
                            let dist_sq = (existing.position - candidate.position).norm_squared();
                            if dist_sq < self.min_merge_distance_sq {
                                return false;
                            }
                        }
                    }
                }
            }
        }

        let handle = self.points.len() as VertexHandle;
        let key = self.cell_key(&candidate.position);
        self.points.push(candidate);
        self.cells.entry(key).or_default().push(handle);
        true
    }

    /// Sequentially `try_add` every candidate in `batch`. Returns the
    /// count accepted.
    pub fn add_range(&mut self, batch: impl IntoIterator<Item = Vertex>) -> usize {
        let mut accepted = 0;
        for candidate in batch {
            if self.try_add(candidate) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Bulk-insert a list that is already known to satisfy the spacing
    /// invariant (e.g. freshly loaded from a database), skipping distance
    /// checks.
    pub fn bulk_load(min_merge_distance: f64, points: Vec<Vertex>) -> Self {
        let mut index = Self::new(min_merge_distance);
        for v in points {
            let key = index.cell_key(&v.position);
            let handle = index.points.len() as VertexHandle;
            index.points.push(v);
            index.cells.entry(key).or_default().push(handle);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vec3;
    use proptest::prelude::*;

    fn vtx(x: f64, y: f64, z: f64) -> Vertex {
        Vertex::new(Point::new(x, y, z), Vec3::new(0.0, 1.0, 0.0))
    }

    /// Of three points where the middle one is within min_merge_distance
    /// of the first, only the first and third are accepted.
    #[test]
    fn rejects_point_within_min_merge_distance() {
        let mut idx = PointIndex::new(0.01);
        assert!(idx.try_add(vtx(0.0, 0.0, 0.0)));
        assert!(!idx.try_add(vtx(0.005, 0.0, 0.0)));
        assert!(idx.try_add(vtx(1.0, 0.0, 0.0)));
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn tie_break_first_seen_wins() {
        let mut idx = PointIndex::new(0.1);
        idx.try_add(vtx(0.0, 0.0, 0.0));
        idx.try_add(vtx(0.05, 0.0, 0.0));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.points()[0].position, Point::new(0.0, 0.0, 0.0));
    }

    proptest! {
        /// After any sequence of try_add calls, every pair of accepted
        /// points is at least min_merge_distance apart in 3D.
        #[test]
        fn spacing_invariant_holds(
            pts in proptest::collection::vec(
                (-10.0f64..10.0, -10.0f64..10.0, -10.0f64..10.0), 0..80)
        ) {
            let min_dist = 0.3;
            let mut idx = PointIndex::new(min_dist);
            for (x, y, z) in pts {
                idx.try_add(vtx(x, y, z));
            }
            let points = idx.points();
            for i in 0..points.len() {
                for j in (i + 1)..points.len() {
                    let d = (points[i].position - points[j].position).norm();
                    prop_assert!(d >= min_dist - 1e-9);
                }
            }
        }
    }

    /// Batches with all pairwise distances >= 2*min_merge_distance are
    /// fully accepted regardless of insertion order.
    #[test]
    fn order_independence_for_well_separated_batches() {
        let min_dist = 1.0;
        let batch = vec![
            vtx(0.0, 0.0, 0.0),
            vtx(3.0, 0.0, 0.0),
            vtx(0.0, 0.0, 3.0),
            vtx(3.0, 0.0, 3.0),
            vtx(6.0, 0.0, 0.0),
        ];

        let mut forward = PointIndex::new(min_dist);
        let accepted_forward = forward.add_range(batch.iter().map(|v| v.clone()));
        assert_eq!(accepted_forward, batch.len());

        let mut reversed_batch = batch.clone();
        reversed_batch.reverse();
        let mut backward = PointIndex::new(min_dist);
        let accepted_backward = backward.add_range(reversed_batch);
        assert_eq!(accepted_backward, batch.len());
    }
}
