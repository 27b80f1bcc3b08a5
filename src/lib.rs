//! Terrain reconstruction from sparse raycast samples: an incremental
//! point index, a global Delaunay triangulator over the XZ plane, and a
//! space carver that prunes triangles contradicted by miss rays.

pub mod carve;
pub mod db;
pub mod error;
pub mod export;
pub mod geom;
pub mod index;
pub mod mesh;
pub mod quadtree;
pub mod records;
pub mod runner;
pub mod tailer;
pub mod triangulate;

pub use db::Database;
pub use error::{Result, TerramError};
pub use geom::{Bounds, Point, Ray, Vec3};
pub use index::PointIndex;
pub use mesh::{TriHandle, Triangle, Vertex, VertexHandle};
pub use quadtree::TriangleQuadtree;
pub use runner::{RunnerStats, run as run_streaming};

/// Rebuild the full mesh for a point set with no miss rays: triangulate,
/// then return the result directly (nothing to carve). Used by `update`
/// and as the first half of `run`.
pub fn build_mesh(points: &[Vertex]) -> Vec<Triangle> {
    triangulate::triangulate(points)
}

/// Full batch pipeline: triangulate `points`, then carve with `rays` if
/// any are present. Skips the quadtree build and carving pass entirely
/// when there are no miss rays to apply.
pub fn build_and_carve(points: &[Vertex], rays: &[Ray]) -> Vec<Triangle> {
    let triangles = triangulate::triangulate(points);
    if rays.is_empty() || triangles.is_empty() {
        return triangles;
    }
    let tree = TriangleQuadtree::build(&triangles);
    carve::carve(points, &triangles, &tree, rays);
    triangles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vec3;

    fn vtx(x: f64, z: f64) -> Vertex {
        Vertex::new(Point::new(x, 0.0, z), Vec3::new(0.0, 1.0, 0.0))
    }

    #[test]
    fn build_and_carve_without_rays_skips_carving() {
        let points = vec![vtx(0.0, 0.0), vtx(4.0, 0.0), vtx(2.0, 4.0), vtx(2.0, 1.0)];
        let triangles = build_and_carve(&points, &[]);
        assert!(!triangles.is_empty());
        assert!(triangles.iter().all(|t| !t.is_deleted()));
    }

    #[test]
    fn build_and_carve_removes_triangles_hit_by_a_miss_ray() {
        let points = vec![
            Vertex::new(Point::new(0.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Point::new(10.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Point::new(5.0, 0.0, 10.0), Vec3::new(0.0, 1.0, 0.0)),
        ];
        let rays = vec![Ray::new(Point::new(5.0, 1.0, 3.0), Point::new(5.0, -1.0, 3.0))];
        let triangles = build_and_carve(&points, &rays);
        assert!(triangles.iter().any(|t| t.is_deleted()));
    }
}
