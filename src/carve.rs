use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::geom::{intersect_triangle, Ray};
use crate::mesh::{Triangle, Vertex};
use crate::quadtree::TriangleQuadtree;

/// Distance excluded at each end of a miss ray so geometry the ray's
/// own endpoints sit on is never deleted by the ray that sampled it.
const END_BUFFER: f64 = 0.05;

/// Prune triangles contradicted by any miss ray, in parallel over rays.
/// Multiple rays may race to delete the same triangle; only the first
/// to win the atomic swap is counted.
///
/// Returns the number of triangles newly marked deleted by this pass.
pub fn carve(points: &[Vertex], triangles: &[Triangle], quadtree: &TriangleQuadtree, rays: &[Ray]) -> usize {
    let deleted = AtomicUsize::new(0);

    rays.par_iter().for_each(|ray| {
        let length = ray.length();
        if length <= 2.0 * END_BUFFER {
            return;
        }
        let direction = ray.direction();
        let candidates = quadtree.query(&ray.aabb());

        for handle in candidates {
            let tri = &triangles[handle as usize];
            if tri.is_deleted() {
                continue;
            }

            let a = points[tri.vertices[0] as usize].position;
            let b = points[tri.vertices[1] as usize].position;
            let c = points[tri.vertices[2] as usize].position;

            let Some(t) = intersect_triangle(ray.start, direction, a, b, c) else {
                continue;
            };

            if t > END_BUFFER && t < length - END_BUFFER && tri.mark_deleted() {
                deleted.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    deleted.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Point, Vec3};

    fn flat_triangle(points: &[Vertex]) -> Triangle {
        Triangle::new(
            [0, 1, 2],
            [points[0].position, points[1].position, points[2].position],
        )
    }

    fn triangle_points() -> Vec<Vertex> {
        vec![
            Vertex::new(Point::new(0.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Point::new(10.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Point::new(5.0, 0.0, 10.0), Vec3::new(0.0, 1.0, 0.0)),
        ]
    }

    #[test]
    fn ray_through_interior_deletes_triangle() {
        let points = triangle_points();
        let triangles = vec![flat_triangle(&points)];
        let tree = TriangleQuadtree::build(&triangles);
        let rays = vec![Ray::new(Point::new(5.0, 1.0, 3.0), Point::new(5.0, -1.0, 3.0))];

        let deleted = carve(&points, &triangles, &tree, &rays);
        assert_eq!(deleted, 1);
        assert!(triangles[0].is_deleted());
    }

    #[test]
    fn ray_hugging_surface_does_not_delete() {
        let points = triangle_points();
        let triangles = vec![flat_triangle(&points)];
        let tree = TriangleQuadtree::build(&triangles);
        let rays = vec![Ray::new(Point::new(5.0, 0.0, 3.0), Point::new(5.0, 0.02, 3.0))];

        let deleted = carve(&points, &triangles, &tree, &rays);
        assert_eq!(deleted, 0);
        assert!(!triangles[0].is_deleted());
    }

    #[test]
    fn ray_missing_triangle_entirely_does_not_delete() {
        let points = triangle_points();
        let triangles = vec![flat_triangle(&points)];
        let tree = TriangleQuadtree::build(&triangles);
        let rays = vec![Ray::new(Point::new(-100.0, 1.0, -100.0), Point::new(-100.0, -1.0, -100.0))];

        let deleted = carve(&points, &triangles, &tree, &rays);
        assert_eq!(deleted, 0);
    }

    #[test]
    fn already_deleted_triangle_is_not_recounted() {
        let points = triangle_points();
        let triangles = vec![flat_triangle(&points)];
        triangles[0].mark_deleted();
        let tree = TriangleQuadtree::build(&triangles);
        let rays = vec![Ray::new(Point::new(5.0, 1.0, 3.0), Point::new(5.0, -1.0, 3.0))];

        let deleted = carve(&points, &triangles, &tree, &rays);
        assert_eq!(deleted, 0);
    }
}
