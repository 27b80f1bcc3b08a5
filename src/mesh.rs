use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::geom::{Bounds, Point, Vec3};

/// Index into a `Vec<Vertex>`.
pub type VertexHandle = u32;

/// Index into a `Vec<Triangle>`. There is no sentinel reserved value;
/// absence of a neighbor is represented by `Option::None`.
pub type TriHandle = u32;

/// A sampled surface point with its raycast normal.
///
/// `id` is output-only, lazily assigned during OBJ/GLB export (zero means
/// "not yet assigned"); `Cell` lets the exporter stamp it without needing
/// `&mut` access to the rest of the point list. Vertices are otherwise
/// immutable once created.
#[derive(Debug)]
pub struct Vertex {
    pub position: Point,
    pub normal: Vec3,
    pub id: Cell<u32>,
}

impl Vertex {
    pub fn new(position: Point, normal: Vec3) -> Self {
        Self {
            position,
            normal,
            id: Cell::new(0),
        }
    }
}

impl Clone for Vertex {
    fn clone(&self) -> Self {
        Self {
            position: self.position,
            normal: self.normal,
            id: Cell::new(self.id.get()),
        }
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.normal == other.normal
    }
}

/// A triangle over three vertex handles, with precomputed centroid and
/// bounds, a carving flag, a triangulator scratch flag, and adjacency.
///
/// `neighbors[i]` is the triangle sharing the edge opposite vertex `i`:
/// `neighbors[0]` <-> edge BC, `neighbors[1]` <-> edge CA, `neighbors[2]`
/// <-> edge AB. `None` denotes a boundary edge.
#[derive(Debug)]
pub struct Triangle {
    pub vertices: [VertexHandle; 3],
    pub centroid: Point,
    pub bounds: Bounds,
    pub is_deleted: AtomicBool,
    pub is_bad: bool,
    pub neighbors: [Option<TriHandle>; 3],
}

impl Triangle {
    pub fn new(vertices: [VertexHandle; 3], positions: [Point; 3]) -> Self {
        let centroid = Point::new(
            (positions[0].x + positions[1].x + positions[2].x) / 3.0,
            (positions[0].y + positions[1].y + positions[2].y) / 3.0,
            (positions[0].z + positions[1].z + positions[2].z) / 3.0,
        );
        let bounds = Bounds::from_points(positions).unwrap();
        Self {
            vertices,
            centroid,
            bounds,
            is_deleted: AtomicBool::new(false),
            is_bad: false,
            neighbors: [None, None, None],
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted.load(Ordering::Acquire)
    }

    /// Mark the triangle deleted. Returns `true` if this call was the one
    /// that transitioned it (first-writer-wins under concurrent carving).
    pub fn mark_deleted(&self) -> bool {
        self.is_deleted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
