use std::collections::HashSet;

use rayon::prelude::*;

use crate::geom::Bounds;
use crate::mesh::{TriHandle, Triangle};

const MAX_DEPTH: u32 = 8;
const LEAF_TARGET: usize = 50;

enum Node {
    Internal(Box<[Node; 4]>),
    Leaf(Vec<TriHandle>),
}

/// 2D (XZ) quadtree over a flat triangle list, built bottom-up, carrying
/// the full Y range at every level. A triangle lands in every child whose
/// XZ bounds intersect its own, so stragglers are deliberately
/// duplicated — queries deduplicate via a `HashSet`.
pub struct TriangleQuadtree {
    root: Node,
    bounds: Bounds,
}

impl TriangleQuadtree {
    /// Build from every live triangle in `triangles`. Handles are indices
    /// into `triangles`.
    pub fn build(triangles: &[Triangle]) -> Self {
        let live: Vec<TriHandle> = (0..triangles.len() as TriHandle)
            .filter(|&h| !triangles[h as usize].is_deleted())
            .collect();

        let bounds = if live.is_empty() {
            Bounds::new(nalgebra::Point3::origin(), nalgebra::Point3::origin())
        } else {
            let mut b = triangles[live[0] as usize].bounds;
            for &h in &live[1..] {
                let tb = triangles[h as usize].bounds;
                b.encapsulate(tb.min);
                b.encapsulate(tb.max);
            }
            b
        };

        let root = build_node(triangles, live, bounds, 0);
        Self { root, bounds }
    }

    /// Every live triangle whose bounds intersect `query` (deduplicated).
    pub fn query(&self, query: &Bounds) -> Vec<TriHandle> {
        let mut out = HashSet::new();
        let mut stack = vec![&self.root];
        let mut node_bounds = vec![self.bounds];

        while let (Some(node), Some(bounds)) = (stack.pop(), node_bounds.pop()) {
            if !bounds.intersects_xz(query) {
                continue;
            }
            match node {
                Node::Leaf(handles) => {
                    out.extend(handles.iter().copied());
                }
                Node::Internal(children) => {
                    for (child, child_bounds) in children.iter().zip(quadrant_bounds(&bounds)) {
                        stack.push(child);
                        node_bounds.push(child_bounds);
                    }
                }
            }
        }

        out.into_iter().collect()
    }
}

fn quadrant_bounds(b: &Bounds) -> [Bounds; 4] {
    let mid = b.midpoint();
    // SW, SE, NW, NE in XZ (X = west/east, Z = south/north).
    [
        Bounds::new(b.min, nalgebra::Point3::new(mid.x, b.max.y, mid.z)), // SW
        Bounds::new(
            nalgebra::Point3::new(mid.x, b.min.y, b.min.z),
            nalgebra::Point3::new(b.max.x, b.max.y, mid.z),
        ), // SE
        Bounds::new(
            nalgebra::Point3::new(b.min.x, b.min.y, mid.z),
            nalgebra::Point3::new(mid.x, b.max.y, b.max.z),
        ), // NW
        Bounds::new(nalgebra::Point3::new(mid.x, b.min.y, mid.z), b.max), // NE
    ]
}

fn build_node(triangles: &[Triangle], handles: Vec<TriHandle>, bounds: Bounds, depth: u32) -> Node {
    if handles.len() <= LEAF_TARGET || depth >= MAX_DEPTH {
        return Node::Leaf(handles);
    }

    let quadrants = quadrant_bounds(&bounds);
    let buckets: [Vec<TriHandle>; 4] = {
        let mut buckets: [Vec<TriHandle>; 4] = Default::default();
        for &h in &handles {
            let tb = triangles[h as usize].bounds;
            for (i, qb) in quadrants.iter().enumerate() {
                if qb.intersects_xz(&tb) {
                    buckets[i].push(h);
                }
            }
        }
        buckets
    };

    let children = if depth < 3 {
        let mut iter = buckets.into_iter().zip(quadrants.into_iter());
        let tasks: Vec<(Vec<TriHandle>, Bounds)> = iter.by_ref().collect();
        let built: Vec<Node> = tasks
            .into_par_iter()
            .map(|(bucket, qb)| build_node(triangles, bucket, qb, depth + 1))
            .collect();
        let mut it = built.into_iter();
        [
            it.next().unwrap(),
            it.next().unwrap(),
            it.next().unwrap(),
            it.next().unwrap(),
        ]
    } else {
        let mut it = buckets.into_iter().zip(quadrants.into_iter());
        [
            {
                let (b, qb) = it.next().unwrap();
                build_node(triangles, b, qb, depth + 1)
            },
            {
                let (b, qb) = it.next().unwrap();
                build_node(triangles, b, qb, depth + 1)
            },
            {
                let (b, qb) = it.next().unwrap();
                build_node(triangles, b, qb, depth + 1)
            },
            {
                let (b, qb) = it.next().unwrap();
                build_node(triangles, b, qb, depth + 1)
            },
        ]
    };

    Node::Internal(Box::new(children))
}
