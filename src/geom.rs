use nalgebra::{Point3, Vector3};

/// 3D point type alias
pub type Point = Point3<f64>;

/// 3D vector type alias
pub type Vec3 = Vector3<f64>;

/// Normalize, returning the zero vector when the input is too small to
/// normalize stably.
pub fn safe_normalize(v: Vec3) -> Vec3 {
    let len = v.norm();
    if len < 1e-9 {
        Vec3::zeros()
    } else {
        v / len
    }
}

/// Axis-aligned bounding box. Y range is carried through even where a
/// consumer (the quadtree) only partitions on X/Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first, first);
        for p in iter {
            bounds.encapsulate(p);
        }
        Some(bounds)
    }

    pub fn midpoint(&self) -> Point {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// XZ-only overlap test, used by the quadtree where Y is pass-through.
    pub fn intersects_xz(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn encapsulate(&mut self, p: Point) {
        self.min = Point::new(
            self.min.x.min(p.x),
            self.min.y.min(p.y),
            self.min.z.min(p.z),
        );
        self.max = Point::new(
            self.max.x.max(p.x),
            self.max.y.max(p.y),
            self.max.z.max(p.z),
        );
    }

    pub fn expanded(&self, epsilon: f64) -> Bounds {
        let e = Vec3::new(epsilon, epsilon, epsilon);
        Bounds::new(self.min - e, self.max + e)
    }
}

/// A ray segment between two points, as sampled by a MISS record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub start: Point,
    pub end: Point,
}

impl Ray {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn direction(&self) -> Vec3 {
        safe_normalize(self.end - self.start)
    }

    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    pub fn aabb(&self) -> Bounds {
        let mut b = Bounds::new(self.start, self.start);
        b.encapsulate(self.end);
        b
    }
}

/// Möller–Trumbore ray-triangle intersection. Returns the ray parameter
/// `t` at which the ray crosses the triangle's plane, or `None` if the
/// ray misses the triangle or is (near-)parallel to its plane.
pub fn intersect_triangle(
    origin: Point,
    direction: Vec3,
    a: Point,
    b: Point,
    c: Point,
) -> Option<f64> {
    let e1 = b - a;
    let e2 = c - a;
    let h = direction.cross(&e2);
    let det = e1.dot(&h);

    if det.abs() < 1e-7 {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = inv_det * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&e1);
    let v = inv_det * direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    Some(inv_det * e2.dot(&q))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_normalize_zero() {
        assert_eq!(safe_normalize(Vec3::new(0.0, 0.0, 0.0)), Vec3::zeros());
        assert_eq!(safe_normalize(Vec3::new(1e-10, 0.0, 0.0)), Vec3::zeros());
    }

    #[test]
    fn safe_normalize_unit() {
        let n = safe_normalize(Vec3::new(3.0, 0.0, 4.0));
        assert!((n.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bounds_intersects_xz_ignores_y() {
        let a = Bounds::new(Point::new(0.0, 100.0, 0.0), Point::new(1.0, 200.0, 1.0));
        let b = Bounds::new(Point::new(0.5, -50.0, 0.5), Point::new(2.0, -40.0, 2.0));
        assert!(a.intersects_xz(&b));
        assert!(!a.intersects(&b));
    }

    #[test]
    fn ray_direction_and_length() {
        let r = Ray::new(Point::new(0.0, 0.0, 0.0), Point::new(3.0, 0.0, 4.0));
        assert!((r.length() - 5.0).abs() < 1e-12);
        assert!((r.direction().norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn moller_trumbore_center_hit() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(10.0, 0.0, 0.0);
        let c = Point::new(5.0, 0.0, 10.0);
        let origin = Point::new(5.0, 1.0, 3.0);
        let dir = Vec3::new(0.0, -1.0, 0.0);
        let t = intersect_triangle(origin, dir, a, b, c).expect("should hit");
        assert!((t - 1.0).abs() < 1e-9);
    }

    #[test]
    fn moller_trumbore_parallel_miss() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(10.0, 0.0, 0.0);
        let c = Point::new(5.0, 0.0, 10.0);
        let origin = Point::new(5.0, 1.0, 3.0);
        let dir = Vec3::new(1.0, 0.0, 0.0);
        assert!(intersect_triangle(origin, dir, a, b, c).is_none());
    }

    #[test]
    fn moller_trumbore_outside_triangle_misses() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(10.0, 0.0, 0.0);
        let c = Point::new(5.0, 0.0, 10.0);
        let origin = Point::new(-5.0, 1.0, -5.0);
        let dir = Vec3::new(0.0, -1.0, 0.0);
        assert!(intersect_triangle(origin, dir, a, b, c).is_none());
    }
}
