//! Ray-triangle intersection.
//!
//! Möller–Trumbore with two edge policies: strict barycentric bounds, and a
//! robust variant that widens the bounds by a small epsilon so rays through
//! shared edges and vertices do not slip between neighbouring triangles.

use nebula_math::Point3;

use crate::Ray;

/// Barycentric slack used by the robust edge test.
const ROBUST_EPSILON: f32 = 1e-6;

/// Determinant magnitude below which a triangle counts as parallel or degenerate.
const PARALLEL_EPSILON: f32 = 1e-12;

/// A ray-triangle intersection: distance and barycentrics of the hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter of the hit.
    pub t: f32,
    /// Barycentric weight of the second vertex.
    pub u: f32,
    /// Barycentric weight of the third vertex.
    pub v: f32,
}

/// Intersect a ray with triangle `(a, b, c)` inside `[t_near, t_far]`.
///
/// Both faces count; there is no back-face culling.
#[inline]
pub fn intersect_triangle(
    ray: &Ray,
    a: &Point3,
    b: &Point3,
    c: &Point3,
    t_near: f32,
    t_far: f32,
    robust: bool,
) -> Option<TriangleHit> {
    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.direction.cross(&edge2);
    let det = edge1.dot(&p);
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let s = ray.origin - a;
    let u = s.dot(&p) * inv_det;
    let q = s.cross(&edge1);
    let v = ray.direction.dot(&q) * inv_det;

    // Positive comparisons so NaN coordinates reject.
    let eps = if robust { ROBUST_EPSILON } else { 0.0 };
    if !(u >= -eps && v >= -eps && u + v <= 1.0 + eps) {
        return None;
    }

    let t = edge2.dot(&q) * inv_det;
    if !(t >= t_near && t <= t_far) {
        return None;
    }

    Some(TriangleHit { t, u, v })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nebula_math::Vec3;

    fn tri() -> [Point3; 3] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_hit_front() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(0.1, 0.1, -1.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = intersect_triangle(&ray, &a, &b, &c, 0.0, f32::INFINITY, false).unwrap();
        assert_relative_eq!(hit.t, 1.0);
        assert_relative_eq!(hit.u, 0.1);
        assert_relative_eq!(hit.v, 0.1);
    }

    #[test]
    fn test_nan_ray_misses() {
        let [a, b, c] = tri();
        let nan_origin = Ray::new(Point3::new(f32::NAN, 0.1, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&nan_origin, &a, &b, &c, 0.0, f32::INFINITY, true).is_none());
        let nan_dir = Ray::new(Point3::new(0.1, 0.1, -1.0), Vec3::new(0.0, f32::NAN, 1.0));
        assert!(intersect_triangle(&nan_dir, &a, &b, &c, 0.0, f32::INFINITY, true).is_none());
    }

    #[test]
    fn test_hit_back_face() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(0.2, 0.2, 3.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = intersect_triangle(&ray, &a, &b, &c, 0.0, f32::INFINITY, false).unwrap();
        assert_relative_eq!(hit.t, 3.0);
    }

    #[test]
    fn test_miss_outside() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(0.8, 0.8, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, f32::INFINITY, true).is_none());
    }

    #[test]
    fn test_miss_pointing_away() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(0.1, 0.1, -1.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, f32::INFINITY, false).is_none());
    }

    #[test]
    fn test_interval_clips_hit() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(0.1, 0.1, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, 0.5, false).is_none());
        assert!(intersect_triangle(&ray, &a, &b, &c, 1.5, f32::INFINITY, false).is_none());
    }

    #[test]
    fn test_parallel_ray_misses() {
        let [a, b, c] = tri();
        let ray = Ray::new(Point3::new(-1.0, 0.1, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, f32::INFINITY, true).is_none());
    }

    #[test]
    fn test_degenerate_triangle_misses() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let ray = Ray::new(Point3::new(0.5, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&ray, &a, &b, &b, 0.0, f32::INFINITY, true).is_none());
    }

    #[test]
    fn test_robust_accepts_hypotenuse() {
        let [a, b, c] = tri();
        // Point just past the u + v = 1 edge.
        let ray = Ray::new(Point3::new(0.5, 0.5 + 1e-7, -1.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&ray, &a, &b, &c, 0.0, f32::INFINITY, true).is_some());
    }
}
