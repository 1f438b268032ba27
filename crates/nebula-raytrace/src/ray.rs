//! Ray representation and the per-query hit record.

use nebula_math::{Aabb3, Point3, Vec3};

/// Geometry or primitive id meaning "nothing was hit".
pub const INVALID_GEOMETRY_ID: u32 = u32::MAX;

/// A ray in 3D space defined by origin and direction.
///
/// The direction is not normalized: hit distances are expressed in units of
/// the direction's length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Direction of the ray.
    pub direction: Vec3,
    /// Precomputed reciprocal of direction components for fast AABB tests.
    inv_direction: Vec3,
    /// Sign of direction components (0 if positive, 1 if negative).
    sign: [usize; 3],
}

impl Ray {
    /// Create a new ray from origin and direction.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        let inv = Vec3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z);
        let sign = [
            if inv.x < 0.0 { 1 } else { 0 },
            if inv.y < 0.0 { 1 } else { 0 },
            if inv.z < 0.0 { 1 } else { 0 },
        ];
        Self {
            origin,
            direction,
            inv_direction: inv,
            sign,
        }
    }

    /// Create a ray from plain arrays.
    pub fn from_arrays(origin: [f32; 3], direction: [f32; 3]) -> Self {
        Self::new(
            Point3::new(origin[0], origin[1], origin[2]),
            Vec3::new(direction[0], direction[1], direction[2]),
        )
    }

    /// Evaluate the ray at parameter `t`: `origin + t * direction`.
    #[inline]
    pub fn at(&self, t: f32) -> Point3 {
        self.origin + self.direction * t
    }

    /// Test ray-AABB intersection using the slab method, clipped to `[t_near, t_far]`.
    ///
    /// Returns `Some((t_min, t_max))` if the ray overlaps the box inside the
    /// interval. A NaN slab (zero direction component with the origin exactly
    /// on a slab plane) is ignored by `f32::max`/`f32::min`, so grazing rays
    /// count as inside.
    #[inline]
    pub fn intersect_aabb(&self, aabb: &Aabb3, t_near: f32, t_far: f32) -> Option<(f32, f32)> {
        let bounds = [aabb.min, aabb.max];

        let tx1 = (bounds[self.sign[0]].x - self.origin.x) * self.inv_direction.x;
        let tx2 = (bounds[1 - self.sign[0]].x - self.origin.x) * self.inv_direction.x;

        let mut t_min = tx1.max(t_near);
        let mut t_max = tx2.min(t_far);

        let ty1 = (bounds[self.sign[1]].y - self.origin.y) * self.inv_direction.y;
        let ty2 = (bounds[1 - self.sign[1]].y - self.origin.y) * self.inv_direction.y;

        t_min = t_min.max(ty1);
        t_max = t_max.min(ty2);

        let tz1 = (bounds[self.sign[2]].z - self.origin.z) * self.inv_direction.z;
        let tz2 = (bounds[1 - self.sign[2]].z - self.origin.z) * self.inv_direction.z;

        t_min = t_min.max(tz1);
        t_max = t_max.min(tz2);

        if t_max >= t_min {
            Some((t_min, t_max))
        } else {
            None
        }
    }
}

/// A ray together with its query interval and hit slots.
///
/// Filled in place by the accelerator: on a hit `t_far` shrinks to the hit
/// distance and the ids and barycentrics are written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// The query ray.
    pub ray: Ray,
    /// Start of the query interval.
    pub t_near: f32,
    /// End of the query interval; the hit distance after a hit.
    pub t_far: f32,
    /// Geometry that was hit, or [`INVALID_GEOMETRY_ID`].
    pub geom_id: u32,
    /// Triangle within the geometry, or [`INVALID_GEOMETRY_ID`].
    pub prim_id: u32,
    /// First barycentric coordinate of the hit.
    pub u: f32,
    /// Second barycentric coordinate of the hit.
    pub v: f32,
}

impl RayHit {
    /// A fresh record over `[0, +inf)` with no hit.
    pub fn new(ray: Ray) -> Self {
        Self {
            ray,
            t_near: 0.0,
            t_far: f32::INFINITY,
            geom_id: INVALID_GEOMETRY_ID,
            prim_id: INVALID_GEOMETRY_ID,
            u: 0.0,
            v: 0.0,
        }
    }

    /// True if a geometry was hit.
    pub fn is_hit(&self) -> bool {
        self.geom_id != INVALID_GEOMETRY_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> Aabb3 {
        Aabb3::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        let p = ray.at(2.5);
        assert_relative_eq!(p.x, 5.0);
        assert_relative_eq!(p.y, 0.0);
    }

    #[test]
    fn test_ray_aabb_hit() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box(), 0.0, f32::INFINITY).unwrap();
        assert_relative_eq!(t_min, 5.0);
        assert_relative_eq!(t_max, 6.0);
    }

    #[test]
    fn test_ray_aabb_miss() {
        let ray = Ray::new(Point3::new(-5.0, 5.0, 5.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box(), 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn test_ray_aabb_behind() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(-1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box(), 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn test_ray_aabb_clipped_by_far() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box(), 0.0, 4.0).is_none());
    }

    #[test]
    fn test_ray_inside_aabb() {
        let ray = Ray::new(Point3::new(0.5, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box(), 0.0, f32::INFINITY).unwrap();
        assert_eq!(t_min, 0.0);
        assert_relative_eq!(t_max, 0.5);
    }

    #[test]
    fn test_fresh_record_misses() {
        let hit = RayHit::new(Ray::from_arrays([0.0; 3], [0.0, 0.0, 1.0]));
        assert!(!hit.is_hit());
        assert_eq!(hit.t_far, f32::INFINITY);
        assert_eq!(hit.prim_id, INVALID_GEOMETRY_ID);
    }
}
