//! Closest-hit ray queries, single and batched.
//!
//! Batches are cut greedily into the widest packets the accelerator answers
//! natively (16, 8, 4, then single rays), so any remainder of 0 to 15 rays
//! needs no partial-lane handling.

use serde::Serialize;

use nebula_raytrace::{
    lane_mask, Accelerator, AcceleratorScene, Ray, RayHit, RayHitPacket, INVALID_GEOMETRY_ID,
    PACKET_WIDTHS,
};

use crate::error::Result;
use crate::registry::{SceneHandle, SceneRegistry};

/// Outcome of one ray query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HitResult {
    /// True if the ray hit any geometry.
    pub hit: bool,
    /// Id of the geometry hit, or [`INVALID_GEOMETRY_ID`].
    pub geom_id: u32,
    /// Triangle index within the geometry, or [`INVALID_GEOMETRY_ID`].
    pub prim_id: u32,
    /// Ray parameter of the hit; `+inf` on a miss.
    pub distance: f32,
}

impl HitResult {
    /// A miss.
    pub fn miss() -> Self {
        Self {
            hit: false,
            geom_id: INVALID_GEOMETRY_ID,
            prim_id: INVALID_GEOMETRY_ID,
            distance: f32::INFINITY,
        }
    }
}

impl Default for HitResult {
    fn default() -> Self {
        Self::miss()
    }
}

impl From<&RayHit> for HitResult {
    fn from(rayhit: &RayHit) -> Self {
        if rayhit.is_hit() {
            Self {
                hit: true,
                geom_id: rayhit.geom_id,
                prim_id: rayhit.prim_id,
                distance: rayhit.t_far,
            }
        } else {
            Self::miss()
        }
    }
}

/// Packet widths for a batch of `count` rays, in dispatch order.
///
/// Each step takes the widest entry of [`PACKET_WIDTHS`] that still fits in
/// the remaining count. The widths sum to `count`.
#[derive(Debug, Clone)]
pub struct PacketPlan {
    remaining: usize,
}

impl PacketPlan {
    /// Plan a batch of `count` rays.
    pub fn new(count: usize) -> Self {
        Self { remaining: count }
    }
}

impl Iterator for PacketPlan {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let width = PACKET_WIDTHS
            .iter()
            .copied()
            .find(|&w| w <= self.remaining)?;
        self.remaining -= width;
        Some(width)
    }
}

fn trace_one<S: AcceleratorScene>(scene: &S, ray: Ray) -> HitResult {
    let mut rayhit = RayHit::new(ray);
    scene.intersect1(&mut rayhit);
    HitResult::from(&rayhit)
}

/// Trace exactly `W` rays as one packet with every lane valid.
fn trace_packet<S: AcceleratorScene, const W: usize>(
    scene: &S,
    rays: &[Ray],
    out: &mut Vec<HitResult>,
) {
    debug_assert_eq!(rays.len(), W);
    let mut packet = RayHitPacket::<W>::from_rays(rays);
    scene.intersect_packet(&lane_mask::<W>(rays.len()), &mut packet);
    out.extend(packet.lanes.iter().map(HitResult::from));
}

fn trace_batch<S: AcceleratorScene>(scene: &S, rays: &[Ray]) -> Vec<HitResult> {
    let mut results = Vec::with_capacity(rays.len());
    let mut offset = 0;
    for width in PacketPlan::new(rays.len()) {
        let chunk = &rays[offset..offset + width];
        match width {
            16 => trace_packet::<S, 16>(scene, chunk, &mut results),
            8 => trace_packet::<S, 8>(scene, chunk, &mut results),
            4 => trace_packet::<S, 4>(scene, chunk, &mut results),
            _ => results.extend(chunk.iter().map(|&ray| trace_one(scene, ray))),
        }
        offset += width;
    }
    results
}

impl<A: Accelerator> SceneRegistry<A> {
    /// Closest hit of one ray over `[0, +inf)`.
    pub fn trace_ray(&self, handle: SceneHandle, ray: Ray) -> Result<HitResult> {
        self.with_instance(handle, |instance| trace_one(instance.scene(), ray))
    }

    /// Closest hits of a batch of rays, in input order.
    ///
    /// The whole batch runs under one acquisition of the registry lock.
    pub fn trace_rays(&self, handle: SceneHandle, rays: &[Ray]) -> Result<Vec<HitResult>> {
        self.with_instance(handle, |instance| trace_batch(instance.scene(), rays))
    }

    /// Like [`trace_rays`](Self::trace_rays), delivering each result to `f`
    /// with its input index.
    ///
    /// `f` is called in index order after the registry lock is released, so
    /// it may call back into the registry.
    pub fn trace_rays_with(
        &self,
        handle: SceneHandle,
        rays: &[Ray],
        mut f: impl FnMut(usize, HitResult),
    ) -> Result<()> {
        let results = self.trace_rays(handle, rays)?;
        for (index, result) in results.into_iter().enumerate() {
            f(index, result);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SceneError;
    use approx::assert_relative_eq;
    use nebula_ir::{GeometryDocument, Mesh, MeshPart};
    use nebula_raytrace::{AccelError, DeviceConfig, SceneFlags, TriangleGeometry};
    use parking_lot::Mutex;

    const BATCH_SIZES: [usize; 8] = [0, 1, 3, 4, 7, 16, 17, 33];

    fn unit_triangle_doc() -> GeometryDocument {
        GeometryDocument::single_part(
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0, 1, 2],
        )
    }

    /// Two triangles: geometry 0 at z = 0 near the origin, geometry 1 at
    /// z = 2 shifted by ten along x.
    fn two_triangle_doc() -> GeometryDocument {
        GeometryDocument {
            geometry: vec![Mesh {
                mesh_parts: vec![
                    MeshPart::new(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], vec![0, 1, 2]),
                    MeshPart::new(
                        vec![10.0, 0.0, 2.0, 11.0, 0.0, 2.0, 10.0, 1.0, 2.0],
                        vec![0, 1, 2],
                    ),
                ],
            }],
        }
    }

    fn loaded(doc: &GeometryDocument) -> (SceneRegistry, SceneHandle) {
        let registry: SceneRegistry = SceneRegistry::default();
        let handle = registry.create().unwrap();
        registry.load_geometry(handle, doc).unwrap();
        (registry, handle)
    }

    /// Ray `i` of a batch: even rays hit geometry 0, odd rays miss to the side.
    fn batch_ray(i: usize) -> Ray {
        let offset = (i % 5) as f32 * 0.05;
        if i % 2 == 0 {
            Ray::from_arrays([0.1 + offset, 0.1, -1.0], [0.0, 0.0, 1.0])
        } else {
            Ray::from_arrays([5.0 + offset, 5.0, -1.0], [0.0, 0.0, 1.0])
        }
    }

    #[test]
    fn test_packet_plan_widths() {
        let plan = |n| PacketPlan::new(n).collect::<Vec<_>>();
        assert!(plan(0).is_empty());
        assert_eq!(plan(1), vec![1]);
        assert_eq!(plan(3), vec![1, 1, 1]);
        assert_eq!(plan(4), vec![4]);
        assert_eq!(plan(7), vec![4, 1, 1, 1]);
        assert_eq!(plan(16), vec![16]);
        assert_eq!(plan(17), vec![16, 1]);
        assert_eq!(plan(33), vec![16, 16, 1]);
        assert_eq!(plan(31), vec![16, 8, 4, 1, 1, 1]);
    }

    #[test]
    fn test_packet_plan_sums_to_count() {
        for n in 0..100 {
            let widths: Vec<usize> = PacketPlan::new(n).collect();
            assert_eq!(widths.iter().sum::<usize>(), n);
            assert!(widths.iter().all(|w| PACKET_WIDTHS.contains(w)));
            assert!(widths.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn test_nan_rays_miss() {
        let (registry, handle) = loaded(&unit_triangle_doc());
        let nan_ray = Ray::from_arrays([f32::NAN, 0.1, -1.0], [0.0, 0.0, 1.0]);

        assert_eq!(registry.trace_ray(handle, nan_ray).unwrap(), HitResult::miss());
        let results = registry.trace_rays(handle, &[nan_ray; 5]).unwrap();
        assert_eq!(results, vec![HitResult::miss(); 5]);
    }

    #[test]
    fn test_single_triangle_round_trip() {
        let (registry, handle) = loaded(&unit_triangle_doc());

        let hit = registry
            .trace_ray(handle, Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 1.0]))
            .unwrap();
        assert!(hit.hit);
        assert_eq!(hit.geom_id, 0);
        assert_eq!(hit.prim_id, 0);
        assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-5);

        let away = registry
            .trace_ray(handle, Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, -1.0]))
            .unwrap();
        assert!(!away.hit);
        assert_eq!(away, HitResult::miss());
    }

    #[test]
    fn test_distance_scales_with_direction() {
        let (registry, handle) = loaded(&unit_triangle_doc());
        let hit = registry
            .trace_ray(handle, Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 2.0]))
            .unwrap();
        assert!(hit.hit);
        assert_relative_eq!(hit.distance, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_empty_scene_misses() {
        let (registry, handle) = loaded(&GeometryDocument::default());
        let hit = registry
            .trace_ray(handle, Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 1.0]))
            .unwrap();
        assert!(!hit.hit);
    }

    #[test]
    fn test_batch_matches_single_queries() {
        let (registry, handle) = loaded(&unit_triangle_doc());
        for n in BATCH_SIZES {
            let rays: Vec<Ray> = (0..n).map(batch_ray).collect();
            let batch = registry.trace_rays(handle, &rays).unwrap();
            assert_eq!(batch.len(), n);
            for (i, (ray, result)) in rays.iter().zip(&batch).enumerate() {
                let single = registry.trace_ray(handle, *ray).unwrap();
                assert_eq!(*result, single, "ray {i} of {n}");
                assert_eq!(result.hit, i % 2 == 0, "ray {i} of {n}");
            }
        }
    }

    #[test]
    fn test_trace_rays_with_delivers_in_order() {
        let (registry, handle) = loaded(&unit_triangle_doc());
        let rays: Vec<Ray> = (0..33).map(batch_ray).collect();
        let expected = registry.trace_rays(handle, &rays).unwrap();

        let mut delivered = Vec::new();
        registry
            .trace_rays_with(handle, &rays, |index, result| delivered.push((index, result)))
            .unwrap();

        assert_eq!(delivered.len(), expected.len());
        for (i, (index, result)) in delivered.iter().enumerate() {
            assert_eq!(*index, i);
            assert_eq!(*result, expected[i]);
        }
    }

    #[test]
    fn test_trace_rays_with_callback_may_reenter() {
        let (registry, handle) = loaded(&unit_triangle_doc());
        let rays: Vec<Ray> = (0..5).map(batch_ray).collect();
        let mut count = 0;
        registry
            .trace_rays_with(handle, &rays, |_, _| {
                assert!(registry.contains(handle));
                count += 1;
            })
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_commit_twice_gives_identical_results() {
        let (registry, handle) = loaded(&two_triangle_doc());
        let rays: Vec<Ray> = (0..17)
            .map(|i| {
                let x = if i % 3 == 0 { 10.2 } else { 0.2 };
                Ray::from_arrays([x, 0.2, -1.0], [0.0, 0.0, 1.0])
            })
            .collect();

        registry.commit(handle).unwrap();
        let first = registry.trace_rays(handle, &rays).unwrap();
        registry.commit(handle).unwrap();
        let second = registry.trace_rays(handle, &rays).unwrap();
        assert_eq!(first, second);
        assert!(first.iter().all(|r| r.hit));
    }

    #[test]
    fn test_unknown_handle_queries() {
        let registry: SceneRegistry = SceneRegistry::default();
        let handle = registry.create().unwrap();
        registry.dispose(handle).unwrap();

        let ray = batch_ray(0);
        assert!(matches!(registry.trace_ray(handle, ray), Err(SceneError::NotFound(_))));
        assert!(matches!(
            registry.trace_rays(handle, &[ray]),
            Err(SceneError::NotFound(_))
        ));
        let mut called = false;
        let result = registry.trace_rays_with(handle, &[ray], |_, _| called = true);
        assert!(result.is_err());
        assert!(!called);
    }

    #[test]
    fn test_concurrent_queries() {
        let (registry, handle) = loaded(&two_triangle_doc());

        std::thread::scope(|s| {
            for t in 0..8 {
                let registry = &registry;
                s.spawn(move || {
                    let (x, geom, distance) = if t % 2 == 0 {
                        (0.2, 0, 1.0_f32)
                    } else {
                        (10.2, 1, 3.0)
                    };
                    for i in 0..200 {
                        let ray = Ray::from_arrays([x, 0.2, -1.0], [0.0, 0.0, 1.0]);
                        if i % 10 == 0 {
                            let rays = vec![ray; 7];
                            for r in registry.trace_rays(handle, &rays).unwrap() {
                                assert!(r.hit);
                                assert_eq!(r.geom_id, geom);
                            }
                        } else {
                            let r = registry.trace_ray(handle, ray).unwrap();
                            assert!(r.hit, "thread {t} query {i}");
                            assert_eq!(r.geom_id, geom);
                            assert_relative_eq!(r.distance, distance, epsilon = 1e-5);
                        }
                    }
                });
            }
        });
    }

    #[test]
    fn test_concurrent_queries_during_reload() {
        let (registry, handle) = loaded(&unit_triangle_doc());
        let doc = unit_triangle_doc();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..50 {
                    registry.load_geometry(handle, &doc).unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let r = registry.trace_ray(handle, batch_ray(0)).unwrap();
                        assert!(r.hit);
                        assert_eq!(r.geom_id, 0);
                    }
                });
            }
        });
    }

    /// Backend recording the width of every query it receives. Each lane
    /// reports the integer part of its ray's origin x as geometry id.
    struct RecordingDevice;

    struct RecordingScene {
        flags: SceneFlags,
        widths: Mutex<Vec<usize>>,
    }

    impl RecordingScene {
        fn answer(rayhit: &mut RayHit) {
            rayhit.geom_id = rayhit.ray.origin.x as u32;
            rayhit.prim_id = 0;
            rayhit.t_far = 1.0;
        }
    }

    impl Accelerator for RecordingDevice {
        type Scene = RecordingScene;

        fn new_device(_config: &DeviceConfig) -> std::result::Result<Self, AccelError> {
            Ok(Self)
        }

        fn new_scene(&self) -> RecordingScene {
            RecordingScene {
                flags: SceneFlags::default(),
                widths: Mutex::new(Vec::new()),
            }
        }
    }

    impl AcceleratorScene for RecordingScene {
        fn set_flags(&mut self, flags: SceneFlags) {
            self.flags = flags;
        }

        fn flags(&self) -> SceneFlags {
            self.flags
        }

        fn attach_geometry(&mut self, _geometry: TriangleGeometry) -> u32 {
            0
        }

        fn num_geometries(&self) -> usize {
            0
        }

        fn commit(&mut self) {}

        fn is_committed(&self) -> bool {
            true
        }

        fn intersect1(&self, rayhit: &mut RayHit) {
            self.widths.lock().push(1);
            Self::answer(rayhit);
        }

        fn intersect_packet<const W: usize>(&self, valid: &[bool; W], packet: &mut RayHitPacket<W>) {
            assert!(valid.iter().all(|&v| v));
            self.widths.lock().push(W);
            for rayhit in &mut packet.lanes {
                Self::answer(rayhit);
            }
        }
    }

    #[test]
    fn test_batches_dispatch_greedy_widths_in_order() {
        let registry: SceneRegistry<RecordingDevice> = SceneRegistry::new(DeviceConfig::default());
        let handle = registry.create().unwrap();

        for n in BATCH_SIZES {
            registry
                .with_instance(handle, |i| i.scene().widths.lock().clear())
                .unwrap();

            let rays: Vec<Ray> = (0..n)
                .map(|i| Ray::from_arrays([i as f32 + 0.5, 0.0, 0.0], [0.0, 0.0, 1.0]))
                .collect();
            let results = registry.trace_rays(handle, &rays).unwrap();

            let widths = registry
                .with_instance(handle, |i| i.scene().widths.lock().clone())
                .unwrap();
            assert_eq!(widths, PacketPlan::new(n).collect::<Vec<_>>(), "batch of {n}");
            assert_eq!(results.len(), n);
            for (i, result) in results.iter().enumerate() {
                assert!(result.hit);
                assert_eq!(result.geom_id, i as u32, "batch of {n}");
            }
        }
    }
}
