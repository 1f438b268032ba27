//! The accelerator capability and its built-in BVH backend.
//!
//! An accelerator is a device that creates scenes; a scene collects triangle
//! geometries, is committed to build its acceleration structure, and then
//! answers closest-hit queries for single rays and packets. The registry,
//! loader and batching code above this layer are written against the
//! [`Accelerator`] and [`AcceleratorScene`] traits only.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bvh::{BuildParams, Bvh};
use crate::packet::RayHitPacket;
use crate::{RayHit, TriangleGeometry};

/// Errors raised by accelerator backends.
#[derive(Error, Debug)]
pub enum AccelError {
    /// The backend could not create a device.
    #[error("failed to create accelerator device: {0}")]
    DeviceCreation(String),
}

/// Scene build and query flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFlags {
    /// Optimize for frequent rebuilds over query speed.
    pub dynamic: bool,
    /// Use the epsilon-widened edge test so rays cannot slip through shared edges.
    pub robust: bool,
}

impl Default for SceneFlags {
    fn default() -> Self {
        Self {
            dynamic: true,
            robust: true,
        }
    }
}

/// Device-wide accelerator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Maximum triangles per BVH leaf.
    pub max_leaf_size: usize,
    /// SAH buckets per axis for dynamic scenes; static scenes use twice as many.
    pub sah_buckets: usize,
    /// Flags given to every new scene.
    pub scene_flags: SceneFlags,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            sah_buckets: 12,
            scene_flags: SceneFlags::default(),
        }
    }
}

/// A ray-intersection backend device.
pub trait Accelerator: Send + Sized + 'static {
    /// Scene type produced by this device.
    type Scene: AcceleratorScene;

    /// Create a device.
    fn new_device(config: &DeviceConfig) -> Result<Self, AccelError>;

    /// Create an empty, uncommitted scene bound to this device.
    fn new_scene(&self) -> Self::Scene;
}

/// A scene of triangle geometries owned by one accelerator device.
pub trait AcceleratorScene: Send + 'static {
    /// Replace the scene flags; takes effect at the next commit.
    fn set_flags(&mut self, flags: SceneFlags);

    /// Current scene flags.
    fn flags(&self) -> SceneFlags;

    /// Attach a geometry and return its id. Ids count up from 0 in attach order.
    ///
    /// The geometry becomes visible to queries at the next commit.
    fn attach_geometry(&mut self, geometry: TriangleGeometry) -> u32;

    /// Number of attached geometries.
    fn num_geometries(&self) -> usize;

    /// Build the acceleration structure from the attached geometries.
    ///
    /// Always a full rebuild; committing an unchanged scene yields an
    /// identical structure.
    fn commit(&mut self);

    /// True once the scene has been committed at least once.
    fn is_committed(&self) -> bool;

    /// Closest-hit query for one ray.
    fn intersect1(&self, rayhit: &mut RayHit);

    /// Closest-hit query for the valid lanes of a packet.
    ///
    /// The default answers lane by lane through [`intersect1`](Self::intersect1).
    fn intersect_packet<const W: usize>(&self, valid: &[bool; W], packet: &mut RayHitPacket<W>) {
        for (lane, rayhit) in packet.lanes.iter_mut().enumerate() {
            if valid[lane] {
                self.intersect1(rayhit);
            }
        }
    }
}

/// CPU accelerator backed by a SAH BVH.
#[derive(Debug, Clone)]
pub struct BvhDevice {
    config: DeviceConfig,
}

impl BvhDevice {
    /// Settings this device was created with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl Accelerator for BvhDevice {
    type Scene = BvhScene;

    fn new_device(config: &DeviceConfig) -> Result<Self, AccelError> {
        Ok(Self { config: *config })
    }

    fn new_scene(&self) -> BvhScene {
        BvhScene {
            flags: self.config.scene_flags,
            max_leaf_size: self.config.max_leaf_size,
            sah_buckets: self.config.sah_buckets,
            geometries: Vec::new(),
            bvh: Bvh::default(),
            committed: false,
        }
    }
}

/// A scene of the [`BvhDevice`] backend.
#[derive(Debug, Clone)]
pub struct BvhScene {
    flags: SceneFlags,
    max_leaf_size: usize,
    sah_buckets: usize,
    geometries: Vec<TriangleGeometry>,
    bvh: Bvh,
    committed: bool,
}

impl BvhScene {
    /// The acceleration structure of the last commit.
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    fn build_params(&self) -> BuildParams {
        let sah_buckets = if self.flags.dynamic {
            self.sah_buckets
        } else {
            self.sah_buckets * 2
        };
        BuildParams {
            max_leaf_size: self.max_leaf_size,
            sah_buckets,
        }
    }
}

impl AcceleratorScene for BvhScene {
    fn set_flags(&mut self, flags: SceneFlags) {
        self.flags = flags;
    }

    fn flags(&self) -> SceneFlags {
        self.flags
    }

    fn attach_geometry(&mut self, geometry: TriangleGeometry) -> u32 {
        self.geometries.push(geometry);
        (self.geometries.len() - 1) as u32
    }

    fn num_geometries(&self) -> usize {
        self.geometries.len()
    }

    fn commit(&mut self) {
        self.bvh = Bvh::build(&self.geometries, &self.build_params());
        self.committed = true;
        debug!(
            geometries = self.geometries.len(),
            triangles = self.bvh.prims().len(),
            nodes = self.bvh.nodes().len(),
            "scene committed"
        );
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    fn intersect1(&self, rayhit: &mut RayHit) {
        self.bvh.intersect(&self.geometries, rayhit, self.flags.robust);
    }

    fn intersect_packet<const W: usize>(&self, valid: &[bool; W], packet: &mut RayHitPacket<W>) {
        self.bvh
            .intersect_packet(&self.geometries, valid, packet, self.flags.robust);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ray;
    use approx::assert_relative_eq;

    fn unit_triangle() -> TriangleGeometry {
        TriangleGeometry::new(
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0].into(),
            vec![0, 1, 2].into(),
        )
    }

    fn forward_hit() -> RayHit {
        RayHit::new(Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 1.0]))
    }

    #[test]
    fn test_uncommitted_scene_misses() {
        let device = BvhDevice::new_device(&DeviceConfig::default()).unwrap();
        let mut scene = device.new_scene();
        scene.attach_geometry(unit_triangle());
        assert!(!scene.is_committed());

        let mut rayhit = forward_hit();
        scene.intersect1(&mut rayhit);
        assert!(!rayhit.is_hit());
    }

    #[test]
    fn test_commit_makes_geometry_visible() {
        let device = BvhDevice::new_device(&DeviceConfig::default()).unwrap();
        let mut scene = device.new_scene();
        assert_eq!(scene.attach_geometry(unit_triangle()), 0);
        scene.commit();

        let mut rayhit = forward_hit();
        scene.intersect1(&mut rayhit);
        assert!(rayhit.is_hit());
        assert_eq!(rayhit.geom_id, 0);
        assert_eq!(rayhit.prim_id, 0);
        assert_relative_eq!(rayhit.t_far, 1.0);
    }

    #[test]
    fn test_attach_after_commit_waits_for_next_commit() {
        let device = BvhDevice::new_device(&DeviceConfig::default()).unwrap();
        let mut scene = device.new_scene();
        scene.commit();
        assert_eq!(scene.attach_geometry(unit_triangle()), 0);

        let mut rayhit = forward_hit();
        scene.intersect1(&mut rayhit);
        assert!(!rayhit.is_hit());

        scene.commit();
        let mut rayhit = forward_hit();
        scene.intersect1(&mut rayhit);
        assert!(rayhit.is_hit());
    }

    #[test]
    fn test_static_scene_builds_finer() {
        let device = BvhDevice::new_device(&DeviceConfig::default()).unwrap();
        let mut scene = device.new_scene();
        assert_eq!(scene.build_params().sah_buckets, 12);
        scene.set_flags(SceneFlags {
            dynamic: false,
            robust: true,
        });
        assert_eq!(scene.build_params().sah_buckets, 24);
    }

    #[test]
    fn test_default_packet_path() {
        struct Scalar(BvhScene);
        impl AcceleratorScene for Scalar {
            fn set_flags(&mut self, flags: SceneFlags) {
                self.0.set_flags(flags)
            }
            fn flags(&self) -> SceneFlags {
                self.0.flags()
            }
            fn attach_geometry(&mut self, geometry: TriangleGeometry) -> u32 {
                self.0.attach_geometry(geometry)
            }
            fn num_geometries(&self) -> usize {
                self.0.num_geometries()
            }
            fn commit(&mut self) {
                self.0.commit()
            }
            fn is_committed(&self) -> bool {
                self.0.is_committed()
            }
            fn intersect1(&self, rayhit: &mut RayHit) {
                self.0.intersect1(rayhit)
            }
        }

        let device = BvhDevice::new_device(&DeviceConfig::default()).unwrap();
        let mut scene = Scalar(device.new_scene());
        scene.attach_geometry(unit_triangle());
        scene.commit();

        let mut packet = RayHitPacket::<4>::from_rays(&[forward_hit().ray; 4]);
        scene.intersect_packet(&[true, true, false, true], &mut packet);
        assert!(packet.lanes[0].is_hit());
        assert!(!packet.lanes[2].is_hit());
        assert!(packet.lanes[3].is_hit());
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: DeviceConfig = serde_json::from_str(r#"{"max_leaf_size": 8}"#).unwrap();
        assert_eq!(config.max_leaf_size, 8);
        assert_eq!(config.sah_buckets, 12);
        assert!(config.scene_flags.robust);
    }
}
