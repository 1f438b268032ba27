#![warn(missing_docs)]

//! Triangle ray-intersection accelerator for the nebula kernel.
//!
//! # Architecture
//!
//! - [`Ray`] / [`RayHit`] - query ray and its in-place hit record
//! - [`intersect`] - ray-triangle intersection
//! - [`TriangleGeometry`] - triangle mesh over shared vertex/index buffers
//! - [`bvh`] - SAH bounding volume hierarchy with scalar and packet traversal
//! - [`packet`] - fixed-width ray packets (4, 8, 16 lanes)
//! - [`Accelerator`] / [`AcceleratorScene`] - the backend capability, with
//!   [`BvhDevice`] as the built-in CPU backend
//!
//! # Example
//!
//! ```
//! use nebula_raytrace::{Accelerator, AcceleratorScene, BvhDevice, DeviceConfig, Ray, RayHit, TriangleGeometry};
//!
//! let device = BvhDevice::new_device(&DeviceConfig::default()).unwrap();
//! let mut scene = device.new_scene();
//! scene.attach_geometry(TriangleGeometry::new(
//!     vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0].into(),
//!     vec![0, 1, 2].into(),
//! ));
//! scene.commit();
//!
//! let mut rayhit = RayHit::new(Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 1.0]));
//! scene.intersect1(&mut rayhit);
//! assert!(rayhit.is_hit());
//! ```

mod accel;
pub mod bvh;
mod geometry;
pub mod intersect;
pub mod packet;
mod ray;

pub use accel::{AccelError, Accelerator, AcceleratorScene, BvhDevice, BvhScene, DeviceConfig, SceneFlags};
pub use bvh::Bvh;
pub use geometry::TriangleGeometry;
pub use packet::{lane_mask, RayHit16, RayHit4, RayHit8, RayHitPacket, PACKET_WIDTHS};
pub use ray::{Ray, RayHit, INVALID_GEOMETRY_ID};
