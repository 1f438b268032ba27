#![warn(missing_docs)]

//! Scene registry, geometry loading and ray queries for nebula.
//!
//! # Architecture
//!
//! - [`SceneRegistry`] - table of scene instances behind one exclusive lock
//! - [`SceneRegistry::load_geometry`] - replace a scene's content from a
//!   [`GeometryDocument`](nebula_ir::GeometryDocument)
//! - [`SceneRegistry::trace_ray`] / [`SceneRegistry::trace_rays`] - closest-hit
//!   queries, batched into the widest packets the accelerator offers
//!
//! # Example
//!
//! ```
//! use nebula_ir::GeometryDocument;
//! use nebula_kernel::SceneRegistry;
//! use nebula_raytrace::Ray;
//!
//! let registry: SceneRegistry = SceneRegistry::default();
//! let scene = registry.create().unwrap();
//! let doc = GeometryDocument::single_part(
//!     vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
//!     vec![0, 1, 2],
//! );
//! registry.load_geometry(scene, &doc).unwrap();
//!
//! let hit = registry
//!     .trace_ray(scene, Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 1.0]))
//!     .unwrap();
//! assert!(hit.hit);
//! assert_eq!(hit.geom_id, 0);
//! ```

mod engine;
mod error;
mod loader;
mod registry;

pub use engine::{HitResult, PacketPlan};
pub use error::{Result, SceneError};
pub use loader::LoadStats;
pub use registry::{SceneHandle, SceneInstance, SceneRegistry};
