//! Geometry loading: replace a scene's content from a mesh document.

use std::sync::Arc;

use tracing::debug;

use nebula_ir::{GeometryDocument, MeshPart};
use nebula_raytrace::{Accelerator, AcceleratorScene, TriangleGeometry};

use crate::error::Result;
use crate::registry::{SceneHandle, SceneRegistry};

/// What a load attached to the scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Geometries attached, one per mesh part.
    pub geometries: usize,
    /// Whole triangles across all attached geometries.
    pub triangles: usize,
}

fn part_geometry(part: &MeshPart) -> TriangleGeometry {
    TriangleGeometry::new(
        Arc::from(part.vertices.as_slice()),
        Arc::from(part.indices.as_slice()),
    )
}

impl<A: Accelerator> SceneRegistry<A> {
    /// Replace the scene's entire content with the parts of `doc`, then commit.
    ///
    /// Every part across every mesh becomes one geometry, with ids assigned
    /// in document order. Malformed parts (lengths not divisible by three,
    /// out-of-range indices) yield truncated geometry, not an error. The
    /// registry lock is held for the whole replacement, so concurrent
    /// queries see either the old scene or the new one.
    pub fn load_geometry(&self, handle: SceneHandle, doc: &GeometryDocument) -> Result<LoadStats> {
        self.with_instance_mut(handle, |instance| {
            let scene = instance.replace_scene();
            let mut stats = LoadStats::default();
            for part in doc.parts() {
                let geometry = part_geometry(part);
                stats.triangles += geometry.num_triangles();
                scene.attach_geometry(geometry);
                stats.geometries += 1;
            }
            scene.commit();
            debug!(
                handle = ?handle,
                geometries = stats.geometries,
                triangles = stats.triangles,
                "geometry loaded"
            );
            stats
        })
    }

    /// Parse `json` leniently and load it.
    ///
    /// Text that is not valid JSON reads as an empty document, which leaves
    /// the scene committed with no geometry.
    pub fn load_json(&self, handle: SceneHandle, json: &str) -> Result<LoadStats> {
        let doc = GeometryDocument::from_json_lenient(json);
        self.load_geometry(handle, &doc)
    }
}
