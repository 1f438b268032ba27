//! Triangle geometry over shared, caller-owned buffers.

use std::sync::Arc;

use nebula_math::{Aabb3, Point3};

/// A triangle mesh geometry.
///
/// Vertex and index buffers are shared, not copied: the scene keeps the
/// `Arc`s alive for as long as the geometry is attached. Trailing partial
/// triples in either buffer are ignored.
#[derive(Debug, Clone)]
pub struct TriangleGeometry {
    vertices: Arc<[f32]>,
    indices: Arc<[u32]>,
}

impl TriangleGeometry {
    /// Create a geometry over flat position and index buffers.
    pub fn new(vertices: Arc<[f32]>, indices: Arc<[u32]>) -> Self {
        Self { vertices, indices }
    }

    /// Number of whole vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Number of whole triangles.
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    /// The shared vertex buffer.
    pub fn vertex_buffer(&self) -> &Arc<[f32]> {
        &self.vertices
    }

    /// Vertex `i`, if it lies within the buffer.
    #[inline]
    pub fn vertex(&self, i: u32) -> Option<Point3> {
        let i = i as usize;
        if i >= self.num_vertices() {
            return None;
        }
        Some(Point3::new(
            self.vertices[3 * i],
            self.vertices[3 * i + 1],
            self.vertices[3 * i + 2],
        ))
    }

    /// Corners of triangle `prim`, or `None` if it references a missing vertex.
    #[inline]
    pub fn triangle(&self, prim: u32) -> Option<[Point3; 3]> {
        let p = prim as usize;
        if p >= self.num_triangles() {
            return None;
        }
        let i = &self.indices[3 * p..3 * p + 3];
        Some([self.vertex(i[0])?, self.vertex(i[1])?, self.vertex(i[2])?])
    }

    /// Bounding box of triangle `prim`.
    pub fn triangle_aabb(&self, prim: u32) -> Option<Aabb3> {
        self.triangle(prim)
            .map(|[a, b, c]| Aabb3::from_triangle(&a, &b, &c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_truncate() {
        let g = TriangleGeometry::new(vec![0.0; 11].into(), vec![0, 1, 2, 1].into());
        assert_eq!(g.num_vertices(), 3);
        assert_eq!(g.num_triangles(), 1);
    }

    #[test]
    fn test_triangle_lookup() {
        let g = TriangleGeometry::new(
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0].into(),
            vec![0, 1, 2, 0, 1, 7].into(),
        );
        let [_, b, _] = g.triangle(0).unwrap();
        assert_eq!(b, Point3::new(1.0, 0.0, 0.0));
        // Second triangle references vertex 7, which does not exist.
        assert!(g.triangle(1).is_none());
        assert!(g.triangle(2).is_none());
    }

    #[test]
    fn test_buffers_are_shared() {
        let vertices: Arc<[f32]> = vec![0.0; 9].into();
        let g = TriangleGeometry::new(vertices.clone(), vec![0, 1, 2].into());
        assert!(Arc::ptr_eq(g.vertex_buffer(), &vertices));
    }
}
