//! Bounding Volume Hierarchy over triangle primitives.
//!
//! Uses the Surface Area Heuristic (SAH) with bucketed split candidates for
//! construction, then flattens the tree into a node array for stack-based
//! traversal by single rays and ray packets.

use nebula_math::{axis_component, Aabb3, Point3};

use crate::intersect::intersect_triangle;
use crate::packet::RayHitPacket;
use crate::{RayHit, TriangleGeometry};

/// Recursion depth after which SAH gives way to median splits.
const MAX_SAH_DEPTH: usize = 48;

/// SAH traversal cost relative to one triangle test.
const TRAVERSAL_COST: f32 = 0.125;

/// Tunables for BVH construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildParams {
    /// Maximum primitives stored in one leaf.
    pub max_leaf_size: usize,
    /// Number of SAH buckets per axis.
    pub sah_buckets: usize,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            sah_buckets: 12,
        }
    }
}

/// A primitive address: geometry id plus triangle index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimId {
    /// Geometry the triangle belongs to.
    pub geom_id: u32,
    /// Triangle index within the geometry.
    pub prim_id: u32,
}

/// A primitive with its bounds, used during construction only.
#[derive(Debug, Clone, Copy)]
struct PrimRef {
    id: PrimId,
    aabb: Aabb3,
    centroid: Point3,
}

/// A BVH node - either a leaf containing primitives or an internal node with children.
#[derive(Debug, Clone)]
enum BvhNode {
    Leaf {
        aabb: Aabb3,
        prims: Vec<PrimId>,
    },
    Internal {
        aabb: Aabb3,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

/// A flattened BVH node.
///
/// - For internal nodes: `left_or_first` = left child index, `right_or_count` = right child index
/// - For leaf nodes: `left_or_first` = first primitive index, `right_or_count` = primitive count
#[derive(Debug, Clone, Copy)]
pub struct FlatBvhNode {
    /// Bounds of everything below this node.
    pub aabb: Aabb3,
    /// True for leaves.
    pub is_leaf: bool,
    /// Left child index, or first primitive index for leaves.
    pub left_or_first: u32,
    /// Right child index, or primitive count for leaves.
    pub right_or_count: u32,
}

/// Bounding Volume Hierarchy for accelerated ray-triangle intersection.
///
/// The hierarchy stores primitive addresses only; vertex data is read from
/// the geometries passed to the query functions.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<FlatBvhNode>,
    prims: Vec<PrimId>,
}

impl Bvh {
    /// Build a BVH over every valid triangle of `geometries`.
    ///
    /// Geometry ids are positions in the slice. Triangles that reference a
    /// vertex outside their buffer are skipped.
    pub fn build(geometries: &[TriangleGeometry], params: &BuildParams) -> Self {
        let mut prim_refs: Vec<PrimRef> = geometries
            .iter()
            .enumerate()
            .flat_map(|(geom_id, geometry)| {
                (0..geometry.num_triangles() as u32).filter_map(move |prim_id| {
                    let aabb = geometry.triangle_aabb(prim_id)?;
                    Some(PrimRef {
                        id: PrimId {
                            geom_id: geom_id as u32,
                            prim_id,
                        },
                        aabb,
                        centroid: aabb.centroid(),
                    })
                })
            })
            .collect();

        if prim_refs.is_empty() {
            return Self::default();
        }

        let params = BuildParams {
            max_leaf_size: params.max_leaf_size.max(1),
            sah_buckets: params.sah_buckets.max(2),
        };
        let root = build_node(&mut prim_refs, &params, 0);

        let mut bvh = Self {
            nodes: Vec::with_capacity(2 * prim_refs.len()),
            prims: Vec::with_capacity(prim_refs.len()),
        };
        flatten_node(&root, &mut bvh.nodes, &mut bvh.prims);
        bvh
    }

    /// True if the hierarchy holds no primitives.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Flattened nodes; the root is at index 0.
    pub fn nodes(&self) -> &[FlatBvhNode] {
        &self.nodes
    }

    /// Primitive addresses in leaf order.
    pub fn prims(&self) -> &[PrimId] {
        &self.prims
    }

    /// Find the closest hit for one ray, updating `rayhit` in place.
    pub fn intersect(&self, geometries: &[TriangleGeometry], rayhit: &mut RayHit, robust: bool) {
        if self.nodes.is_empty() {
            return;
        }

        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if rayhit
                .ray
                .intersect_aabb(&node.aabb, rayhit.t_near, rayhit.t_far)
                .is_none()
            {
                continue;
            }

            if node.is_leaf {
                for prim in self.leaf_prims(node) {
                    let Some([a, b, c]) = triangle_of(geometries, prim) else {
                        continue;
                    };
                    if let Some(hit) =
                        intersect_triangle(&rayhit.ray, &a, &b, &c, rayhit.t_near, rayhit.t_far, robust)
                    {
                        rayhit.t_far = hit.t;
                        rayhit.u = hit.u;
                        rayhit.v = hit.v;
                        rayhit.geom_id = prim.geom_id;
                        rayhit.prim_id = prim.prim_id;
                    }
                }
                continue;
            }

            // Test children in order of AABB distance: the nearer one is pushed last.
            let (left, right) = (node.left_or_first, node.right_or_count);
            let entry = |child: u32| {
                rayhit
                    .ray
                    .intersect_aabb(&self.nodes[child as usize].aabb, rayhit.t_near, rayhit.t_far)
                    .map(|(t, _)| t)
            };
            match (entry(left), entry(right)) {
                (Some(lt), Some(rt)) => {
                    if lt < rt {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
                (Some(_), None) => stack.push(left),
                (None, Some(_)) => stack.push(right),
                (None, None) => {}
            }
        }
    }

    /// Find the closest hit for every valid lane of a packet.
    ///
    /// The packet walks the tree together: a node is visited if any active
    /// lane overlaps it, and each leaf triangle is fetched once per packet.
    /// Invalid lanes are left untouched.
    pub fn intersect_packet<const W: usize>(
        &self,
        geometries: &[TriangleGeometry],
        valid: &[bool; W],
        packet: &mut RayHitPacket<W>,
        robust: bool,
    ) {
        if self.nodes.is_empty() || !valid.iter().any(|&v| v) {
            return;
        }

        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];

            let mut active = [false; W];
            let mut any_active = false;
            for (lane, rayhit) in packet.lanes.iter().enumerate() {
                if valid[lane]
                    && rayhit
                        .ray
                        .intersect_aabb(&node.aabb, rayhit.t_near, rayhit.t_far)
                        .is_some()
                {
                    active[lane] = true;
                    any_active = true;
                }
            }
            if !any_active {
                continue;
            }

            if !node.is_leaf {
                stack.push(node.right_or_count);
                stack.push(node.left_or_first);
                continue;
            }

            for prim in self.leaf_prims(node) {
                let Some([a, b, c]) = triangle_of(geometries, prim) else {
                    continue;
                };
                for (lane, rayhit) in packet.lanes.iter_mut().enumerate() {
                    if !active[lane] {
                        continue;
                    }
                    if let Some(hit) =
                        intersect_triangle(&rayhit.ray, &a, &b, &c, rayhit.t_near, rayhit.t_far, robust)
                    {
                        rayhit.t_far = hit.t;
                        rayhit.u = hit.u;
                        rayhit.v = hit.v;
                        rayhit.geom_id = prim.geom_id;
                        rayhit.prim_id = prim.prim_id;
                    }
                }
            }
        }
    }

    fn leaf_prims(&self, node: &FlatBvhNode) -> &[PrimId] {
        let first = node.left_or_first as usize;
        let count = node.right_or_count as usize;
        &self.prims[first..first + count]
    }
}

fn triangle_of(geometries: &[TriangleGeometry], prim: &PrimId) -> Option<[Point3; 3]> {
    geometries
        .get(prim.geom_id as usize)
        .and_then(|g| g.triangle(prim.prim_id))
}

/// Recursively flatten a BVH node into a vector.
fn flatten_node(node: &BvhNode, nodes: &mut Vec<FlatBvhNode>, prims: &mut Vec<PrimId>) -> usize {
    let idx = nodes.len();

    match node {
        BvhNode::Leaf {
            aabb,
            prims: leaf_prims,
        } => {
            let first = prims.len() as u32;
            let count = leaf_prims.len() as u32;
            prims.extend(leaf_prims.iter().copied());
            nodes.push(FlatBvhNode {
                aabb: *aabb,
                is_leaf: true,
                left_or_first: first,
                right_or_count: count,
            });
        }
        BvhNode::Internal { aabb, left, right } => {
            // Reserve space for this node
            nodes.push(FlatBvhNode {
                aabb: *aabb,
                is_leaf: false,
                left_or_first: 0,
                right_or_count: 0,
            });

            let left_idx = flatten_node(left, nodes, prims);
            let right_idx = flatten_node(right, nodes, prims);

            nodes[idx].left_or_first = left_idx as u32;
            nodes[idx].right_or_count = right_idx as u32;
        }
    }

    idx
}

/// Build a BVH node recursively using SAH.
fn build_node(prim_refs: &mut [PrimRef], params: &BuildParams, depth: usize) -> BvhNode {
    let mut bounds = Aabb3::empty();
    for prim in prim_refs.iter() {
        bounds.include_aabb(&prim.aabb);
    }

    if prim_refs.len() <= params.max_leaf_size {
        return BvhNode::Leaf {
            aabb: bounds,
            prims: prim_refs.iter().map(|p| p.id).collect(),
        };
    }

    let split = if depth < MAX_SAH_DEPTH {
        find_best_split(prim_refs, &bounds, params.sah_buckets)
            .map(|(axis, pos)| partition_prims(prim_refs, axis, pos))
            .filter(|&mid| mid != 0 && mid != prim_refs.len())
    } else {
        None
    };

    // Fallback if SAH finds nothing useful: split in the middle.
    let mid = split.unwrap_or(prim_refs.len() / 2);
    let (left_refs, right_refs) = prim_refs.split_at_mut(mid);

    BvhNode::Internal {
        aabb: bounds,
        left: Box::new(build_node(left_refs, params, depth + 1)),
        right: Box::new(build_node(right_refs, params, depth + 1)),
    }
}

/// Find the best split axis and position using SAH.
///
/// Returns `None` if the centroids are flat on every axis or all land in a
/// single bucket.
fn find_best_split(prim_refs: &[PrimRef], bounds: &Aabb3, num_buckets: usize) -> Option<(usize, f32)> {
    let mut centroid_bounds = Aabb3::empty();
    for prim in prim_refs {
        centroid_bounds.include_point(&prim.centroid);
    }
    let extent = centroid_bounds.extent();
    let total_area = bounds.surface_area().max(f32::MIN_POSITIVE);

    let mut best: Option<(f32, usize, f32)> = None;
    let mut bucket_counts = vec![0usize; num_buckets];
    let mut bucket_bounds = vec![Aabb3::empty(); num_buckets];

    for axis in 0..3 {
        let axis_extent = extent[axis];
        if axis_extent < 1e-12 {
            continue;
        }
        let axis_min = axis_component(&centroid_bounds.min, axis);

        bucket_counts.iter_mut().for_each(|c| *c = 0);
        bucket_bounds.iter_mut().for_each(|b| *b = Aabb3::empty());

        for prim in prim_refs {
            let c = axis_component(&prim.centroid, axis);
            let b = ((c - axis_min) / axis_extent * num_buckets as f32) as usize;
            let b = b.min(num_buckets - 1);
            bucket_counts[b] += 1;
            bucket_bounds[b].include_aabb(&prim.aabb);
        }

        for split in 1..num_buckets {
            let mut left_count = 0;
            let mut left_bounds = Aabb3::empty();
            for i in 0..split {
                left_count += bucket_counts[i];
                left_bounds.include_aabb(&bucket_bounds[i]);
            }

            let mut right_count = 0;
            let mut right_bounds = Aabb3::empty();
            for i in split..num_buckets {
                right_count += bucket_counts[i];
                right_bounds.include_aabb(&bucket_bounds[i]);
            }

            if left_count == 0 || right_count == 0 {
                continue;
            }

            // SAH cost: traversal + P(left) * N_left + P(right) * N_right
            let cost = TRAVERSAL_COST
                + left_bounds.surface_area() / total_area * left_count as f32
                + right_bounds.surface_area() / total_area * right_count as f32;

            if best.map_or(true, |(best_cost, _, _)| cost < best_cost) {
                let pos = axis_min + (split as f32 / num_buckets as f32) * axis_extent;
                best = Some((cost, axis, pos));
            }
        }
    }

    best.map(|(_, axis, pos)| (axis, pos))
}

/// Partition primitives by centroid along an axis.
fn partition_prims(prim_refs: &mut [PrimRef], axis: usize, pos: f32) -> usize {
    let mut left = 0;
    let mut right = prim_refs.len();

    while left < right {
        if axis_component(&prim_refs[left].centroid, axis) < pos {
            left += 1;
        } else {
            right -= 1;
            prim_refs.swap(left, right);
        }
    }

    left
}
