//! Bounding volume hierarchy
//!
//! Top-down AABB tree built by median split on the axis of greatest centroid
//! extent. The tree is rebuilt wholesale by [`Bvh::build`]; moved objects are
//! tracked as dirty and repaired either by refitting ancestor bounds or, past
//! a threshold, by a full rebuild.
//!
//! ```text
//!            [root]
//!           /      \
//!       [node]    [node]
//!       /    \       \ ...
//!   [leaf]  [leaf]
//!    obj 3   obj 7
//! ```

use super::{Frustum, FrustumTest, AABB};
use crate::foundation::math::Vec3;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

/// Configuration for BVH construction and maintenance
#[derive(Debug, Clone)]
pub struct BvhConfig {
    /// Maximum tree depth; deeper ranges become multi-object leaves
    pub max_depth: u32,

    /// Dirty objects beyond which `refit` rebuilds instead
    pub refit_threshold: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            refit_threshold: 64,
        }
    }
}

/// Child layout of a BVH node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhNodeKind {
    /// Inner node with two children
    Internal {
        /// Index of the left child node
        left: u32,
        /// Index of the right child node
        right: u32,
    },
    /// Leaf referencing `count` consecutive entries of the object order
    ///
    /// `count` is 1 unless the depth limit forced a larger leaf.
    Leaf {
        /// First slot in the object order array
        first: u32,
        /// Number of objects in this leaf
        count: u32,
    },
}

/// Single node in the BVH
#[derive(Debug, Clone)]
pub struct BvhNode {
    /// Bounds enclosing every object below this node
    pub bounds: AABB,
    /// Children or objects
    pub kind: BvhNodeKind,
    /// Parent node index, `None` for the root
    pub parent: Option<u32>,
}

impl BvhNode {
    /// Check if this node is a leaf
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, BvhNodeKind::Leaf { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Primitive {
    id: u32,
    bounds: AABB,
    centroid: Vec3,
    removed: bool,
}

/// Traversal counters of the most recent query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BvhQueryStats {
    /// Nodes whose bounds were tested
    pub nodes_visited: usize,
    /// Objects whose own bounds were tested
    pub objects_tested: usize,
    /// Objects returned
    pub objects_returned: usize,
}

/// Bounding volume hierarchy over object ids
#[derive(Debug, Default)]
pub struct Bvh {
    config: BvhConfig,
    nodes: Vec<BvhNode>,
    primitives: Vec<Primitive>,
    /// Primitive indices in leaf order
    order: Vec<u32>,
    /// Object id -> primitive index
    id_to_primitive: HashMap<u32, u32>,
    /// Primitive index -> leaf node index
    primitive_leaf: Vec<u32>,
    dirty: HashSet<u32>,
    needs_rebuild: bool,
    last_stats: Cell<BvhQueryStats>,
}

impl Bvh {
    /// Create an empty BVH
    pub fn new(config: BvhConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Replace the configuration; takes effect on the next build
    pub fn set_config(&mut self, config: BvhConfig) {
        self.config = config;
    }

    /// Build the tree from a snapshot of `(id, bounds)` pairs
    pub fn build(&mut self, objects: impl IntoIterator<Item = (u32, AABB)>) {
        self.primitives.clear();
        self.id_to_primitive.clear();
        for (id, bounds) in objects {
            let index = self.primitives.len() as u32;
            self.primitives.push(Primitive {
                id,
                bounds,
                centroid: bounds.center(),
                removed: false,
            });
            self.id_to_primitive.insert(id, index);
        }
        self.rebuild();
    }

    /// Rebuild the tree from the current primitive snapshot
    pub fn rebuild(&mut self) {
        self.primitives.retain(|p| !p.removed);
        self.id_to_primitive = self
            .primitives
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i as u32))
            .collect();

        self.nodes.clear();
        self.order = (0..self.primitives.len() as u32).collect();
        self.primitive_leaf = vec![0; self.primitives.len()];
        self.dirty.clear();
        self.needs_rebuild = false;

        if self.primitives.is_empty() {
            return;
        }

        self.nodes.reserve(2 * self.primitives.len());
        let count = self.primitives.len() as u32;
        self.build_recursive(0, count, 0, None);

        log::debug!(
            "BVH built: {} objects, {} nodes, depth {}",
            self.primitives.len(),
            self.nodes.len(),
            self.depth()
        );
    }

    fn build_recursive(&mut self, begin: u32, end: u32, depth: u32, parent: Option<u32>) -> u32 {
        let node_index = self.nodes.len() as u32;

        let mut bounds = AABB::empty();
        let mut centroid_bounds = AABB::empty();
        for &p in &self.order[begin as usize..end as usize] {
            let primitive = &self.primitives[p as usize];
            bounds = bounds.merge(&primitive.bounds);
            centroid_bounds.expand_point(&primitive.centroid);
        }

        self.nodes.push(BvhNode {
            bounds,
            kind: BvhNodeKind::Leaf { first: begin, count: end - begin },
            parent,
        });

        if end - begin <= 1 || depth >= self.config.max_depth {
            for &p in &self.order[begin as usize..end as usize] {
                self.primitive_leaf[p as usize] = node_index;
            }
            return node_index;
        }

        let axis = centroid_bounds.longest_axis();
        let mid = begin + (end - begin) / 2;
        let primitives = &self.primitives;
        self.order[begin as usize..end as usize].select_nth_unstable_by(
            (mid - begin) as usize,
            |a, b| {
                let ca = primitives[*a as usize].centroid[axis];
                let cb = primitives[*b as usize].centroid[axis];
                ca.total_cmp(&cb).then(a.cmp(b))
            },
        );

        let left = self.build_recursive(begin, mid, depth + 1, Some(node_index));
        let right = self.build_recursive(mid, end, depth + 1, Some(node_index));
        self.nodes[node_index as usize].kind = BvhNodeKind::Internal { left, right };
        node_index
    }

    /// Update the bounds of a tracked object
    ///
    /// The tree is not repaired here; the object is marked dirty and the next
    /// [`Bvh::refit`] fixes ancestor bounds. Returns `false` for unknown ids.
    pub fn update(&mut self, id: u32, bounds: AABB) -> bool {
        let Some(&index) = self.id_to_primitive.get(&id) else {
            return false;
        };
        let primitive = &mut self.primitives[index as usize];
        primitive.bounds = bounds;
        primitive.centroid = bounds.center();
        self.dirty.insert(index);
        true
    }

    /// Add an object that was not part of the last build
    ///
    /// The object only becomes queryable after the next rebuild.
    pub fn insert(&mut self, id: u32, bounds: AABB) {
        if self.update(id, bounds) {
            return;
        }
        let index = self.primitives.len() as u32;
        self.primitives.push(Primitive {
            id,
            bounds,
            centroid: bounds.center(),
            removed: false,
        });
        self.id_to_primitive.insert(id, index);
        self.primitive_leaf.push(0);
        self.needs_rebuild = true;
    }

    /// Stop reporting an object; its slot is dropped on the next rebuild
    pub fn remove(&mut self, id: u32) -> bool {
        let Some(index) = self.id_to_primitive.remove(&id) else {
            return false;
        };
        self.primitives[index as usize].removed = true;
        self.dirty.remove(&index);
        self.needs_rebuild = true;
        true
    }

    /// Repair the tree after bounds updates
    ///
    /// Recomputes the bounds of every ancestor of a dirty object, or rebuilds
    /// when structural changes are pending or more objects are dirty than
    /// the refit threshold allows.
    pub fn refit(&mut self) {
        if self.needs_rebuild || self.dirty.len() > self.config.refit_threshold {
            self.rebuild();
            return;
        }
        if self.dirty.is_empty() || self.nodes.is_empty() {
            return;
        }

        let dirty: Vec<u32> = self.dirty.drain().collect();
        for primitive in dirty {
            let mut node = Some(self.primitive_leaf[primitive as usize]);
            while let Some(index) = node {
                let bounds = self.recompute_bounds(index);
                let entry = &mut self.nodes[index as usize];
                entry.bounds = bounds;
                node = entry.parent;
            }
        }
    }

    fn recompute_bounds(&self, node: u32) -> AABB {
        match self.nodes[node as usize].kind {
            BvhNodeKind::Leaf { first, count } => self.order[first as usize..(first + count) as usize]
                .iter()
                .map(|&p| &self.primitives[p as usize])
                .filter(|p| !p.removed)
                .fold(AABB::empty(), |acc, p| acc.merge(&p.bounds)),
            BvhNodeKind::Internal { left, right } => self.nodes[left as usize]
                .bounds
                .merge(&self.nodes[right as usize].bounds),
        }
    }

    /// Whether a rebuild or refit is pending
    pub fn is_dirty(&self) -> bool {
        self.needs_rebuild || !self.dirty.is_empty()
    }

    /// Collect ids whose bounds are not outside the frustum
    pub fn query_frustum(&self, frustum: &Frustum) -> Vec<u32> {
        let mut stats = BvhQueryStats::default();
        let mut results = Vec::new();
        if !self.nodes.is_empty() {
            self.query_frustum_node(0, frustum, Frustum::ALL_PLANES, &mut stats, &mut results);
        }
        self.finish_query(stats, results)
    }

    fn query_frustum_node(
        &self,
        node: u32,
        frustum: &Frustum,
        mask: u8,
        stats: &mut BvhQueryStats,
        results: &mut Vec<u32>,
    ) {
        stats.nodes_visited += 1;
        let entry = &self.nodes[node as usize];
        let mut child_mask = mask;
        let test = frustum.test_aabb_masked(&entry.bounds, &mut child_mask);
        if test == FrustumTest::Outside {
            return;
        }

        match entry.kind {
            BvhNodeKind::Leaf { first, count } => {
                for primitive in self.leaf_primitives(first, count) {
                    stats.objects_tested += 1;
                    let mut object_mask = child_mask;
                    if test == FrustumTest::Inside
                        || frustum.test_aabb_masked(&primitive.bounds, &mut object_mask).is_visible()
                    {
                        results.push(primitive.id);
                    }
                }
            }
            BvhNodeKind::Internal { left, right } => {
                self.query_frustum_node(left, frustum, child_mask, stats, results);
                self.query_frustum_node(right, frustum, child_mask, stats, results);
            }
        }
    }

    /// Collect ids whose bounds overlap a sphere
    pub fn query_sphere(&self, center: Vec3, radius: f32) -> Vec<u32> {
        self.query_with(
            |bounds| bounds.intersects_sphere(center, radius),
        )
    }

    /// Collect ids whose bounds overlap a box
    pub fn query_aabb(&self, query: &AABB) -> Vec<u32> {
        self.query_with(|bounds| bounds.intersects(query))
    }

    /// Collect `(id, entry distance)` for bounds hit by a ray, nearest first
    pub fn query_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<(u32, f32)> {
        let hit = |bounds: &AABB| {
            bounds
                .intersect_ray(origin, direction)
                .filter(|t| *t <= max_distance)
        };
        let ids = self.query_with(|bounds| hit(bounds).is_some());
        let mut hits: Vec<(u32, f32)> = ids
            .into_iter()
            .filter_map(|id| {
                let primitive = &self.primitives[*self.id_to_primitive.get(&id)? as usize];
                hit(&primitive.bounds).map(|t| (id, t))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }

    fn query_with(&self, test: impl Fn(&AABB) -> bool) -> Vec<u32> {
        let mut stats = BvhQueryStats::default();
        let mut results = Vec::new();
        if self.nodes.is_empty() {
            return self.finish_query(stats, results);
        }

        let mut stack = vec![0u32];
        while let Some(node) = stack.pop() {
            stats.nodes_visited += 1;
            let entry = &self.nodes[node as usize];
            if !test(&entry.bounds) {
                continue;
            }
            match entry.kind {
                BvhNodeKind::Leaf { first, count } => {
                    for primitive in self.leaf_primitives(first, count) {
                        stats.objects_tested += 1;
                        if test(&primitive.bounds) {
                            results.push(primitive.id);
                        }
                    }
                }
                BvhNodeKind::Internal { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        self.finish_query(stats, results)
    }

    fn leaf_primitives(&self, first: u32, count: u32) -> impl Iterator<Item = &Primitive> {
        self.order[first as usize..(first + count) as usize]
            .iter()
            .map(|&p| &self.primitives[p as usize])
            .filter(|p| !p.removed)
    }

    fn finish_query(&self, mut stats: BvhQueryStats, results: Vec<u32>) -> Vec<u32> {
        stats.objects_returned = results.len();
        self.last_stats.set(stats);
        results
    }

    /// Traversal counters of the most recent query
    pub fn last_query_stats(&self) -> BvhQueryStats {
        self.last_stats.get()
    }

    /// Maximum root-to-leaf depth, 0 for an empty tree
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0u32, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let BvhNodeKind::Internal { left, right } = self.nodes[node as usize].kind {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        max_depth
    }

    /// All nodes, root first
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live objects tracked
    pub fn object_count(&self) -> usize {
        self.id_to_primitive.len()
    }

    /// Check if the tree has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node and object
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.primitives.clear();
        self.order.clear();
        self.id_to_primitive.clear();
        self.primitive_leaf.clear();
        self.dirty.clear();
        self.needs_rebuild = false;
    }
}
