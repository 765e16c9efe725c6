use crate::{
    heightfield::Heightfield,
    hierarchy::{TriangleHierarchy, TriangleNode},
};
use bevy::{
    ecs::component::Component,
    log::info,
    math::{IVec2, Vec3},
};
use ndarray::Array2;

/// Memoized per-diamond height errors and threshold sphere radii.
///
/// Both tables are dense `(N+1)x(N+1)` arrays indexed by the diamond point.
/// The two triangles of a diamond share one entry, which is what lets the
/// selector make crack-free refinement decisions. Errors are stored in
/// normalized height units (multiply by `extent.y` for world space), radii in
/// world units.
///
/// Entries become stale whenever the resolution, subdivision, extent or the
/// height samples change. Extent changes only invalidate the radii; the
/// normalized errors do not depend on it.
#[derive(Component, Clone, Debug)]
pub struct TerrainMetrics {
    errors: Array2<f32>,
    radii: Array2<f32>,
    processed: Array2<bool>,
    root_error: f32,
    root_radius: f32,
    extent: Vec3,
    subdivide: u32,
}

impl TerrainMetrics {
    pub fn new(size: u32) -> Self {
        let n = size as usize + 1;
        Self {
            errors: Array2::zeros((n, n)),
            radii: Array2::zeros((n, n)),
            processed: Array2::from_elem((n, n), false),
            root_error: 0.0,
            root_radius: 0.0,
            extent: Vec3::ZERO,
            subdivide: 0,
        }
    }

    /// Runs both full bottom-up passes from the root diamond. The two root
    /// triangles share their apex, so a single call covers them both.
    pub fn recompute(
        &mut self,
        hierarchy: &TriangleHierarchy,
        heights: &Heightfield,
        extent: Vec3,
    ) {
        self.extent = extent;
        self.subdivide = hierarchy.subdivide();

        self.processed.fill(false);
        self.root_error = self.compute_error(hierarchy, heights, hierarchy.root(0));
        info!("root error = {}", self.root_error);

        self.recompute_radii(hierarchy, heights, extent);
    }

    /// Refreshes the radius table only, for extent changes.
    pub fn recompute_radii(
        &mut self,
        hierarchy: &TriangleHierarchy,
        heights: &Heightfield,
        extent: Vec3,
    ) {
        self.extent = extent;

        self.processed.fill(false);
        self.root_radius = self.compute_radius(hierarchy, heights, hierarchy.root(0));
        info!("root radius = {}", self.root_radius);
    }

    /// The diamond error at a grid index, in normalized height units.
    #[inline]
    pub fn error(&self, x: u32, y: u32) -> f32 {
        self.errors[[y as usize, x as usize]]
    }

    /// The threshold sphere radius at a grid index, in world units.
    #[inline]
    pub fn radius(&self, x: u32, y: u32) -> f32 {
        self.radii[[y as usize, x as usize]]
    }

    #[inline]
    pub fn root_error(&self) -> f32 {
        self.root_error
    }

    #[inline]
    pub fn root_radius(&self) -> f32 {
        self.root_radius
    }

    /// The extent the radius table was computed with.
    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.extent
    }

    /// The subdivide count the tables were computed with.
    #[inline]
    pub fn subdivide(&self) -> u32 {
        self.subdivide
    }

    /// Nested diamond error, the maximum of the apex interpolation error and
    /// all subtree errors of both diamond members. Leaves cannot be refined
    /// further and contribute exactly zero.
    fn compute_error(
        &mut self,
        hierarchy: &TriangleHierarchy,
        heights: &Heightfield,
        node: TriangleNode,
    ) -> f32 {
        if hierarchy.is_leaf(node) {
            return 0.0;
        }
        // non-leaf apexes always lie on a sample
        let Some((x, y)) = node.apex_sample() else {
            return 0.0;
        };
        let index = [y as usize, x as usize];
        if self.processed[index] {
            return self.errors[index];
        }

        let [a, b] = node.hypotenuse();
        let interpolated =
            (sample_height(heights, a) + sample_height(heights, b)) / 2.0;
        let mut error = (heights.normalized_height(x, y) - interpolated).abs();

        error = error
            .max(self.compute_error(hierarchy, heights, hierarchy.left_child(node)))
            .max(self.compute_error(hierarchy, heights, hierarchy.right_child(node)));

        if let Some(mate) = hierarchy.diamond_neighbor(node) {
            error = error
                .max(self.compute_error(hierarchy, heights, hierarchy.left_child(mate)))
                .max(self.compute_error(hierarchy, heights, hierarchy.right_child(mate)));
        }

        self.processed[index] = true;
        self.errors[index] = error;
        error
    }

    /// Threshold sphere radius, centered at the diamond point. The sphere
    /// contains the triangle's own footprint and the threshold spheres of all
    /// children of both diamond members, which keeps the table monotone along
    /// every refinement path.
    fn compute_radius(
        &mut self,
        hierarchy: &TriangleHierarchy,
        heights: &Heightfield,
        node: TriangleNode,
    ) -> f32 {
        let center = sphere_center(heights, self.extent, node);

        if hierarchy.is_leaf(node) {
            // degenerate sphere of the single leaf triangle
            return corner_distance(heights, self.extent, node, center);
        }
        let Some((x, y)) = node.apex_sample() else {
            return corner_distance(heights, self.extent, node, center);
        };
        let index = [y as usize, x as usize];
        if self.processed[index] {
            return self.radii[index];
        }

        let mut radius = corner_distance(heights, self.extent, node, center);

        let mut members = vec![node];
        if let Some(mate) = hierarchy.diamond_neighbor(node) {
            radius = radius.max(corner_distance(heights, self.extent, mate, center));
            members.push(mate);
        }
        for member in members {
            for child in [hierarchy.left_child(member), hierarchy.right_child(member)] {
                let child_center = sphere_center(heights, self.extent, child);
                let child_radius = self.compute_radius(hierarchy, heights, child);
                radius = radius.max(center.distance(child_center) + child_radius);
            }
        }

        self.processed[index] = true;
        self.radii[index] = radius;
        radius
    }
}

/// Normalized height at a corner given in half-sample steps.
#[inline]
fn sample_height(heights: &Heightfield, corner: IVec2) -> f32 {
    heights.normalized_height((corner.x / 2) as u32, (corner.y / 2) as u32)
}

/// World position of a corner given in half-sample steps.
#[inline]
fn corner_world(heights: &Heightfield, extent: Vec3, corner: IVec2) -> Vec3 {
    heights.world_point((corner.x / 2) as u32, (corner.y / 2) as u32, extent)
}

/// The threshold sphere center: the diamond point's world position. Leaf
/// apexes between samples use the interpolated height of the bisected edge.
pub(crate) fn sphere_center(heights: &Heightfield, extent: Vec3, node: TriangleNode) -> Vec3 {
    match node.apex_sample() {
        Some((x, y)) => heights.world_point(x, y, extent),
        None => {
            let [a, b] = node.hypotenuse();
            (corner_world(heights, extent, a) + corner_world(heights, extent, b)) / 2.0
        }
    }
}

fn corner_distance(
    heights: &Heightfield,
    extent: Vec3,
    node: TriangleNode,
    center: Vec3,
) -> f32 {
    node.corners()
        .into_iter()
        .map(|corner| center.distance(corner_world(heights, extent, corner)))
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn flat_field(size: u32) -> Heightfield {
        Heightfield::from_samples(size, &vec![100; (size * size) as usize], 255).unwrap()
    }

    fn random_field(size: u32) -> Heightfield {
        let mut rng = rand::rng();
        let samples: Vec<u16> = (0..size * size).map(|_| rng.random_range(0..=255)).collect();
        Heightfield::from_samples(size, &samples, 255).unwrap()
    }

    #[test]
    fn flat_field_has_zero_error_and_positive_radius() {
        let hierarchy = TriangleHierarchy::new(4, 1).unwrap();
        let heights = flat_field(4);
        let mut metrics = TerrainMetrics::new(4);
        metrics.recompute(&hierarchy, &heights, Vec3::new(4.0, 1.0, 4.0));

        assert_eq!(metrics.root_error(), 0.0);
        for y in 0..=4 {
            for x in 0..=4 {
                assert_eq!(metrics.error(x, y), 0.0);
            }
        }
        // the footprint alone drives the radius
        assert!(metrics.root_radius() > 0.0);
    }

    #[test]
    fn tables_are_monotone_along_refinement() {
        let hierarchy = TriangleHierarchy::new(8, 1).unwrap();
        let heights = random_field(8);
        let mut metrics = TerrainMetrics::new(8);
        metrics.recompute(&hierarchy, &heights, Vec3::new(8.0, 2.0, 8.0));

        let mut stack = vec![hierarchy.root(0), hierarchy.root(1)];
        while let Some(node) = stack.pop() {
            if hierarchy.is_leaf(node) {
                continue;
            }
            let (x, y) = node.apex_sample().unwrap();
            for child in [hierarchy.left_child(node), hierarchy.right_child(node)] {
                if !hierarchy.is_leaf(child) {
                    let (cx, cy) = child.apex_sample().unwrap();
                    assert!(metrics.error(x, y) >= metrics.error(cx, cy));
                    assert!(metrics.radius(x, y) >= metrics.radius(cx, cy));
                }
                stack.push(child);
            }
        }
    }

    #[test]
    fn recomputation_is_idempotent() {
        let hierarchy = TriangleHierarchy::new(8, 1).unwrap();
        let heights = random_field(8);
        let extent = Vec3::new(10.0, 1.0, 10.0);

        let mut metrics = TerrainMetrics::new(8);
        metrics.recompute(&hierarchy, &heights, extent);
        let errors = metrics.errors.clone();
        let radii = metrics.radii.clone();
        let root_error = metrics.root_error();

        metrics.recompute(&hierarchy, &heights, extent);
        assert_eq!(metrics.errors, errors);
        assert_eq!(metrics.radii, radii);
        assert_eq!(metrics.root_error(), root_error);
    }

    #[test]
    fn memoized_revisits_short_circuit() {
        let hierarchy = TriangleHierarchy::new(4, 1).unwrap();
        let heights = random_field(4);
        let mut metrics = TerrainMetrics::new(4);
        metrics.recompute(&hierarchy, &heights, Vec3::ONE);

        // after a full pass the root diamond is marked processed, so a direct
        // revisit returns the stored value
        let root = hierarchy.root(0);
        let again = metrics.compute_error(&hierarchy, &heights, root);
        assert_eq!(again, metrics.root_error());
    }

    #[test]
    fn extent_rescales_radii_but_not_errors() {
        let hierarchy = TriangleHierarchy::new(8, 1).unwrap();
        let heights = random_field(8);
        let mut metrics = TerrainMetrics::new(8);
        metrics.recompute(&hierarchy, &heights, Vec3::new(8.0, 1.0, 8.0));

        let errors = metrics.errors.clone();
        let radius = metrics.root_radius();

        metrics.recompute_radii(&hierarchy, &heights, Vec3::new(16.0, 1.0, 16.0));
        assert_eq!(metrics.errors, errors);
        assert!(metrics.root_radius() > radius);
    }

    #[test]
    fn boundary_diamonds_use_their_own_half_only() {
        // an apex on the grid edge has no mate; the computation must still
        // terminate and produce a finite value there
        let hierarchy = TriangleHierarchy::new(4, 1).unwrap();
        let heights = random_field(4);
        let mut metrics = TerrainMetrics::new(4);
        metrics.recompute(&hierarchy, &heights, Vec3::new(4.0, 1.0, 4.0));

        let edge_child = hierarchy.left_child(hierarchy.root(0));
        assert!(hierarchy.diamond_neighbor(edge_child).is_none());
        let (x, y) = edge_child.apex_sample().unwrap();
        assert!(metrics.error(x, y).is_finite());
        assert!(metrics.radius(x, y) > 0.0);
    }
}
