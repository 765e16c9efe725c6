use crate::{
    heightfield::Heightfield,
    hierarchy::{TriangleHierarchy, TriangleNode},
    metrics::{sphere_center, TerrainMetrics},
};
use bevy::{
    ecs::component::Component,
    math::{Vec2, Vec3, Vec4},
};
use serde::{Deserialize, Serialize};

/// How the selector decides whether a triangle is refined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaptationMode {
    /// Freeze the current triangulation; only the two roots are selected when
    /// no triangulation exists yet.
    None,
    /// Refine uniformly down to a fixed tree depth.
    #[default]
    TreeDepth,
    /// Threshold the screen-space projection of the diamond error.
    IsotropicError,
    /// Like [`AdaptationMode::IsotropicError`], but weights the vertical
    /// error by its foreshortening under the current view direction.
    AnisotropicError,
}

impl AdaptationMode {
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::TreeDepth,
            Self::TreeDepth => Self::IsotropicError,
            Self::IsotropicError => Self::AnisotropicError,
            Self::AnisotropicError => Self::None,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            Self::None => Self::AnisotropicError,
            Self::TreeDepth => Self::None,
            Self::IsotropicError => Self::TreeDepth,
            Self::AnisotropicError => Self::IsotropicError,
        }
    }
}

/// Transient per-frame input of the selector, rebuilt from the viewer state
/// before every traversal.
#[derive(Clone, Copy, Debug)]
pub struct AdaptationState {
    pub mode: AdaptationMode,
    /// World location of the eye.
    pub eye_world: Vec3,
    /// Pixels per unit angle: `viewport_height / (2 * tan(fov_y / 2))`.
    pub view_factor: f32,
    /// Screen-space error bound in pixels.
    pub pixel_threshold: f32,
    /// Depth cutoff for [`AdaptationMode::TreeDepth`].
    pub adapted_tree_depth: u16,
    /// Depth cap for the error driven modes.
    pub max_tree_depth: u16,
}

/// Visualization inputs of the selector: sphere toggles and the blend weights
/// for error and radius based triangle coloring.
#[derive(Clone, Copy, Debug)]
pub struct VisualizationStyle {
    pub error_lambda: f32,
    pub radius_lambda: f32,
    pub show_error_spheres: bool,
    pub show_threshold_spheres: bool,
}

impl Default for VisualizationStyle {
    fn default() -> Self {
        Self {
            error_lambda: 0.5,
            radius_lambda: 0.5,
            show_error_spheres: false,
            show_threshold_spheres: false,
        }
    }
}

/// The frame's selected triangle set, flattened into vertex attribute arrays
/// for instanced submission.
///
/// Per triangle, `positions` packs the right-angle corner and the midpoint of
/// the first leg, `normals` the midpoint of the second leg and the subdivide
/// count, all in sample coordinates. The external rasterizer expands each
/// record into `subdivide^2` sub-triangles.
#[derive(Component, Clone, Debug, Default)]
pub struct TessellationBuffers {
    pub positions: Vec<Vec4>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<[f32; 4]>,
    /// Debug sphere centers and radii (`xyz` + radius).
    pub spheres: Vec<Vec4>,
    pub sphere_colors: Vec<[f32; 4]>,
    pub subdivide: u32,
}

impl TessellationBuffers {
    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.colors.clear();
        self.spheres.clear();
        self.sphere_colors.clear();
    }

    /// Number of triangles the rasterizer will draw, counting the instanced
    /// subdivision of every selected batch.
    pub fn triangle_count(&self) -> usize {
        self.positions.len() * (self.subdivide * self.subdivide) as usize
    }
}

/// Colors of the eight triangle orientations.
const ORIENTATION_COLORS: [[f32; 4]; 8] = [
    [1.0, 0.0, 0.0, 1.0],
    [1.0, 0.75, 0.0, 1.0],
    [1.0, 1.0, 0.0, 1.0],
    [0.65, 1.0, 0.4, 1.0],
    [0.0, 0.49, 0.25, 1.0],
    [0.0, 0.62, 0.875, 1.0],
    [0.0, 0.41, 0.7, 1.0],
    [0.45, 0.47, 0.47, 1.0],
];

/// Extracts the adaptive triangulation by state-less top-down refinement from
/// both root triangles, relying on diamond monotonicity of the precomputed
/// tables for crack-free stopping decisions.
pub fn tessellate(
    hierarchy: &TriangleHierarchy,
    heights: &Heightfield,
    metrics: &TerrainMetrics,
    extent: Vec3,
    state: &AdaptationState,
    style: &VisualizationStyle,
    buffers: &mut TessellationBuffers,
) {
    buffers.clear();
    buffers.subdivide = hierarchy.subdivide();

    for i in 0..2 {
        refine(
            hierarchy, heights, metrics, extent, state, style, buffers,
            hierarchy.root(i),
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn refine(
    hierarchy: &TriangleHierarchy,
    heights: &Heightfield,
    metrics: &TerrainMetrics,
    extent: Vec3,
    state: &AdaptationState,
    style: &VisualizationStyle,
    buffers: &mut TessellationBuffers,
    node: TriangleNode,
) {
    if is_accurate(hierarchy, heights, metrics, extent, state, node) {
        emit(heights, metrics, extent, style, buffers, node);
    } else {
        for child in [hierarchy.left_child(node), hierarchy.right_child(node)] {
            refine(
                hierarchy, heights, metrics, extent, state, style, buffers, child,
            );
        }
    }
}

/// Checks whether a triangle approximates the surface well enough under the
/// chosen adaptation mode. The error driven tests read only the per-diamond
/// tables, so both members of a diamond always agree.
fn is_accurate(
    hierarchy: &TriangleHierarchy,
    heights: &Heightfield,
    metrics: &TerrainMetrics,
    extent: Vec3,
    state: &AdaptationState,
    node: TriangleNode,
) -> bool {
    match state.mode {
        AdaptationMode::None => true,
        AdaptationMode::TreeDepth => {
            hierarchy.is_leaf(node) || hierarchy.level(node) >= state.adapted_tree_depth
        }
        AdaptationMode::IsotropicError | AdaptationMode::AnisotropicError => {
            if hierarchy.is_leaf(node) || hierarchy.level(node) >= state.max_tree_depth {
                return true;
            }
            let Some((x, y)) = node.apex_sample() else {
                return true;
            };

            let diamond_point = heights.world_point(x, y, extent);
            let distance = state.eye_world.distance(diamond_point);
            let radius = metrics.radius(x, y);
            let mut error_world = metrics.error(x, y) * extent.y;

            if state.mode == AdaptationMode::AnisotropicError && distance > 0.0 {
                // a vertical error seen along the vertical projects to nothing
                let to = diamond_point - state.eye_world;
                error_world *= Vec2::new(to.x, to.z).length() / distance;
            }

            let pixel_error =
                state.view_factor * error_world / distance.max(radius).max(1e-6);

            pixel_error < state.pixel_threshold && distance > radius
        }
    }
}

fn emit(
    heights: &Heightfield,
    metrics: &TerrainMetrics,
    extent: Vec3,
    style: &VisualizationStyle,
    buffers: &mut TessellationBuffers,
    node: TriangleNode,
) {
    // corners are in half-sample steps, attributes in sample coordinates
    let [c, a, b] = node.corners().map(|v| Vec2::new(v.x as f32, v.y as f32) / 2.0);
    let first_midpoint = (c + a) / 2.0;
    let second_midpoint = (c + b) / 2.0;

    let color = node_color(metrics, style, node);

    buffers
        .positions
        .push(Vec4::new(c.x, c.y, first_midpoint.x, first_midpoint.y));
    buffers.normals.push(Vec3::new(
        second_midpoint.x,
        second_midpoint.y,
        buffers.subdivide as f32,
    ));
    buffers.colors.push(color);

    if let Some((x, y)) = node.apex_sample() {
        let center = sphere_center(heights, extent, node);
        if style.show_error_spheres {
            let radius = metrics.error(x, y) * extent.y;
            buffers.spheres.push(center.extend(radius));
            buffers.sphere_colors.push(color);
        }
        if style.show_threshold_spheres {
            buffers.spheres.push(center.extend(metrics.radius(x, y)));
            buffers.sphere_colors.push(color);
        }
    }
}

/// Triangle color: the orientation palette entry, blended towards the error
/// and radius color maps normalized by the root diamond values.
fn node_color(
    metrics: &TerrainMetrics,
    style: &VisualizationStyle,
    node: TriangleNode,
) -> [f32; 4] {
    let orientation = ORIENTATION_COLORS[(node.omega & 7) as usize];

    let lambda = style.error_lambda.max(style.radius_lambda);
    let Some((x, y)) = node.apex_sample() else {
        return orientation;
    };
    if lambda < 1e-3 {
        return orientation;
    }

    let v = metrics.error(x, y) / metrics.root_error().max(1e-6);
    let w = metrics.radius(x, y) / metrics.root_radius().max(1e-6);
    let error_color = Vec4::new(v, 0.5, 1.0 - v, 1.0);
    let radius_color = Vec4::new(0.5, w, 0.5, 1.0);

    let mixed = (style.error_lambda * error_color + style.radius_lambda * radius_color)
        / (style.error_lambda + style.radius_lambda);
    let orientation = Vec4::from_array(orientation);

    (lambda * mixed + (1.0 - lambda) * orientation).to_array()
}
