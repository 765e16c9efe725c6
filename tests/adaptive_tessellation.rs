//! End-to-end exercise of the precompute and selection pipeline on a small
//! flat terrain: a 4x4 grid, unit subdivision, extent (4, 1, 4).

use bevy::math::{Vec2, Vec3, Vec4Swizzles};
use bevy_rtin::prelude::*;
use bevy_rtin::selector::{tessellate, AdaptationState, VisualizationStyle};

fn flat_terrain() -> (TriangleHierarchy, Heightfield, TerrainMetrics, Vec3) {
    let hierarchy = TriangleHierarchy::new(4, 1).unwrap();
    let heights = Heightfield::from_samples(4, &[128; 16], 255).unwrap();
    let extent = Vec3::new(4.0, 1.0, 4.0);
    let mut metrics = TerrainMetrics::new(4);
    metrics.recompute(&hierarchy, &heights, extent);
    (hierarchy, heights, metrics, extent)
}

fn select_at_depth(
    hierarchy: &TriangleHierarchy,
    heights: &Heightfield,
    metrics: &TerrainMetrics,
    extent: Vec3,
    depth: u16,
) -> TessellationBuffers {
    let state = AdaptationState {
        mode: AdaptationMode::TreeDepth,
        eye_world: Vec3::new(0.0, 2.0, 0.0),
        view_factor: 600.0,
        pixel_threshold: 5.0,
        adapted_tree_depth: depth,
        max_tree_depth: hierarchy.tree_depth(),
    };
    let mut buffers = TessellationBuffers::default();
    tessellate(
        hierarchy,
        heights,
        metrics,
        extent,
        &state,
        &VisualizationStyle::default(),
        &mut buffers,
    );
    buffers
}

fn footprint_area(buffers: &TessellationBuffers) -> f32 {
    let mut area = 0.0;
    for (position, normal) in buffers.positions.iter().zip(&buffers.normals) {
        let c = position.xy();
        let a = c + 2.0 * (position.zw() - c);
        let b = c + 2.0 * (Vec2::new(normal.x, normal.y) - c);
        area += (a - c).perp_dot(b - c).abs() / 2.0;
    }
    area
}

#[test]
fn flat_terrain_metrics_are_exact() {
    let (_, _, metrics, _) = flat_terrain();

    // constant heights interpolate exactly, while the sphere radii are driven
    // by the geometric footprint alone
    assert_eq!(metrics.root_error(), 0.0);
    assert!(metrics.root_radius() > 0.0);
    assert!(metrics.root_radius() >= 2.0); // at least half the ground diagonal of a root half
}

#[test]
fn depth_zero_yields_the_two_root_halves() {
    let (hierarchy, heights, metrics, extent) = flat_terrain();
    let buffers = select_at_depth(&hierarchy, &heights, &metrics, extent, 0);

    assert_eq!(buffers.positions.len(), 2);
    assert_eq!(buffers.triangle_count(), 2);
    // each root covers half the 4x4 sample grid
    assert_eq!(footprint_area(&buffers), 16.0);
}

#[test]
fn full_depth_yields_the_leaf_tessellation() {
    let (hierarchy, heights, metrics, extent) = flat_terrain();
    let buffers = select_at_depth(
        &hierarchy,
        &heights,
        &metrics,
        extent,
        hierarchy.tree_depth(),
    );

    // 2 triangles per unit cell of the 4x4 grid
    assert_eq!(buffers.positions.len(), 32);
    assert_eq!(footprint_area(&buffers), 16.0);
}

#[test]
fn error_modes_stop_at_the_roots_on_flat_ground() {
    let (hierarchy, heights, metrics, extent) = flat_terrain();

    // zero error everywhere: the selector refines only while the eye sits
    // inside a threshold sphere
    let state = AdaptationState {
        mode: AdaptationMode::IsotropicError,
        eye_world: Vec3::new(0.0, 100.0, 0.0),
        view_factor: 600.0,
        pixel_threshold: 5.0,
        adapted_tree_depth: 0,
        max_tree_depth: hierarchy.tree_depth(),
    };
    let mut buffers = TessellationBuffers::default();
    tessellate(
        &hierarchy,
        &heights,
        &metrics,
        extent,
        &state,
        &VisualizationStyle::default(),
        &mut buffers,
    );

    assert_eq!(buffers.positions.len(), 2);
    assert_eq!(footprint_area(&buffers), 16.0);
}
