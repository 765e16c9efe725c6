use crate::{
    heightfield::Heightfield,
    hierarchy::TriangleHierarchy,
    selector::TessellationBuffers,
    terrain::{Terrain, TerrainConfig},
};
use bevy::prelude::*;

/// Debug visualization state, driven by the keyboard.
///
/// `A`: cycle the adaptation mode (shift: backwards),
/// `D`: raise the adapted tree depth (shift: lower),
/// `S`: double the subdivide count (shift: halve),
/// `E`: toggle the error spheres,
/// `R`: toggle the threshold spheres.
#[derive(Resource, Clone, Copy, Debug)]
pub struct DebugTerrain {
    pub show_error_spheres: bool,
    pub show_threshold_spheres: bool,
    /// Blend weight of the error driven triangle coloring.
    pub error_lambda: f32,
    /// Blend weight of the radius driven triangle coloring.
    pub radius_lambda: f32,
}

impl Default for DebugTerrain {
    fn default() -> Self {
        Self {
            show_error_spheres: false,
            show_threshold_spheres: false,
            error_lambda: 0.5,
            radius_lambda: 0.5,
        }
    }
}

pub(crate) fn toggle_debug(
    input: Res<ButtonInput<KeyCode>>,
    mut debug_terrain: ResMut<DebugTerrain>,
    mut terrains: Query<(&mut TerrainConfig, Option<&Heightfield>), With<Terrain>>,
) {
    let shift = input.pressed(KeyCode::ShiftLeft) || input.pressed(KeyCode::ShiftRight);

    if input.just_pressed(KeyCode::KeyE) {
        debug_terrain.show_error_spheres = !debug_terrain.show_error_spheres;
        info!("error spheres: {}", debug_terrain.show_error_spheres);
    }
    if input.just_pressed(KeyCode::KeyR) {
        debug_terrain.show_threshold_spheres = !debug_terrain.show_threshold_spheres;
        info!("threshold spheres: {}", debug_terrain.show_threshold_spheres);
    }

    for (mut config, heights) in &mut terrains {
        if input.just_pressed(KeyCode::KeyA) {
            config.adaptation_mode = if shift {
                config.adaptation_mode.previous()
            } else {
                config.adaptation_mode.next()
            };
            info!("adaptation mode: {:?}", config.adaptation_mode);
        }
        if input.just_pressed(KeyCode::KeyD) {
            // stepping stops at the leaf level once the heights are known
            let leaf_level = heights
                .and_then(|heights| {
                    TriangleHierarchy::new(heights.size(), config.subdivide_count()).ok()
                })
                .map_or(u16::MAX, |hierarchy| hierarchy.tree_depth());
            config.adapted_tree_depth = if shift {
                config.adapted_tree_depth.saturating_sub(1)
            } else {
                (config.adapted_tree_depth + 1).min(leaf_level)
            };
            info!("adapted tree depth: {}", config.adapted_tree_depth);
        }
        if input.just_pressed(KeyCode::KeyS) {
            let stepped = if shift {
                (config.subdivide_count() / 2).max(1)
            } else {
                config.subdivide_count() * 2
            };
            match config.set_subdivide_count(stepped) {
                Ok(()) => info!("subdivide count: {}", config.subdivide_count()),
                Err(err) => warn!("{err:#}"),
            }
        }
    }
}

/// Draws the error or threshold spheres emitted by the selector.
pub(crate) fn draw_debug_spheres(
    debug_terrain: Res<DebugTerrain>,
    mut gizmos: Gizmos,
    terrains: Query<&TessellationBuffers, With<Terrain>>,
) {
    if !debug_terrain.show_error_spheres && !debug_terrain.show_threshold_spheres {
        return;
    }

    for buffers in &terrains {
        for (sphere, color) in buffers.spheres.iter().zip(&buffers.sphere_colors) {
            gizmos.sphere(
                Isometry3d::from_translation(sphere.truncate()),
                sphere.w,
                Color::srgba(color[0], color[1], color[2], color[3]),
            );
        }
    }
}
