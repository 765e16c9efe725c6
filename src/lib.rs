//! Adaptive terrain tessellation for the Bevy engine.
//!
//! The crate triangulates a square heightfield with a hierarchy of right
//! triangles: every triangle splits along its longest edge into two children,
//! and the implicit binary tree rooted at the two halves of the terrain square
//! reaches down to unit cells. Per diamond (the pair of triangles sharing a
//! bisected edge) a height error and a bounding sphere radius are precomputed
//! bottom-up, so the per-frame selector can walk the tree top-down and stop as
//! soon as a triangle's screen-space error falls below a pixel threshold. The
//! decisions are memoized per diamond, which makes every selected
//! triangulation crack-free by construction.
//!
//! [`TerrainPlugin`] wires the pipeline into the app: descriptor assets
//! configure terrain entities, height maps are extracted into
//! [`heightfield::Heightfield`] stores, the metric tables recompute when their
//! inputs change, and each frame the selected triangle set is expanded into a
//! mesh. The flat attribute buffers of [`selector::TessellationBuffers`]
//! remain the public interface for custom instanced render paths.

pub mod debug;
pub mod heightfield;
pub mod hierarchy;
pub mod metrics;
pub mod render;
pub mod selector;
pub mod terrain;
pub mod terrain_view;

use crate::{
    debug::{draw_debug_spheres, toggle_debug, DebugTerrain},
    render::{tessellate_terrains, upload_meshes},
    terrain::{apply_descriptors, update_heightfield, update_metrics, TerrainDescriptor},
    terrain_view::{update_frame_view, FrameView},
};
use bevy::prelude::*;
use bevy_common_assets::ron::RonAssetPlugin;

pub mod prelude {
    pub use crate::{
        debug::DebugTerrain,
        heightfield::Heightfield,
        hierarchy::{TriangleHierarchy, TriangleNode},
        metrics::TerrainMetrics,
        selector::{AdaptationMode, TessellationBuffers},
        terrain::{Terrain, TerrainConfig, TerrainDescriptor, TerrainDescriptorHandle},
        terrain_view::{FrameView, TerrainView},
        TerrainBundle, TerrainPlugin,
    };
}

/// Registers the terrain pipeline: descriptor application, height extraction,
/// metric recomputation, view update, adaptive selection, mesh upload and the
/// debug overlay, chained in that order.
pub struct TerrainPlugin;

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(RonAssetPlugin::<TerrainDescriptor>::new(&["terrain.ron"]))
            .init_resource::<FrameView>()
            .init_resource::<DebugTerrain>()
            .add_systems(
                Update,
                (
                    apply_descriptors,
                    update_heightfield,
                    update_metrics,
                    update_frame_view,
                    toggle_debug,
                    tessellate_terrains,
                    upload_meshes,
                    draw_debug_spheres,
                )
                    .chain(),
            );
    }
}

/// Everything needed to spawn a terrain entity configured in code. Terrains
/// driven by a `.terrain.ron` asset spawn a
/// [`terrain::TerrainDescriptorHandle`] instead.
#[derive(Bundle)]
pub struct TerrainBundle {
    pub terrain: terrain::Terrain,
    pub config: terrain::TerrainConfig,
    pub transform: Transform,
    pub visibility: Visibility,
}

impl TerrainBundle {
    pub fn new(height_map: Handle<Image>) -> Self {
        Self {
            terrain: terrain::Terrain,
            config: terrain::TerrainConfig::new(height_map),
            transform: Transform::default(),
            visibility: Visibility::default(),
        }
    }
}
