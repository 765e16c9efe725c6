use crate::{
    heightfield::Heightfield,
    hierarchy::TriangleHierarchy,
    metrics::TerrainMetrics,
    selector::{AdaptationMode, TessellationBuffers},
};
use anyhow::{ensure, Result};
use bevy::{prelude::*, utils::HashSet};
use serde::{Deserialize, Serialize};

/// Marker component of a terrain entity.
#[derive(Component, Clone, Copy)]
pub struct Terrain;

/// The tunables of one terrain.
///
/// Changing the extent or the subdivide count invalidates the precomputed
/// metric tables; the adaptation mode, thresholds and depth bounds only steer
/// the per-frame selector and never trigger a recompute.
#[derive(Component, Clone, Debug)]
pub struct TerrainConfig {
    /// World size of the terrain: ground extent in x/z, height scale in y.
    pub extent: Vec3,
    /// Side length of an instanced triangle batch, a power of two.
    subdivide_count: u32,
    pub adaptation_mode: AdaptationMode,
    /// Screen-space error bound in pixels, for the error driven modes.
    pub pixel_threshold: f32,
    /// Depth cutoff for [`AdaptationMode::TreeDepth`].
    pub adapted_tree_depth: u16,
    /// Depth cap for the error driven modes.
    pub max_tree_depth: u16,
    /// The grayscale height source.
    pub height_map: Handle<Image>,
    /// Optional color overlay sampled by the material.
    pub color_map: Option<Handle<Image>>,
}

impl TerrainConfig {
    pub fn new(height_map: Handle<Image>) -> Self {
        Self {
            extent: Vec3::new(20.0, 0.4, 10.0),
            subdivide_count: 1,
            adaptation_mode: AdaptationMode::default(),
            pixel_threshold: 5.0,
            adapted_tree_depth: 5,
            max_tree_depth: 48,
            height_map,
            color_map: None,
        }
    }

    #[inline]
    pub fn subdivide_count(&self) -> u32 {
        self.subdivide_count
    }

    /// Sets the batch granularity. Fails without touching the current value
    /// if the count is not a power of two in `[1, 256]`; whether it divides
    /// the heightfield resolution is checked once the heights are known.
    pub fn set_subdivide_count(&mut self, subdivide_count: u32) -> Result<()> {
        ensure!(
            subdivide_count.is_power_of_two() && subdivide_count <= 256,
            "subdivide count {subdivide_count} is not a power of two in [1, 256]"
        );
        self.subdivide_count = subdivide_count;
        Ok(())
    }
}

/// Serialized terrain description, loadable as a `.terrain.ron` asset.
#[derive(Asset, TypePath, Clone, Debug, Serialize, Deserialize)]
pub struct TerrainDescriptor {
    pub height_map: String,
    #[serde(default)]
    pub color_map: Option<String>,
    pub extent: [f32; 3],
    #[serde(default = "default_subdivide_count")]
    pub subdivide_count: u32,
    #[serde(default)]
    pub adaptation_mode: AdaptationMode,
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: f32,
    #[serde(default = "default_adapted_tree_depth")]
    pub adapted_tree_depth: u16,
}

fn default_subdivide_count() -> u32 {
    1
}

fn default_pixel_threshold() -> f32 {
    5.0
}

fn default_adapted_tree_depth() -> u16 {
    5
}

/// Attach to an entity to configure it from a [`TerrainDescriptor`] asset.
#[derive(Component, Clone)]
pub struct TerrainDescriptorHandle(pub Handle<TerrainDescriptor>);

/// Remembers which image asset the current heightfield was extracted from.
#[derive(Component, Clone, Copy)]
pub(crate) struct HeightSource(AssetId<Image>);

/// Applies loaded or hot-reloaded descriptor assets to their entities.
pub(crate) fn apply_descriptors(
    mut commands: Commands,
    mut events: EventReader<AssetEvent<TerrainDescriptor>>,
    descriptors: Res<Assets<TerrainDescriptor>>,
    asset_server: Res<AssetServer>,
    terrains: Query<(Entity, &TerrainDescriptorHandle)>,
) {
    let changed: HashSet<AssetId<TerrainDescriptor>> = events
        .read()
        .filter_map(|event| match event {
            AssetEvent::Added { id }
            | AssetEvent::Modified { id }
            | AssetEvent::LoadedWithDependencies { id } => Some(*id),
            _ => None,
        })
        .collect();

    for (entity, handle) in &terrains {
        if !changed.contains(&handle.0.id()) {
            continue;
        }
        let Some(descriptor) = descriptors.get(&handle.0) else {
            continue;
        };

        let mut config = TerrainConfig::new(asset_server.load(descriptor.height_map.clone()));
        config.extent = Vec3::from_array(descriptor.extent);
        config.adaptation_mode = descriptor.adaptation_mode;
        config.pixel_threshold = descriptor.pixel_threshold;
        config.adapted_tree_depth = descriptor.adapted_tree_depth;
        config.color_map = descriptor
            .color_map
            .clone()
            .map(|path| asset_server.load(path));
        if let Err(err) = config.set_subdivide_count(descriptor.subdivide_count) {
            warn!("terrain descriptor rejected: {err:#}");
        }

        commands.entity(entity).insert((Terrain, config));
    }
}

/// Extracts the heightfield once its image asset is available, and again
/// whenever the asset or the configured handle changes. A rejected height map
/// leaves the previously extracted state in place.
pub(crate) fn update_heightfield(
    mut commands: Commands,
    images: Res<Assets<Image>>,
    mut events: EventReader<AssetEvent<Image>>,
    terrains: Query<(Entity, &TerrainConfig, Option<&HeightSource>), With<Terrain>>,
) {
    let changed: HashSet<AssetId<Image>> = events
        .read()
        .filter_map(|event| match event {
            AssetEvent::Added { id }
            | AssetEvent::Modified { id }
            | AssetEvent::LoadedWithDependencies { id } => Some(*id),
            _ => None,
        })
        .collect();

    for (entity, config, source) in &terrains {
        let id = config.height_map.id();
        let stale = source.map_or(true, |source| source.0 != id);
        if !stale && !changed.contains(&id) {
            continue;
        }
        let Some(image) = images.get(&config.height_map) else {
            continue;
        };

        match Heightfield::from_bevy_image(image) {
            Ok(heights) => {
                info!(
                    "extracted height map ({}x{}, max sample {})",
                    heights.size(),
                    heights.size(),
                    heights.max_sample()
                );
                let metrics = TerrainMetrics::new(heights.size());
                commands.entity(entity).insert((
                    heights,
                    metrics,
                    TessellationBuffers::default(),
                    HeightSource(id),
                ));
            }
            Err(err) => {
                warn!("height map rejected: {err:#}");
                commands.entity(entity).insert(HeightSource(id));
            }
        }
    }
}

/// Recomputes the memoized error and radius tables when a value they depend
/// on changes: heights or subdivision invalidate both, the extent only the
/// radii. Runs before the frame's selection.
pub(crate) fn update_metrics(
    mut terrains: Query<(Ref<TerrainConfig>, Ref<Heightfield>, &mut TerrainMetrics), With<Terrain>>,
) {
    for (config, heights, mut metrics) in &mut terrains {
        let hierarchy = match TriangleHierarchy::new(heights.size(), config.subdivide_count()) {
            Ok(hierarchy) => hierarchy,
            Err(err) => {
                if config.is_changed() || heights.is_changed() {
                    warn!("terrain configuration rejected: {err:#}");
                }
                continue;
            }
        };

        if heights.is_changed() || metrics.subdivide() != hierarchy.subdivide() {
            metrics.recompute(&hierarchy, &heights, config.extent);
        } else if metrics.extent() != config.extent {
            metrics.recompute_radii(&hierarchy, &heights, config.extent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdivide_count_is_validated() {
        let mut config = TerrainConfig::new(Handle::default());
        assert!(config.set_subdivide_count(3).is_err());
        assert!(config.set_subdivide_count(512).is_err());
        assert_eq!(config.subdivide_count(), 1);

        assert!(config.set_subdivide_count(16).is_ok());
        assert_eq!(config.subdivide_count(), 16);
    }

    #[test]
    fn descriptor_parses_from_ron() {
        let descriptor: TerrainDescriptor = ron::from_str(
            r#"(
                height_map: "textures/dem.png",
                color_map: Some("textures/albedo.png"),
                extent: (20.0, 0.4, 10.0),
                subdivide_count: 4,
                adaptation_mode: IsotropicError,
                pixel_threshold: 2.5,
            )"#,
        )
        .unwrap();

        assert_eq!(descriptor.subdivide_count, 4);
        assert_eq!(descriptor.adaptation_mode, AdaptationMode::IsotropicError);
        assert_eq!(descriptor.adapted_tree_depth, 5);
        assert_eq!(descriptor.extent, [20.0, 0.4, 10.0]);
    }
}
