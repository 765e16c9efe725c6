use crate::{
    debug::DebugTerrain,
    heightfield::Heightfield,
    hierarchy::TriangleHierarchy,
    metrics::TerrainMetrics,
    selector::{tessellate, AdaptationMode, AdaptationState, TessellationBuffers, VisualizationStyle},
    terrain::{Terrain, TerrainConfig},
    terrain_view::FrameView,
};
use bevy::{
    asset::RenderAssetUsages,
    prelude::*,
    render::render_resource::PrimitiveTopology,
};

/// Runs the adaptive selection for every terrain whose tables are ready.
/// [`AdaptationMode::None`] freezes the buffers of the previous frame.
pub(crate) fn tessellate_terrains(
    view: Res<FrameView>,
    debug: Res<DebugTerrain>,
    mut terrains: Query<
        (&TerrainConfig, &Heightfield, &TerrainMetrics, &mut TessellationBuffers),
        With<Terrain>,
    >,
) {
    for (config, heights, metrics, mut buffers) in &mut terrains {
        if config.adaptation_mode == AdaptationMode::None && !buffers.positions.is_empty() {
            continue;
        }
        let Ok(hierarchy) = TriangleHierarchy::new(heights.size(), config.subdivide_count())
        else {
            continue;
        };

        let state = AdaptationState {
            mode: config.adaptation_mode,
            eye_world: view.eye_world,
            view_factor: view.view_factor,
            pixel_threshold: config.pixel_threshold,
            adapted_tree_depth: config.adapted_tree_depth.min(hierarchy.tree_depth()),
            max_tree_depth: config.max_tree_depth.min(hierarchy.tree_depth()),
        };
        let style = VisualizationStyle {
            error_lambda: debug.error_lambda,
            radius_lambda: debug.radius_lambda,
            show_error_spheres: debug.show_error_spheres,
            show_threshold_spheres: debug.show_threshold_spheres,
        };

        tessellate(
            &hierarchy,
            heights,
            metrics,
            config.extent,
            &state,
            &style,
            &mut buffers,
        );
    }
}

/// Keeps the mesh handle alive across uploads so the asset is reused.
#[derive(Component)]
pub(crate) struct TerrainMesh(Handle<Mesh>);

/// Uploads freshly selected triangulations as renderable meshes, expanding
/// each batch record into its instanced sub-triangles on the CPU.
pub(crate) fn upload_meshes(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    terrains: Query<
        (
            Entity,
            &TerrainConfig,
            &Heightfield,
            &TessellationBuffers,
            Option<&TerrainMesh>,
        ),
        (With<Terrain>, Changed<TessellationBuffers>),
    >,
) {
    for (entity, config, heights, buffers, existing) in &terrains {
        let mesh = build_mesh(heights, buffers, config.extent);

        match existing {
            Some(TerrainMesh(handle)) => {
                meshes.insert(handle, mesh);
            }
            None => {
                let handle = meshes.add(mesh);
                let material = materials.add(StandardMaterial {
                    base_color_texture: config.color_map.clone(),
                    perceptual_roughness: 1.0,
                    double_sided: true,
                    cull_mode: None,
                    ..default()
                });
                commands.entity(entity).insert((
                    Mesh3d(handle.clone()),
                    MeshMaterial3d(material),
                    TerrainMesh(handle),
                ));
            }
        }
    }
}

/// Expands the flat attribute buffers into a triangle list mesh. Every record
/// becomes `subdivide^2` sub-triangles with bilinearly interpolated heights
/// and flat, upward facing normals.
pub(crate) fn build_mesh(
    heights: &Heightfield,
    buffers: &TessellationBuffers,
    extent: Vec3,
) -> Mesh {
    let subdivide = buffers.subdivide.max(1);
    let mut positions = Vec::with_capacity(buffers.triangle_count() * 3);
    let mut normals = Vec::with_capacity(buffers.triangle_count() * 3);
    let mut uvs = Vec::with_capacity(buffers.triangle_count() * 3);
    let mut colors = Vec::with_capacity(buffers.triangle_count() * 3);

    for ((position, normal), color) in buffers
        .positions
        .iter()
        .zip(&buffers.normals)
        .zip(&buffers.colors)
    {
        // decode the record: right-angle corner and the two leg midpoints
        let c = Vec2::new(position.x, position.y);
        let a = c + 2.0 * (Vec2::new(position.z, position.w) - c);
        let b = c + 2.0 * (Vec2::new(normal.x, normal.y) - c);
        let leg_a = (a - c) / subdivide as f32;
        let leg_b = (b - c) / subdivide as f32;

        let mut emit_sub_triangle = |corners: [Vec2; 3]| {
            let world = corners.map(|p| world_at(heights, extent, p));
            let mut flat = (world[1] - world[0]).cross(world[2] - world[0]);
            if flat.y < 0.0 {
                flat = -flat;
            }
            let flat = flat.normalize_or(Vec3::Y);

            for (corner, point) in corners.into_iter().zip(world) {
                positions.push(point.to_array());
                normals.push(flat.to_array());
                uvs.push((corner / heights.size() as f32).to_array());
                colors.push(*color);
            }
        };

        for i in 0..subdivide {
            for j in 0..subdivide - i {
                let p = c + i as f32 * leg_a + j as f32 * leg_b;
                emit_sub_triangle([p, p + leg_a, p + leg_b]);
                if i + j + 2 <= subdivide {
                    emit_sub_triangle([p + leg_a, p + leg_a + leg_b, p + leg_b]);
                }
            }
        }
    }

    Mesh::new(
        PrimitiveTopology::TriangleList,
        RenderAssetUsages::default(),
    )
    .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions)
    .with_inserted_attribute(Mesh::ATTRIBUTE_NORMAL, normals)
    .with_inserted_attribute(Mesh::ATTRIBUTE_UV_0, uvs)
    .with_inserted_attribute(Mesh::ATTRIBUTE_COLOR, colors)
}

/// World position of a fractional sample coordinate.
fn world_at(heights: &Heightfield, extent: Vec3, p: Vec2) -> Vec3 {
    let n = heights.size() as f32;
    Vec3::new(
        extent.x * (p.x / n - 0.5),
        extent.y * heights.interpolated_height(p.x, p.y),
        extent.z * (p.y / n - 0.5),
    )
}
