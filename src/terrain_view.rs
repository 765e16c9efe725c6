use bevy::prelude::*;

/// Marks the camera whose position and projection drive the adaptation.
#[derive(Component, Clone, Copy)]
pub struct TerrainView;

/// Viewer state shared by all terrains, refreshed once per frame.
#[derive(Resource, Clone, Copy, Debug)]
pub struct FrameView {
    /// World location of the eye.
    pub eye_world: Vec3,
    /// Pixels per unit angle: `viewport_height / (2 * tan(fov_y / 2))`.
    pub view_factor: f32,
}

impl Default for FrameView {
    fn default() -> Self {
        Self {
            eye_world: Vec3::ZERO,
            view_factor: 0.0,
        }
    }
}

/// Derives the eye position and the perspective view factor from the marked
/// camera. Keeps the previous values while the viewport is unavailable.
pub(crate) fn update_frame_view(
    mut frame_view: ResMut<FrameView>,
    views: Query<(&Camera, &GlobalTransform, &Projection), With<TerrainView>>,
) {
    let Ok((camera, transform, projection)) = views.get_single() else {
        return;
    };

    frame_view.eye_world = transform.translation();

    if let (Projection::Perspective(perspective), Some(viewport)) =
        (projection, camera.physical_viewport_size())
    {
        frame_view.view_factor = viewport.y as f32 / (2.0 * (perspective.fov / 2.0).tan());
    }
}
