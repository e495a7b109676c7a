use bevy::{
    input::mouse::{MouseMotion, MouseWheel},
    prelude::*,
};
use point_cloud_attributes::camera::ViewFraming;

use super::mesh::to_world;

#[derive(Resource)]
pub struct ViewportCamera {
    pub focus_point: Vec3,
    pub height: f32,
    pub last_mouse_pos: Vec2,
    pub pitch: f32,
    pub yaw: f32,
    /// Looking straight down, as in the 2D section view.
    pub top_down: bool,
}

impl ViewportCamera {
    /// Camera for `framing`, where zoom is log2 pixels per world unit across a
    /// viewport `viewport_width` pixels wide.
    pub fn with_framing(framing: &ViewFraming, viewport_width: f32, top_down: bool) -> Self {
        let [x, y, z] = framing.target;
        let visible_extent = viewport_width / (framing.zoom as f32).exp2();
        Self {
            focus_point: to_world([x as f32, y as f32, z as f32]),
            height: visible_extent.clamp(0.5, 50_000.0),
            top_down,
            ..default()
        }
    }

    pub fn update_transform(&self) -> Transform {
        if self.top_down {
            return Transform::from_translation(self.focus_point + Vec3::Y * self.height)
                .looking_at(self.focus_point, Vec3::NEG_Z);
        }
        let rotation = Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(self.pitch);
        let offset = rotation * Vec3::new(0.0, 0.0, self.height);
        Transform::from_translation(self.focus_point + offset).looking_at(self.focus_point, Vec3::Y)
    }
}

impl Default for ViewportCamera {
    fn default() -> Self {
        Self {
            focus_point: Vec3::ZERO,
            height: 100.0,
            last_mouse_pos: Vec2::ZERO,
            pitch: -0.6,
            yaw: 0.0,
            top_down: false,
        }
    }
}

pub fn camera_controller(
    mut camera_query: Query<&mut Transform, With<Camera3d>>,
    mut viewport: ResMut<ViewportCamera>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    mut mouse_motion: EventReader<MouseMotion>,
    mut scroll_events: EventReader<MouseWheel>,
    mut cursor_moved: EventReader<CursorMoved>,
    keyboard: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
) {
    let Ok(mut camera_transform) = camera_query.single_mut() else {
        return;
    };

    for cursor in cursor_moved.read() {
        viewport.last_mouse_pos = cursor.position;
    }

    for scroll in scroll_events.read() {
        let zoom_factor = if scroll.y > 0.0 { 0.9 } else { 1.1 };
        viewport.height = (viewport.height * zoom_factor).clamp(0.5, 50_000.0);
    }

    let total_motion: Vec2 = mouse_motion.read().map(|motion| motion.delta).sum();

    if mouse_button.pressed(MouseButton::Middle) && total_motion != Vec2::ZERO {
        let sensitivity = viewport.height * 0.001;
        let yaw_rot = Quat::from_rotation_y(if viewport.top_down { 0.0 } else { viewport.yaw });
        let right = yaw_rot * Vec3::X;
        let forward = yaw_rot * Vec3::Z;
        viewport.focus_point += right * -total_motion.x * sensitivity;
        viewport.focus_point += forward * -total_motion.y * sensitivity;
    }

    if !viewport.top_down {
        if mouse_button.pressed(MouseButton::Right) && total_motion != Vec2::ZERO {
            viewport.yaw -= total_motion.x * 0.005;
            viewport.pitch = (viewport.pitch - total_motion.y * 0.005).clamp(-1.5, -0.1);
        }

        let mut rotation_input = 0.0;
        if keyboard.pressed(KeyCode::KeyA) {
            rotation_input -= 1.0;
        }
        if keyboard.pressed(KeyCode::KeyD) {
            rotation_input += 1.0;
        }
        if rotation_input != 0.0 {
            viewport.yaw += rotation_input * time.delta_secs();
        }
    }

    let target_transform = viewport.update_transform();
    let lerp_speed = (12.0 * time.delta_secs()).min(1.0);
    camera_transform.translation = camera_transform
        .translation
        .lerp(target_transform.translation, lerp_speed);
    camera_transform.rotation = camera_transform
        .rotation
        .slerp(target_transform.rotation, lerp_speed);
}
