use glam::{Mat4, Vec3};
use winit::keyboard::KeyCode;

use crate::input::InputState;

const MAX_PITCH_DEGREES: f32 = 89.0;
const BOOST_MULTIPLIER: f32 = 4.0;
const ZOOM_STEP_DEGREES: f32 = 2.0;
const MIN_FOV_DEGREES: f32 = 5.0;
const MAX_FOV_DEGREES: f32 = 60.0;
/// Fog and the far plane sit a little past the outermost loaded ring.
const FAR_PLANE_MARGIN: f32 = 1.1;

/// Free-flying terrain camera. Grid `y` maps to world `z`; world `y` is height.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 160.0, 0.0),
            yaw: 45.0_f32.to_radians(),
            pitch: -20.0_f32.to_radians(),
            fov: 60.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.5,
            far: 2000.0,
        }
    }
}

impl Camera {
    /// Starts above the origin, high enough to clear the tallest possible terrain.
    pub fn overlooking(height_scale: f32) -> Self {
        Self {
            position: Vec3::new(0.0, height_scale * 1.3, 0.0),
            ..Self::default()
        }
    }

    pub fn update_look(&mut self, input: &InputState, sensitivity: f32) {
        let max_pitch = MAX_PITCH_DEGREES.to_radians();
        self.yaw = (self.yaw + input.mouse_delta.x * sensitivity) % std::f32::consts::TAU;
        self.pitch = (self.pitch - input.mouse_delta.y * sensitivity).clamp(-max_pitch, max_pitch);
    }

    /// Moves along the view direction: W/S follow the look vector including pitch,
    /// A/D strafe, Space/Shift rise and sink, Ctrl boosts.
    pub fn fly(&mut self, input: &InputState, speed: f32, dt: f32) {
        let boost = if input.is_pressed(KeyCode::ControlLeft) {
            BOOST_MULTIPLIER
        } else {
            1.0
        };
        self.position += self.movement_dir(input) * speed * boost * dt;
    }

    pub fn movement_dir(&self, input: &InputState) -> Vec3 {
        let forward = self.forward_direction();
        let right = forward.cross(Vec3::Y).normalize_or_zero();

        let axis = |positive: KeyCode, negative: KeyCode| {
            f32::from(u8::from(input.is_pressed(positive))) - f32::from(u8::from(input.is_pressed(negative)))
        };
        let dir = forward * axis(KeyCode::KeyW, KeyCode::KeyS)
            + right * axis(KeyCode::KeyD, KeyCode::KeyA)
            + Vec3::Y * axis(KeyCode::Space, KeyCode::ShiftLeft);

        dir.normalize_or_zero()
    }

    /// Narrows the field of view for positive wheel notches, widens it back
    /// for negative ones.
    pub fn zoom(&mut self, lines: f32) {
        let degrees = self.fov.to_degrees() - lines * ZOOM_STEP_DEGREES;
        self.fov = degrees.clamp(MIN_FOV_DEGREES, MAX_FOV_DEGREES).to_radians();
    }

    /// Pushes the far plane out so `reach` world units stay visible.
    pub fn fit_view_distance(&mut self, reach: f32) {
        self.far = self.far.max(reach * FAR_PLANE_MARGIN);
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn forward_direction(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_yaw * cos_pitch, sin_pitch, sin_yaw * cos_pitch).normalize_or_zero()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        let near = self.near.max(1e-4);
        let projection =
            Mat4::perspective_rh(self.fov, self.aspect.max(1e-4), near, self.far.max(near * 2.0));
        projection * Mat4::look_to_rh(self.position, self.forward_direction(), Vec3::Y)
    }
}
