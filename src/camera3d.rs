use glam::{Mat4, Quat, Vec2, Vec3};
use winit::dpi::PhysicalSize;

const DEFAULT_UP: Vec3 = Vec3::Y;
const MIN_RADIUS: f32 = 0.1;
const MAX_RADIUS: f32 = 10_000.0;

#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Zero-to-one depth range, as wgpu expects.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: PhysicalSize<u32>) -> Mat4 {
        let aspect = if viewport.height > 0 { viewport.width as f32 / viewport.height as f32 } else { 1.0 };
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

/// Orbit controller storing yaw/pitch around a target.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub radius: f32,
    pub yaw_radians: f32,
    pub pitch_radians: f32,
}

impl OrbitCamera {
    pub fn new(target: Vec3, radius: f32) -> Self {
        Self { target, radius: radius.clamp(MIN_RADIUS, MAX_RADIUS), yaw_radians: 0.0, pitch_radians: -0.35 }
    }

    /// Moves the target and pulls back far enough to see a sphere of
    /// `extent` around it. Yaw and pitch are kept.
    pub fn frame(&mut self, target: Vec3, extent: f32, fov_y_radians: f32) {
        let half_fov = (fov_y_radians * 0.5).max(0.05);
        let extent = if extent.is_finite() { extent.max(0.5) } else { 1.0 };
        self.target = target;
        self.radius = (extent / half_fov.sin() * 1.1).clamp(MIN_RADIUS, MAX_RADIUS);
    }

    pub fn to_camera(&self, fov_y_radians: f32, near: f32, far: f32) -> Camera3D {
        let rotation = Quat::from_euler(glam::EulerRot::YXZ, self.yaw_radians, self.pitch_radians, 0.0);
        let offset = rotation * Vec3::new(0.0, 0.0, self.radius);
        Camera3D::new(self.target + offset, self.target, fov_y_radians, near, far)
    }

    pub fn orbit(&mut self, delta: Vec2) {
        self.yaw_radians += delta.x;
        self.pitch_radians = (self.pitch_radians + delta.y)
            .clamp(-std::f32::consts::FRAC_PI_2 + 0.01, std::f32::consts::FRAC_PI_2 - 0.01);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.radius = (self.radius * factor).clamp(MIN_RADIUS, MAX_RADIUS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_projection_is_finite() {
        let camera = Camera3D::new(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, 60.0_f32.to_radians(), 0.1, 1000.0);
        let vp = camera.view_projection(PhysicalSize::new(1280, 720));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
    }

    #[test]
    fn framing_keeps_extent_in_view() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 1.0);
        orbit.frame(Vec3::new(0.0, 1.0, 0.0), 15.0, 45.0_f32.to_radians());
        let camera = orbit.to_camera(45.0_f32.to_radians(), 0.1, 1000.0);
        assert!(camera.position.distance(orbit.target) > 15.0);
        assert_eq!(camera.target, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn pitch_is_clamped_short_of_the_poles() {
        let mut orbit = OrbitCamera::new(Vec3::ZERO, 5.0);
        orbit.orbit(Vec2::new(0.0, 10.0));
        assert!(orbit.pitch_radians < std::f32::consts::FRAC_PI_2);
        orbit.zoom(0.0);
        assert_eq!(orbit.radius, MIN_RADIUS);
    }
}
