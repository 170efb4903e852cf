/// Camera Module
///
/// The pipeline only consumes cameras through [`CameraSource`]; [`Camera`] is
/// the yaw/pitch fly camera the benchmark harness and tests drive.

use glam::{Mat4, Vec3};

/// Anything that can provide view and projection for a frame
pub trait CameraSource {
    fn position(&self) -> Vec3;
    fn view_matrix(&self) -> Mat4;
    fn projection_matrix(&self) -> Mat4;

    fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    /// Degrees, -90 looks down -Z
    pub yaw: f32,
    /// Degrees, clamped to avoid gimbal flip
    pub pitch: f32,
    aspect: f32,
    fovy: f32,
    znear: f32,
    zfar: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 0.0),
            yaw: -90.0,
            pitch: 0.0,
            aspect: width as f32 / height.max(1) as f32,
            fovy: 60.0,
            znear: 0.1,
            zfar: 1000.0,
        }
    }

    /// Camera at `eye` looking at `target`
    pub fn looking_at(eye: Vec3, target: Vec3, width: u32, height: u32) -> Self {
        let mut camera = Self::new(width, height);
        camera.position = eye;
        let dir = (target - eye).normalize_or_zero();
        if dir != Vec3::ZERO {
            camera.yaw = dir.z.atan2(dir.x).to_degrees();
            camera.pitch = dir.y.clamp(-1.0, 1.0).asin().to_degrees();
        }
        camera
    }

    pub fn with_depth_range(mut self, znear: f32, zfar: f32) -> Self {
        self.znear = znear;
        self.zfar = zfar;
        self
    }

    pub fn with_fovy(mut self, fovy_degrees: f32) -> Self {
        self.fovy = fovy_degrees;
        self
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.to_radians().sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.to_radians().sin_cos();
        Vec3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw)
    }

    /// Rotates the camera around the world Y axis through `centre`, keeping it
    /// aimed at `centre`.
    pub fn orbit(&mut self, centre: Vec3, degrees: f32) {
        let offset = self.position - centre;
        let rotated = glam::Quat::from_rotation_y(degrees.to_radians()) * offset;
        self.position = centre + rotated;
        let dir = (centre - self.position).normalize_or_zero();
        if dir != Vec3::ZERO {
            self.yaw = dir.z.atan2(dir.x).to_degrees();
            self.pitch = dir.y.clamp(-1.0, 1.0).asin().to_degrees();
        }
    }
}

impl CameraSource for Camera {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    fn projection_matrix(&self) -> Mat4 {
        // perspective_rh maps depth to [0, 1], matching wgpu clip space
        Mat4::perspective_rh(self.fovy.to_radians(), self.aspect, self.znear, self.zfar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looking_at_faces_target() {
        let camera = Camera::looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 800, 600);
        let forward = camera.forward();
        assert!((forward - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn test_target_projects_to_screen_centre() {
        let camera = Camera::looking_at(Vec3::new(5.0, 3.0, 5.0), Vec3::ZERO, 800, 600);
        let clip = camera.view_projection() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-4);
        assert!(ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_orbit_preserves_distance() {
        let mut camera = Camera::looking_at(Vec3::new(0.0, 10.0, 50.0), Vec3::ZERO, 800, 600);
        let before = camera.position.length();
        camera.orbit(Vec3::ZERO, 37.0);
        assert!((camera.position.length() - before).abs() < 1e-3);
    }
}
