use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::renderer::culling::Aabb;

/// Per-object input consumed by the transform/cull kernel.
///
/// Layout matches the WGSL `ObjectRecord` struct under std430 rules: every
/// `vec3<f32>` is 16-byte aligned, so each is followed by a 4-byte slot.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectRecord {
    pub position: [f32; 3],
    /// Stable index of this object in the application's list
    pub object_index: u32,
    pub scale: [f32; 3],
    pub _padding0: f32,
    /// Euler angles in radians, applied X then Y then Z
    pub rotation: [f32; 3],
    pub _padding1: f32,
    pub aabb_min: [f32; 3],
    pub _padding2: f32,
    pub aabb_max: [f32; 3],
    pub _padding3: f32,
}

impl ObjectRecord {
    pub fn new(object_index: u32, position: Vec3, local_bounds: Aabb) -> Self {
        Self {
            position: position.to_array(),
            object_index,
            scale: [1.0; 3],
            _padding0: 0.0,
            rotation: [0.0; 3],
            _padding1: 0.0,
            aabb_min: local_bounds.min.to_array(),
            _padding2: 0.0,
            aabb_max: local_bounds.max.to_array(),
            _padding3: 0.0,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale.to_array();
        self
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation.to_array();
        self
    }

    pub fn local_bounds(&self) -> Aabb {
        Aabb::new(Vec3::from_array(self.aabb_min), Vec3::from_array(self.aabb_max))
    }

    /// T * Rz * Ry * Rx * S, the same product the GPU kernel builds.
    pub fn world_matrix(&self) -> Mat4 {
        let rotation = Vec3::from_array(self.rotation);
        Mat4::from_translation(Vec3::from_array(self.position))
            * Mat4::from_rotation_z(rotation.z)
            * Mat4::from_rotation_y(rotation.y)
            * Mat4::from_rotation_x(rotation.x)
            * Mat4::from_scale(Vec3::from_array(self.scale))
    }

    pub fn world_bounds(&self) -> Aabb {
        self.local_bounds().transform(&self.world_matrix())
    }
}

/// Directional light uploaded to the draw program
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub direction: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub ambient: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            direction: [-0.4, -1.0, -0.3],
            intensity: 1.0,
            color: [1.0, 0.98, 0.92],
            ambient: 0.15,
        }
    }
}

/// Scalar PBR parameters; stands in for per-material texture handles
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub _padding: [f32; 2],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.55, 0.3, 1.0],
            metallic: 0.0,
            roughness: 0.6,
            _padding: [0.0; 2],
        }
    }
}
