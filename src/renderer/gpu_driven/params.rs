use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::renderer::culling::Frustum;

/// Per-frame uniform shared by every kernel and the draw programs.
///
/// Matches `FrameParams` in `common.wgsl` (192 bytes, uniform layout).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub view_proj: [[f32; 4]; 4],
    pub frustum_planes: [[f32; 4]; 6],
    pub camera_position: [f32; 3],
    pub object_count: u32,
    pub index_count: u32,
    pub max_objects: u32,
    pub _padding: [u32; 2],
}

impl FrameParams {
    pub fn new(
        view_proj: glam::Mat4,
        frustum: &Frustum,
        camera_position: Vec3,
        object_count: u32,
        index_count: u32,
        max_objects: u32,
    ) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            frustum_planes: frustum.to_gpu_planes(),
            camera_position: camera_position.to_array(),
            object_count,
            index_count,
            max_objects,
            _padding: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<FrameParams>(), 192);
        assert_eq!(std::mem::offset_of!(FrameParams, camera_position), 160);
        assert_eq!(std::mem::offset_of!(FrameParams, object_count), 172);
        assert_eq!(std::mem::offset_of!(FrameParams, index_count), 176);
    }
}
