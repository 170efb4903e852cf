use glam::Vec3;

use crate::error::EngineResult;
use crate::renderer::culling::Aabb;
use crate::renderer::device::{BufferDescriptor, BufferKind, RenderDevice};
use crate::renderer::error::missing_resource;
use crate::renderer::vertex::Vertex;
use crate::scene::Material;

/// Geometry shared by every instance the pipeline draws.
///
/// Buffers are optional so a mesh can exist before upload (or after a failed
/// one); the pipeline validates them every frame before issuing work.
pub struct Mesh<D: RenderDevice> {
    label: String,
    vertex_buffer: Option<D::Buffer>,
    index_buffer: Option<D::Buffer>,
    vertex_count: u32,
    index_count: u32,
    bounds: Aabb,
    material: Material,
}

impl<D: RenderDevice> Mesh<D> {
    /// Uploads `vertices` and `indices` to device buffers
    pub fn upload(
        device: &mut D,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
        material: Material,
    ) -> EngineResult<Self> {
        let vertex_buffer = upload_buffer(
            device,
            &format!("{} Vertices", label),
            BufferKind::Vertex,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = match upload_buffer(
            device,
            &format!("{} Indices", label),
            BufferKind::Index,
            bytemuck::cast_slice(indices),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.release_buffer(vertex_buffer);
                return Err(e);
            }
        };

        log::info!(
            "[Mesh::upload] '{}' uploaded ({} vertices, {} indices)",
            label,
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            label: label.to_string(),
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            bounds: bounds_of(vertices),
            material,
        })
    }

    /// Unit cube used by the benchmark scenes
    pub fn cube(device: &mut D) -> EngineResult<Self> {
        let (vertices, indices) = cube_geometry();
        Self::upload(device, "Cube", &vertices, &indices, Material::default())
    }

    /// A mesh whose buffers were never created
    pub fn unloaded(label: &str, index_count: u32, bounds: Aabb) -> Self {
        Self {
            label: label.to_string(),
            vertex_buffer: None,
            index_buffer: None,
            vertex_count: 0,
            index_count,
            bounds,
            material: Material::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    pub fn bounding_box(&self) -> Aabb {
        self.bounds
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn set_material(&mut self, material: Material) {
        self.material = material;
    }

    pub fn vertex_buffer(&self) -> Option<&D::Buffer> {
        self.vertex_buffer.as_ref()
    }

    pub fn index_buffer(&self) -> Option<&D::Buffer> {
        self.index_buffer.as_ref()
    }

    /// Both geometry buffers, or the first one that is missing
    pub fn buffers(&self) -> EngineResult<(&D::Buffer, &D::Buffer)> {
        let vertex = self
            .vertex_buffer
            .as_ref()
            .ok_or_else(|| missing_resource(&format!("vertex buffer of '{}'", self.label)))?;
        let index = self
            .index_buffer
            .as_ref()
            .ok_or_else(|| missing_resource(&format!("index buffer of '{}'", self.label)))?;
        Ok((vertex, index))
    }

    /// Drops the vertex buffer, as happens when geometry is evicted
    pub fn evict_vertex_buffer(&mut self, device: &mut D) {
        if let Some(buffer) = self.vertex_buffer.take() {
            device.release_buffer(buffer);
        }
    }

    pub fn release(mut self, device: &mut D) {
        if let Some(buffer) = self.index_buffer.take() {
            device.release_buffer(buffer);
        }
        if let Some(buffer) = self.vertex_buffer.take() {
            device.release_buffer(buffer);
        }
    }
}

/// Creates a buffer holding `bytes`; the buffer is released again if the write fails
fn upload_buffer<D: RenderDevice>(
    device: &mut D,
    label: &str,
    kind: BufferKind,
    bytes: &[u8],
) -> EngineResult<D::Buffer> {
    let buffer = device.create_buffer(&BufferDescriptor {
        label,
        size: bytes.len() as u64,
        kind,
    })?;
    if let Err(e) = device.write_buffer(&buffer, 0, bytes) {
        device.release_buffer(buffer);
        return Err(e);
    }
    Ok(buffer)
}

fn bounds_of(vertices: &[Vertex]) -> Aabb {
    if vertices.is_empty() {
        return Aabb::new(Vec3::ZERO, Vec3::ZERO);
    }
    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for vertex in vertices {
        let p = Vec3::from_array(vertex.position);
        min = min.min(p);
        max = max.max(p);
    }
    Aabb::new(min, max)
}

/// 24 vertices (4 per face, so normals stay flat) and 36 indices, wound
/// counter-clockwise when seen from outside.
pub fn cube_geometry() -> (Vec<Vertex>, Vec<u32>) {
    // Face normal and one in-plane axis; the second axis is normal x first
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u) in faces {
        let v = normal.cross(u);
        let centre = normal * 0.5;
        let base = vertices.len() as u32;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = centre + u * su + v * sv;
            vertices.push(Vertex::new(position.to_array(), normal.to_array()));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{SoftwareDevice, SoftwareDeviceOptions};

    #[test]
    fn test_cube_winding_faces_outward() {
        let (vertices, indices) = cube_geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);

        for tri in indices.chunks_exact(3) {
            let a = Vec3::from_array(vertices[tri[0] as usize].position);
            let b = Vec3::from_array(vertices[tri[1] as usize].position);
            let c = Vec3::from_array(vertices[tri[2] as usize].position);
            let n = Vec3::from_array(vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(n) > 0.0);
        }
    }

    #[test]
    fn test_cube_bounds_match_unit_cube() {
        let mut device = SoftwareDevice::new();
        let mesh = Mesh::cube(&mut device).unwrap();
        assert_eq!(mesh.bounding_box(), Aabb::unit_cube());
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.buffers().is_ok());
    }

    #[test]
    fn test_unloaded_mesh_reports_missing_buffer() {
        let mesh: Mesh<SoftwareDevice> = Mesh::unloaded("Ghost", 36, Aabb::unit_cube());
        let err = mesh.buffers().err().expect("buffers are missing");
        assert!(err.to_string().contains("vertex buffer of 'Ghost'"));
    }

    #[test]
    fn test_failed_index_upload_releases_vertex_buffer() {
        let mut device = SoftwareDevice::new();
        let (vertices, _) = cube_geometry();
        let result = Mesh::upload(&mut device, "Broken", &vertices, &[], Material::default());
        assert!(result.is_err());
        assert_eq!(device.stats().allocated_bytes, 0);
    }

    #[test]
    fn test_upload_over_budget_leaves_nothing_allocated() {
        let (vertices, _) = cube_geometry();
        let options = SoftwareDeviceOptions {
            memory_budget: Some(std::mem::size_of_val(vertices.as_slice()) as u64),
            ..Default::default()
        };
        let mut device = SoftwareDevice::with_options(options);
        assert!(Mesh::cube(&mut device).is_err());
        assert_eq!(device.stats().allocated_bytes, 0);
    }
}
