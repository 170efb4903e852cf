//! CPU-driven baseline renderer
//!
//! Builds every world matrix and runs the frustum test on the CPU, then
//! issues one draw per visible object. Serves as the benchmark baseline, the
//! GPU pipeline's fallback, and the near set in hybrid rendering.

use std::time::Instant;

use crate::camera::CameraSource;
use crate::error::EngineResult;
use crate::profiling::{FrameProfiler, RenderingApproach};
use crate::renderer::culling::{aabb_visible, Frustum};
use crate::renderer::device::{Binding, BindingAccess, BufferKind, DrawCall, DrawProgramDescriptor, RenderDevice};
use crate::renderer::dynamic_buffer::DynamicBuffer;
use crate::renderer::gpu_driven::FrameParams;
use crate::renderer::mesh::Mesh;
use crate::renderer::outcome::{RenderOutcome, RenderPath};
use crate::renderer::shaders::{self, draw_slots, DrawProgramKind};
use crate::scene::{Light, ObjectRecord};

const MATRIX_SIZE: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64;

pub struct CpuDrivenRenderer<D: RenderDevice> {
    params: DynamicBuffer<D>,
    light: DynamicBuffer<D>,
    material: DynamicBuffer<D>,
    instance_matrices: DynamicBuffer<D>,
    program: D::DrawProgram,
    capacity: u32,
    frustum_culling: bool,
    // Reused every frame
    matrices: Vec<[[f32; 4]; 4]>,
    visible: Vec<u32>,
}

impl<D: RenderDevice> CpuDrivenRenderer<D> {
    pub fn new(device: &mut D, capacity: u32) -> EngineResult<Self> {
        let source = shaders::draw_source();
        let kind = DrawProgramKind::Direct;
        let program = device.create_draw_program(&DrawProgramDescriptor {
            label: kind.label(),
            source: &source,
            vertex_entry: kind.vertex_entry(),
            fragment_entry: shaders::entry::FRAGMENT,
        })?;

        let params = DynamicBuffer::new(
            device,
            "CPU Frame Params",
            BufferKind::Uniform,
            std::mem::size_of::<FrameParams>() as u64,
        )?;
        let light = DynamicBuffer::new(
            device,
            "CPU Light",
            BufferKind::Uniform,
            std::mem::size_of::<Light>() as u64,
        )?;
        let material = DynamicBuffer::new(
            device,
            "CPU Material",
            BufferKind::Uniform,
            std::mem::size_of::<crate::scene::Material>() as u64,
        )?;
        let instance_matrices = DynamicBuffer::new(
            device,
            "CPU Instance Matrices",
            BufferKind::Storage,
            capacity.max(1) as u64 * MATRIX_SIZE,
        )?;

        log::info!("[CpuDrivenRenderer::new] Ready for up to {} objects", capacity);

        Ok(Self {
            params,
            light,
            material,
            instance_matrices,
            program,
            capacity,
            frustum_culling: true,
            matrices: Vec::with_capacity(capacity as usize),
            visible: Vec::with_capacity(capacity as usize),
        })
    }

    pub fn set_frustum_culling(&mut self, enabled: bool) {
        self.frustum_culling = enabled;
    }

    /// Slots of the objects drawn last frame
    pub fn visible_slots(&self) -> &[u32] {
        &self.visible
    }

    pub fn render(
        &mut self,
        device: &mut D,
        mesh: &Mesh<D>,
        records: &[ObjectRecord],
        camera: &dyn CameraSource,
        light: &Light,
        profiler: &mut FrameProfiler,
    ) -> RenderOutcome {
        profiler.set_rendering_approach(RenderingApproach::CpuDriven);

        let (vertex_buffer, index_buffer) = match mesh.buffers() {
            Ok(buffers) => buffers,
            Err(e) => {
                log::error!("[CpuDrivenRenderer::render] {}; skipping frame", e);
                return RenderOutcome::skipped();
            }
        };

        let records = &records[..records.len().min(self.capacity as usize)];
        let view_proj = camera.view_projection();
        let eye = camera.position();
        let frustum = if self.frustum_culling {
            Frustum::from_view_proj(&view_proj)
        } else {
            Frustum::accept_all()
        };

        let cull_start = Instant::now();
        self.matrices.clear();
        self.visible.clear();
        for (slot, record) in records.iter().enumerate() {
            let model = record.world_matrix();
            self.matrices.push(model.to_cols_array_2d());
            if aabb_visible(&record.local_bounds().transform(&model), &frustum, eye) {
                self.visible.push(slot as u32);
            }
        }
        profiler.record_cpu_culling_time(cull_start.elapsed().as_secs_f64() * 1000.0);

        let params = FrameParams::new(
            view_proj,
            &frustum,
            eye,
            records.len() as u32,
            mesh.index_count(),
            self.capacity,
        );
        upload(device, &mut self.params, bytemuck::bytes_of(&params));
        upload(device, &mut self.light, bytemuck::bytes_of(light));
        upload(device, &mut self.material, bytemuck::bytes_of(mesh.material()));
        if !self.matrices.is_empty() {
            upload(device, &mut self.instance_matrices, bytemuck::cast_slice(&self.matrices));
        }

        let bindings = [
            Binding {
                slot: draw_slots::PARAMS,
                access: BindingAccess::Parameters,
                buffer: self.params.buffer(),
            },
            Binding {
                slot: draw_slots::WORLD_MATRICES,
                access: BindingAccess::Input,
                buffer: self.instance_matrices.buffer(),
            },
            Binding {
                slot: draw_slots::LIGHT,
                access: BindingAccess::Parameters,
                buffer: self.light.buffer(),
            },
            Binding {
                slot: draw_slots::MATERIAL,
                access: BindingAccess::Parameters,
                buffer: self.material.buffer(),
            },
        ];
        let draw = DrawCall {
            program: &self.program,
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            bindings: &bindings,
        };

        let mut draw_calls = 0u32;
        for slot in &self.visible {
            if let Err(e) = device.draw_indexed(&draw, *slot..*slot + 1) {
                log::error!("[CpuDrivenRenderer::render] Draw for slot {} failed: {}", slot, e);
                break;
            }
            draw_calls += 1;
        }

        profiler.add_draw_calls(draw_calls);
        profiler.add_instances(draw_calls as u64);
        profiler.add_triangles(draw_calls as u64 * mesh.triangle_count() as u64);
        profiler.add_vertices(draw_calls as u64 * mesh.vertex_count() as u64);
        profiler.add_object_counts(records.len() as u32, self.visible.len() as u32);
        profiler.add_cpu_memory(
            self.matrices.capacity() as u64 * MATRIX_SIZE + self.visible.capacity() as u64 * 4,
        );

        RenderOutcome {
            path: RenderPath::CpuDriven,
            draw_calls,
            indirect_draw_calls: 0,
            compute_dispatches: 0,
            visible_objects: self.visible.len() as u32,
        }
    }

    pub fn release(self, device: &mut D) {
        self.instance_matrices.release(device);
        self.material.release(device);
        self.light.release(device);
        self.params.release(device);
    }
}

/// Writes `bytes`; on failure the previous contents stay in use
fn upload<D: RenderDevice>(device: &mut D, buffer: &mut DynamicBuffer<D>, bytes: &[u8]) {
    if let Err(e) = buffer.update(device, bytes) {
        log::error!(
            "[CpuDrivenRenderer::render] Upload to '{}' failed, using stale data: {}",
            buffer.label(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::config::ProfilerConfig;
    use crate::renderer::culling::Aabb;
    use crate::renderer::device::SoftwareDevice;
    use glam::Vec3;

    #[test]
    fn test_one_draw_per_visible_object() {
        let mut device = SoftwareDevice::new();
        let mesh = Mesh::cube(&mut device).unwrap();
        let mut renderer = CpuDrivenRenderer::new(&mut device, 8).unwrap();
        let mut profiler = FrameProfiler::new(ProfilerConfig::default());

        let records = vec![
            ObjectRecord::new(0, Vec3::new(0.0, 0.0, -10.0), Aabb::unit_cube()),
            ObjectRecord::new(1, Vec3::new(0.0, 0.0, 10.0), Aabb::unit_cube()),
            ObjectRecord::new(2, Vec3::new(1.0, 0.0, -20.0), Aabb::unit_cube()),
        ];
        let camera = Camera::looking_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), 800, 600);

        let outcome = renderer.render(&mut device, &mesh, &records, &camera, &Light::default(), &mut profiler);
        assert_eq!(outcome.draw_calls, 2);
        assert_eq!(renderer.visible_slots(), &[0, 2]);

        let log = device.draw_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].first_instance, 0);
        assert_eq!(log[1].first_instance, 2);
        assert!(log.iter().all(|d| !d.indirect && d.instances_submitted == 1));
    }

    #[test]
    fn test_missing_geometry_skips_frame() {
        let mut device = SoftwareDevice::new();
        let mesh: Mesh<SoftwareDevice> = Mesh::unloaded("Ghost", 36, Aabb::unit_cube());
        let mut renderer = CpuDrivenRenderer::new(&mut device, 4).unwrap();
        let mut profiler = FrameProfiler::new(ProfilerConfig::default());
        let records = vec![ObjectRecord::new(0, Vec3::new(0.0, 0.0, -5.0), Aabb::unit_cube())];
        let camera = Camera::looking_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), 800, 600);

        let outcome = renderer.render(&mut device, &mesh, &records, &camera, &Light::default(), &mut profiler);
        assert_eq!(outcome.path, RenderPath::Skipped);
        assert!(device.draw_log().is_empty());
    }
}
