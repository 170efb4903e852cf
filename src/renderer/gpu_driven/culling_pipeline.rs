use crate::error::EngineResult;
use crate::renderer::compute_kernel::ComputeKernel;
use crate::renderer::device::{workgroups_for, BufferDescriptor, BufferKind, RenderDevice};
use crate::renderer::shaders::{self, transform_cull_slots};

use super::object_buffer::ObjectBufferStore;

/// Builds world matrices and visibility flags in one pass over the objects.
///
/// Every invocation `i < object_count` writes `world_matrices[i]` and
/// `visibility_flags[i]`; nothing past `object_count` is touched.
pub struct VisibilityStage<D: RenderDevice> {
    kernel: ComputeKernel<D>,
    flags: D::Buffer,
}

impl<D: RenderDevice> VisibilityStage<D> {
    pub fn new(device: &mut D, capacity: u32) -> EngineResult<Self> {
        let mut kernel = ComputeKernel::new("Transform Cull");
        kernel.initialize(device, &shaders::transform_cull_source(), shaders::entry::TRANSFORM_CULL)?;

        let flags = device.create_buffer(&BufferDescriptor {
            label: "Visibility Flags",
            size: capacity as u64 * 4,
            kind: BufferKind::Storage,
        })?;

        Ok(Self { kernel, flags })
    }

    pub fn bind(&mut self, params: &D::Buffer, objects: &ObjectBufferStore<D>) {
        self.kernel.bind_parameters(transform_cull_slots::PARAMS, params);
        self.kernel.bind_input(transform_cull_slots::RECORDS, objects.records_buffer());
        self.kernel.bind_output(transform_cull_slots::WORLD_MATRICES, objects.world_matrices());
        self.kernel.bind_output(transform_cull_slots::VISIBILITY_FLAGS, &self.flags);
    }

    pub fn is_ready(&self) -> bool {
        self.kernel.is_ready()
    }

    pub fn run(&self, device: &mut D, object_count: u32) -> bool {
        self.kernel.dispatch(device, workgroups_for(object_count), 1, 1)
    }

    pub fn flags(&self) -> &D::Buffer {
        &self.flags
    }

    pub fn release(mut self, device: &mut D) {
        self.kernel.release();
        device.release_buffer(self.flags);
    }
}
