use bytemuck::{Pod, Zeroable};

use crate::error::EngineResult;
use crate::renderer::compute_kernel::ComputeKernel;
use crate::renderer::device::{BufferDescriptor, BufferKind, RenderDevice};
use crate::renderer::shaders::{self, indirect_args_slots};

/// Indexed indirect draw arguments, in the order the device consumes them
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArguments {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawArguments {
    pub const SIZE: u64 = std::mem::size_of::<DrawArguments>() as u64;

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let size = Self::SIZE as usize;
        (bytes.len() >= size).then(|| bytemuck::pod_read_unaligned(&bytes[..size]))
    }
}

/// Single-invocation kernel turning the visible counter into draw arguments.
///
/// `instance_count = min(visible_counter, object_count)`; every other
/// field but `index_count` is zero.
pub struct IndirectArgsStage<D: RenderDevice> {
    kernel: ComputeKernel<D>,
    args: D::Buffer,
}

impl<D: RenderDevice> IndirectArgsStage<D> {
    pub fn new(device: &mut D) -> EngineResult<Self> {
        let mut kernel = ComputeKernel::new("Write Draw Arguments");
        kernel.initialize(device, &shaders::indirect_args_source(), shaders::entry::WRITE_DRAW_ARGS)?;

        let args = device.create_buffer(&BufferDescriptor {
            label: "Draw Arguments",
            size: DrawArguments::SIZE,
            kind: BufferKind::Indirect,
        })?;

        Ok(Self { kernel, args })
    }

    pub fn bind(&mut self, params: &D::Buffer, visible_counter: &D::Buffer) {
        self.kernel.bind_parameters(indirect_args_slots::PARAMS, params);
        self.kernel.bind_input(indirect_args_slots::VISIBLE_COUNTER, visible_counter);
        self.kernel.bind_output(indirect_args_slots::DRAW_ARGS, &self.args);
    }

    pub fn is_ready(&self) -> bool {
        self.kernel.is_ready()
    }

    pub fn run(&self, device: &mut D) -> bool {
        self.kernel.dispatch(device, 1, 1, 1)
    }

    pub fn args(&self) -> &D::Buffer {
        &self.args
    }

    pub fn release(mut self, device: &mut D) {
        self.kernel.release();
        device.release_buffer(self.args);
    }
}
