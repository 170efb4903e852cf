use crate::error::EngineResult;
use crate::renderer::compute_kernel::ComputeKernel;
use crate::renderer::device::{workgroups_for, BufferDescriptor, BufferKind, RenderDevice};
use crate::renderer::shaders::{self, compaction_slots};

/// Counter buffer size; one u32 used, padded for binding alignment
const COUNTER_SIZE: u64 = 16;

/// Packs the indices of visible objects into a dense list.
///
/// After `run`, `visible_counter` equals the number of set flags and the
/// first `visible_counter` entries of `visible_indices` are exactly those
/// indices in unspecified order.
pub struct CompactionStage<D: RenderDevice> {
    reset: ComputeKernel<D>,
    compact: ComputeKernel<D>,
    visible_indices: D::Buffer,
    visible_counter: D::Buffer,
}

impl<D: RenderDevice> CompactionStage<D> {
    pub fn new(device: &mut D, capacity: u32) -> EngineResult<Self> {
        let source = shaders::compaction_source();

        let mut reset = ComputeKernel::new("Reset Visible Counter");
        reset.initialize(device, &source, shaders::entry::RESET_COUNTER)?;
        let mut compact = ComputeKernel::new("Compact Visible");
        compact.initialize(device, &source, shaders::entry::COMPACT_VISIBLE)?;

        let visible_indices = device.create_buffer(&BufferDescriptor {
            label: "Visible Indices",
            size: capacity as u64 * 4,
            kind: BufferKind::Storage,
        })?;
        let visible_counter = match device.create_buffer(&BufferDescriptor {
            label: "Visible Counter",
            size: COUNTER_SIZE,
            kind: BufferKind::Storage,
        }) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.release_buffer(visible_indices);
                return Err(e);
            }
        };

        Ok(Self {
            reset,
            compact,
            visible_indices,
            visible_counter,
        })
    }

    pub fn bind(&mut self, params: &D::Buffer, visibility_flags: &D::Buffer) {
        self.reset.bind_output(compaction_slots::VISIBLE_COUNTER, &self.visible_counter);

        self.compact.bind_parameters(compaction_slots::PARAMS, params);
        self.compact.bind_input(compaction_slots::VISIBILITY_FLAGS, visibility_flags);
        self.compact.bind_output(compaction_slots::VISIBLE_INDICES, &self.visible_indices);
        self.compact.bind_output(compaction_slots::VISIBLE_COUNTER, &self.visible_counter);
    }

    pub fn is_ready(&self) -> bool {
        self.reset.is_ready() && self.compact.is_ready()
    }

    /// Reset then compact; two dispatches
    pub fn run(&self, device: &mut D, object_count: u32) -> bool {
        self.reset.dispatch(device, 1, 1, 1) && self.compact.dispatch(device, workgroups_for(object_count), 1, 1)
    }

    pub fn visible_indices(&self) -> &D::Buffer {
        &self.visible_indices
    }

    pub fn visible_counter(&self) -> &D::Buffer {
        &self.visible_counter
    }

    pub fn release(mut self, device: &mut D) {
        self.compact.release();
        self.reset.release();
        device.release_buffer(self.visible_counter);
        device.release_buffer(self.visible_indices);
    }
}
