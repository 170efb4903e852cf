use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::renderer::device::{Binding, BindingAccess, KernelDescriptor, RenderDevice};

/// One compiled compute entry point plus the buffers bound to it.
///
/// Bindings are held by slot and can be replaced at any time before a
/// dispatch. Dispatching before a successful `initialize` is a logged no-op.
pub struct ComputeKernel<D: RenderDevice> {
    label: String,
    entry_point: String,
    kernel: Option<D::Kernel>,
    bindings: BTreeMap<u32, (BindingAccess, D::Buffer)>,
}

impl<D: RenderDevice> ComputeKernel<D> {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            entry_point: String::new(),
            kernel: None,
            bindings: BTreeMap::new(),
        }
    }

    /// Compiles `entry_point` from `source`. On failure the kernel stays
    /// unready and the error is returned for the caller to downgrade on.
    pub fn initialize(&mut self, device: &mut D, source: &str, entry_point: &str) -> EngineResult<()> {
        self.entry_point = entry_point.to_string();
        match device.create_kernel(&KernelDescriptor {
            label: &self.label,
            source,
            entry_point,
        }) {
            Ok(kernel) => {
                self.kernel = Some(kernel);
                log::debug!("[ComputeKernel::initialize] '{}' ready", self.label);
                Ok(())
            }
            Err(e) => {
                log::error!("[ComputeKernel::initialize] '{}' unavailable: {}", self.label, e);
                self.kernel = None;
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.kernel.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn bind_input(&mut self, slot: u32, buffer: &D::Buffer) {
        self.bindings.insert(slot, (BindingAccess::Input, buffer.clone()));
    }

    pub fn bind_output(&mut self, slot: u32, buffer: &D::Buffer) {
        self.bindings.insert(slot, (BindingAccess::Output, buffer.clone()));
    }

    pub fn bind_parameters(&mut self, slot: u32, buffer: &D::Buffer) {
        self.bindings.insert(slot, (BindingAccess::Parameters, buffer.clone()));
    }

    pub fn bound_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.bindings.keys().copied()
    }

    /// Records one dispatch. Returns `false` if nothing was recorded.
    pub fn dispatch(&self, device: &mut D, groups_x: u32, groups_y: u32, groups_z: u32) -> bool {
        let Some(kernel) = self.kernel.as_ref() else {
            log::error!(
                "[ComputeKernel::dispatch] '{}' dispatched before initialization",
                self.label
            );
            return false;
        };

        let bindings: Vec<Binding<'_, D::Buffer>> = self
            .bindings
            .iter()
            .map(|(slot, (access, buffer))| Binding {
                slot: *slot,
                access: *access,
                buffer,
            })
            .collect();

        match device.dispatch(kernel, &bindings, [groups_x, groups_y, groups_z]) {
            Ok(()) => true,
            Err(e) => {
                log::error!("[ComputeKernel::dispatch] '{}' failed: {}", self.label, e);
                false
            }
        }
    }

    /// Drops the compiled program and every bound buffer handle
    pub fn release(&mut self) {
        self.kernel = None;
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{BufferDescriptor, BufferKind, SoftwareDevice};
    use crate::renderer::shaders;

    #[test]
    fn test_dispatch_before_initialize_is_noop() {
        let mut device = SoftwareDevice::new();
        let kernel: ComputeKernel<SoftwareDevice> = ComputeKernel::new("Reset");
        assert!(!kernel.is_ready());
        assert!(!kernel.dispatch(&mut device, 1, 1, 1));
        assert_eq!(device.stats().dispatches, 0);
    }

    #[test]
    fn test_reset_kernel_clears_counter() {
        let mut device = SoftwareDevice::new();
        let counter = device
            .create_buffer(&BufferDescriptor {
                label: "Counter",
                size: 16,
                kind: BufferKind::Storage,
            })
            .unwrap();
        device.write_buffer(&counter, 0, bytemuck::bytes_of(&41u32)).unwrap();

        let mut kernel = ComputeKernel::new("Reset");
        kernel
            .initialize(&mut device, &shaders::compaction_source(), shaders::entry::RESET_COUNTER)
            .unwrap();
        kernel.bind_output(shaders::compaction_slots::VISIBLE_COUNTER, &counter);

        assert!(kernel.dispatch(&mut device, 1, 1, 1));
        assert_eq!(device.peek_words(&counter)[0], 0);
    }

    #[test]
    fn test_rebinding_replaces_slot() {
        let mut device = SoftwareDevice::new();
        let a = device
            .create_buffer(&BufferDescriptor { label: "A", size: 4, kind: BufferKind::Storage })
            .unwrap();
        let b = device
            .create_buffer(&BufferDescriptor { label: "B", size: 4, kind: BufferKind::Uniform })
            .unwrap();

        let mut kernel: ComputeKernel<SoftwareDevice> = ComputeKernel::new("Slots");
        kernel.bind_input(2, &a);
        kernel.bind_parameters(2, &b);
        kernel.bind_output(0, &a);
        assert_eq!(kernel.bound_slots().collect::<Vec<_>>(), vec![0, 2]);
    }
}
