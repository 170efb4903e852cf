//! Render device abstraction
//!
//! The pipeline records work against [`RenderDevice`] rather than wgpu
//! directly. [`WgpuDevice`] is the real headless GPU backend;
//! [`SoftwareDevice`] executes the same kernels on the CPU so every pipeline
//! path can run without an adapter.
//!
//! Work is recorded in program order and every backend must preserve that
//! order on the device timeline: a dispatch observes every earlier dispatch
//! and copy, and a draw observes every dispatch recorded before it.

mod poll;
mod software;
mod wgpu_backend;

use std::ops::Range;
use std::time::Duration;

use crate::error::EngineResult;

pub use poll::poll_until;
pub use software::{DrawRecord, SoftwareDevice, SoftwareDeviceOptions};
pub use wgpu_backend::{WgpuDevice, WgpuDeviceOptions};

/// Threads per workgroup for all per-object kernels
pub const THREADS_PER_GROUP: u32 = 64;

/// Workgroups needed to cover `count` invocations
#[inline]
pub fn workgroups_for(count: u32) -> u32 {
    count.div_ceil(THREADS_PER_GROUP)
}

/// What a buffer is used for; backends derive their usage flags from this
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Read/write storage, readable back to the host
    Storage,
    Uniform,
    /// Storage that can also source an indirect draw
    Indirect,
    Vertex,
    Index,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub kind: BufferKind,
}

#[derive(Debug, Clone)]
pub struct KernelDescriptor<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
}

#[derive(Debug, Clone)]
pub struct DrawProgramDescriptor<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingAccess {
    /// Read-only storage
    Input,
    /// Read-write storage
    Output,
    /// Uniform
    Parameters,
}

/// One buffer bound at `slot` of bind group 0
#[derive(Debug)]
pub struct Binding<'a, B> {
    pub slot: u32,
    pub access: BindingAccess,
    pub buffer: &'a B,
}

impl<B> Clone for Binding<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Binding<'_, B> {}

/// Everything needed to issue an indexed draw except the instance source
pub struct DrawCall<'a, D: RenderDevice + ?Sized> {
    pub program: &'a D::DrawProgram,
    pub vertex_buffer: &'a D::Buffer,
    pub index_buffer: &'a D::Buffer,
    pub index_count: u32,
    pub bindings: &'a [Binding<'a, D::Buffer>],
}

/// GPU timestamp pairs tracked per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerScope {
    Frame,
    Culling,
}

impl TimerScope {
    pub(crate) fn index(self) -> usize {
        match self {
            TimerScope::Frame => 0,
            TimerScope::Culling => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerSample {
    /// Elapsed device time in milliseconds
    Valid(f64),
    /// The pair is unusable (counter wrapped or reset, or the wait expired)
    Disjoint,
    /// Not recorded this frame or not supported
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSamples {
    pub frame: TimerSample,
    pub culling: TimerSample,
}

impl TimerSamples {
    pub fn unavailable() -> Self {
        Self {
            frame: TimerSample::Unavailable,
            culling: TimerSample::Unavailable,
        }
    }
}

/// Cumulative device counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Bytes currently allocated in device buffers
    pub allocated_bytes: u64,
    /// Total host-to-device bytes written
    pub uploaded_bytes: u64,
    /// Total device-to-host bytes read back
    pub read_back_bytes: u64,
    pub dispatches: u64,
    pub draws: u64,
    pub submissions: u64,
}

impl DeviceStats {
    pub fn transferred_bytes(&self) -> u64 {
        self.uploaded_bytes + self.read_back_bytes
    }
}

/// Recording interface shared by the GPU and software backends
pub trait RenderDevice {
    type Buffer: Clone;
    type Kernel: Clone;
    type DrawProgram: Clone;

    fn name(&self) -> &str;

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<Self::Buffer>;

    /// Returns the buffer's accounting to the device; the handle is dropped.
    fn release_buffer(&mut self, buffer: Self::Buffer);

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    /// Host write, ordered before any work recorded after it.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> EngineResult<()>;

    fn create_kernel(&mut self, desc: &KernelDescriptor<'_>) -> EngineResult<Self::Kernel>;

    fn create_draw_program(
        &mut self,
        desc: &DrawProgramDescriptor<'_>,
    ) -> EngineResult<Self::DrawProgram>;

    fn dispatch(
        &mut self,
        kernel: &Self::Kernel,
        bindings: &[Binding<'_, Self::Buffer>],
        workgroups: [u32; 3],
    ) -> EngineResult<()>;

    fn draw_indexed(&mut self, draw: &DrawCall<'_, Self>, instances: Range<u32>) -> EngineResult<()>;

    /// `args` holds one [`DrawArguments`](crate::renderer::gpu_driven::DrawArguments) at offset 0.
    fn draw_indexed_indirect(&mut self, draw: &DrawCall<'_, Self>, args: &Self::Buffer) -> EngineResult<()>;

    /// Blocking copy of `size` bytes at `offset`; waits at most `timeout`.
    fn read_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        size: u64,
        timeout: Duration,
    ) -> EngineResult<Vec<u8>>;

    /// Marks a frame boundary; the next draw clears the render target.
    fn begin_frame(&mut self);

    /// Hands all recorded work to the device.
    fn submit(&mut self);

    fn supports_gpu_timing(&self) -> bool;

    fn begin_timer(&mut self, scope: TimerScope);

    fn end_timer(&mut self, scope: TimerScope);

    /// Reads back this frame's timer pairs; waits at most `timeout`.
    fn resolve_timers(&mut self, timeout: Duration) -> EngineResult<TimerSamples>;

    fn stats(&self) -> DeviceStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroups_round_up() {
        assert_eq!(workgroups_for(0), 0);
        assert_eq!(workgroups_for(1), 1);
        assert_eq!(workgroups_for(64), 1);
        assert_eq!(workgroups_for(65), 2);
        assert_eq!(workgroups_for(100_000), 1563);
    }
}
