pub mod compute_kernel;
pub mod cpu_driven;
pub mod culling;
pub mod device;
pub mod dynamic_buffer;
pub mod error;
pub mod gpu_driven;
pub mod mesh;
pub mod outcome;
pub mod shaders;
pub mod vertex;

pub use compute_kernel::ComputeKernel;
pub use cpu_driven::CpuDrivenRenderer;
pub use culling::{aabb_visible, object_visible, reference_visibility, Aabb, Frustum, CULL_EPSILON};
pub use device::{
    BufferKind, DeviceStats, RenderDevice, SoftwareDevice, SoftwareDeviceOptions, TimerSample, TimerSamples,
    TimerScope, WgpuDevice, WgpuDeviceOptions,
};
pub use dynamic_buffer::DynamicBuffer;
pub use gpu_driven::{CrossValidationReport, GpuDrivenPipeline, PipelineState};
pub use mesh::{cube_geometry, Mesh};
pub use outcome::{RenderOutcome, RenderPath};
pub use vertex::Vertex;
