/// GPU-driven rendering system
///
/// The GPU decides what to draw: one compute pass transforms and culls every
/// object, a second packs the survivors into a dense index list, a third
/// writes the indirect draw arguments, and a single indirect draw consumes
/// them. The host never reads anything back on the hot path.
///
/// Key components:
/// - Object record and world matrix storage
/// - Transform/cull, compaction and argument stages
/// - Capability state machine with CPU fallback
pub mod compaction;
pub mod culling_pipeline;
pub mod gpu_driven_renderer;
pub mod indirect_commands;
pub mod object_buffer;
pub mod params;
pub mod state;


pub use compaction::CompactionStage;
pub use culling_pipeline::VisibilityStage;
pub use gpu_driven_renderer::{CrossValidationReport, GpuDrivenPipeline};
pub use indirect_commands::{DrawArguments, IndirectArgsStage};
pub use object_buffer::ObjectBufferStore;
pub use params::FrameParams;
pub use state::{PipelineEvent, PipelineState, FALLBACK_CONFIRMATION_FRAMES};
