pub mod camera;
pub mod config;
pub mod error;
pub mod profiling;
pub mod renderer;
pub mod scene;

pub use camera::{Camera, CameraSource};
pub use config::{EngineConfig, PipelineConfig, ProfilerConfig};
pub use error::{EngineError, EngineResult};
pub use profiling::{
    BenchmarkConfig, BenchmarkHarness, BenchmarkResult, FrameProfiler, FrameTimingRecord, RenderingApproach,
    ReportWriter,
};
pub use renderer::{
    Aabb, CpuDrivenRenderer, Frustum, GpuDrivenPipeline, Mesh, PipelineState, RenderDevice, RenderOutcome, RenderPath,
    SoftwareDevice, WgpuDevice,
};
pub use scene::{generate_scene, Light, Material, ObjectRecord, SceneKind};

/// Initialize env_logger for binaries and tests; repeated calls are ignored
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
