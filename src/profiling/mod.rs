pub mod benchmark;
pub mod error;
pub mod frame_profiler;
pub mod report;

pub use benchmark::{
    BenchmarkConfig, BenchmarkHarness, BenchmarkResult, FrameSample, RenderingApproach, SeriesStats,
    SUITE_APPROACHES, SUITE_OBJECT_COUNTS,
};
pub use error::{benchmark_data_error, ProfilingErrorContext};
pub use frame_profiler::{estimate_gpu_utilization, FrameProfiler, FrameTimingRecord, ProfilerHistory};
pub use report::{compare_results, comparison_report, fps_improvement_percent, results_to_csv, Comparison, ReportWriter, CSV_HEADER};
