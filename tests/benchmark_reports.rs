/// Benchmark Report Tests
///
/// Runs short benchmarks on the software device and checks the files the
/// report writer produces.

use horde_engine::profiling::report::{results_to_csv, CSV_HEADER};
use horde_engine::{
    BenchmarkConfig, BenchmarkHarness, BenchmarkResult, EngineConfig, PipelineConfig, ProfilerConfig,
    RenderingApproach, ReportWriter, SoftwareDevice,
};

fn quick_run(approach: RenderingApproach, object_count: u32) -> BenchmarkResult {
    let mut device = SoftwareDevice::new();
    let harness = BenchmarkHarness::new(PipelineConfig::default(), ProfilerConfig::default());
    let config = BenchmarkConfig {
        approach,
        object_count,
        benchmark_duration: 4,
        warmup_frames: 1,
        ..BenchmarkConfig::default()
    };
    harness.run_benchmark(&mut device, &config).expect("benchmark run")
}

#[test]
fn test_csv_export_has_one_row_per_result() {
    let results = vec![
        quick_run(RenderingApproach::CpuDriven, 300),
        quick_run(RenderingApproach::GpuDriven, 300),
        quick_run(RenderingApproach::Hybrid, 300),
    ];
    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(dir.path());
    let path = writer.write_csv(&results, "results.csv").unwrap();

    let text = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("CPU_DRIVEN,300,"));
    assert!(lines[2].starts_with("GPU_DRIVEN,300,"));
    assert!(lines[3].starts_with("HYBRID,300,"));
    assert_eq!(text, results_to_csv(&results));
}

#[test]
fn test_comparison_report_lists_each_shared_count() {
    let results = vec![
        quick_run(RenderingApproach::CpuDriven, 200),
        quick_run(RenderingApproach::GpuDriven, 200),
        quick_run(RenderingApproach::GpuDriven, 400),
    ];
    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(dir.path());
    let path = writer.write_comparison(&results, "comparison.txt").unwrap();

    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("200 objects: GPU-driven is"));
    assert!(!text.contains("400 objects: GPU-driven is"));
}

#[test]
fn test_json_round_trips_results() {
    let results = vec![quick_run(RenderingApproach::GpuDriven, 150)];
    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(dir.path());
    let path = writer.write_json(&results, "results.json").unwrap();

    let parsed: Vec<BenchmarkResult> = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(parsed[0].samples.len(), 4);
    assert_eq!(parsed[0].approach, RenderingApproach::GpuDriven);
    assert!((parsed[0].average_fps() - results[0].average_fps()).abs() < 1e-9);
}

#[test]
fn test_benchmark_config_loads_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.toml");
    std::fs::write(
        &path,
        r#"
[benchmark]
approach = "hybrid"
object_count = 2500
hybrid_distance = 30.0
enable_lod = true
"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.benchmark.approach, RenderingApproach::Hybrid);
    assert_eq!(config.benchmark.object_count, 2500);
    assert_eq!(config.benchmark.hybrid_distance, 30.0);
    assert!(config.benchmark.enable_lod);
    assert_eq!(config.benchmark.seed, 42);
}

#[test]
fn test_reserved_flags_do_not_change_results_shape() {
    let mut device = SoftwareDevice::new();
    let harness = BenchmarkHarness::new(PipelineConfig::default(), ProfilerConfig::default());
    let config = BenchmarkConfig {
        object_count: 100,
        benchmark_duration: 3,
        warmup_frames: 0,
        enable_lod: true,
        enable_occlusion_culling: true,
        ..BenchmarkConfig::default()
    };
    let result = harness.run_benchmark(&mut device, &config).unwrap();
    assert_eq!(result.frame_count(), 3);
    assert!(!result.cancelled);
}
