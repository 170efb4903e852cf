//! Benchmark exports: CSV summary, CPU/GPU comparison report and JSON

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::benchmark::{BenchmarkResult, RenderingApproach};
use super::error::{benchmark_data_error, ProfilingErrorContext};
use crate::error::EngineResult;

pub const CSV_HEADER: &str = "Approach,ObjectCount,VisibleObjects,AverageFPS,AverageFrameTime,AverageGPUTime,AverageCPUTime,AverageDrawCalls,AverageTriangles,AverageInstances,AverageIndirectDrawCalls,AverageComputeDispatches,AverageGPUMemoryUsage,AverageCPUMemoryUsage,AverageBandwidthUsage";

pub fn csv_row(result: &BenchmarkResult) -> String {
    format!(
        "{},{},{:.1},{:.2},{:.4},{:.4},{:.4},{:.1},{:.0},{:.0},{:.1},{:.1},{:.0},{:.0},{:.0}",
        result.approach,
        result.object_count,
        result.average_visible_objects(),
        result.average_fps(),
        result.frame_time.mean,
        result.gpu_time.mean,
        result.cpu_time.mean,
        result.draw_calls.mean,
        result.triangles.mean,
        result.instances.mean,
        result.indirect_draw_calls.mean,
        result.compute_dispatches.mean,
        result.gpu_memory.mean,
        result.cpu_memory.mean,
        result.bandwidth.mean
    )
}

pub fn results_to_csv(results: &[BenchmarkResult]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + results.len() * 128);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for result in results {
        out.push_str(&csv_row(result));
        out.push('\n');
    }
    out
}

/// `(gpu - cpu) / cpu * 100`; 0 when the CPU figure is 0
pub fn fps_improvement_percent(cpu_fps: f64, gpu_fps: f64) -> f64 {
    if cpu_fps == 0.0 {
        return 0.0;
    }
    (gpu_fps - cpu_fps) / cpu_fps * 100.0
}

/// Head-to-head numbers for one object count
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub object_count: u32,
    pub cpu_fps: f64,
    pub gpu_fps: f64,
    pub fps_improvement_percent: f64,
    pub cpu_frame_time_ms: f64,
    pub gpu_frame_time_ms: f64,
    /// Positive when the GPU-driven frame is shorter
    pub frame_time_reduction_percent: f64,
    pub cpu_draw_calls: f64,
    pub gpu_draw_calls: f64,
}

/// Pairs the first CPU-driven and GPU-driven result of every object count,
/// ordered by object count. Counts missing either side are skipped.
pub fn compare_results(results: &[BenchmarkResult]) -> Vec<Comparison> {
    let mut counts: Vec<u32> = results.iter().map(|r| r.object_count).collect();
    counts.sort_unstable();
    counts.dedup();

    counts
        .into_iter()
        .filter_map(|count| {
            let find = |approach| {
                results
                    .iter()
                    .find(|r| r.object_count == count && r.approach == approach)
            };
            let cpu = find(RenderingApproach::CpuDriven)?;
            let gpu = find(RenderingApproach::GpuDriven)?;

            let (cpu_fps, gpu_fps) = (cpu.average_fps(), gpu.average_fps());
            let (cpu_ms, gpu_ms) = (cpu.average_frame_time_ms(), gpu.average_frame_time_ms());
            Some(Comparison {
                object_count: count,
                cpu_fps,
                gpu_fps,
                fps_improvement_percent: fps_improvement_percent(cpu_fps, gpu_fps),
                cpu_frame_time_ms: cpu_ms,
                gpu_frame_time_ms: gpu_ms,
                frame_time_reduction_percent: if cpu_ms > 0.0 {
                    (cpu_ms - gpu_ms) / cpu_ms * 100.0
                } else {
                    0.0
                },
                cpu_draw_calls: cpu.draw_calls.mean,
                gpu_draw_calls: gpu.draw_calls.mean,
            })
        })
        .collect()
}

/// Fixed-width summary of every result followed by one conclusion line per
/// compared object count.
pub fn comparison_report(results: &[BenchmarkResult], generated_at: DateTime<Local>) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "GPU-Driven vs CPU-Driven Rendering Benchmark");
    let _ = writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "{}", "=".repeat(96));
    let _ = writeln!(
        out,
        "{:<12}{:>10}{:>10}{:>12}{:>12}{:>12}{:>12}{:>16}",
        "Approach", "Objects", "Visible", "FPS", "Frame(ms)", "GPU(ms)", "Draws", "Dispatches"
    );
    let _ = writeln!(out, "{}", "-".repeat(96));
    for r in results {
        let _ = writeln!(
            out,
            "{:<12}{:>10}{:>10.0}{:>12.2}{:>12.3}{:>12.3}{:>12.1}{:>16.1}",
            r.approach.to_string(),
            r.object_count,
            r.average_visible_objects(),
            r.average_fps(),
            r.average_frame_time_ms(),
            r.gpu_time.mean,
            r.draw_calls.mean,
            r.compute_dispatches.mean
        );
    }

    let comparisons = compare_results(results);
    if comparisons.is_empty() {
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Comparison");
    let _ = writeln!(out, "{}", "-".repeat(96));
    for c in &comparisons {
        let verdict = if c.fps_improvement_percent >= 0.0 { "faster" } else { "slower" };
        let _ = writeln!(
            out,
            "{} objects: GPU-driven is {:.2}% {} ({:.2} -> {:.2} FPS, frame time {:.3} -> {:.3} ms, {:+.2}%, draw calls {:.0} -> {:.0})",
            c.object_count,
            c.fps_improvement_percent.abs(),
            verdict,
            c.cpu_fps,
            c.gpu_fps,
            c.cpu_frame_time_ms,
            c.gpu_frame_time_ms,
            -c.frame_time_reduction_percent,
            c.cpu_draw_calls,
            c.gpu_draw_calls
        );
    }
    out
}

/// Writes report files into one directory. Concurrent writers (a UI timer
/// and the benchmark loop) are serialized.
pub struct ReportWriter {
    output_directory: PathBuf,
    lock: Mutex<()>,
}

impl ReportWriter {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    fn write(&self, file_name: &str, contents: &str) -> EngineResult<PathBuf> {
        let _guard = self.lock.lock();
        std::fs::create_dir_all(&self.output_directory).profiling_context("create report directory")?;
        let path = self.output_directory.join(file_name);
        std::fs::write(&path, contents)?;
        log::info!("[ReportWriter::write] Wrote {}", path.display());
        Ok(path)
    }

    pub fn write_csv(&self, results: &[BenchmarkResult], file_name: &str) -> EngineResult<PathBuf> {
        if results.is_empty() {
            return Err(benchmark_data_error("no benchmark results to export"));
        }
        self.write(file_name, &results_to_csv(results))
    }

    pub fn write_comparison(&self, results: &[BenchmarkResult], file_name: &str) -> EngineResult<PathBuf> {
        if results.is_empty() {
            return Err(benchmark_data_error("no benchmark results to compare"));
        }
        self.write(file_name, &comparison_report(results, Local::now()))
    }

    pub fn write_json(&self, results: &[BenchmarkResult], file_name: &str) -> EngineResult<PathBuf> {
        let json = serde_json::to_string_pretty(results)?;
        self.write(file_name, &json)
    }

    /// CSV, comparison and JSON under one timestamped stem
    pub fn write_all(&self, results: &[BenchmarkResult]) -> EngineResult<Vec<PathBuf>> {
        let stem = format!("benchmark_{}", Local::now().format("%Y%m%d_%H%M%S"));
        Ok(vec![
            self.write_csv(results, &format!("{}.csv", stem))?,
            self.write_comparison(results, &format!("{}_comparison.txt", stem))?,
            self.write_json(results, &format!("{}.json", stem))?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::benchmark::{BenchmarkConfig, FrameSample};

    fn result(approach: RenderingApproach, object_count: u32, frame_times: &[f64]) -> BenchmarkResult {
        let config = BenchmarkConfig {
            approach,
            object_count,
            ..BenchmarkConfig::default()
        };
        let mut result = BenchmarkResult::new(&config, "grid", "software");
        for ms in frame_times {
            result.push_sample(FrameSample {
                frame_time_ms: *ms,
                cpu_time_ms: *ms,
                draw_calls: 1,
                visible_objects: object_count / 2,
                total_objects: object_count,
                ..FrameSample::default()
            });
        }
        result.finalize();
        result
    }

    #[test]
    fn test_csv_header_and_rows() {
        let csv = results_to_csv(&[result(RenderingApproach::GpuDriven, 1000, &[4.0, 6.0])]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(row.len(), CSV_HEADER.split(',').count());
        assert_eq!(row[0], "GPU_DRIVEN");
        assert_eq!(row[1], "1000");
        assert_eq!(row[2], "500.0");
        assert_eq!(row[3], "200.00");
        assert!(!CSV_HEADER.contains(' '));
    }

    #[test]
    fn test_comparison_pairs_cpu_and_gpu() {
        let results = vec![
            result(RenderingApproach::CpuDriven, 5000, &[20.0]),
            result(RenderingApproach::GpuDriven, 5000, &[8.0]),
            result(RenderingApproach::Hybrid, 5000, &[10.0]),
            result(RenderingApproach::GpuDriven, 1000, &[2.0]),
        ];
        let comparisons = compare_results(&results);
        assert_eq!(comparisons.len(), 1);
        let c = &comparisons[0];
        assert_eq!(c.object_count, 5000);
        assert_eq!(c.fps_improvement_percent, (125.0 - 50.0) / 50.0 * 100.0);
        assert!((c.frame_time_reduction_percent - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_has_conclusion_line() {
        let results = vec![
            result(RenderingApproach::CpuDriven, 1000, &[10.0]),
            result(RenderingApproach::GpuDriven, 1000, &[5.0]),
        ];
        let report = comparison_report(&results, Local::now());
        assert!(report.contains("1000 objects: GPU-driven is 100.00% faster"));
    }

    #[test]
    fn test_zero_cpu_fps_gives_zero_improvement() {
        assert_eq!(fps_improvement_percent(0.0, 60.0), 0.0);
        assert_eq!(fps_improvement_percent(50.0, 25.0), -50.0);
    }

    #[test]
    fn test_writer_rejects_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        assert!(writer.write_csv(&[], "empty.csv").is_err());
    }

    #[test]
    fn test_write_all_creates_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("nested"));
        let results = vec![
            result(RenderingApproach::CpuDriven, 1000, &[10.0]),
            result(RenderingApproach::GpuDriven, 1000, &[5.0]),
        ];
        let paths = writer.write_all(&results).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.exists()));

        let json = std::fs::read_to_string(&paths[2]).unwrap();
        let parsed: Vec<BenchmarkResult> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].approach, RenderingApproach::GpuDriven);
    }
}
