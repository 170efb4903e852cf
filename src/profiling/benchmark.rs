//! Benchmark harness
//!
//! Drives fixed-length frame loops over a synthetic scene with one rendering
//! approach and aggregates the profiler's per-frame records.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::frame_profiler::{FrameProfiler, FrameTimingRecord};
use crate::camera::{Camera, CameraSource};
use crate::config::{PipelineConfig, ProfilerConfig};
use crate::error::EngineResult;
use crate::renderer::cpu_driven::CpuDrivenRenderer;
use crate::renderer::device::RenderDevice;
use crate::renderer::gpu_driven::GpuDrivenPipeline;
use crate::renderer::mesh::Mesh;
use crate::scene::generators::scene_radius;
use crate::scene::{generate_scene, Light, ObjectRecord, SceneKind};

/// Object counts swept by [`BenchmarkHarness::run_benchmark_suite`]
pub const SUITE_OBJECT_COUNTS: [u32; 5] = [1_000, 5_000, 10_000, 25_000, 50_000];

/// Approaches swept by [`BenchmarkHarness::run_benchmark_suite`]
pub const SUITE_APPROACHES: [RenderingApproach; 3] = [
    RenderingApproach::CpuDriven,
    RenderingApproach::GpuDriven,
    RenderingApproach::Hybrid,
];

const TARGET_WIDTH: u32 = 1280;
const TARGET_HEIGHT: u32 = 720;
const PROGRESS_INTERVAL: u32 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderingApproach {
    CpuDriven,
    #[default]
    GpuDriven,
    /// CPU-driven inside `hybrid_distance` of the camera, GPU-driven beyond
    Hybrid,
}

impl fmt::Display for RenderingApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderingApproach::CpuDriven => "CPU_DRIVEN",
            RenderingApproach::GpuDriven => "GPU_DRIVEN",
            RenderingApproach::Hybrid => "HYBRID",
        };
        f.write_str(name)
    }
}

/// One benchmark run; immutable while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub approach: RenderingApproach,
    pub object_count: u32,
    /// Recorded frames, excluding warmup
    pub benchmark_duration: u32,
    pub enable_frustum_culling: bool,
    /// Reserved; accepted and ignored with a warning
    pub enable_lod: bool,
    /// Reserved; accepted and ignored with a warning
    pub enable_occlusion_culling: bool,
    /// Empty picks the generator's name
    pub scene_name: String,
    pub output_directory: String,
    pub warmup_frames: u32,
    pub seed: u64,
    /// Camera distance splitting the hybrid near and far sets
    pub hybrid_distance: f32,
    /// Degrees the camera orbits the scene centre per frame
    pub camera_orbit_degrees: f32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            approach: RenderingApproach::GpuDriven,
            object_count: 10_000,
            benchmark_duration: 300,
            enable_frustum_culling: true,
            enable_lod: false,
            enable_occlusion_culling: false,
            scene_name: String::new(),
            output_directory: "benchmark_results".to_string(),
            warmup_frames: 10,
            seed: 42,
            hybrid_distance: 50.0,
            camera_orbit_degrees: 0.5,
        }
    }
}

/// Per-frame values retained in a result
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub frame_time_ms: f64,
    pub cpu_time_ms: f64,
    pub gpu_time_ms: f64,
    pub draw_calls: u32,
    pub indirect_draw_calls: u32,
    pub compute_dispatches: u32,
    pub triangles: u64,
    pub instances: u64,
    pub total_objects: u32,
    pub visible_objects: u32,
    pub gpu_memory_bytes: u64,
    pub cpu_memory_bytes: u64,
    pub bandwidth_bytes: u64,
    #[serde(default)]
    pub cpu_culling_time_ms: f64,
    #[serde(default)]
    pub gpu_culling_time_ms: f64,
    #[serde(default)]
    pub reference_culling_time_ms: f64,
    #[serde(default)]
    pub frustum_culling_speedup: f64,
}

impl From<&FrameTimingRecord> for FrameSample {
    fn from(record: &FrameTimingRecord) -> Self {
        Self {
            frame_time_ms: record.frame_time_ms,
            cpu_time_ms: record.cpu_time_ms,
            gpu_time_ms: record.gpu_time_ms,
            draw_calls: record.draw_calls,
            indirect_draw_calls: record.indirect_draw_calls,
            compute_dispatches: record.compute_dispatches,
            triangles: record.triangles,
            instances: record.instances,
            total_objects: record.total_objects,
            visible_objects: record.visible_objects,
            gpu_memory_bytes: record.gpu_memory_bytes,
            cpu_memory_bytes: record.cpu_memory_bytes,
            bandwidth_bytes: record.bandwidth_bytes,
            cpu_culling_time_ms: record.cpu_culling_time_ms,
            gpu_culling_time_ms: record.gpu_culling_time_ms,
            reference_culling_time_ms: record.reference_culling_time_ms,
            frustum_culling_speedup: record.frustum_culling_speedup,
        }
    }
}

/// Running mean, min, max and variance (Welford)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    m2: f64,
}

impl SeriesStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Population variance; 0 for fewer than two samples
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub approach: RenderingApproach,
    pub object_count: u32,
    pub scene_name: String,
    pub device_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Pipeline state at the end of the run
    pub final_mode: String,
    pub cancelled: bool,

    pub samples: Vec<FrameSample>,
    pub frame_time: SeriesStats,
    pub cpu_time: SeriesStats,
    pub gpu_time: SeriesStats,
    pub draw_calls: SeriesStats,
    pub indirect_draw_calls: SeriesStats,
    pub compute_dispatches: SeriesStats,
    pub triangles: SeriesStats,
    pub instances: SeriesStats,
    pub visible_objects: SeriesStats,
    pub gpu_memory: SeriesStats,
    pub cpu_memory: SeriesStats,
    pub bandwidth: SeriesStats,
    #[serde(default)]
    pub gpu_culling_time: SeriesStats,
    #[serde(default)]
    pub reference_culling_time: SeriesStats,
    /// Reference CPU culling time over GPU culling time
    #[serde(default)]
    pub culling_speedup: SeriesStats,

    pub p95_frame_time_ms: f64,
    pub p99_frame_time_ms: f64,
}

impl BenchmarkResult {
    pub fn new(config: &BenchmarkConfig, scene_name: &str, device_name: &str) -> Self {
        Self {
            approach: config.approach,
            object_count: config.object_count,
            scene_name: scene_name.to_string(),
            device_name: device_name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            final_mode: String::new(),
            cancelled: false,
            samples: Vec::with_capacity(config.benchmark_duration as usize),
            frame_time: SeriesStats::default(),
            cpu_time: SeriesStats::default(),
            gpu_time: SeriesStats::default(),
            draw_calls: SeriesStats::default(),
            indirect_draw_calls: SeriesStats::default(),
            compute_dispatches: SeriesStats::default(),
            triangles: SeriesStats::default(),
            instances: SeriesStats::default(),
            visible_objects: SeriesStats::default(),
            gpu_memory: SeriesStats::default(),
            cpu_memory: SeriesStats::default(),
            bandwidth: SeriesStats::default(),
            gpu_culling_time: SeriesStats::default(),
            reference_culling_time: SeriesStats::default(),
            culling_speedup: SeriesStats::default(),
            p95_frame_time_ms: 0.0,
            p99_frame_time_ms: 0.0,
        }
    }

    /// Appends one frame and updates every running aggregate
    pub fn push_sample(&mut self, sample: FrameSample) {
        self.frame_time.push(sample.frame_time_ms);
        self.cpu_time.push(sample.cpu_time_ms);
        self.gpu_time.push(sample.gpu_time_ms);
        self.draw_calls.push(sample.draw_calls as f64);
        self.indirect_draw_calls.push(sample.indirect_draw_calls as f64);
        self.compute_dispatches.push(sample.compute_dispatches as f64);
        self.triangles.push(sample.triangles as f64);
        self.instances.push(sample.instances as f64);
        self.visible_objects.push(sample.visible_objects as f64);
        self.gpu_memory.push(sample.gpu_memory_bytes as f64);
        self.cpu_memory.push(sample.cpu_memory_bytes as f64);
        self.bandwidth.push(sample.bandwidth_bytes as f64);
        self.gpu_culling_time.push(sample.gpu_culling_time_ms);
        self.reference_culling_time.push(sample.reference_culling_time_ms);
        self.culling_speedup.push(sample.frustum_culling_speedup);
        self.samples.push(sample);
    }

    /// Computes the tail percentiles and stamps the finish time
    pub fn finalize(&mut self) {
        if self.samples.is_empty() {
            log::warn!(
                "[BenchmarkResult::finalize] {} / {} objects has no samples; aggregates are zero",
                self.approach,
                self.object_count
            );
        }
        let mut frame_times: Vec<f64> = self.samples.iter().map(|s| s.frame_time_ms).collect();
        frame_times.sort_by(|a, b| a.total_cmp(b));
        self.p95_frame_time_ms = percentile(&frame_times, 0.95);
        self.p99_frame_time_ms = percentile(&frame_times, 0.99);
        self.finished_at = Some(Utc::now());
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len()
    }

    pub fn average_frame_time_ms(&self) -> f64 {
        self.frame_time.mean
    }

    /// 1000 / mean frame time; 0 for an empty series
    pub fn average_fps(&self) -> f64 {
        if self.frame_time.count == 0 || self.frame_time.mean <= 0.0 {
            return 0.0;
        }
        1000.0 / self.frame_time.mean
    }

    pub fn average_visible_objects(&self) -> f64 {
        self.visible_objects.mean
    }
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

enum BenchRenderer<D: RenderDevice> {
    Cpu(CpuDrivenRenderer<D>),
    Gpu(GpuDrivenPipeline<D>),
    Hybrid {
        near: CpuDrivenRenderer<D>,
        far: GpuDrivenPipeline<D>,
        near_records: Vec<ObjectRecord>,
        far_records: Vec<ObjectRecord>,
    },
}

impl<D: RenderDevice> BenchRenderer<D> {
    fn mode(&self) -> String {
        match self {
            BenchRenderer::Cpu(_) => "cpu_driven".to_string(),
            BenchRenderer::Gpu(pipeline) => pipeline.state().to_string(),
            BenchRenderer::Hybrid { far, .. } => format!("hybrid+{}", far.state()),
        }
    }

    fn release(self, device: &mut D) {
        match self {
            BenchRenderer::Cpu(renderer) => renderer.release(device),
            BenchRenderer::Gpu(pipeline) => pipeline.shutdown(device),
            BenchRenderer::Hybrid { near, far, .. } => {
                far.shutdown(device);
                near.release(device);
            }
        }
    }
}

pub struct BenchmarkHarness {
    pipeline_config: PipelineConfig,
    profiler_config: ProfilerConfig,
    cancel: Arc<AtomicBool>,
}

impl BenchmarkHarness {
    pub fn new(pipeline_config: PipelineConfig, profiler_config: ProfilerConfig) -> Self {
        Self {
            pipeline_config,
            profiler_config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag stops the current run after its frame; the partial
    /// result comes back with `cancelled` set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn run_benchmark<D: RenderDevice>(
        &self,
        device: &mut D,
        config: &BenchmarkConfig,
    ) -> EngineResult<BenchmarkResult> {
        if config.enable_lod {
            log::warn!("[BenchmarkHarness::run_benchmark] enable_lod is reserved and has no effect");
        }
        if config.enable_occlusion_culling {
            log::warn!("[BenchmarkHarness::run_benchmark] enable_occlusion_culling is reserved and has no effect");
        }

        let kind = SceneKind::for_object_count(config.object_count);
        let scene_name = if config.scene_name.is_empty() {
            kind.name().to_string()
        } else {
            config.scene_name.clone()
        };
        log::info!(
            "[BenchmarkHarness::run_benchmark] {} with {} objects on '{}' scene ({} frames + {} warmup)",
            config.approach,
            config.object_count,
            scene_name,
            config.benchmark_duration,
            config.warmup_frames
        );

        let mesh = Mesh::cube(device)?;
        let scene = generate_scene(config.object_count, config.seed, mesh.bounding_box());
        let capacity = config.object_count.max(1);
        let pipeline_config = PipelineConfig {
            max_objects: capacity,
            ..self.pipeline_config.clone()
        };

        let mut renderer = match config.approach {
            RenderingApproach::CpuDriven => {
                let mut renderer = CpuDrivenRenderer::new(device, capacity)?;
                renderer.set_frustum_culling(config.enable_frustum_culling);
                BenchRenderer::Cpu(renderer)
            }
            RenderingApproach::GpuDriven => {
                let mut pipeline = GpuDrivenPipeline::new(device, pipeline_config)?;
                pipeline.set_frustum_culling(config.enable_frustum_culling);
                pipeline.update_objects(device, &scene);
                BenchRenderer::Gpu(pipeline)
            }
            RenderingApproach::Hybrid => {
                let mut near = CpuDrivenRenderer::new(device, capacity)?;
                near.set_frustum_culling(config.enable_frustum_culling);
                let mut far = GpuDrivenPipeline::new(device, pipeline_config)?;
                far.set_frustum_culling(config.enable_frustum_culling);
                BenchRenderer::Hybrid {
                    near,
                    far,
                    near_records: Vec::with_capacity(scene.len()),
                    far_records: Vec::with_capacity(scene.len()),
                }
            }
        };

        let radius = scene_radius(config.object_count).max(1.0);
        let mut camera = Camera::looking_at(
            Vec3::new(0.0, radius * 0.25, radius * 1.5),
            Vec3::ZERO,
            TARGET_WIDTH,
            TARGET_HEIGHT,
        )
        .with_depth_range(0.1, radius * 4.0 + 10.0);
        let light = Light::default();

        let mut profiler = FrameProfiler::new(self.profiler_config.clone());
        profiler.initialize(device);
        let mut result = BenchmarkResult::new(config, &scene_name, device.name());

        let total_frames = config.warmup_frames + config.benchmark_duration;
        for frame in 0..total_frames {
            if self.is_cancelled() {
                log::warn!(
                    "[BenchmarkHarness::run_benchmark] Cancelled after {} recorded frames",
                    result.frame_count()
                );
                result.cancelled = true;
                break;
            }

            camera.orbit(Vec3::ZERO, config.camera_orbit_degrees);
            profiler.begin_frame(device);
            match &mut renderer {
                BenchRenderer::Cpu(cpu) => {
                    cpu.render(device, &mesh, &scene, &camera, &light, &mut profiler);
                }
                BenchRenderer::Gpu(gpu) => {
                    gpu.render(device, &mesh, &camera, &light, &mut profiler);
                }
                BenchRenderer::Hybrid {
                    near,
                    far,
                    near_records,
                    far_records,
                } => {
                    split_by_distance(
                        &scene,
                        camera.position(),
                        config.hybrid_distance,
                        near_records,
                        far_records,
                    );
                    if far_records.is_empty() {
                        far.clear_objects();
                    } else {
                        far.update_objects(device, far_records);
                    }
                    far.render(device, &mesh, &camera, &light, &mut profiler);
                    near.render(device, &mesh, near_records, &camera, &light, &mut profiler);
                }
            }
            profiler.set_rendering_approach(config.approach);
            profiler.end_frame(device);

            if frame < config.warmup_frames {
                continue;
            }
            // Timed after end_frame so the reference test stays out of the frame's CPU time
            let gpu_culled = match &renderer {
                BenchRenderer::Cpu(_) => None,
                BenchRenderer::Gpu(gpu) => Some(gpu),
                BenchRenderer::Hybrid { far, .. } => Some(far),
            };
            if let Some(ms) = gpu_culled.and_then(|pipeline| pipeline.time_reference_culling()) {
                profiler.amend_reference_culling_time(ms);
            }
            result.push_sample(FrameSample::from(profiler.last_frame()));

            let recorded = frame + 1 - config.warmup_frames;
            if recorded % PROGRESS_INTERVAL == 0 {
                log::info!(
                    "[BenchmarkHarness::run_benchmark] {}/{} frames, {:.1} FPS average",
                    recorded,
                    config.benchmark_duration,
                    result.average_fps()
                );
            }
        }

        result.final_mode = renderer.mode();
        result.finalize();
        profiler.shutdown();
        renderer.release(device);
        mesh.release(device);

        log::info!(
            "[BenchmarkHarness::run_benchmark] {} / {} objects: {:.2} FPS, {:.3} ms/frame, {:.1} draw calls",
            result.approach,
            result.object_count,
            result.average_fps(),
            result.average_frame_time_ms(),
            result.draw_calls.mean
        );
        Ok(result)
    }

    /// Every count in [`SUITE_OBJECT_COUNTS`] with every approach. Runs that
    /// fail to start are logged and skipped.
    pub fn run_benchmark_suite<D: RenderDevice>(
        &self,
        device: &mut D,
        base: &BenchmarkConfig,
    ) -> Vec<BenchmarkResult> {
        let mut results = Vec::with_capacity(SUITE_OBJECT_COUNTS.len() * SUITE_APPROACHES.len());
        for object_count in SUITE_OBJECT_COUNTS {
            for approach in SUITE_APPROACHES {
                if self.is_cancelled() {
                    log::warn!("[BenchmarkHarness::run_benchmark_suite] Cancelled; returning {} results", results.len());
                    return results;
                }
                let config = BenchmarkConfig {
                    approach,
                    object_count,
                    ..base.clone()
                };
                match self.run_benchmark(device, &config) {
                    Ok(result) => results.push(result),
                    Err(e) => log::error!(
                        "[BenchmarkHarness::run_benchmark_suite] {} / {} objects failed: {}",
                        approach,
                        object_count,
                        e
                    ),
                }
            }
        }
        results
    }
}

/// Partitions `scene` into objects closer than `threshold` to `eye` and the rest
pub fn split_by_distance(
    scene: &[ObjectRecord],
    eye: Vec3,
    threshold: f32,
    near: &mut Vec<ObjectRecord>,
    far: &mut Vec<ObjectRecord>,
) {
    near.clear();
    far.clear();
    let threshold_sq = threshold * threshold;
    for record in scene {
        if Vec3::from_array(record.position).distance_squared(eye) < threshold_sq {
            near.push(*record);
        } else {
            far.push(*record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::culling::Aabb;
    use crate::renderer::device::SoftwareDevice;

    fn short_config(approach: RenderingApproach, object_count: u32) -> BenchmarkConfig {
        BenchmarkConfig {
            approach,
            object_count,
            benchmark_duration: 6,
            warmup_frames: 2,
            ..BenchmarkConfig::default()
        }
    }

    fn harness() -> BenchmarkHarness {
        BenchmarkHarness::new(PipelineConfig::default(), ProfilerConfig::default())
    }

    #[test]
    fn test_series_stats_match_direct_computation() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = SeriesStats::default();
        for v in values {
            stats.push(v);
        }
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.variance() - 4.0).abs() < 1e-12);
        assert!((stats.std_dev() - 2.0).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn test_empty_result_aggregates_are_zero() {
        let mut result = BenchmarkResult::new(&BenchmarkConfig::default(), "empty", "test");
        result.finalize();
        assert_eq!(result.average_fps(), 0.0);
        assert_eq!(result.average_frame_time_ms(), 0.0);
        assert_eq!(result.p95_frame_time_ms, 0.0);
    }

    #[test]
    fn test_percentiles_use_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.95), 95.0);
        assert_eq!(percentile(&sorted, 0.99), 99.0);
        assert_eq!(percentile(&[3.0], 0.99), 3.0);
    }

    #[test]
    fn test_approach_names() {
        assert_eq!(RenderingApproach::CpuDriven.to_string(), "CPU_DRIVEN");
        assert_eq!(RenderingApproach::Hybrid.to_string(), "HYBRID");
        let json = serde_json::to_string(&RenderingApproach::GpuDriven).unwrap();
        assert_eq!(json, "\"gpu_driven\"");
    }

    #[test]
    fn test_split_by_distance() {
        let scene = vec![
            ObjectRecord::new(0, Vec3::new(1.0, 0.0, 0.0), Aabb::unit_cube()),
            ObjectRecord::new(1, Vec3::new(100.0, 0.0, 0.0), Aabb::unit_cube()),
            ObjectRecord::new(2, Vec3::new(0.0, 0.0, -49.0), Aabb::unit_cube()),
        ];
        let (mut near, mut far) = (Vec::new(), Vec::new());
        split_by_distance(&scene, Vec3::ZERO, 50.0, &mut near, &mut far);
        assert_eq!(near.iter().map(|r| r.object_index).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(far.len(), 1);
    }

    #[test]
    fn test_gpu_run_records_requested_frames() {
        let mut device = SoftwareDevice::new();
        let result = harness()
            .run_benchmark(&mut device, &short_config(RenderingApproach::GpuDriven, 500))
            .unwrap();

        assert_eq!(result.frame_count(), 6);
        assert_eq!(result.scene_name, "grid");
        assert_eq!(result.final_mode, "gpu_compacted");
        assert_eq!(result.draw_calls.max, 1.0);
        assert!(result.finished_at.is_some());
        assert!((result.average_fps() - 1000.0 / result.average_frame_time_ms()).abs() < 1e-6);
        assert_eq!(device.stats().allocated_bytes, 0);
    }

    #[test]
    fn test_cpu_run_draws_per_visible_object() {
        let mut device = SoftwareDevice::new();
        let result = harness()
            .run_benchmark(&mut device, &short_config(RenderingApproach::CpuDriven, 500))
            .unwrap();

        for sample in &result.samples {
            assert_eq!(sample.draw_calls, sample.visible_objects);
            assert_eq!(sample.total_objects, 500);
        }
    }

    #[test]
    fn test_hybrid_run_accounts_for_every_object() {
        let mut device = SoftwareDevice::new();
        let config = BenchmarkConfig {
            hybrid_distance: 20.0,
            ..short_config(RenderingApproach::Hybrid, 800)
        };
        let result = harness().run_benchmark(&mut device, &config).unwrap();
        assert_eq!(result.frame_count(), 6);
        for sample in &result.samples {
            assert_eq!(sample.total_objects, 800);
        }
        assert!(result.final_mode.starts_with("hybrid"));
    }

    #[test]
    fn test_gpu_run_reports_culling_speedup() {
        let mut device = SoftwareDevice::new();
        let result = harness()
            .run_benchmark(&mut device, &short_config(RenderingApproach::GpuDriven, 2000))
            .unwrap();

        for sample in &result.samples {
            assert!(sample.gpu_culling_time_ms > 0.0);
            assert!(sample.reference_culling_time_ms > 0.0);
            assert!(sample.frustum_culling_speedup > 0.0);
            assert_eq!(sample.cpu_culling_time_ms, 0.0);
        }
        assert!(result.culling_speedup.mean > 0.0);
        assert_eq!(result.culling_speedup.count, 6);
    }

    #[test]
    fn test_hybrid_run_times_reference_on_far_set() {
        let mut device = SoftwareDevice::new();
        let config = BenchmarkConfig {
            hybrid_distance: 5.0,
            ..short_config(RenderingApproach::Hybrid, 2000)
        };
        let result = harness().run_benchmark(&mut device, &config).unwrap();
        for sample in &result.samples {
            assert!(sample.reference_culling_time_ms > 0.0);
            assert!(sample.frustum_culling_speedup > 0.0);
        }
    }

    #[test]
    fn test_cpu_run_has_no_reference_timing() {
        let mut device = SoftwareDevice::new();
        let result = harness()
            .run_benchmark(&mut device, &short_config(RenderingApproach::CpuDriven, 200))
            .unwrap();
        assert_eq!(result.reference_culling_time.max, 0.0);
    }

    #[test]
    fn test_disabled_culling_sees_everything() {
        let mut device = SoftwareDevice::new();
        let config = BenchmarkConfig {
            enable_frustum_culling: false,
            ..short_config(RenderingApproach::CpuDriven, 200)
        };
        let result = harness().run_benchmark(&mut device, &config).unwrap();
        assert_eq!(result.visible_objects.min, 200.0);
    }

    #[test]
    fn test_cancelled_run_returns_partial_result() {
        let mut device = SoftwareDevice::new();
        let harness = harness();
        harness.cancel_flag().store(true, Ordering::Relaxed);
        let result = harness
            .run_benchmark(&mut device, &short_config(RenderingApproach::GpuDriven, 100))
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.frame_count(), 0);
        assert!(harness.run_benchmark_suite(&mut device, &BenchmarkConfig::default()).is_empty());
    }
}
