//! Per-frame timing and counters
//!
//! One explicitly constructed profiler per render loop. Renderers add to the
//! counters of the current frame; `end_frame` resolves GPU timers, derives
//! the efficiency ratios and appends the frame to a bounded history.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::benchmark::RenderingApproach;
use crate::config::ProfilerConfig;
use crate::error::EngineResult;
use crate::renderer::device::{RenderDevice, TimerSample, TimerScope};

/// Everything measured for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTimingRecord {
    pub frame_index: u64,
    pub approach: RenderingApproach,

    /// Wall time from `begin_frame` to the end of `end_frame`
    pub frame_time_ms: f64,
    /// Host time spent recording the frame, up to submission
    pub cpu_time_ms: f64,
    pub gpu_time_ms: f64,

    pub draw_calls: u32,
    pub indirect_draw_calls: u32,
    pub compute_dispatches: u32,
    pub triangles: u64,
    pub vertices: u64,
    pub instances: u64,

    pub gpu_memory_bytes: u64,
    pub cpu_memory_bytes: u64,
    pub bandwidth_bytes: u64,

    /// Frustum test run by the CPU-driven renderer, including the near set
    /// of hybrid frames
    pub cpu_culling_time_ms: f64,
    pub gpu_culling_time_ms: f64,
    /// CPU reference test over the same objects the GPU culled this frame.
    /// Zero on CPU-driven frames.
    #[serde(default)]
    pub reference_culling_time_ms: f64,
    pub total_objects: u32,
    /// On GPU-driven frames this comes from the last visible-count readback,
    /// which may trail the camera by up to `readback_interval - 1` frames.
    /// Changing the object set forces a fresh readback.
    pub visible_objects: u32,

    pub culling_efficiency: f64,
    pub frustum_culling_speedup: f64,
    pub rendering_efficiency: f64,
    pub draw_call_efficiency: f64,
    /// Estimate only; see [`estimate_gpu_utilization`]
    pub gpu_utilization: f64,
}

impl FrameTimingRecord {
    fn reset(&mut self, frame_index: u64, approach: RenderingApproach) {
        *self = FrameTimingRecord {
            frame_index,
            approach,
            ..Default::default()
        };
    }

    /// Computes the derived ratios from the raw counters
    pub fn derive_metrics(&mut self) {
        self.culling_efficiency = if self.total_objects == 0 {
            1.0
        } else {
            self.visible_objects as f64 / self.total_objects as f64
        };

        let cpu_culling = match self.approach {
            RenderingApproach::CpuDriven => self.cpu_culling_time_ms,
            RenderingApproach::GpuDriven | RenderingApproach::Hybrid => self.reference_culling_time_ms,
        };
        self.frustum_culling_speedup = if cpu_culling > 0.0 && self.gpu_culling_time_ms > 0.0 {
            cpu_culling / self.gpu_culling_time_ms
        } else {
            0.0
        };

        self.rendering_efficiency = if self.cpu_time_ms > 0.0 {
            self.triangles as f64 / self.cpu_time_ms
        } else {
            0.0
        };

        let effective_objects = match self.approach {
            RenderingApproach::CpuDriven => self.instances as f64,
            RenderingApproach::GpuDriven | RenderingApproach::Hybrid => self.visible_objects as f64,
        };
        self.draw_call_efficiency = if self.draw_calls > 0 {
            effective_objects / self.draw_calls as f64
        } else {
            0.0
        };

        self.gpu_utilization = estimate_gpu_utilization(self);
    }
}

/// Rough occupancy guess from the frame's workload counters.
///
/// Not a measurement. Starts from the approach's floor and adds bounded
/// terms for triangle load, compute dispatches and draw-call batching, then
/// clamps to [50, 85] for GPU-driven work and [25, 65] for CPU-driven work.
pub fn estimate_gpu_utilization(record: &FrameTimingRecord) -> f64 {
    let triangle_load = (record.triangles as f64 / 1_000_000.0 * 10.0).min(20.0);
    let dispatch_load = (record.compute_dispatches as f64 * 2.5).min(10.0);
    let batching = (record.draw_call_efficiency / 1_000.0 * 5.0).min(10.0);

    match record.approach {
        RenderingApproach::GpuDriven | RenderingApproach::Hybrid => {
            (50.0 + triangle_load + dispatch_load + batching).clamp(50.0, 85.0)
        }
        RenderingApproach::CpuDriven => {
            let draw_overhead = (record.draw_calls as f64 / 1_000.0).min(15.0);
            (25.0 + triangle_load + batching - draw_overhead).clamp(25.0, 65.0)
        }
    }
}

/// Shared handle on the rolling history for readers outside the render loop
#[derive(Clone)]
pub struct ProfilerHistory {
    frames: Arc<Mutex<VecDeque<FrameTimingRecord>>>,
}

impl ProfilerHistory {
    pub fn snapshot(&self) -> Vec<FrameTimingRecord> {
        self.frames.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

pub struct FrameProfiler {
    config: ProfilerConfig,
    initialized: bool,
    gpu_timing: bool,

    frame_index: u64,
    frame_start: Option<Instant>,
    bandwidth_baseline: u64,
    memory_reported: bool,
    current: FrameTimingRecord,
    last_frame: FrameTimingRecord,

    history: Arc<Mutex<VecDeque<FrameTimingRecord>>>,
    benchmark_series: Option<Vec<FrameTimingRecord>>,
    series_overflow_logged: bool,
    gpu_samples_discarded: u64,
}

impl FrameProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        let history_len = config.history_len.max(1);
        Self {
            config,
            initialized: false,
            gpu_timing: false,
            frame_index: 0,
            frame_start: None,
            bandwidth_baseline: 0,
            memory_reported: false,
            current: FrameTimingRecord::default(),
            last_frame: FrameTimingRecord::default(),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(history_len))),
            benchmark_series: None,
            series_overflow_logged: false,
            gpu_samples_discarded: 0,
        }
    }

    /// Enables GPU timing when both the config and the device allow it.
    /// Without this call the profiler still measures CPU time.
    pub fn initialize<D: RenderDevice>(&mut self, device: &D) {
        self.gpu_timing = self.config.gpu_timing && device.supports_gpu_timing();
        self.initialized = true;
        log::info!(
            "[FrameProfiler::initialize] Profiling on '{}' (GPU timing: {})",
            device.name(),
            self.gpu_timing
        );
    }

    pub fn shutdown(&mut self) {
        if self.benchmark_series.take().is_some() {
            log::warn!("[FrameProfiler::shutdown] Benchmark recording still active; samples dropped");
        }
        self.initialized = false;
        self.gpu_timing = false;
        self.frame_start = None;
        log::info!(
            "[FrameProfiler::shutdown] {} frames profiled, {} GPU samples discarded",
            self.frame_index,
            self.gpu_samples_discarded
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn gpu_timing_enabled(&self) -> bool {
        self.gpu_timing
    }

    pub fn begin_frame<D: RenderDevice>(&mut self, device: &mut D) {
        if self.frame_start.is_some() {
            log::warn!("[FrameProfiler::begin_frame] Previous frame was never ended; discarding it");
        }
        self.frame_index += 1;
        let approach = self.current.approach;
        self.current.reset(self.frame_index, approach);
        self.memory_reported = false;

        device.begin_frame();
        if self.gpu_timing {
            device.begin_timer(TimerScope::Frame);
        }
        self.bandwidth_baseline = device.stats().transferred_bytes();
        self.frame_start = Some(Instant::now());
    }

    /// Submits the frame, resolves timers and finalizes the record
    pub fn end_frame<D: RenderDevice>(&mut self, device: &mut D) -> &FrameTimingRecord {
        let Some(start) = self.frame_start.take() else {
            log::warn!("[FrameProfiler::end_frame] end_frame without begin_frame");
            return &self.last_frame;
        };

        if self.gpu_timing {
            device.end_timer(TimerScope::Frame);
        }
        self.current.cpu_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        device.submit();

        if self.gpu_timing {
            self.resolve_gpu_times(device);
        }

        let stats = device.stats();
        self.current.bandwidth_bytes += stats.transferred_bytes().saturating_sub(self.bandwidth_baseline);
        if !self.memory_reported {
            self.current.gpu_memory_bytes = stats.allocated_bytes;
        }
        self.current.frame_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.current.derive_metrics();

        {
            let mut history = self.history.lock();
            while history.len() >= self.config.history_len.max(1) {
                history.pop_front();
            }
            history.push_back(self.current.clone());
        }

        if let Some(series) = self.benchmark_series.as_mut() {
            if series.len() < self.config.benchmark_series_cap {
                series.push(self.current.clone());
            } else if !self.series_overflow_logged {
                log::warn!(
                    "[FrameProfiler::end_frame] Benchmark series reached its cap of {} frames; later frames are not recorded",
                    self.config.benchmark_series_cap
                );
                self.series_overflow_logged = true;
            }
        }

        self.last_frame = self.current.clone();
        &self.last_frame
    }

    fn resolve_gpu_times<D: RenderDevice>(&mut self, device: &mut D) {
        let samples = match device.resolve_timers(self.config.query_timeout()) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("[FrameProfiler::end_frame] GPU timer resolution failed: {}", e);
                self.gpu_samples_discarded += 1;
                return;
            }
        };

        match samples.frame {
            TimerSample::Valid(ms) => self.current.gpu_time_ms = ms,
            TimerSample::Disjoint => {
                log::debug!("[FrameProfiler::end_frame] Disjoint frame timer, sample discarded");
                self.gpu_samples_discarded += 1;
            }
            TimerSample::Unavailable => {}
        }
        match samples.culling {
            TimerSample::Valid(ms) if self.current.gpu_culling_time_ms == 0.0 => {
                self.current.gpu_culling_time_ms = ms;
            }
            TimerSample::Disjoint => self.gpu_samples_discarded += 1,
            _ => {}
        }
    }

    pub fn set_rendering_approach(&mut self, approach: RenderingApproach) {
        self.current.approach = approach;
    }

    pub fn increment_draw_calls(&mut self) {
        self.current.draw_calls += 1;
    }

    pub fn add_draw_calls(&mut self, count: u32) {
        self.current.draw_calls += count;
    }

    pub fn increment_indirect_draw_calls(&mut self) {
        self.current.indirect_draw_calls += 1;
    }

    pub fn add_indirect_draw_calls(&mut self, count: u32) {
        self.current.indirect_draw_calls += count;
    }

    pub fn increment_compute_dispatches(&mut self) {
        self.current.compute_dispatches += 1;
    }

    pub fn add_compute_dispatches(&mut self, count: u32) {
        self.current.compute_dispatches += count;
    }

    pub fn add_triangles(&mut self, count: u64) {
        self.current.triangles += count;
    }

    pub fn add_vertices(&mut self, count: u64) {
        self.current.vertices += count;
    }

    pub fn add_instances(&mut self, count: u64) {
        self.current.instances += count;
    }

    pub fn set_object_counts(&mut self, total: u32, visible: u32) {
        self.current.total_objects = total;
        self.current.visible_objects = visible;
    }

    /// Adds to the counts; hybrid frames report from two renderers
    pub fn add_object_counts(&mut self, total: u32, visible: u32) {
        self.current.total_objects += total;
        self.current.visible_objects += visible;
    }

    pub fn record_cpu_culling_time(&mut self, ms: f64) {
        self.current.cpu_culling_time_ms += ms;
    }

    pub fn record_reference_culling_time(&mut self, ms: f64) {
        self.current.reference_culling_time_ms = ms;
    }

    /// Sets the reference culling time of the most recently finished frame
    /// and re-derives its ratios. Lets the caller time the reference test
    /// after `end_frame`, outside the frame's own timings.
    pub fn amend_reference_culling_time(&mut self, ms: f64) {
        if self.last_frame.frame_index == 0 {
            log::warn!("[FrameProfiler::amend_reference_culling_time] No finished frame to amend");
            return;
        }
        let frame_index = self.last_frame.frame_index;
        let amend = |record: &mut FrameTimingRecord| {
            record.reference_culling_time_ms = ms;
            record.derive_metrics();
        };

        amend(&mut self.last_frame);
        if let Some(record) = self.history.lock().back_mut().filter(|r| r.frame_index == frame_index) {
            amend(record);
        }
        if let Some(record) = self
            .benchmark_series
            .as_mut()
            .and_then(|series| series.last_mut())
            .filter(|r| r.frame_index == frame_index)
        {
            amend(record);
        }
    }

    pub fn record_gpu_culling_time(&mut self, ms: f64) {
        self.current.gpu_culling_time_ms = ms;
    }

    /// Overrides the device allocation total sampled at `end_frame`
    pub fn set_memory_usage(&mut self, gpu_bytes: u64, cpu_bytes: u64) {
        self.current.gpu_memory_bytes = gpu_bytes;
        self.current.cpu_memory_bytes = cpu_bytes;
        self.memory_reported = true;
    }

    pub fn add_cpu_memory(&mut self, bytes: u64) {
        self.current.cpu_memory_bytes += bytes;
    }

    pub fn add_bandwidth(&mut self, bytes: u64) {
        self.current.bandwidth_bytes += bytes;
    }

    /// The counters of the frame in progress
    pub fn current_frame(&self) -> &FrameTimingRecord {
        &self.current
    }

    /// The most recently finished frame
    pub fn last_frame(&self) -> &FrameTimingRecord {
        &self.last_frame
    }

    pub fn frames_profiled(&self) -> u64 {
        self.frame_index
    }

    pub fn gpu_samples_discarded(&self) -> u64 {
        self.gpu_samples_discarded
    }

    pub fn history(&self) -> ProfilerHistory {
        ProfilerHistory {
            frames: Arc::clone(&self.history),
        }
    }

    pub fn average_frame_time_ms(&self) -> f64 {
        let history = self.history.lock();
        if history.is_empty() {
            return 0.0;
        }
        history.iter().map(|f| f.frame_time_ms).sum::<f64>() / history.len() as f64
    }

    pub fn average_fps(&self) -> f64 {
        let frame_time = self.average_frame_time_ms();
        if frame_time > 0.0 {
            1000.0 / frame_time
        } else {
            0.0
        }
    }

    pub fn start_benchmark_recording(&mut self) {
        if self.benchmark_series.is_some() {
            log::warn!("[FrameProfiler::start_benchmark_recording] Already recording; restarting series");
        }
        self.benchmark_series = Some(Vec::new());
        self.series_overflow_logged = false;
    }

    pub fn stop_benchmark_recording(&mut self) -> Vec<FrameTimingRecord> {
        self.benchmark_series.take().unwrap_or_default()
    }

    pub fn is_recording(&self) -> bool {
        self.benchmark_series.is_some()
    }

    /// Writes the rolling history as one CSV row per frame
    pub fn export_history_csv(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let frames = self.history().snapshot();
        let mut out = String::from(
            "Frame,Approach,FrameTime,CPUTime,GPUTime,DrawCalls,IndirectDrawCalls,ComputeDispatches,Triangles,Instances,TotalObjects,VisibleObjects,CullingEfficiency,GPUUtilization\n",
        );
        for f in &frames {
            // Writing to a String cannot fail
            let _ = writeln!(
                out,
                "{},{},{:.4},{:.4},{:.4},{},{},{},{},{},{},{},{:.4},{:.1}",
                f.frame_index,
                f.approach,
                f.frame_time_ms,
                f.cpu_time_ms,
                f.gpu_time_ms,
                f.draw_calls,
                f.indirect_draw_calls,
                f.compute_dispatches,
                f.triangles,
                f.instances,
                f.total_objects,
                f.visible_objects,
                f.culling_efficiency,
                f.gpu_utilization
            );
        }
        std::fs::write(path.as_ref(), out)?;
        log::info!(
            "[FrameProfiler::export_history_csv] Wrote {} frames to {}",
            frames.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}
