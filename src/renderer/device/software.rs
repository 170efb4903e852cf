//! CPU emulation of the GPU-driven kernels.
//!
//! Buffers are word vectors behind a mutex; kernels are matched by entry
//! point name and executed immediately in recording order, so a dispatch
//! always observes the writes of every earlier dispatch. Draws are not
//! rasterised: each one is appended to a draw log with the number of
//! instances the vertex stage would actually emit.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    poll_until, Binding, BufferDescriptor, BufferKind, DeviceStats, DrawCall, DrawProgramDescriptor,
    KernelDescriptor, RenderDevice, TimerSample, TimerSamples, TimerScope, THREADS_PER_GROUP,
};
use crate::error::{EngineError, EngineResult};
use crate::renderer::culling::CULL_EPSILON;
use crate::renderer::error::{allocation_error, buffer_mapping_error, missing_resource, pipeline_creation_error};
use crate::renderer::gpu_driven::{DrawArguments, FrameParams};
use crate::renderer::shaders::{self, DrawProgramKind};
use crate::scene::ObjectRecord;

const RECORD_WORDS: usize = std::mem::size_of::<ObjectRecord>() / 4;
const MATRIX_WORDS: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct SoftwareDeviceOptions {
    /// Entry points the device refuses to compile
    pub unavailable_entry_points: HashSet<String>,
    /// Total allocation budget; `None` is unlimited
    pub memory_budget: Option<u64>,
    /// Report every recorded timer pair as disjoint
    pub disjoint_timers: bool,
    /// Readbacks never complete, so every wait runs to its timeout
    pub stall_readbacks: bool,
}

impl SoftwareDeviceOptions {
    pub fn without_entry_points<I, S>(entry_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unavailable_entry_points: entry_points.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoftwareBuffer {
    label: Arc<str>,
    kind: BufferKind,
    size: u64,
    words: Arc<Mutex<Vec<u32>>>,
}

impl SoftwareBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    fn snapshot(&self) -> Vec<u32> {
        self.words.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KernelOp {
    TransformCull,
    ResetCounter,
    CompactVisible,
    WriteDrawArgs,
}

impl KernelOp {
    fn from_entry_point(entry_point: &str) -> Option<Self> {
        match entry_point {
            shaders::entry::TRANSFORM_CULL => Some(KernelOp::TransformCull),
            shaders::entry::RESET_COUNTER => Some(KernelOp::ResetCounter),
            shaders::entry::COMPACT_VISIBLE => Some(KernelOp::CompactVisible),
            shaders::entry::WRITE_DRAW_ARGS => Some(KernelOp::WriteDrawArgs),
            _ => None,
        }
    }

    fn workgroup_size(&self) -> u64 {
        match self {
            KernelOp::TransformCull | KernelOp::CompactVisible => THREADS_PER_GROUP as u64,
            KernelOp::ResetCounter | KernelOp::WriteDrawArgs => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoftwareKernel {
    label: Arc<str>,
    op: KernelOp,
}

#[derive(Debug, Clone)]
pub struct SoftwareDrawProgram {
    label: Arc<str>,
    kind: DrawProgramKind,
}

impl SoftwareDrawProgram {
    pub fn kind(&self) -> DrawProgramKind {
        self.kind
    }
}

/// One emulated draw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub program: DrawProgramKind,
    pub indirect: bool,
    pub index_count: u32,
    pub first_instance: u32,
    pub instances_submitted: u32,
    /// Instances the vertex stage emits inside the clip volume
    pub instances_rendered: u32,
}

pub struct SoftwareDevice {
    options: SoftwareDeviceOptions,
    stats: DeviceStats,
    draw_log: Vec<DrawRecord>,
    timer_starts: [Option<Instant>; 2],
    timer_results: [Option<f64>; 2],
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_options(SoftwareDeviceOptions::default())
    }

    pub fn with_options(options: SoftwareDeviceOptions) -> Self {
        log::info!(
            "[SoftwareDevice::new] Created software device ({} entry points disabled)",
            options.unavailable_entry_points.len()
        );
        Self {
            options,
            stats: DeviceStats::default(),
            draw_log: Vec::new(),
            timer_starts: [None; 2],
            timer_results: [None; 2],
        }
    }

    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draw_log
    }

    pub fn take_draw_log(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draw_log)
    }

    /// Current contents of `buffer` as words, without touching the stats
    pub fn peek_words(&self, buffer: &SoftwareBuffer) -> Vec<u32> {
        buffer.snapshot()
    }

    fn check_entry_point(&self, source: &str, entry_point: &str) -> EngineResult<()> {
        if !source.contains(&format!("fn {}(", entry_point)) {
            return Err(pipeline_creation_error(entry_point, "entry point not found in module"));
        }
        if self.options.unavailable_entry_points.contains(entry_point) {
            return Err(pipeline_creation_error(entry_point, "rejected by device"));
        }
        Ok(())
    }

    fn run_transform_cull(&mut self, bindings: &[Binding<'_, SoftwareBuffer>], invocations: u64) -> EngineResult<()> {
        use shaders::transform_cull_slots::*;

        let params = read_params(bound(bindings, PARAMS)?)?;
        let record_words = bound(bindings, RECORDS)?.snapshot();
        let record_count = record_words.len() / RECORD_WORDS;
        let records: &[ObjectRecord] = bytemuck::cast_slice(&record_words[..record_count * RECORD_WORDS]);
        let limit = (invocations.min(params.object_count as u64) as usize).min(records.len());

        let (matrices, flags): (Vec<ColumnMatrix>, Vec<u32>) = records[..limit]
            .iter()
            .map(|record| transform_cull_invocation(&params, record))
            .unzip();

        {
            let mut words = bound(bindings, WORLD_MATRICES)?.words.lock();
            let count = matrices.len().min(words.len() / MATRIX_WORDS);
            let dst: &mut [ColumnMatrix] = bytemuck::cast_slice_mut(&mut words[..count * MATRIX_WORDS]);
            dst.copy_from_slice(&matrices[..count]);
        }
        {
            let mut words = bound(bindings, VISIBILITY_FLAGS)?.words.lock();
            let count = flags.len().min(words.len());
            words[..count].copy_from_slice(&flags[..count]);
        }
        Ok(())
    }

    fn run_reset_counter(&mut self, bindings: &[Binding<'_, SoftwareBuffer>], invocations: u64) -> EngineResult<()> {
        if invocations > 0 {
            let mut words = bound(bindings, shaders::compaction_slots::VISIBLE_COUNTER)?.words.lock();
            if let Some(counter) = words.first_mut() {
                *counter = 0;
            }
        }
        Ok(())
    }

    fn run_compact_visible(&mut self, bindings: &[Binding<'_, SoftwareBuffer>], invocations: u64) -> EngineResult<()> {
        use shaders::compaction_slots::*;

        let params = read_params(bound(bindings, PARAMS)?)?;
        let flags = bound(bindings, VISIBILITY_FLAGS)?.snapshot();
        let counter_buffer = bound(bindings, VISIBLE_COUNTER)?;
        let mut counter = counter_buffer.snapshot().first().copied().unwrap_or(0);

        let limit = (invocations.min(params.object_count as u64) as usize).min(flags.len());
        let mut appended = Vec::new();
        for (index, flag) in flags[..limit].iter().enumerate() {
            if *flag == 1 {
                appended.push((counter, index as u32));
                counter += 1;
            }
        }

        {
            let mut indices = bound(bindings, VISIBLE_INDICES)?.words.lock();
            for (slot, index) in appended {
                if let Some(dst) = indices.get_mut(slot as usize) {
                    *dst = index;
                }
            }
        }
        let mut words = counter_buffer.words.lock();
        if let Some(dst) = words.first_mut() {
            *dst = counter;
        }
        Ok(())
    }

    fn run_write_draw_args(&mut self, bindings: &[Binding<'_, SoftwareBuffer>], invocations: u64) -> EngineResult<()> {
        use shaders::indirect_args_slots::*;

        if invocations == 0 {
            return Ok(());
        }
        let params = read_params(bound(bindings, PARAMS)?)?;
        let counter = bound(bindings, VISIBLE_COUNTER)?.snapshot().first().copied().unwrap_or(0);
        let args = DrawArguments {
            index_count: params.index_count,
            instance_count: counter.min(params.object_count),
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        };

        let mut words = bound(bindings, DRAW_ARGS)?.words.lock();
        let src: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&args));
        if words.len() < src.len() {
            return Err(missing_resource("draw argument buffer large enough for one draw"));
        }
        words[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn validate_draw(&self, draw: &DrawCall<'_, Self>) -> EngineResult<()> {
        if draw.index_count as u64 * 4 > draw.index_buffer.size {
            return Err(missing_resource(&format!(
                "{} indices in '{}'",
                draw.index_count, draw.index_buffer.label
            )));
        }
        for slot in draw.program.kind.binding_slots() {
            if !draw.bindings.iter().any(|b| b.slot == *slot) {
                return Err(missing_resource(&format!("binding {} for '{}'", slot, draw.program.label)));
            }
        }
        Ok(())
    }
}

// ── transform_cull.wgsl port ─────────────────────────────────────────────────
//
// One invocation of the visibility kernel on column-major arrays. Shares no
// code with `renderer::culling`; only the epsilon is common.

type ColumnMatrix = [[f32; 4]; 4];

fn mat_mul(a: &ColumnMatrix, b: &ColumnMatrix) -> ColumnMatrix {
    let mut out = [[0.0f32; 4]; 4];
    for (col, out_col) in out.iter_mut().enumerate() {
        for (row, value) in out_col.iter_mut().enumerate() {
            *value = (0..4).map(|k| a[k][row] * b[col][k]).sum();
        }
    }
    out
}

fn rotation_x(angle: f32) -> ColumnMatrix {
    let (s, c) = angle.sin_cos();
    [[1.0, 0.0, 0.0, 0.0], [0.0, c, s, 0.0], [0.0, -s, c, 0.0], [0.0, 0.0, 0.0, 1.0]]
}

fn rotation_y(angle: f32) -> ColumnMatrix {
    let (s, c) = angle.sin_cos();
    [[c, 0.0, -s, 0.0], [0.0, 1.0, 0.0, 0.0], [s, 0.0, c, 0.0], [0.0, 0.0, 0.0, 1.0]]
}

fn rotation_z(angle: f32) -> ColumnMatrix {
    let (s, c) = angle.sin_cos();
    [[c, s, 0.0, 0.0], [-s, c, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]]
}

/// T * Rz * Ry * Rx * S
fn kernel_world_matrix(record: &ObjectRecord) -> ColumnMatrix {
    let [px, py, pz] = record.position;
    let [sx, sy, sz] = record.scale;
    let [rx, ry, rz] = record.rotation;
    let translation = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [px, py, pz, 1.0]];
    let scale = [[sx, 0.0, 0.0, 0.0], [0.0, sy, 0.0, 0.0], [0.0, 0.0, sz, 0.0], [0.0, 0.0, 0.0, 1.0]];

    let mut model = mat_mul(&translation, &rotation_z(rz));
    model = mat_mul(&model, &rotation_y(ry));
    model = mat_mul(&model, &rotation_x(rx));
    mat_mul(&model, &scale)
}

/// Camera-inside rule, then the positive-vertex test against the uploaded planes
fn kernel_aabb_visible(params: &FrameParams, bounds_min: [f32; 3], bounds_max: [f32; 3]) -> bool {
    let eye = params.camera_position;
    if (0..3).all(|i| eye[i] >= bounds_min[i] && eye[i] <= bounds_max[i]) {
        return true;
    }

    params.frustum_planes.iter().all(|plane| {
        let distance: f32 = (0..3)
            .map(|i| plane[i] * if plane[i] >= 0.0 { bounds_max[i] } else { bounds_min[i] })
            .sum();
        distance + plane[3] >= -CULL_EPSILON
    })
}

fn transform_cull_invocation(params: &FrameParams, record: &ObjectRecord) -> (ColumnMatrix, u32) {
    let model = kernel_world_matrix(record);

    let centre: [f32; 3] = std::array::from_fn(|i| (record.aabb_min[i] + record.aabb_max[i]) * 0.5);
    let half: [f32; 3] = std::array::from_fn(|i| (record.aabb_max[i] - record.aabb_min[i]) * 0.5);
    let world_centre: [f32; 3] =
        std::array::from_fn(|i| model[0][i] * centre[0] + model[1][i] * centre[1] + model[2][i] * centre[2] + model[3][i]);
    let world_half: [f32; 3] = std::array::from_fn(|i| {
        model[0][i].abs() * half[0] + model[1][i].abs() * half[1] + model[2][i].abs() * half[2]
    });

    let bounds_min = std::array::from_fn(|i| world_centre[i] - world_half[i]);
    let bounds_max = std::array::from_fn(|i| world_centre[i] + world_half[i]);
    (model, kernel_aabb_visible(params, bounds_min, bounds_max) as u32)
}

fn bound<'a>(bindings: &[Binding<'a, SoftwareBuffer>], slot: u32) -> EngineResult<&'a SoftwareBuffer> {
    bindings
        .iter()
        .find(|b| b.slot == slot)
        .map(|b| b.buffer)
        .ok_or_else(|| missing_resource(&format!("binding {}", slot)))
}

fn read_params(buffer: &SoftwareBuffer) -> EngineResult<FrameParams> {
    let words = buffer.words.lock();
    let bytes: &[u8] = bytemuck::cast_slice(&words[..]);
    let size = std::mem::size_of::<FrameParams>();
    if bytes.len() < size {
        return Err(missing_resource(&format!("frame parameters in '{}'", buffer.label)));
    }
    Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
}

impl RenderDevice for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type Kernel = SoftwareKernel;
    type DrawProgram = SoftwareDrawProgram;

    fn name(&self) -> &str {
        "software"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<SoftwareBuffer> {
        if desc.size == 0 {
            return Err(allocation_error(desc.label, 0, "zero-sized buffer"));
        }
        if let Some(budget) = self.options.memory_budget {
            if self.stats.allocated_bytes + desc.size > budget {
                return Err(allocation_error(
                    desc.label,
                    desc.size,
                    format!("exceeds device budget of {} bytes", budget),
                ));
            }
        }

        let words = vec![0u32; desc.size.div_ceil(4) as usize];
        self.stats.allocated_bytes += desc.size;
        log::debug!(
            "[SoftwareDevice::create_buffer] '{}' ({:?}, {} bytes)",
            desc.label,
            desc.kind,
            desc.size
        );
        Ok(SoftwareBuffer {
            label: Arc::from(desc.label),
            kind: desc.kind,
            size: desc.size,
            words: Arc::new(Mutex::new(words)),
        })
    }

    fn release_buffer(&mut self, buffer: SoftwareBuffer) {
        self.stats.allocated_bytes = self.stats.allocated_bytes.saturating_sub(buffer.size);
    }

    fn buffer_size(&self, buffer: &SoftwareBuffer) -> u64 {
        buffer.size
    }

    fn write_buffer(&mut self, buffer: &SoftwareBuffer, offset: u64, data: &[u8]) -> EngineResult<()> {
        let end = offset + data.len() as u64;
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(buffer_mapping_error(&buffer.label, "write is not 4-byte aligned"));
        }
        if end > buffer.size {
            return Err(buffer_mapping_error(
                &buffer.label,
                format!("write of {} bytes at {} overruns {} bytes", data.len(), offset, buffer.size),
            ));
        }

        let mut words = buffer.words.lock();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words[..]);
        bytes[offset as usize..end as usize].copy_from_slice(data);
        self.stats.uploaded_bytes += data.len() as u64;
        Ok(())
    }

    fn create_kernel(&mut self, desc: &KernelDescriptor<'_>) -> EngineResult<SoftwareKernel> {
        self.check_entry_point(desc.source, desc.entry_point)?;
        let op = KernelOp::from_entry_point(desc.entry_point)
            .ok_or_else(|| pipeline_creation_error(desc.entry_point, "no software implementation"))?;
        Ok(SoftwareKernel {
            label: Arc::from(desc.label),
            op,
        })
    }

    fn create_draw_program(&mut self, desc: &DrawProgramDescriptor<'_>) -> EngineResult<SoftwareDrawProgram> {
        self.check_entry_point(desc.source, desc.vertex_entry)?;
        self.check_entry_point(desc.source, desc.fragment_entry)?;
        let kind = DrawProgramKind::from_vertex_entry(desc.vertex_entry)
            .ok_or_else(|| pipeline_creation_error(desc.vertex_entry, "no software implementation"))?;
        Ok(SoftwareDrawProgram {
            label: Arc::from(desc.label),
            kind,
        })
    }

    fn dispatch(
        &mut self,
        kernel: &SoftwareKernel,
        bindings: &[Binding<'_, SoftwareBuffer>],
        workgroups: [u32; 3],
    ) -> EngineResult<()> {
        let groups = workgroups.iter().map(|g| *g as u64).product::<u64>();
        let invocations = groups * kernel.op.workgroup_size();
        self.stats.dispatches += 1;
        log::trace!(
            "[SoftwareDevice::dispatch] '{}' with {} invocations",
            kernel.label,
            invocations
        );

        match kernel.op {
            KernelOp::TransformCull => self.run_transform_cull(bindings, invocations),
            KernelOp::ResetCounter => self.run_reset_counter(bindings, invocations),
            KernelOp::CompactVisible => self.run_compact_visible(bindings, invocations),
            KernelOp::WriteDrawArgs => self.run_write_draw_args(bindings, invocations),
        }
    }

    fn draw_indexed(&mut self, draw: &DrawCall<'_, Self>, instances: Range<u32>) -> EngineResult<()> {
        self.validate_draw(draw)?;
        let submitted = instances.end.saturating_sub(instances.start);

        let rendered = match draw.program.kind {
            DrawProgramKind::Flagged => {
                let flags = bound(draw.bindings, shaders::draw_slots::VISIBILITY_FLAGS)?.snapshot();
                instances
                    .clone()
                    .filter(|i| flags.get(*i as usize).copied() == Some(1))
                    .count() as u32
            }
            DrawProgramKind::Compacted | DrawProgramKind::Direct => submitted,
        };

        self.stats.draws += 1;
        self.draw_log.push(DrawRecord {
            program: draw.program.kind,
            indirect: false,
            index_count: draw.index_count,
            first_instance: instances.start,
            instances_submitted: submitted,
            instances_rendered: rendered,
        });
        Ok(())
    }

    fn draw_indexed_indirect(&mut self, draw: &DrawCall<'_, Self>, args: &SoftwareBuffer) -> EngineResult<()> {
        self.validate_draw(draw)?;
        let words = args.snapshot();
        if words.len() < std::mem::size_of::<DrawArguments>() / 4 {
            return Err(missing_resource(&format!("draw arguments in '{}'", args.label)));
        }
        let arguments: DrawArguments = bytemuck::pod_read_unaligned(bytemuck::cast_slice(&words[..5]));

        self.stats.draws += 1;
        self.draw_log.push(DrawRecord {
            program: draw.program.kind,
            indirect: true,
            index_count: arguments.index_count,
            first_instance: arguments.first_instance,
            instances_submitted: arguments.instance_count,
            instances_rendered: arguments.instance_count,
        });
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &SoftwareBuffer,
        offset: u64,
        size: u64,
        timeout: Duration,
    ) -> EngineResult<Vec<u8>> {
        if self.options.stall_readbacks {
            let waited = match poll_until::<()>(timeout, || None) {
                Ok(()) => timeout,
                Err(waited) => waited,
            };
            return Err(EngineError::Timeout {
                operation: format!("readback of '{}'", buffer.label),
                waited_ms: waited.as_millis() as u64,
            });
        }

        let end = offset + size;
        if end > buffer.size {
            return Err(buffer_mapping_error(
                &buffer.label,
                format!("read of {} bytes at {} overruns {} bytes", size, offset, buffer.size),
            ));
        }
        let words = buffer.words.lock();
        let bytes: &[u8] = bytemuck::cast_slice(&words[..]);
        self.stats.read_back_bytes += size;
        Ok(bytes[offset as usize..end as usize].to_vec())
    }

    fn begin_frame(&mut self) {
        self.timer_starts = [None; 2];
        self.timer_results = [None; 2];
    }

    fn submit(&mut self) {
        self.stats.submissions += 1;
    }

    fn supports_gpu_timing(&self) -> bool {
        true
    }

    fn begin_timer(&mut self, scope: TimerScope) {
        self.timer_starts[scope.index()] = Some(Instant::now());
    }

    fn end_timer(&mut self, scope: TimerScope) {
        if let Some(start) = self.timer_starts[scope.index()].take() {
            self.timer_results[scope.index()] = Some(start.elapsed().as_secs_f64() * 1000.0);
        }
    }

    fn resolve_timers(&mut self, _timeout: Duration) -> EngineResult<TimerSamples> {
        let disjoint = self.options.disjoint_timers;
        let sample = |result: Option<f64>| match result {
            Some(_) if disjoint => TimerSample::Disjoint,
            Some(ms) => TimerSample::Valid(ms),
            None => TimerSample::Unavailable,
        };
        let samples = TimerSamples {
            frame: sample(self.timer_results[TimerScope::Frame.index()].take()),
            culling: sample(self.timer_results[TimerScope::Culling.index()].take()),
        };
        Ok(samples)
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
