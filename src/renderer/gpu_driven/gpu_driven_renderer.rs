use std::time::Instant;

use glam::{Mat4, Vec3};

use crate::camera::CameraSource;
use crate::config::PipelineConfig;
use crate::error::EngineResult;
use crate::profiling::{FrameProfiler, RenderingApproach};
use crate::renderer::cpu_driven::CpuDrivenRenderer;
use crate::renderer::culling::{reference_visibility, Frustum};
use crate::renderer::device::{
    Binding, BindingAccess, BufferKind, DrawCall, DrawProgramDescriptor, RenderDevice, TimerScope,
};
use crate::renderer::dynamic_buffer::DynamicBuffer;
use crate::renderer::error::missing_resource;
use crate::renderer::mesh::Mesh;
use crate::renderer::outcome::{RenderOutcome, RenderPath};
use crate::renderer::shaders::{self, draw_slots, DrawProgramKind};
use crate::scene::{Light, Material, ObjectRecord};

use super::compaction::CompactionStage;
use super::culling_pipeline::VisibilityStage;
use super::indirect_commands::{DrawArguments, IndirectArgsStage};
use super::object_buffer::ObjectBufferStore;
use super::params::FrameParams;
use super::state::{PipelineEvent, PipelineState};

/// Result of comparing GPU visibility flags with the CPU reference
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationReport {
    pub object_count: u32,
    pub gpu_visible: u32,
    pub cpu_visible: u32,
    /// Object indices whose flags disagree
    pub mismatched: Vec<u32>,
    pub cpu_culling_ms: f64,
}

impl CrossValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// GPU-driven frame: transform + cull, compact, build draw arguments, then a
/// single indirect draw, all recorded back-to-back with no host round trip.
///
/// Which of those stages run is fixed at construction by what the device
/// could compile (see [`PipelineState`]). Per-frame resource problems fall
/// back to CPU-driven rendering for that frame; repeated ones disable the
/// GPU path for the rest of the session.
pub struct GpuDrivenPipeline<D: RenderDevice> {
    config: PipelineConfig,
    state: PipelineState,

    objects: ObjectBufferStore<D>,
    params: DynamicBuffer<D>,
    light: DynamicBuffer<D>,
    material: DynamicBuffer<D>,

    visibility: Option<VisibilityStage<D>>,
    compaction: Option<CompactionStage<D>>,
    indirect_args: Option<IndirectArgsStage<D>>,
    draw_program: Option<(DrawProgramKind, D::DrawProgram)>,

    fallback: CpuDrivenRenderer<D>,

    frame_index: u64,
    last_visible_count: Option<u32>,
    /// The object set changed since the last successful readback
    visible_count_stale: bool,
    consecutive_validation_failures: u32,
    frustum_culling: bool,
    last_frustum: Frustum,
    last_camera_position: Vec3,
}

impl<D: RenderDevice> GpuDrivenPipeline<D> {
    /// Allocates every buffer and compiles every stage once. Kernel failures
    /// downgrade the pipeline; only failure to allocate the object store,
    /// uniforms or the CPU fallback is returned as an error.
    pub fn new(device: &mut D, config: PipelineConfig) -> EngineResult<Self> {
        let capacity = config.max_objects;

        let objects = ObjectBufferStore::new(device, capacity)?;
        let params = DynamicBuffer::new(
            device,
            "Frame Params",
            BufferKind::Uniform,
            std::mem::size_of::<FrameParams>() as u64,
        )?;
        let light = DynamicBuffer::new(device, "Light", BufferKind::Uniform, std::mem::size_of::<Light>() as u64)?;
        let material = DynamicBuffer::new(
            device,
            "Material",
            BufferKind::Uniform,
            std::mem::size_of::<Material>() as u64,
        )?;
        let fallback = CpuDrivenRenderer::new(device, capacity)?;

        let mut visibility = optional("visibility stage", VisibilityStage::new(device, capacity));
        let mut compaction = match visibility {
            Some(_) => optional("compaction stage", CompactionStage::new(device, capacity)),
            None => None,
        };
        let mut indirect_args = match compaction {
            Some(_) => optional("indirect argument stage", IndirectArgsStage::new(device)),
            None => None,
        };

        let compacted_program = if compaction.is_some() && indirect_args.is_some() {
            optional("compacted draw program", create_program(device, DrawProgramKind::Compacted))
        } else {
            None
        };
        let compaction_available = compacted_program.is_some();
        if !compaction_available {
            if let Some(stage) = indirect_args.take() {
                stage.release(device);
            }
            if let Some(stage) = compaction.take() {
                stage.release(device);
            }
        }

        let draw_program = match compacted_program {
            Some(program) => Some((DrawProgramKind::Compacted, program)),
            None if visibility.is_some() => optional(
                "flagged draw program",
                create_program(device, DrawProgramKind::Flagged),
            )
            .map(|program| (DrawProgramKind::Flagged, program)),
            None => None,
        };

        let core_available = visibility.is_some() && draw_program.is_some();
        if !core_available {
            if let Some(stage) = visibility.take() {
                stage.release(device);
            }
        }

        let state = PipelineState::Uninitialized.transition(PipelineEvent::Initialized {
            core_available,
            compaction_available,
        });

        if let Some(stage) = visibility.as_mut() {
            stage.bind(params.buffer(), &objects);
        }
        if let (Some(stage), Some(visibility)) = (compaction.as_mut(), visibility.as_ref()) {
            stage.bind(params.buffer(), visibility.flags());
        }
        if let (Some(stage), Some(compaction)) = (indirect_args.as_mut(), compaction.as_ref()) {
            stage.bind(params.buffer(), compaction.visible_counter());
        }

        match state {
            PipelineState::ReadyCompacted => log::info!(
                "[GpuDrivenPipeline::new] GPU-driven pipeline ready with compaction (capacity {})",
                capacity
            ),
            PipelineState::ReadyUncompacted => log::warn!(
                "[GpuDrivenPipeline::new] Compaction unavailable; drawing all {} slots with per-instance discard",
                capacity
            ),
            _ => log::warn!("[GpuDrivenPipeline::new] GPU-driven path unavailable; using CPU-driven rendering"),
        }

        Ok(Self {
            config,
            state,
            objects,
            params,
            light,
            material,
            visibility,
            compaction,
            indirect_args,
            draw_program,
            fallback,
            frame_index: 0,
            last_visible_count: None,
            visible_count_stale: false,
            consecutive_validation_failures: 0,
            frustum_culling: true,
            last_frustum: Frustum::accept_all(),
            last_camera_position: Vec3::ZERO,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn object_count(&self) -> u32 {
        self.objects.object_count()
    }

    pub fn capacity(&self) -> u32 {
        self.objects.capacity()
    }

    pub fn objects(&self) -> &ObjectBufferStore<D> {
        &self.objects
    }

    /// Visible count from the most recent readback, if any
    pub fn last_visible_count(&self) -> Option<u32> {
        self.last_visible_count
    }

    pub fn set_frustum_culling(&mut self, enabled: bool) {
        self.frustum_culling = enabled;
        self.fallback.set_frustum_culling(enabled);
    }

    /// Uploads `records`; a changed set forces a visible-count readback on
    /// the next frame.
    pub fn update_objects(&mut self, device: &mut D, records: &[ObjectRecord]) -> bool {
        let changed = self.objects.update(device, records);
        self.visible_count_stale |= changed;
        changed
    }

    pub fn clear_objects(&mut self) {
        self.visible_count_stale |= self.objects.object_count() > 0;
        self.objects.clear();
    }

    pub fn render(
        &mut self,
        device: &mut D,
        mesh: &Mesh<D>,
        camera: &dyn CameraSource,
        light: &Light,
        profiler: &mut FrameProfiler,
    ) -> RenderOutcome {
        self.frame_index += 1;

        if !self.state.is_gpu_driven() {
            return self.render_fallback(device, mesh, camera, light, profiler);
        }

        if let Err(e) = self.validate_resources(mesh) {
            self.consecutive_validation_failures += 1;
            log::error!(
                "[GpuDrivenPipeline::render] {}; rendering frame {} CPU-driven",
                e,
                self.frame_index
            );
            let previous = self.state;
            self.state = self.state.transition(PipelineEvent::ResourceValidationFailed {
                consecutive_failures: self.consecutive_validation_failures,
            });
            if self.state != previous {
                log::warn!(
                    "[GpuDrivenPipeline::render] {} consecutive failures; GPU-driven path disabled",
                    self.consecutive_validation_failures
                );
            }
            return self.render_fallback(device, mesh, camera, light, profiler);
        }
        self.consecutive_validation_failures = 0;

        profiler.set_rendering_approach(RenderingApproach::GpuDriven);
        let object_count = self.objects.object_count();
        let view_proj = camera.view_projection();
        let eye = camera.position();
        let frustum = if self.frustum_culling {
            Frustum::from_view_proj(&view_proj)
        } else {
            Frustum::accept_all()
        };
        self.last_frustum = frustum;
        self.last_camera_position = eye;

        let params = FrameParams::new(
            view_proj,
            &frustum,
            eye,
            object_count,
            mesh.index_count(),
            self.objects.capacity(),
        );
        upload(device, &mut self.params, bytemuck::bytes_of(&params));
        upload(device, &mut self.light, bytemuck::bytes_of(light));
        upload(device, &mut self.material, bytemuck::bytes_of(mesh.material()));

        let compacted = self.state == PipelineState::ReadyCompacted;
        let mut dispatches = 0u32;
        device.begin_timer(TimerScope::Culling);
        if let Some(visibility) = self.visibility.as_ref() {
            if visibility.run(device, object_count) {
                dispatches += 1;
            }
        }
        if compacted {
            if let Some(compaction) = self.compaction.as_ref() {
                if compaction.run(device, object_count) {
                    dispatches += 2;
                }
            }
            if let Some(indirect_args) = self.indirect_args.as_ref() {
                if indirect_args.run(device) {
                    dispatches += 1;
                }
            }
        }
        device.end_timer(TimerScope::Culling);

        let drew = object_count > 0 && self.issue_draw(device, mesh, object_count);

        let readback_due = (self.frame_index - 1) % self.config.readback_interval.max(1) as u64 == 0;
        if readback_due || self.visible_count_stale {
            match self.read_visible_count(device) {
                Ok(count) => {
                    self.last_visible_count = Some(count);
                    self.visible_count_stale = false;
                }
                Err(e) => log::warn!(
                    "[GpuDrivenPipeline::render] Visible count readback failed, keeping last value: {}",
                    e
                ),
            }
        }

        let interval = self.config.cross_validate_interval;
        if interval > 0 && (self.frame_index - 1) % interval as u64 == 0 {
            match self.cross_validate(device) {
                Ok(report) => {
                    profiler.record_reference_culling_time(report.cpu_culling_ms);
                    if !report.is_consistent() {
                        log::warn!(
                            "[GpuDrivenPipeline::render] GPU/CPU visibility disagree on {} of {} objects",
                            report.mismatched.len(),
                            report.object_count
                        );
                    }
                }
                Err(e) => log::warn!("[GpuDrivenPipeline::render] Cross-validation skipped: {}", e),
            }
        }

        let visible_estimate = self.last_visible_count.unwrap_or(object_count).min(object_count);
        let (draw_calls, indirect_draw_calls) = match (drew, compacted) {
            (true, true) => (1, 1),
            (true, false) => (1, 0),
            (false, _) => (0, 0),
        };
        let instances = match (drew, compacted) {
            (false, _) => 0,
            (true, true) => visible_estimate,
            (true, false) => object_count,
        };

        profiler.add_compute_dispatches(dispatches);
        profiler.add_draw_calls(draw_calls);
        profiler.add_indirect_draw_calls(indirect_draw_calls);
        profiler.add_instances(instances as u64);
        profiler.add_triangles(visible_estimate as u64 * mesh.triangle_count() as u64);
        profiler.add_vertices(instances as u64 * mesh.vertex_count() as u64);
        profiler.add_object_counts(object_count, visible_estimate);
        profiler.add_cpu_memory(self.objects.host_bytes());

        RenderOutcome {
            path: if compacted {
                RenderPath::GpuCompacted
            } else {
                RenderPath::GpuUncompacted
            },
            draw_calls,
            indirect_draw_calls,
            compute_dispatches: dispatches,
            visible_objects: visible_estimate,
        }
    }

    fn render_fallback(
        &mut self,
        device: &mut D,
        mesh: &Mesh<D>,
        camera: &dyn CameraSource,
        light: &Light,
        profiler: &mut FrameProfiler,
    ) -> RenderOutcome {
        let mut outcome = self
            .fallback
            .render(device, mesh, self.objects.host_records(), camera, light, profiler);
        if outcome.path == RenderPath::CpuDriven {
            outcome.path = RenderPath::CpuFallback;
        }
        outcome
    }

    /// Every handle the next dispatch and draw need
    fn validate_resources(&self, mesh: &Mesh<D>) -> EngineResult<()> {
        mesh.buffers()?;
        if !self.visibility.as_ref().is_some_and(|s| s.is_ready()) {
            return Err(missing_resource("visibility kernel"));
        }
        if self.draw_program.is_none() {
            return Err(missing_resource("draw program"));
        }
        if self.state == PipelineState::ReadyCompacted {
            if !self.compaction.as_ref().is_some_and(|s| s.is_ready()) {
                return Err(missing_resource("compaction kernels"));
            }
            if !self.indirect_args.as_ref().is_some_and(|s| s.is_ready()) {
                return Err(missing_resource("indirect argument kernel"));
            }
        }
        Ok(())
    }

    fn issue_draw(&self, device: &mut D, mesh: &Mesh<D>, object_count: u32) -> bool {
        let (Ok((vertex_buffer, index_buffer)), Some((kind, program)), Some(visibility)) =
            (mesh.buffers(), self.draw_program.as_ref(), self.visibility.as_ref())
        else {
            return false;
        };

        let instance_source = match kind {
            DrawProgramKind::Compacted => match self.compaction.as_ref() {
                Some(compaction) => (draw_slots::VISIBLE_INDICES, compaction.visible_indices()),
                None => return false,
            },
            _ => (draw_slots::VISIBILITY_FLAGS, visibility.flags()),
        };
        let bindings = [
            Binding {
                slot: draw_slots::PARAMS,
                access: BindingAccess::Parameters,
                buffer: self.params.buffer(),
            },
            Binding {
                slot: draw_slots::WORLD_MATRICES,
                access: BindingAccess::Input,
                buffer: self.objects.world_matrices(),
            },
            Binding {
                slot: instance_source.0,
                access: BindingAccess::Input,
                buffer: instance_source.1,
            },
            Binding {
                slot: draw_slots::LIGHT,
                access: BindingAccess::Parameters,
                buffer: self.light.buffer(),
            },
            Binding {
                slot: draw_slots::MATERIAL,
                access: BindingAccess::Parameters,
                buffer: self.material.buffer(),
            },
        ];
        let draw = DrawCall {
            program,
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            bindings: &bindings,
        };

        let result = match (kind, self.indirect_args.as_ref()) {
            (DrawProgramKind::Compacted, Some(indirect_args)) => {
                device.draw_indexed_indirect(&draw, indirect_args.args())
            }
            (DrawProgramKind::Compacted, None) => Err(missing_resource("draw argument buffer")),
            _ => device.draw_indexed(&draw, 0..object_count),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                log::error!("[GpuDrivenPipeline::render] Draw failed: {}", e);
                false
            }
        }
    }

    /// Blocking readback of the number of visible objects from the last
    /// recorded frame
    pub fn read_visible_count(&mut self, device: &mut D) -> EngineResult<u32> {
        let object_count = self.objects.object_count();
        if let Some(counter) = self.read_visible_counter(device)? {
            return Ok(counter.min(object_count));
        }
        let flags = self.read_visibility_flags(device)?;
        Ok(flags.iter().filter(|f| **f == 1).count() as u32)
    }

    /// `None` when compaction is not running
    pub fn read_visible_counter(&mut self, device: &mut D) -> EngineResult<Option<u32>> {
        let Some(compaction) = self.compaction.as_ref() else {
            return Ok(None);
        };
        let bytes = device.read_buffer(compaction.visible_counter(), 0, 4, self.config.readback_timeout())?;
        Ok(words(&bytes).first().copied())
    }

    pub fn read_visibility_flags(&mut self, device: &mut D) -> EngineResult<Vec<u32>> {
        let visibility = self
            .visibility
            .as_ref()
            .ok_or_else(|| missing_resource("visibility flags"))?;
        let count = self.objects.object_count() as u64;
        if count == 0 {
            return Ok(Vec::new());
        }
        let bytes = device.read_buffer(visibility.flags(), 0, count * 4, self.config.readback_timeout())?;
        Ok(words(&bytes))
    }

    /// The first `visible_counter` entries of the compacted list
    pub fn read_visible_indices(&mut self, device: &mut D) -> EngineResult<Vec<u32>> {
        let Some(counter) = self.read_visible_counter(device)? else {
            return Err(missing_resource("visible index list"));
        };
        let count = counter.min(self.objects.object_count()) as u64;
        let Some(compaction) = self.compaction.as_ref() else {
            return Err(missing_resource("visible index list"));
        };
        if count == 0 {
            return Ok(Vec::new());
        }
        let bytes = device.read_buffer(compaction.visible_indices(), 0, count * 4, self.config.readback_timeout())?;
        Ok(words(&bytes))
    }

    pub fn read_draw_arguments(&mut self, device: &mut D) -> EngineResult<Option<DrawArguments>> {
        let Some(indirect_args) = self.indirect_args.as_ref() else {
            return Ok(None);
        };
        let bytes = device.read_buffer(
            indirect_args.args(),
            0,
            DrawArguments::SIZE,
            self.config.readback_timeout(),
        )?;
        Ok(DrawArguments::from_bytes(&bytes))
    }

    pub fn read_world_matrices(&mut self, device: &mut D) -> EngineResult<Vec<Mat4>> {
        let count = self.objects.object_count() as u64;
        if count == 0 {
            return Ok(Vec::new());
        }
        let bytes = device.read_buffer(self.objects.world_matrices(), 0, count * 64, self.config.readback_timeout())?;
        let floats: Vec<f32> = words(&bytes).into_iter().map(f32::from_bits).collect();
        Ok(floats.chunks_exact(16).map(Mat4::from_cols_slice).collect())
    }

    /// Runs the CPU reference test over the current objects with the frustum
    /// of the last GPU-driven frame and returns the flags and elapsed time
    fn timed_reference_visibility(&self) -> (Vec<u32>, f64) {
        let start = Instant::now();
        let flags = reference_visibility(
            self.objects.host_records(),
            &self.last_frustum,
            self.last_camera_position,
        );
        (flags, start.elapsed().as_secs_f64() * 1000.0)
    }

    /// Milliseconds the CPU reference test takes on the objects the last
    /// frame culled on the GPU. `None` when the pipeline is not GPU-driven.
    pub fn time_reference_culling(&self) -> Option<f64> {
        if !self.state.is_gpu_driven() || self.frame_index == 0 {
            return None;
        }
        Some(self.timed_reference_visibility().1)
    }

    /// Compares the GPU flags of the last frame against the CPU reference
    /// computed with the same frustum.
    pub fn cross_validate(&mut self, device: &mut D) -> EngineResult<CrossValidationReport> {
        let gpu_flags = self.read_visibility_flags(device)?;
        let (cpu_flags, cpu_culling_ms) = self.timed_reference_visibility();

        let mismatched = gpu_flags
            .iter()
            .zip(&cpu_flags)
            .enumerate()
            .filter(|(_, (gpu, cpu))| gpu != cpu)
            .map(|(i, _)| i as u32)
            .collect();

        Ok(CrossValidationReport {
            object_count: cpu_flags.len() as u32,
            gpu_visible: gpu_flags.iter().filter(|f| **f == 1).count() as u32,
            cpu_visible: cpu_flags.iter().filter(|f| **f == 1).count() as u32,
            mismatched,
            cpu_culling_ms,
        })
    }

    /// Releases every device resource, stages first and storage last
    pub fn shutdown(self, device: &mut D) {
        let Self {
            objects,
            params,
            light,
            material,
            visibility,
            compaction,
            indirect_args,
            draw_program,
            fallback,
            frame_index,
            ..
        } = self;

        drop(draw_program);
        if let Some(stage) = indirect_args {
            stage.release(device);
        }
        if let Some(stage) = compaction {
            stage.release(device);
        }
        if let Some(stage) = visibility {
            stage.release(device);
        }
        fallback.release(device);
        material.release(device);
        light.release(device);
        params.release(device);
        objects.release(device);
        log::info!("[GpuDrivenPipeline::shutdown] Released after {} frames", frame_index);
    }
}

fn optional<T>(what: &str, result: EngineResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::error!("[GpuDrivenPipeline::new] {} unavailable: {}", what, e);
            None
        }
    }
}

fn create_program<D: RenderDevice>(device: &mut D, kind: DrawProgramKind) -> EngineResult<D::DrawProgram> {
    let source = shaders::draw_source();
    device.create_draw_program(&DrawProgramDescriptor {
        label: kind.label(),
        source: &source,
        vertex_entry: kind.vertex_entry(),
        fragment_entry: shaders::entry::FRAGMENT,
    })
}

fn upload<D: RenderDevice>(device: &mut D, buffer: &mut DynamicBuffer<D>, bytes: &[u8]) {
    if let Err(e) = buffer.update(device, bytes) {
        log::error!(
            "[GpuDrivenPipeline::render] Upload to '{}' failed, using stale data: {}",
            buffer.label(),
            e
        );
    }
}

fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
