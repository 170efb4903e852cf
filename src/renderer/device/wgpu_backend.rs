//! Headless wgpu backend
//!
//! Commands are recorded into one lazily created encoder. Draws are queued
//! and flushed into a single render pass right before the next compute pass,
//! copy, or submit, which keeps device order identical to recording order.
//! Rendering targets an offscreen colour + depth pair.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use super::{
    poll_until, Binding, BufferDescriptor, BufferKind, DeviceStats, DrawCall, DrawProgramDescriptor,
    KernelDescriptor, RenderDevice, TimerSample, TimerSamples, TimerScope,
};
use crate::error::{EngineError, EngineResult};
use crate::renderer::error::{
    allocation_error, buffer_mapping_error, gpu_operation_error, pipeline_creation_error, RendererErrorContext,
    RendererResult,
};
use crate::renderer::vertex::Vertex;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Two timer scopes, a begin/end query each
const QUERY_COUNT: u32 = 4;
const TIMER_SCOPES: [TimerScope; 2] = [TimerScope::Frame, TimerScope::Culling];
/// Each scope resolves into its own aligned slot of the resolve buffer
const QUERY_SLOT_BYTES: u64 = wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT;
const RESOLVE_BYTES: u64 = TIMER_SCOPES.len() as u64 * QUERY_SLOT_BYTES;
const QUERY_PAIR_BYTES: u64 = 16;

#[derive(Debug, Clone)]
pub struct WgpuDeviceOptions {
    pub target_width: u32,
    pub target_height: u32,
    pub power_preference: wgpu::PowerPreference,
    /// Request timestamp queries when the adapter offers them
    pub gpu_timing: bool,
}

impl Default for WgpuDeviceOptions {
    fn default() -> Self {
        Self {
            target_width: 1280,
            target_height: 720,
            power_preference: wgpu::PowerPreference::HighPerformance,
            gpu_timing: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WgpuBuffer {
    inner: Arc<wgpu::Buffer>,
    label: Arc<str>,
    size: u64,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.inner
    }
}

#[derive(Debug, Clone)]
pub struct WgpuKernel {
    pipeline: Arc<wgpu::ComputePipeline>,
    layout: Arc<wgpu::BindGroupLayout>,
    label: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct WgpuDrawProgram {
    pipeline: Arc<wgpu::RenderPipeline>,
    layout: Arc<wgpu::BindGroupLayout>,
    label: Arc<str>,
}

enum DrawSource {
    Direct(Range<u32>),
    Indirect(Arc<wgpu::Buffer>),
}

struct PendingDraw {
    pipeline: Arc<wgpu::RenderPipeline>,
    bind_group: wgpu::BindGroup,
    vertex_buffer: Arc<wgpu::Buffer>,
    index_buffer: Arc<wgpu::Buffer>,
    index_count: u32,
    source: DrawSource,
}

struct OffscreenTarget {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

struct TimestampQueries {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    period_ns: f32,
    written: [bool; QUERY_COUNT as usize],
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    encoder: Option<wgpu::CommandEncoder>,
    pending_draws: Vec<PendingDraw>,
    target: OffscreenTarget,
    clear_target: bool,
    timestamps: Option<TimestampQueries>,
    readback_staging: Option<wgpu::Buffer>,
    stats: DeviceStats,
}

impl WgpuDevice {
    /// Creates a device on the first suitable adapter; no surface is needed.
    pub fn new_headless(options: WgpuDeviceOptions) -> RendererResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: options.power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| gpu_operation_error("request_adapter", "no compatible adapter found"))?;

        let info = adapter.get_info();
        log::info!(
            "[WgpuDevice::new_headless] Using adapter '{}' ({:?})",
            info.name,
            info.backend
        );

        let timing_supported = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if options.gpu_timing && timing_supported {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Horde Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .renderer_context("request_device")?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("[WgpuDevice] Uncaptured device error: {}", error);
        }));

        let target = create_target(&device, options.target_width, options.target_height);
        let timestamps = if required_features.contains(wgpu::Features::TIMESTAMP_QUERY) {
            Some(create_timestamps(&device, queue.get_timestamp_period()))
        } else {
            log::info!("[WgpuDevice::new_headless] Timestamp queries unavailable; GPU timings disabled");
            None
        };

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: info.name,
            encoder: None,
            pending_draws: Vec::new(),
            target,
            clear_target: true,
            timestamps,
            readback_staging: None,
            stats: DeviceStats::default(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Horde Frame Encoder"),
            })
        })
    }

    /// Records all queued draws into one render pass.
    fn flush_draws(&mut self) {
        if self.pending_draws.is_empty() {
            return;
        }
        let draws = std::mem::take(&mut self.pending_draws);
        let load_color = if self.clear_target {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };
        let load_depth = if self.clear_target {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };
        self.clear_target = false;

        let device = &self.device;
        let target = &self.target;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Horde Frame Encoder"),
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Horde Draw Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: load_color,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: load_depth,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for draw in &draws {
            pass.set_pipeline(&draw.pipeline);
            pass.set_bind_group(0, &draw.bind_group, &[]);
            pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
            pass.set_index_buffer(draw.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            match &draw.source {
                DrawSource::Direct(instances) => pass.draw_indexed(0..draw.index_count, 0, instances.clone()),
                DrawSource::Indirect(args) => pass.draw_indexed_indirect(args, 0),
            }
        }
    }

    fn submit_encoder(&mut self) {
        self.flush_draws();
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
            self.stats.submissions += 1;
        }
    }

    fn bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        bindings: &[Binding<'_, WgpuBuffer>],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .map(|b| wgpu::BindGroupEntry {
                binding: b.slot,
                resource: b.buffer.inner.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        })
    }

    fn queue_draw(&mut self, draw: &DrawCall<'_, Self>, source: DrawSource) {
        let bind_group = self.bind_group(&draw.program.label, &draw.program.layout, draw.bindings);
        self.pending_draws.push(PendingDraw {
            pipeline: draw.program.pipeline.clone(),
            bind_group,
            vertex_buffer: draw.vertex_buffer.inner.clone(),
            index_buffer: draw.index_buffer.inner.clone(),
            index_count: draw.index_count,
            source,
        });
        self.stats.draws += 1;
    }

    /// Copies into the shared staging buffer, submits, and maps it with a
    /// bounded wait.
    fn read_via_staging(
        &mut self,
        source: &wgpu::Buffer,
        offset: u64,
        size: u64,
        timeout: Duration,
        what: &str,
    ) -> RendererResult<Vec<u8>> {
        let needs_new = self.readback_staging.as_ref().map_or(true, |b| b.size() < size);
        if needs_new {
            self.readback_staging = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Staging"),
                size: size.next_power_of_two().max(256),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        let Some(staging) = self.readback_staging.take() else {
            return Err(buffer_mapping_error(what, "staging buffer unavailable"));
        };

        self.flush_draws();
        self.encoder().copy_buffer_to_buffer(source, offset, &staging, 0, size);
        self.submit_encoder();

        let result = map_read(&self.device, &staging, size, timeout, what);
        self.readback_staging = Some(staging);
        result
    }
}

fn create_target(device: &wgpu::Device, width: u32, height: u32) -> OffscreenTarget {
    let size = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Color"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Depth"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    OffscreenTarget {
        color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
        depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
        _color: color,
        _depth: depth,
    }
}

fn create_timestamps(device: &wgpu::Device, period_ns: f32) -> TimestampQueries {
    TimestampQueries {
        query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Frame Timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERY_COUNT,
        }),
        resolve_buffer: device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Resolve"),
            size: RESOLVE_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }),
        staging_buffer: device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Staging"),
            size: RESOLVE_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }),
        period_ns,
        written: [false; QUERY_COUNT as usize],
    }
}

/// Maps `buffer` for reading, polling the device until the callback fires
/// or `timeout` expires. A timed-out mapping is cancelled so the buffer can
/// be reused.
fn map_read(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    size: u64,
    timeout: Duration,
    what: &str,
) -> RendererResult<Vec<u8>> {
    let slice = buffer.slice(0..size);
    let (sender, mut receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let outcome = poll_until(timeout, || {
        device.poll(wgpu::Maintain::Poll);
        match receiver.try_recv() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => None,
            Err(canceled) => Some(Err(canceled)),
        }
    });

    match outcome {
        Ok(Ok(Ok(()))) => {
            let bytes = slice.get_mapped_range().to_vec();
            buffer.unmap();
            Ok(bytes)
        }
        Ok(Ok(Err(e))) => Err(buffer_mapping_error(what, e)),
        Ok(Err(canceled)) => Err(buffer_mapping_error(what, canceled)),
        Err(waited) => {
            buffer.unmap();
            Err(EngineError::Timeout {
                operation: what.to_string(),
                waited_ms: waited.as_millis() as u64,
            })
        }
    }
}

fn usage_for(kind: BufferKind) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match kind {
        BufferKind::Storage => U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferKind::Uniform => U::UNIFORM | U::COPY_DST,
        BufferKind::Indirect => U::STORAGE | U::INDIRECT | U::COPY_DST | U::COPY_SRC,
        BufferKind::Vertex => U::VERTEX | U::COPY_DST,
        BufferKind::Index => U::INDEX | U::COPY_DST,
    }
}

impl RenderDevice for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Kernel = WgpuKernel;
    type DrawProgram = WgpuDrawProgram;

    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<WgpuBuffer> {
        if desc.size == 0 {
            return Err(allocation_error(desc.label, 0, "zero-sized buffer"));
        }
        let limit = self.device.limits().max_buffer_size;
        if desc.size > limit {
            return Err(allocation_error(
                desc.label,
                desc.size,
                format!("exceeds max_buffer_size of {} bytes", limit),
            ));
        }

        // Copies and queue writes need 4-byte granularity
        let size = wgpu::util::align_to(desc.size, wgpu::COPY_BUFFER_ALIGNMENT);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: usage_for(desc.kind),
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(allocation_error(desc.label, size, error));
        }

        self.stats.allocated_bytes += size;
        log::debug!(
            "[WgpuDevice::create_buffer] '{}' ({:?}, {} bytes)",
            desc.label,
            desc.kind,
            size
        );
        Ok(WgpuBuffer {
            inner: Arc::new(buffer),
            label: Arc::from(desc.label),
            size,
        })
    }

    fn release_buffer(&mut self, buffer: WgpuBuffer) {
        self.stats.allocated_bytes = self.stats.allocated_bytes.saturating_sub(buffer.size);
    }

    fn buffer_size(&self, buffer: &WgpuBuffer) -> u64 {
        buffer.size
    }

    fn write_buffer(&mut self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) -> EngineResult<()> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(buffer_mapping_error(&buffer.label, "write is not 4-byte aligned"));
        }
        if offset + data.len() as u64 > buffer.size {
            return Err(buffer_mapping_error(
                &buffer.label,
                format!("write of {} bytes at {} overruns {} bytes", data.len(), offset, buffer.size),
            ));
        }
        // Pending commands must execute before this write lands
        if self.encoder.is_some() || !self.pending_draws.is_empty() {
            self.submit_encoder();
        }
        self.queue.write_buffer(&buffer.inner, offset, data);
        self.stats.uploaded_bytes += data.len() as u64;
        Ok(())
    }

    fn create_kernel(&mut self, desc: &KernelDescriptor<'_>) -> EngineResult<WgpuKernel> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.label),
            layout: None,
            module: &module,
            entry_point: desc.entry_point,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(pipeline_creation_error(desc.entry_point, error));
        }

        let layout = pipeline.get_bind_group_layout(0);
        log::info!(
            "[WgpuDevice::create_kernel] Compiled '{}' ({})",
            desc.label,
            desc.entry_point
        );
        Ok(WgpuKernel {
            pipeline: Arc::new(pipeline),
            layout: Arc::new(layout),
            label: Arc::from(desc.label),
        })
    }

    fn create_draw_program(&mut self, desc: &DrawProgramDescriptor<'_>) -> EngineResult<WgpuDrawProgram> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: desc.vertex_entry,
                buffers: &[Vertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: desc.fragment_entry,
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(pipeline_creation_error(desc.vertex_entry, error));
        }

        let layout = pipeline.get_bind_group_layout(0);
        Ok(WgpuDrawProgram {
            pipeline: Arc::new(pipeline),
            layout: Arc::new(layout),
            label: Arc::from(desc.label),
        })
    }

    fn dispatch(
        &mut self,
        kernel: &WgpuKernel,
        bindings: &[Binding<'_, WgpuBuffer>],
        workgroups: [u32; 3],
    ) -> EngineResult<()> {
        let bind_group = self.bind_group(&kernel.label, &kernel.layout, bindings);
        self.flush_draws();
        let encoder = self.encoder();
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&kernel.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        self.stats.dispatches += 1;
        Ok(())
    }

    fn draw_indexed(&mut self, draw: &DrawCall<'_, Self>, instances: Range<u32>) -> EngineResult<()> {
        self.queue_draw(draw, DrawSource::Direct(instances));
        Ok(())
    }

    fn draw_indexed_indirect(&mut self, draw: &DrawCall<'_, Self>, args: &WgpuBuffer) -> EngineResult<()> {
        self.queue_draw(draw, DrawSource::Indirect(args.inner.clone()));
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &WgpuBuffer,
        offset: u64,
        size: u64,
        timeout: Duration,
    ) -> EngineResult<Vec<u8>> {
        let aligned = wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT);
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || offset + aligned > buffer.size {
            return Err(buffer_mapping_error(
                &buffer.label,
                format!("read of {} bytes at {} is outside {} bytes", size, offset, buffer.size),
            ));
        }
        let what = format!("readback of '{}'", buffer.label);
        let mut bytes = self.read_via_staging(&buffer.inner, offset, aligned, timeout, &what)?;
        bytes.truncate(size as usize);
        self.stats.read_back_bytes += size;
        Ok(bytes)
    }

    fn begin_frame(&mut self) {
        self.clear_target = true;
        if let Some(timestamps) = self.timestamps.as_mut() {
            timestamps.written = [false; QUERY_COUNT as usize];
        }
    }

    fn submit(&mut self) {
        self.submit_encoder();
    }

    fn supports_gpu_timing(&self) -> bool {
        self.timestamps.is_some()
    }

    fn begin_timer(&mut self, scope: TimerScope) {
        self.write_timestamp(scope.index() as u32 * 2);
    }

    fn end_timer(&mut self, scope: TimerScope) {
        self.write_timestamp(scope.index() as u32 * 2 + 1);
    }

    fn resolve_timers(&mut self, timeout: Duration) -> EngineResult<TimerSamples> {
        let Some(timestamps) = self.timestamps.as_mut() else {
            return Ok(TimerSamples::unavailable());
        };
        let scopes = completed_scopes(&timestamps.written);
        timestamps.written = [false; QUERY_COUNT as usize];
        if scopes.is_empty() {
            return Ok(TimerSamples::unavailable());
        }

        self.flush_draws();
        {
            let device = &self.device;
            let encoder = self.encoder.get_or_insert_with(|| {
                device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Horde Frame Encoder"),
                })
            });
            if let Some(timestamps) = self.timestamps.as_ref() {
                for scope in &scopes {
                    let first = scope.index() as u32 * 2;
                    let offset = resolve_offset(*scope);
                    encoder.resolve_query_set(
                        &timestamps.query_set,
                        first..first + 2,
                        &timestamps.resolve_buffer,
                        offset,
                    );
                    encoder.copy_buffer_to_buffer(
                        &timestamps.resolve_buffer,
                        offset,
                        &timestamps.staging_buffer,
                        offset,
                        QUERY_PAIR_BYTES,
                    );
                }
            }
        }
        self.submit_encoder();

        let Some(timestamps) = self.timestamps.as_ref() else {
            return Ok(TimerSamples::unavailable());
        };
        let bytes = match map_read(
            &self.device,
            &timestamps.staging_buffer,
            RESOLVE_BYTES,
            timeout,
            "timestamp resolve",
        ) {
            Ok(bytes) => bytes,
            Err(EngineError::Timeout { .. }) => {
                return Ok(TimerSamples {
                    frame: TimerSample::Disjoint,
                    culling: TimerSample::Disjoint,
                });
            }
            Err(e) => return Err(e),
        };

        let period = timestamps.period_ns as f64;
        let sample = |scope: TimerScope| {
            if !scopes.contains(&scope) {
                return TimerSample::Unavailable;
            }
            match pair_ticks(&bytes, scope) {
                Some((start, end)) if end >= start && period > 0.0 => {
                    TimerSample::Valid((end - start) as f64 * period / 1_000_000.0)
                }
                _ => TimerSample::Disjoint,
            }
        };
        Ok(TimerSamples {
            frame: sample(TimerScope::Frame),
            culling: sample(TimerScope::Culling),
        })
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

impl WgpuDevice {
    /// Writes one timestamp through an empty compute pass, which only needs
    /// `TIMESTAMP_QUERY`.
    fn write_timestamp(&mut self, query_index: u32) {
        if self.timestamps.is_none() {
            return;
        }
        self.flush_draws();

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Horde Frame Encoder"),
            })
        });
        if let Some(timestamps) = self.timestamps.as_mut() {
            {
                let _pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Timestamp"),
                    timestamp_writes: Some(wgpu::ComputePassTimestampWrites {
                        query_set: &timestamps.query_set,
                        beginning_of_pass_write_index: Some(query_index),
                        end_of_pass_write_index: None,
                    }),
                });
            }
            timestamps.written[query_index as usize] = true;
        }
    }
}

/// Scopes whose begin and end timestamps were both written this frame
fn completed_scopes(written: &[bool; QUERY_COUNT as usize]) -> Vec<TimerScope> {
    TIMER_SCOPES
        .into_iter()
        .filter(|scope| {
            let begin = scope.index() * 2;
            written[begin] && written[begin + 1]
        })
        .collect()
}

fn resolve_offset(scope: TimerScope) -> u64 {
    scope.index() as u64 * QUERY_SLOT_BYTES
}

/// Begin and end ticks of `scope` in the mapped resolve slots
fn pair_ticks(bytes: &[u8], scope: TimerScope) -> Option<(u64, u64)> {
    let offset = resolve_offset(scope) as usize;
    let pair = bytes.get(offset..offset + QUERY_PAIR_BYTES as usize)?;
    let (begin, end) = pair.split_at(8);
    Some((
        u64::from_le_bytes(begin.try_into().ok()?),
        u64::from_le_bytes(end.try_into().ok()?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_complete_pairs_are_resolved() {
        assert!(completed_scopes(&[false; 4]).is_empty());
        assert_eq!(completed_scopes(&[true, true, false, false]), vec![TimerScope::Frame]);
        assert_eq!(completed_scopes(&[true, false, true, true]), vec![TimerScope::Culling]);
        assert_eq!(
            completed_scopes(&[true, true, true, true]),
            vec![TimerScope::Frame, TimerScope::Culling]
        );
    }

    #[test]
    fn test_scopes_resolve_into_aligned_slots() {
        for scope in TIMER_SCOPES {
            assert_eq!(resolve_offset(scope) % wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT, 0);
            assert!(resolve_offset(scope) + QUERY_PAIR_BYTES <= RESOLVE_BYTES);
        }
        assert_ne!(resolve_offset(TimerScope::Frame), resolve_offset(TimerScope::Culling));
    }

    #[test]
    fn test_pair_ticks_read_from_scope_slot() {
        let mut bytes = vec![0u8; RESOLVE_BYTES as usize];
        let culling = resolve_offset(TimerScope::Culling) as usize;
        bytes[culling..culling + 8].copy_from_slice(&100u64.to_le_bytes());
        bytes[culling + 8..culling + 16].copy_from_slice(&250u64.to_le_bytes());

        assert_eq!(pair_ticks(&bytes, TimerScope::Culling), Some((100, 250)));
        assert_eq!(pair_ticks(&bytes, TimerScope::Frame), Some((0, 0)));
        assert_eq!(pair_ticks(&bytes[..8], TimerScope::Frame), None);
    }
}
