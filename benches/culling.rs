// Culling Benchmarks
//
// Compares the CPU reference culling loop, the CPU-driven renderer and the
// GPU-driven pipeline running on the software device.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use std::time::Duration;

use horde_engine::renderer::culling::reference_visibility;
use horde_engine::scene::generators::scene_radius;
use horde_engine::{
    generate_scene, Aabb, Camera, CameraSource, CpuDrivenRenderer, FrameProfiler, Frustum, GpuDrivenPipeline, Light,
    Mesh, PipelineConfig, ProfilerConfig, SoftwareDevice,
};

const OBJECT_COUNTS: &[u32] = &[1000, 10000, 50000];

fn bench_camera(count: u32) -> Camera {
    let radius = scene_radius(count).max(1.0);
    Camera::looking_at(Vec3::new(0.0, radius * 0.25, radius * 1.5), Vec3::ZERO, 1920, 1080)
        .with_depth_range(0.1, radius * 4.0 + 10.0)
}

fn bench_reference_culling(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_culling");

    for &count in OBJECT_COUNTS {
        let scene = generate_scene(count, 42, Aabb::unit_cube());
        let camera = bench_camera(count);
        let frustum = Frustum::from_view_proj(&camera.view_projection());
        let eye = camera.position();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(reference_visibility(black_box(&scene), &frustum, eye)))
        });
    }

    group.finish();
}

fn bench_cpu_driven_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_driven_frame");
    group.measurement_time(Duration::from_secs(10));

    for &count in OBJECT_COUNTS {
        let mut device = SoftwareDevice::new();
        let Ok(mesh) = Mesh::cube(&mut device) else { continue };
        let Ok(mut renderer) = CpuDrivenRenderer::new(&mut device, count) else { continue };
        let scene = generate_scene(count, 42, mesh.bounding_box());
        let camera = bench_camera(count);
        let light = Light::default();
        let mut profiler = FrameProfiler::new(ProfilerConfig::default());

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                profiler.begin_frame(&mut device);
                let outcome = renderer.render(&mut device, &mesh, &scene, &camera, &light, &mut profiler);
                profiler.end_frame(&mut device);
                black_box(outcome)
            })
        });
    }

    group.finish();
}

fn bench_gpu_driven_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("gpu_driven_frame_software");
    group.measurement_time(Duration::from_secs(10));

    for &count in OBJECT_COUNTS {
        let mut device = SoftwareDevice::new();
        let Ok(mesh) = Mesh::cube(&mut device) else { continue };
        let config = PipelineConfig {
            max_objects: count,
            ..PipelineConfig::default()
        };
        let Ok(mut pipeline) = GpuDrivenPipeline::new(&mut device, config) else { continue };
        let scene = generate_scene(count, 42, mesh.bounding_box());
        pipeline.update_objects(&mut device, &scene);
        let camera = bench_camera(count);
        let light = Light::default();
        let mut profiler = FrameProfiler::new(ProfilerConfig::default());

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                profiler.begin_frame(&mut device);
                let outcome = pipeline.render(&mut device, &mesh, &camera, &light, &mut profiler);
                profiler.end_frame(&mut device);
                black_box(outcome)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reference_culling,
    bench_cpu_driven_frame,
    bench_gpu_driven_frame
);
criterion_main!(benches);
