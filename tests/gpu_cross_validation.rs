/// GPU Cross-Validation Tests
///
/// Runs the real WGSL kernels on a headless wgpu device and compares their
/// output with the CPU reference. Skipped when no adapter is present.

use glam::Vec3;
use horde_engine::renderer::culling::reference_visibility;
use horde_engine::renderer::device::WgpuDeviceOptions;
use horde_engine::{
    generate_scene, Aabb, Camera, CameraSource, FrameProfiler, Frustum, GpuDrivenPipeline, Light, Mesh,
    PipelineConfig, PipelineState, ProfilerConfig, RenderDevice, WgpuDevice,
};

fn init_gpu() -> Option<WgpuDevice> {
    WgpuDevice::new_headless(WgpuDeviceOptions::default()).ok()
}

fn config(max_objects: u32) -> PipelineConfig {
    PipelineConfig {
        max_objects,
        readback_interval: 1,
        ..PipelineConfig::default()
    }
}

#[test]
fn test_gpu_flags_match_cpu_reference() {
    let Some(mut device) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let scene = generate_scene(5000, 99, Aabb::unit_cube());
    let mesh = Mesh::cube(&mut device).unwrap();
    let mut pipeline = GpuDrivenPipeline::new(&mut device, config(5000)).unwrap();
    let mut profiler = FrameProfiler::new(ProfilerConfig::default());
    profiler.initialize(&device);
    pipeline.update_objects(&mut device, &scene);

    let camera = Camera::looking_at(Vec3::new(0.0, 15.0, 90.0), Vec3::ZERO, 1280, 720).with_depth_range(0.1, 150.0);
    profiler.begin_frame(&mut device);
    pipeline.render(&mut device, &mesh, &camera, &Light::default(), &mut profiler);
    profiler.end_frame(&mut device);

    let report = pipeline.cross_validate(&mut device).unwrap();
    // Objects straddling a plane may differ by float rounding between backends
    assert!(
        report.mismatched.len() <= 5,
        "{} mismatches: {:?}",
        report.mismatched.len(),
        report.mismatched
    );

    let gpu_flags = pipeline.read_visibility_flags(&mut device).unwrap();
    let cpu_flags = reference_visibility(
        &scene,
        &Frustum::from_view_proj(&camera.view_projection()),
        camera.position(),
    );
    assert_eq!(gpu_flags.len(), cpu_flags.len());

    pipeline.shutdown(&mut device);
    mesh.release(&mut device);
}

#[test]
fn test_gpu_counter_and_draw_args_agree() {
    let Some(mut device) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return;
    };

    let scene = generate_scene(2000, 5, Aabb::unit_cube());
    let mesh = Mesh::cube(&mut device).unwrap();
    let mut pipeline = GpuDrivenPipeline::new(&mut device, config(2000)).unwrap();
    let mut profiler = FrameProfiler::new(ProfilerConfig::default());
    pipeline.update_objects(&mut device, &scene);

    let camera = Camera::looking_at(Vec3::new(30.0, 10.0, 60.0), Vec3::ZERO, 1280, 720);
    profiler.begin_frame(&mut device);
    pipeline.render(&mut device, &mesh, &camera, &Light::default(), &mut profiler);
    profiler.end_frame(&mut device);

    if pipeline.state() != PipelineState::ReadyCompacted {
        println!("Skipping compaction checks - pipeline is {}", pipeline.state());
        return;
    }

    let flags = pipeline.read_visibility_flags(&mut device).unwrap();
    let set = flags.iter().filter(|f| **f == 1).count() as u32;
    let counter = pipeline.read_visible_counter(&mut device).unwrap().unwrap();
    assert_eq!(counter, set);

    let mut indices = pipeline.read_visible_indices(&mut device).unwrap();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len() as u32, counter);

    let args = pipeline.read_draw_arguments(&mut device).unwrap().unwrap();
    assert_eq!(args.instance_count, counter);
    assert_eq!(args.index_count, mesh.index_count());

    let matrices = pipeline.read_world_matrices(&mut device).unwrap();
    for (matrix, record) in matrices.iter().zip(&scene).take(64) {
        assert!(matrix.abs_diff_eq(record.world_matrix(), 1e-3));
    }
    assert!(device.stats().draws >= 1);
}
