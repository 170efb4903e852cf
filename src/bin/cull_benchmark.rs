//! GPU-driven vs CPU-driven culling benchmark
//!
//! Runs one configuration or the full suite and writes CSV, comparison and
//! JSON reports. Uses a headless wgpu device unless `--software` is given or
//! no adapter is available.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use horde_engine::profiling::report::comparison_report;
use horde_engine::renderer::device::{RenderDevice, WgpuDeviceOptions};
use horde_engine::{
    BenchmarkHarness, BenchmarkResult, EngineConfig, RenderingApproach, ReportWriter, SoftwareDevice, WgpuDevice,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ApproachArg {
    Cpu,
    Gpu,
    Hybrid,
}

impl From<ApproachArg> for RenderingApproach {
    fn from(arg: ApproachArg) -> Self {
        match arg {
            ApproachArg::Cpu => RenderingApproach::CpuDriven,
            ApproachArg::Gpu => RenderingApproach::GpuDriven,
            ApproachArg::Hybrid => RenderingApproach::Hybrid,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cull_benchmark", about = "Benchmark GPU-driven culling against the CPU-driven path")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rendering approach for a single run
    #[arg(long, value_enum)]
    approach: Option<ApproachArg>,

    /// Object count for a single run
    #[arg(long)]
    objects: Option<u32>,

    /// Recorded frames per run
    #[arg(long)]
    frames: Option<u32>,

    /// Sweep every object count and approach
    #[arg(long)]
    suite: bool,

    /// Use the CPU emulation instead of a GPU
    #[arg(long)]
    software: bool,

    /// Report directory
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    horde_engine::init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(approach) = args.approach {
        config.benchmark.approach = approach.into();
    }
    if let Some(objects) = args.objects {
        config.benchmark.object_count = objects;
        config.pipeline.max_objects = config.pipeline.max_objects.max(objects);
    }
    if let Some(frames) = args.frames {
        config.benchmark.benchmark_duration = frames;
    }
    if let Some(output) = &args.output {
        config.benchmark.output_directory = output.display().to_string();
    }
    config.validate().context("invalid configuration")?;

    let results = if args.software {
        run(&mut SoftwareDevice::new(), &config, args.suite)?
    } else {
        let options = WgpuDeviceOptions {
            gpu_timing: config.profiler.gpu_timing,
            ..WgpuDeviceOptions::default()
        };
        match WgpuDevice::new_headless(options) {
            Ok(mut device) => run(&mut device, &config, args.suite)?,
            Err(e) => {
                log::warn!("[cull_benchmark] No GPU available ({}); using the software device", e);
                run(&mut SoftwareDevice::new(), &config, args.suite)?
            }
        }
    };

    println!("{}", comparison_report(&results, chrono::Local::now()));

    let writer = ReportWriter::new(&config.benchmark.output_directory);
    for path in writer.write_all(&results).context("writing reports")? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn run<D: RenderDevice>(device: &mut D, config: &EngineConfig, suite: bool) -> Result<Vec<BenchmarkResult>> {
    let harness = BenchmarkHarness::new(config.pipeline.clone(), config.profiler.clone());
    log::info!("[cull_benchmark] Running on '{}'", device.name());

    if suite {
        let results = harness.run_benchmark_suite(device, &config.benchmark);
        if results.is_empty() {
            anyhow::bail!("every benchmark run failed");
        }
        Ok(results)
    } else {
        Ok(vec![harness.run_benchmark(device, &config.benchmark)?])
    }
}
