//! Engine configuration
//!
//! Loaded once at startup from TOML. Every field has a default so partial
//! files are accepted; `validate` rejects values the pipeline cannot run with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::profiling::benchmark::BenchmarkConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    pub profiler: ProfilerConfig,
    pub benchmark: BenchmarkConfig,
}

/// GPU-driven pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of every per-object buffer, fixed at initialization
    pub max_objects: u32,
    /// Frames between blocking visible-counter readbacks
    pub readback_interval: u32,
    /// Upper bound for a single blocking readback
    pub readback_timeout_ms: u64,
    /// Frames between CPU/GPU visibility cross-checks (0 disables)
    pub cross_validate_interval: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_objects: 100_000,
            readback_interval: 30,
            readback_timeout_ms: 1_000,
            cross_validate_interval: 0,
        }
    }
}

impl PipelineConfig {
    pub fn readback_timeout(&self) -> Duration {
        Duration::from_millis(self.readback_timeout_ms)
    }
}

/// Frame profiler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Frames kept in the rolling history
    pub history_len: usize,
    /// Hard cap on samples retained during a benchmark run
    pub benchmark_series_cap: usize,
    /// Resolve GPU timestamp pairs when the device supports them
    pub gpu_timing: bool,
    /// Upper bound for a timestamp query wait
    pub query_timeout_ms: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            history_len: 300,
            benchmark_series_cap: 100_000,
            gpu_timing: true,
            query_timeout_ms: 250,
        }
    }
}

impl ProfilerConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        log::info!("[EngineConfig::load] Loading configuration from {}", path.display());
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.pipeline.max_objects == 0 {
            return Err(config_error("pipeline.max_objects must be greater than zero"));
        }
        if self.pipeline.readback_interval == 0 {
            return Err(config_error("pipeline.readback_interval must be greater than zero"));
        }
        if self.profiler.history_len == 0 {
            return Err(config_error("profiler.history_len must be greater than zero"));
        }
        if self.benchmark.object_count > self.pipeline.max_objects {
            return Err(config_error(&format!(
                "benchmark.object_count ({}) exceeds pipeline.max_objects ({})",
                self.benchmark.object_count, self.pipeline.max_objects
            )));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> EngineError {
    EngineError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::benchmark::RenderingApproach;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty config is valid");
        assert_eq!(config.pipeline.readback_interval, 30);
        assert_eq!(config.profiler.history_len, 300);
        assert_eq!(config.benchmark.approach, RenderingApproach::GpuDriven);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let source = r#"
            [pipeline]
            max_objects = 2048

            [benchmark]
            approach = "cpu_driven"
            object_count = 1000
            benchmark_duration = 12
        "#;
        let config = EngineConfig::from_toml_str(source).expect("valid config");
        assert_eq!(config.pipeline.max_objects, 2048);
        assert_eq!(config.pipeline.readback_interval, 30);
        assert_eq!(config.benchmark.approach, RenderingApproach::CpuDriven);
        assert_eq!(config.benchmark.benchmark_duration, 12);
        assert!(config.benchmark.enable_frustum_culling);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = EngineConfig::from_toml_str("[pipeline]\nmax_objects = 0\n").unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn test_rejects_benchmark_larger_than_capacity() {
        let source = "[pipeline]\nmax_objects = 10\n[benchmark]\nobject_count = 11\n";
        assert!(EngineConfig::from_toml_str(source).is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[pipeline\n").unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }
}
