//! Engine-wide error type
//!
//! Every subsystem reports failures through [`EngineError`]. Components never
//! propagate these across their own boundary during a frame: they log the
//! error and degrade (disable a stage, fall back to the CPU path, reuse stale
//! data) so callers only ever observe a mode change or a `false` return.

use thiserror::Error;

/// Result alias used throughout the engine
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A compute or draw program could not be created from its WGSL source
    #[error("kernel '{entry_point}' failed to compile: {reason}")]
    KernelCompilation { entry_point: String, reason: String },

    /// A GPU buffer could not be allocated
    #[error("failed to allocate {size} bytes for '{label}': {reason}")]
    AllocationFailed {
        label: String,
        size: u64,
        reason: String,
    },

    /// A resource required for the next dispatch or draw is missing
    #[error("resource validation failed: {resource} is unavailable")]
    ResourceValidation { resource: String },

    /// A dynamic buffer write or staging map failed
    #[error("failed to map buffer '{buffer}': {reason}")]
    MapFailed { buffer: String, reason: String },

    /// A bounded wait on the device expired
    #[error("timed out after {waited_ms} ms waiting for {operation}")]
    Timeout { operation: String, waited_ms: u64 },

    /// A benchmark aggregate was requested over an empty or invalid series
    #[error("benchmark data error: {message}")]
    BenchmarkData { message: String },

    /// Invalid or unreadable configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A GPU operation failed for a reason not covered above
    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_resource() {
        let err = EngineError::Timeout {
            operation: "visible counter readback".to_string(),
            waited_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "timed out after 250 ms waiting for visible counter readback"
        );
    }
}
