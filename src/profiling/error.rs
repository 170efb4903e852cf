//! Profiling subsystem error handling

use crate::error::{EngineError, EngineResult};

/// Helper trait for profiling error contexts
pub trait ProfilingErrorContext<T> {
    fn profiling_context(self, operation: &str) -> EngineResult<T>;
}

impl<T, E> ProfilingErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn profiling_context(self, operation: &str) -> EngineResult<T> {
        self.map_err(|e| benchmark_data_error(format!("{}: {}", operation, e)))
    }
}

/// Create a benchmark data error
pub fn benchmark_data_error(message: impl Into<String>) -> EngineError {
    EngineError::BenchmarkData {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_names_the_operation() {
        let failed: Result<(), &str> = Err("permission denied");
        let err = failed.profiling_context("create report directory").unwrap_err();
        assert_eq!(
            err.to_string(),
            "benchmark data error: create report directory: permission denied"
        );
    }
}
