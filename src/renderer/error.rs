//! Renderer subsystem error handling
//!
//! Helpers that turn wgpu and buffer failures into [`EngineError`] values
//! carrying the name of the resource involved.

use crate::error::{EngineError, EngineResult};

/// Type alias for renderer operation results
pub type RendererResult<T> = EngineResult<T>;

/// Helper trait for renderer error contexts
pub trait RendererErrorContext<T> {
    fn renderer_context(self, operation: &str) -> RendererResult<T>;
}

impl<T, E> RendererErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn renderer_context(self, operation: &str) -> RendererResult<T> {
        self.map_err(|e| gpu_operation_error(operation, e))
    }
}

/// Create a GPU operation error
pub fn gpu_operation_error(operation: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::GpuOperationFailed {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a buffer mapping error
pub fn buffer_mapping_error(buffer: &str, reason: impl std::fmt::Display) -> EngineError {
    EngineError::MapFailed {
        buffer: buffer.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a pipeline creation error
pub fn pipeline_creation_error(entry_point: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::KernelCompilation {
        entry_point: entry_point.to_string(),
        reason: error.to_string(),
    }
}

/// Create a buffer allocation error
pub fn allocation_error(label: &str, size: u64, reason: impl std::fmt::Display) -> EngineError {
    EngineError::AllocationFailed {
        label: label.to_string(),
        size,
        reason: reason.to_string(),
    }
}

/// Create a missing-resource error
pub fn missing_resource(resource: &str) -> EngineError {
    EngineError::ResourceValidation {
        resource: resource.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_context_wraps_display_errors() {
        let failed: Result<(), &str> = Err("device lost");
        let err = failed.renderer_context("submit").unwrap_err();
        assert_eq!(err.to_string(), "GPU operation 'submit' failed: device lost");
    }

    #[test]
    fn test_renderer_context_passes_success_through() {
        let ok: Result<u32, &str> = Ok(7);
        assert_eq!(ok.renderer_context("request_device").unwrap(), 7);
    }
}
