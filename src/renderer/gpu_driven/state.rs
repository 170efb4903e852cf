//! Pipeline capability state machine
//!
//! Capability is decided once at initialization and only ever moves down:
//! a ready state can fall to `CpuFallback` after repeated resource
//! validation failures, and nothing leaves `CpuFallback`.

use std::fmt;

/// Consecutive failing frames before the GPU path is disabled for good
pub const FALLBACK_CONFIRMATION_FRAMES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    /// All four stages plus the indirect draw
    ReadyCompacted,
    /// Visibility only; one instanced draw that discards culled objects
    ReadyUncompacted,
    CpuFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Initialized {
        /// Visibility kernel and a matching draw program compiled
        core_available: bool,
        /// Compaction, indirect-args and compacted draw program compiled
        compaction_available: bool,
    },
    ResourceValidationFailed {
        consecutive_failures: u32,
    },
}

impl PipelineState {
    pub fn transition(self, event: PipelineEvent) -> PipelineState {
        use PipelineState::*;
        match (self, event) {
            (
                Uninitialized,
                PipelineEvent::Initialized {
                    core_available,
                    compaction_available,
                },
            ) => match (core_available, compaction_available) {
                (true, true) => ReadyCompacted,
                (true, false) => ReadyUncompacted,
                (false, _) => CpuFallback,
            },
            (ReadyCompacted | ReadyUncompacted, PipelineEvent::ResourceValidationFailed { consecutive_failures })
                if consecutive_failures >= FALLBACK_CONFIRMATION_FRAMES =>
            {
                CpuFallback
            }
            (state, _) => state,
        }
    }

    pub fn is_gpu_driven(&self) -> bool {
        matches!(self, PipelineState::ReadyCompacted | PipelineState::ReadyUncompacted)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::ReadyCompacted => "gpu_compacted",
            PipelineState::ReadyUncompacted => "gpu_uncompacted",
            PipelineState::CpuFallback => "cpu_fallback",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(core: bool, compaction: bool) -> PipelineState {
        PipelineState::Uninitialized.transition(PipelineEvent::Initialized {
            core_available: core,
            compaction_available: compaction,
        })
    }

    #[test]
    fn test_initialization_outcomes() {
        assert_eq!(init(true, true), PipelineState::ReadyCompacted);
        assert_eq!(init(true, false), PipelineState::ReadyUncompacted);
        assert_eq!(init(false, true), PipelineState::CpuFallback);
        assert_eq!(init(false, false), PipelineState::CpuFallback);
    }

    #[test]
    fn test_validation_failures_need_confirmation() {
        let state = init(true, true);
        let failed = |n| PipelineEvent::ResourceValidationFailed { consecutive_failures: n };
        assert_eq!(state.transition(failed(1)), PipelineState::ReadyCompacted);
        assert_eq!(state.transition(failed(2)), PipelineState::ReadyCompacted);
        assert_eq!(
            state.transition(failed(FALLBACK_CONFIRMATION_FRAMES)),
            PipelineState::CpuFallback
        );
    }

    #[test]
    fn test_no_upward_transitions() {
        let fallback = init(false, false);
        assert_eq!(
            fallback.transition(PipelineEvent::Initialized {
                core_available: true,
                compaction_available: true,
            }),
            PipelineState::CpuFallback
        );

        let uncompacted = init(true, false);
        assert_eq!(
            uncompacted.transition(PipelineEvent::Initialized {
                core_available: true,
                compaction_available: true,
            }),
            PipelineState::ReadyUncompacted
        );
    }
}
