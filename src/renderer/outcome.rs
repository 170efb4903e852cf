use std::fmt;

/// Which path actually produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    /// Four dispatches and one indirect draw
    GpuCompacted,
    /// One dispatch and one instanced draw over every object
    GpuUncompacted,
    /// CPU culling with one draw per visible object
    CpuDriven,
    /// GPU path unavailable this frame; rendered CPU-driven instead
    CpuFallback,
    /// Nothing could be drawn (missing geometry)
    Skipped,
}

impl fmt::Display for RenderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderPath::GpuCompacted => "gpu_compacted",
            RenderPath::GpuUncompacted => "gpu_uncompacted",
            RenderPath::CpuDriven => "cpu_driven",
            RenderPath::CpuFallback => "cpu_fallback",
            RenderPath::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Per-frame summary returned by every renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOutcome {
    pub path: RenderPath,
    pub draw_calls: u32,
    pub indirect_draw_calls: u32,
    pub compute_dispatches: u32,
    /// Exact for CPU paths; last read-back value for GPU paths
    pub visible_objects: u32,
}

impl RenderOutcome {
    pub fn skipped() -> Self {
        Self {
            path: RenderPath::Skipped,
            draw_calls: 0,
            indirect_draw_calls: 0,
            compute_dispatches: 0,
            visible_objects: 0,
        }
    }
}
