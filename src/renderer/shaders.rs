//! WGSL sources and the binding contract each entry point expects.
//!
//! Every source is compiled with `common.wgsl` prepended. Slot numbers here
//! must match the `@binding` attributes in the corresponding file; the
//! software device relies on the same numbers when it emulates a kernel.

const COMMON: &str = include_str!("shaders/common.wgsl");
const TRANSFORM_CULL: &str = include_str!("shaders/transform_cull.wgsl");
const COMPACTION: &str = include_str!("shaders/compaction.wgsl");
const INDIRECT_ARGS: &str = include_str!("shaders/indirect_args.wgsl");
const DRAW: &str = include_str!("shaders/draw.wgsl");

fn with_common(body: &str) -> String {
    format!("{}\n{}", COMMON, body)
}

pub fn transform_cull_source() -> String {
    with_common(TRANSFORM_CULL)
}

pub fn compaction_source() -> String {
    with_common(COMPACTION)
}

pub fn indirect_args_source() -> String {
    with_common(INDIRECT_ARGS)
}

pub fn draw_source() -> String {
    with_common(DRAW)
}

pub mod entry {
    pub const TRANSFORM_CULL: &str = "transform_cull";
    pub const RESET_COUNTER: &str = "reset_counter";
    pub const COMPACT_VISIBLE: &str = "compact_visible";
    pub const WRITE_DRAW_ARGS: &str = "write_draw_args";
    pub const FRAGMENT: &str = "fs_main";
}

/// transform_cull.wgsl
pub mod transform_cull_slots {
    pub const PARAMS: u32 = 0;
    pub const RECORDS: u32 = 1;
    pub const WORLD_MATRICES: u32 = 2;
    pub const VISIBILITY_FLAGS: u32 = 3;
}

/// compaction.wgsl
pub mod compaction_slots {
    pub const PARAMS: u32 = 0;
    pub const VISIBILITY_FLAGS: u32 = 1;
    pub const VISIBLE_INDICES: u32 = 2;
    pub const VISIBLE_COUNTER: u32 = 3;
}

/// indirect_args.wgsl
pub mod indirect_args_slots {
    pub const PARAMS: u32 = 0;
    pub const VISIBLE_COUNTER: u32 = 1;
    pub const DRAW_ARGS: u32 = 2;
}

/// draw.wgsl
pub mod draw_slots {
    pub const PARAMS: u32 = 0;
    pub const WORLD_MATRICES: u32 = 1;
    pub const VISIBILITY_FLAGS: u32 = 2;
    pub const VISIBLE_INDICES: u32 = 3;
    pub const LIGHT: u32 = 4;
    pub const MATERIAL: u32 = 5;
}

/// Vertex entry points in draw.wgsl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawProgramKind {
    /// Indirect draw; instance N renders `visible_indices[N]`
    Compacted,
    /// One instance per object; reads the visibility flag and discards
    Flagged,
    /// CPU-driven; instance N renders slot N of a CPU-written matrix buffer
    Direct,
}

impl DrawProgramKind {
    pub fn vertex_entry(&self) -> &'static str {
        match self {
            DrawProgramKind::Compacted => "vs_compacted",
            DrawProgramKind::Flagged => "vs_flagged",
            DrawProgramKind::Direct => "vs_direct",
        }
    }

    pub fn from_vertex_entry(entry: &str) -> Option<Self> {
        match entry {
            "vs_compacted" => Some(DrawProgramKind::Compacted),
            "vs_flagged" => Some(DrawProgramKind::Flagged),
            "vs_direct" => Some(DrawProgramKind::Direct),
            _ => None,
        }
    }

    /// Slots statically used by this entry point plus the fragment stage
    pub fn binding_slots(&self) -> &'static [u32] {
        use draw_slots::*;
        match self {
            DrawProgramKind::Compacted => &[PARAMS, WORLD_MATRICES, VISIBLE_INDICES, LIGHT, MATERIAL],
            DrawProgramKind::Flagged => &[PARAMS, WORLD_MATRICES, VISIBILITY_FLAGS, LIGHT, MATERIAL],
            DrawProgramKind::Direct => &[PARAMS, WORLD_MATRICES, LIGHT, MATERIAL],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DrawProgramKind::Compacted => "Compacted Draw Program",
            DrawProgramKind::Flagged => "Flagged Draw Program",
            DrawProgramKind::Direct => "Direct Draw Program",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_define_their_entry_points() {
        assert!(transform_cull_source().contains("fn transform_cull("));
        assert!(compaction_source().contains("fn reset_counter("));
        assert!(compaction_source().contains("fn compact_visible("));
        assert!(indirect_args_source().contains("fn write_draw_args("));
        for kind in [DrawProgramKind::Compacted, DrawProgramKind::Flagged, DrawProgramKind::Direct] {
            assert!(draw_source().contains(&format!("fn {}(", kind.vertex_entry())));
            assert_eq!(DrawProgramKind::from_vertex_entry(kind.vertex_entry()), Some(kind));
        }
    }

    #[test]
    fn test_common_block_is_prepended() {
        assert!(transform_cull_source().starts_with(COMMON));
        assert!(draw_source().contains("struct FrameParams"));
    }
}
