//! Scene data consumed by the renderers
//!
//! The core never loads assets: scenes are either produced by the
//! application or synthesized by [`generators`] for benchmark runs.

pub mod generators;
pub mod object;

pub use generators::{generate_scene, SceneKind};
pub use object::{Light, Material, ObjectRecord};
