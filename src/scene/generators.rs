//! Synthetic benchmark scenes
//!
//! The layout is picked from the object count so small runs stay readable
//! and large runs stress the culling path with objects on every side of the
//! camera.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::object::ObjectRecord;
use crate::renderer::culling::Aabb;

/// Largest scene laid out as a grid
pub const GRID_MAX_OBJECTS: u32 = 1_000;
/// Largest scene laid out uniformly at random
pub const RANDOM_MAX_OBJECTS: u32 = 10_000;

const GRID_SPACING: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    Grid,
    UniformRandom,
    StressScatter,
}

impl SceneKind {
    pub fn for_object_count(count: u32) -> Self {
        if count <= GRID_MAX_OBJECTS {
            SceneKind::Grid
        } else if count <= RANDOM_MAX_OBJECTS {
            SceneKind::UniformRandom
        } else {
            SceneKind::StressScatter
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SceneKind::Grid => "grid",
            SceneKind::UniformRandom => "uniform_random",
            SceneKind::StressScatter => "stress_scatter",
        }
    }
}

/// Builds `count` records around the origin. Deterministic for a given seed.
pub fn generate_scene(count: u32, seed: u64, local_bounds: Aabb) -> Vec<ObjectRecord> {
    let kind = SceneKind::for_object_count(count);
    log::debug!(
        "[generate_scene] Generating {} scene with {} objects (seed {})",
        kind.name(),
        count,
        seed
    );
    match kind {
        SceneKind::Grid => grid_scene(count, local_bounds),
        SceneKind::UniformRandom => uniform_random_scene(count, seed, local_bounds),
        SceneKind::StressScatter => stress_scatter_scene(count, seed, local_bounds),
    }
}

/// Radius that encloses every object the generator places for `count`
pub fn scene_radius(count: u32) -> f32 {
    match SceneKind::for_object_count(count) {
        SceneKind::Grid => {
            let side = grid_side(count) as f32;
            side * GRID_SPACING * 0.5 * 3f32.sqrt()
        }
        SceneKind::UniformRandom => random_extent(count) * 3f32.sqrt(),
        SceneKind::StressScatter => random_extent(count) * 2.0 * 3f32.sqrt(),
    }
}

fn grid_side(count: u32) -> u32 {
    (count as f32).cbrt().ceil().max(1.0) as u32
}

fn random_extent(count: u32) -> f32 {
    (count as f32).cbrt() * GRID_SPACING * 0.75
}

fn grid_scene(count: u32, local_bounds: Aabb) -> Vec<ObjectRecord> {
    let side = grid_side(count);
    let offset = (side as f32 - 1.0) * GRID_SPACING * 0.5;
    (0..count)
        .map(|i| {
            let x = i % side;
            let y = (i / side) % side;
            let z = i / (side * side);
            let position = Vec3::new(
                x as f32 * GRID_SPACING - offset,
                y as f32 * GRID_SPACING - offset,
                z as f32 * GRID_SPACING - offset,
            );
            ObjectRecord::new(i, position, local_bounds)
        })
        .collect()
}

fn uniform_random_scene(count: u32, seed: u64, local_bounds: Aabb) -> Vec<ObjectRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let extent = random_extent(count);
    (0..count)
        .map(|i| {
            let position = Vec3::new(
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent..extent),
            );
            let rotation = Vec3::new(0.0, rng.gen_range(0.0..std::f32::consts::TAU), 0.0);
            ObjectRecord::new(i, position, local_bounds).with_rotation(rotation)
        })
        .collect()
}

/// Clustered, non-uniformly scaled, arbitrarily rotated objects spread over
/// twice the random extent.
fn stress_scatter_scene(count: u32, seed: u64, local_bounds: Aabb) -> Vec<ObjectRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let extent = random_extent(count) * 2.0;
    let cluster_count = (count / 500).max(8);
    let clusters: Vec<Vec3> = (0..cluster_count)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent * 0.25..extent * 0.25),
                rng.gen_range(-extent..extent),
            )
        })
        .collect();
    let spread = extent / (cluster_count as f32).sqrt();

    (0..count)
        .map(|i| {
            let centre = clusters[rng.gen_range(0..clusters.len())];
            let jitter = Vec3::new(
                rng.gen_range(-spread..spread),
                rng.gen_range(-spread..spread),
                rng.gen_range(-spread..spread),
            );
            let position = (centre + jitter).clamp(Vec3::splat(-extent), Vec3::splat(extent));
            let scale = Vec3::new(
                rng.gen_range(0.25..3.0),
                rng.gen_range(0.25..3.0),
                rng.gen_range(0.25..3.0),
            );
            let rotation = Vec3::new(
                rng.gen_range(0.0..std::f32::consts::TAU),
                rng.gen_range(0.0..std::f32::consts::TAU),
                rng.gen_range(0.0..std::f32::consts::TAU),
            );
            ObjectRecord::new(i, position, local_bounds)
                .with_scale(scale)
                .with_rotation(rotation)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_selection_by_count() {
        assert_eq!(SceneKind::for_object_count(0), SceneKind::Grid);
        assert_eq!(SceneKind::for_object_count(1_000), SceneKind::Grid);
        assert_eq!(SceneKind::for_object_count(1_001), SceneKind::UniformRandom);
        assert_eq!(SceneKind::for_object_count(10_000), SceneKind::UniformRandom);
        assert_eq!(SceneKind::for_object_count(10_001), SceneKind::StressScatter);
    }

    #[test]
    fn test_generated_count_and_indices() {
        for count in [0, 27, 5_000, 12_000] {
            let scene = generate_scene(count, 7, Aabb::unit_cube());
            assert_eq!(scene.len(), count as usize);
            for (i, record) in scene.iter().enumerate() {
                assert_eq!(record.object_index, i as u32);
            }
        }
    }

    #[test]
    fn test_same_seed_same_scene() {
        let a = generate_scene(5_000, 42, Aabb::unit_cube());
        let b = generate_scene(5_000, 42, Aabb::unit_cube());
        let c = generate_scene(5_000, 43, Aabb::unit_cube());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_objects_stay_inside_scene_radius() {
        for count in [1_000, 8_000, 20_000] {
            let radius = scene_radius(count);
            let scene = generate_scene(count, 3, Aabb::unit_cube());
            for record in &scene {
                assert!(Vec3::from_array(record.position).length() <= radius + 1e-3);
            }
        }
    }
}
