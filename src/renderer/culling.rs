//! Frustum culling: CPU reference for the GPU visibility kernel.
//!
//! ## Algorithm
//!
//! The six frustum planes are extracted from the combined `view_proj` matrix
//! (Gribb-Hartmann row combination) and normalised. An AABB is culled when
//! its *positive vertex* (the corner farthest along a plane normal) lies
//! behind any plane by more than [`CULL_EPSILON`]. Boxes containing the
//! camera are always visible.
//!
//! `transform_cull.wgsl` performs exactly the same arithmetic. The two paths
//! agree on every object except those within floating-point noise of a
//! plane, which is what the epsilon absorbs.

use glam::{Mat4, Vec3, Vec4};

use crate::scene::ObjectRecord;

/// Slack applied to the plane test on both CPU and GPU
pub const CULL_EPSILON: f32 = 1e-5;

// ── AABB ─────────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Side-length 1 cube centred on the origin (fits the built-in cube mesh)
    #[inline]
    pub fn unit_cube() -> Self {
        Self {
            min: Vec3::splat(-0.5),
            max: Vec3::splat(0.5),
        }
    }

    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Transforms the box by `transform` using centre + absolute half-extents
    /// (Arvo 1990); exact for any affine transform's bounding box.
    pub fn transform(&self, transform: &Mat4) -> Self {
        let centre = (self.min + self.max) * 0.5;
        let half = (self.max - self.min) * 0.5;

        let new_centre = transform.transform_point3(centre);
        let new_half = transform.x_axis.truncate().abs() * half.x
            + transform.y_axis.truncate().abs() * half.y
            + transform.z_axis.truncate().abs() * half.z;

        Self {
            min: new_centre - new_half,
            max: new_centre + new_half,
        }
    }
}

// ── Frustum ───────────────────────────────────────────────────────────────────

/// Six world-space planes, `dot(n, p) + d >= 0` inside.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Planes in order left, right, bottom, top, near, far. Near is the bare
    /// third row because wgpu clip depth is `[0, 1]`.
    pub fn from_view_proj(vp: &Mat4) -> Self {
        let r0 = vp.row(0);
        let r1 = vp.row(1);
        let r2 = vp.row(2);
        let r3 = vp.row(3);

        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 1e-6 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// A frustum that accepts everything; used when culling is switched off.
    pub fn accept_all() -> Self {
        Self {
            planes: [Vec4::W; 6],
        }
    }

    /// Inverse of [`Frustum::to_gpu_planes`]
    pub fn from_gpu_planes(planes: &[[f32; 4]; 6]) -> Self {
        Self {
            planes: planes.map(Vec4::from_array),
        }
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    pub fn to_gpu_planes(&self) -> [[f32; 4]; 6] {
        self.planes.map(|p| p.to_array())
    }

    /// Conservative test: `false` only if the box is entirely outside.
    #[inline]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let positive = Vec3::new(
                if plane.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );

            if plane.truncate().dot(positive) + plane.w < -CULL_EPSILON {
                return false;
            }
        }
        true
    }
}

/// Visibility of one world-space box, including the camera-inside rule.
#[inline]
pub fn aabb_visible(bounds: &Aabb, frustum: &Frustum, camera_position: Vec3) -> bool {
    bounds.contains_point(camera_position) || frustum.intersects_aabb(bounds)
}

/// Visibility of a single object record in world space
pub fn object_visible(record: &ObjectRecord, frustum: &Frustum, camera_position: Vec3) -> bool {
    aabb_visible(&record.world_bounds(), frustum, camera_position)
}

/// CPU reference for the visibility flag buffer: one 0/1 word per record.
pub fn reference_visibility(
    records: &[ObjectRecord],
    frustum: &Frustum,
    camera_position: Vec3,
) -> Vec<u32> {
    records
        .iter()
        .map(|record| object_visible(record, frustum, camera_position) as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraSource};

    fn frustum_looking_down_neg_z() -> (Frustum, Vec3) {
        let camera = Camera::looking_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), 800, 600)
            .with_depth_range(0.1, 100.0);
        (Frustum::from_view_proj(&camera.view_projection()), camera.position)
    }

    #[test]
    fn test_planes_are_normalised() {
        let (frustum, _) = frustum_looking_down_neg_z();
        for plane in frustum.planes() {
            assert!((plane.truncate().length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_box_in_front_is_visible() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        assert!(aabb_visible(&aabb, &frustum, eye));
    }

    #[test]
    fn test_box_behind_camera_is_culled() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(1.0, 1.0, 11.0));
        assert!(!aabb_visible(&aabb, &frustum, eye));
    }

    #[test]
    fn test_box_beyond_far_plane_is_culled() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -210.0), Vec3::new(1.0, 1.0, -200.0));
        assert!(!aabb_visible(&aabb, &frustum, eye));
    }

    #[test]
    fn test_box_straddling_side_plane_is_visible() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        // Half-width of the view at z = -10 is ~7.7 for a 60 degree fovy at 4:3
        let aabb = Aabb::new(Vec3::new(7.0, -0.5, -10.5), Vec3::new(30.0, 0.5, -9.5));
        assert!(aabb_visible(&aabb, &frustum, eye));
    }

    #[test]
    fn test_degenerate_box_is_tested_like_a_point() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        let inside = Aabb::new(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, -5.0));
        let outside = Aabb::new(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 5.0));
        assert!(aabb_visible(&inside, &frustum, eye));
        assert!(!aabb_visible(&outside, &frustum, eye));
    }

    #[test]
    fn test_box_containing_camera_is_visible() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        // Smaller than the near distance: fails the plane test on its own
        let tiny = Aabb::new(Vec3::splat(-0.01), Vec3::splat(0.01));
        assert!(!frustum.intersects_aabb(&tiny));
        assert!(aabb_visible(&tiny, &frustum, eye));
    }

    #[test]
    fn test_accept_all_frustum() {
        let frustum = Frustum::accept_all();
        let far_away = Aabb::new(Vec3::splat(1.0e6), Vec3::splat(1.0e6 + 1.0));
        assert!(frustum.intersects_aabb(&far_away));
    }

    #[test]
    fn test_transform_matches_corner_bounds() {
        let transform = Mat4::from_translation(Vec3::new(3.0, -2.0, 1.0))
            * Mat4::from_rotation_y(0.7)
            * Mat4::from_rotation_x(-0.3)
            * Mat4::from_scale(Vec3::new(2.0, 0.5, 1.5));
        let aabb = Aabb::new(Vec3::new(-1.0, -2.0, -0.5), Vec3::new(0.5, 1.0, 2.0));
        let fast = aabb.transform(&transform);

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { aabb.min.x } else { aabb.max.x },
                if i & 2 == 0 { aabb.min.y } else { aabb.max.y },
                if i & 4 == 0 { aabb.min.z } else { aabb.max.z },
            );
            let p = transform.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        assert!((fast.min - min).length() < 1e-4);
        assert!((fast.max - max).length() < 1e-4);
    }

    #[test]
    fn test_reference_visibility_flags() {
        let (frustum, eye) = frustum_looking_down_neg_z();
        let records = vec![
            ObjectRecord::new(0, Vec3::new(0.0, 0.0, -10.0), Aabb::unit_cube()),
            ObjectRecord::new(1, Vec3::new(0.0, 0.0, 10.0), Aabb::unit_cube()),
        ];
        assert_eq!(reference_visibility(&records, &frustum, eye), vec![1, 0]);
    }
}
