//! Conservative screen-space visibility tests.
//!
//! Two culls keep recursive portal rendering affordable: a frustum test
//! skips portals the observing camera cannot see at all, and a
//! screen-rectangle overlap test stops the recursion as soon as the
//! destination portal's screen no longer shows through the source
//! portal's screen. Both err on the side of rendering.

use bevy_math::{bounding::Aabb3d, Mat4, Vec3, Vec4Swizzles};

/// The eight corners of an axis-aligned box.
pub fn corners(bounds: &Aabb3d) -> [Vec3; 8] {
    let min: Vec3 = bounds.min.into();
    let max: Vec3 = bounds.max.into();
    [
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(min.x, max.y, max.z),
        Vec3::new(max.x, max.y, max.z),
    ]
}

/// World-space bounds of a local-space box under an affine transform.
pub fn transformed_bounds(local: &Aabb3d, world_from_local: &Mat4) -> Aabb3d {
    let mut min = Vec3::INFINITY;
    let mut max = Vec3::NEG_INFINITY;
    for corner in corners(local) {
        let world = world_from_local.transform_point3(corner);
        min = min.min(world);
        max = max.max(world);
    }
    Aabb3d {
        min: min.into(),
        max: max.into(),
    }
}

/// Frustum test against the planes extracted from a view-projection
/// matrix. Conservative: a box straddling a frustum edge passes.
pub fn visible_from_camera(bounds: &Aabb3d, clip_from_world: &Mat4) -> bool {
    let min: Vec3 = bounds.min.into();
    let max: Vec3 = bounds.max.into();
    for plane in frustum_planes(clip_from_world) {
        // Corner furthest along the plane normal.
        let p_vertex = Vec3::new(
            if plane.x >= 0.0 { max.x } else { min.x },
            if plane.y >= 0.0 { max.y } else { min.y },
            if plane.z >= 0.0 { max.z } else { min.z },
        );
        if plane.xyz().dot(p_vertex) + plane.w < 0.0 {
            return false;
        }
    }
    true
}

/// The six frustum planes of a view-projection matrix, as (normal, d)
/// with the normals pointing inward.
fn frustum_planes(clip_from_world: &Mat4) -> [bevy_math::Vec4; 6] {
    let m = clip_from_world.transpose();
    let [row0, row1, row2, row3] = [m.x_axis, m.y_axis, m.z_axis, m.w_axis];
    [
        row3 + row0,
        row3 - row0,
        row3 + row1,
        row3 - row1,
        row3 + row2,
        row3 - row2,
    ]
}

/// Screen-space rectangle plus depth range covered by a projected box.
///
/// `min`/`max` x and y are NDC coordinates, z is the view depth (the
/// clip-space w component).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenExtents {
    pub min: Vec3,
    pub max: Vec3,
}

/// Projects world-space bounds onto the screen of a camera.
///
/// A corner behind the camera has no meaningful projection, so the
/// rectangle conservatively grows to the whole screen and the depth
/// range to everything in front of the camera.
pub fn screen_extents(bounds: &Aabb3d, clip_from_world: &Mat4) -> ScreenExtents {
    let mut min = Vec3::INFINITY;
    let mut max = Vec3::NEG_INFINITY;
    for corner in corners(bounds) {
        let clip = *clip_from_world * corner.extend(1.0);
        if clip.w <= 0.0 {
            min = min.min(Vec3::new(-1.0, -1.0, 0.0));
            max = max.max(Vec3::new(1.0, 1.0, f32::INFINITY));
            continue;
        }
        let ndc = clip.xyz() / clip.w;
        min = min.min(Vec3::new(ndc.x, ndc.y, clip.w));
        max = max.max(Vec3::new(ndc.x, ndc.y, clip.w));
    }
    ScreenExtents { min, max }
}

/// Whether `far_bounds` can show through `near_bounds` on the screen of
/// the camera described by `clip_from_world`.
///
/// True when the projected rectangles intersect and some part of the far
/// bounds lies at greater depth than the nearest part of the near bounds.
pub fn bounds_overlap(near_bounds: &Aabb3d, far_bounds: &Aabb3d, clip_from_world: &Mat4) -> bool {
    let near = screen_extents(near_bounds, clip_from_world);
    let far = screen_extents(far_bounds, clip_from_world);
    if far.max.z <= near.min.z {
        return false;
    }
    far.min.x < near.max.x
        && far.max.x > near.min.x
        && far.min.y < near.max.y
        && far.max.y > near.min.y
}
