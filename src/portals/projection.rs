//! Perspective projection and oblique near-plane clipping.
//!
//! Portal views have to clip everything between the portal camera and the
//! portal surface, otherwise geometry sitting behind the destination
//! portal bleeds into the view. Instead of depending on the depth buffer
//! the near plane of the projection itself is bent onto the portal plane,
//! following Eric Lengyel's oblique view frustum construction.

use bevy_math::{Mat4, Vec3, Vec4};
use bevy_transform::prelude::Transform;

/// A symmetric perspective projection in OpenGL clip conventions: the
/// near plane maps to NDC z = -1 and the far plane to z = +1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveProjection {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width over height.
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveProjection {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_3,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl PerspectiveProjection {
    pub fn clip_from_view(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Distance from the camera origin to a corner of the near plane.
    ///
    /// Used to pad portal screens so the near plane can never slice
    /// through them while the camera passes the surface.
    pub fn near_plane_corner_distance(&self) -> f32 {
        let half_height = self.near * (self.fov_y * 0.5).tan();
        let half_width = half_height * self.aspect;
        Vec3::new(half_width, half_height, self.near).length()
    }
}

/// Replaces the near plane of `clip_from_view` with an arbitrary
/// view-space plane.
///
/// `clip_plane` is (normal, distance) in view space; points with
/// `dot(normal, point) + distance > 0` are kept, so for a portal the
/// normal points away from the camera towards the visible side. The far
/// plane degrades to a bounding approximation, which portal views never
/// notice.
pub fn oblique_clip_from_view(clip_from_view: Mat4, clip_plane: Vec4) -> Mat4 {
    // Corner of the frustum the plane-facing diagonal passes through,
    // mapped back into view space.
    let q = clip_from_view.inverse()
        * Vec4::new(
            clip_plane.x.signum(),
            clip_plane.y.signum(),
            1.0,
            1.0,
        );
    let c = clip_plane * (2.0 / clip_plane.dot(q));

    // Third output row becomes c - row3; rows live across the column
    // axes in column-major storage.
    let mut m = clip_from_view;
    m.x_axis.z = c.x - m.x_axis.w;
    m.y_axis.z = c.y - m.y_axis.w;
    m.z_axis.z = c.z - m.z_axis.w;
    m.w_axis.z = c.w - m.w_axis.w;
    m
}

/// Builds the projection for a portal camera, clipping at the destination
/// portal's plane.
///
/// The plane is pushed towards the camera by `near_clip_offset` to hide
/// z-fighting seams at the surface. When the camera is within
/// `near_clip_limit` of the plane the oblique projection becomes
/// ill-conditioned and the unmodified projection is returned instead; the
/// padded screen quad covers that window, see
/// [protected_screen_transform](super::render::protected_screen_transform).
pub fn portal_clip_projection(
    projection: &PerspectiveProjection,
    camera: &Transform,
    portal_position: Vec3,
    portal_forward: Vec3,
    near_clip_offset: f32,
    near_clip_limit: f32,
) -> Mat4 {
    let base = projection.clip_from_view();

    // Orient the clip normal towards the camera.
    let side = portal_forward.dot(portal_position - camera.translation);
    let sign = if side > 0.0 {
        1.0
    } else if side < 0.0 {
        -1.0
    } else {
        0.0
    };

    let view_from_world = camera.compute_matrix().inverse();
    let normal = view_from_world.transform_vector3(portal_forward * sign);
    let position = view_from_world.transform_point3(portal_position);
    let distance = -position.dot(normal) + near_clip_offset;

    if distance.abs() <= near_clip_limit {
        return base;
    }
    oblique_clip_from_view(base, normal.extend(distance))
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use bevy_math::{Quat, Vec4Swizzles};

    use super::*;

    fn project(clip_from_view: Mat4, view_point: Vec3) -> Vec3 {
        let clip = clip_from_view * view_point.extend(1.0);
        clip.xyz() / clip.w
    }

    #[test]
    fn oblique_plane_maps_to_near_ndc() {
        let projection = PerspectiveProjection::default();
        // A plane 5 units down -Z, keeping what lies beyond it.
        let plane = Vec4::new(0.0, 0.0, -1.0, -5.0);
        let clip = oblique_clip_from_view(projection.clip_from_view(), plane);

        for point in [
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::new(1.0, -0.5, -5.0),
            Vec3::new(-2.0, 1.5, -5.0),
        ] {
            let ndc = project(clip, point);
            assert!((ndc.z + 1.0).abs() < 1e-4, "ndc {ndc:?} for {point:?}");
        }
        // Points between camera and plane are clipped, points beyond stay.
        assert!(project(clip, Vec3::new(0.0, 0.0, -4.0)).z < -1.0);
        assert!(project(clip, Vec3::new(0.0, 0.0, -6.0)).z > -1.0);
    }

    #[test]
    fn camera_close_to_the_plane_keeps_the_base_projection() {
        let projection = PerspectiveProjection::default();
        let camera = Transform::from_xyz(0.0, 0.0, 0.1);
        let clip = portal_clip_projection(
            &projection,
            &camera,
            Vec3::ZERO,
            Vec3::NEG_Z,
            0.05,
            0.2,
        );
        assert_eq!(clip, projection.clip_from_view());
    }

    #[test]
    fn clip_plane_sign_follows_the_camera_side() {
        let projection = PerspectiveProjection::default();
        let portal_position = Vec3::new(0.0, 0.0, -5.0);

        // Camera on the +Z side looking down -Z; geometry between camera
        // and portal must be clipped away, geometry beyond it kept.
        let camera = Transform::IDENTITY;
        let clip = portal_clip_projection(
            &projection,
            &camera,
            portal_position,
            Vec3::NEG_Z,
            0.0,
            0.2,
        );
        let view_point = Vec3::new(0.0, 0.0, -6.0);
        assert!(project(clip, view_point).z > -1.0);
        assert!(project(clip, Vec3::new(0.0, 0.0, -4.0)).z < -1.0);

        // Same portal seen from the other side.
        let camera = Transform::from_xyz(0.0, 0.0, -10.0)
            .with_rotation(Quat::from_rotation_y(PI));
        let clip = portal_clip_projection(
            &projection,
            &camera,
            portal_position,
            Vec3::NEG_Z,
            0.0,
            0.2,
        );
        // The portal is 5 units ahead of this camera too.
        assert!(project(clip, Vec3::new(0.0, 0.0, -6.0)).z > -1.0);
        assert!(project(clip, Vec3::new(0.0, 0.0, -4.0)).z < -1.0);
    }

    #[test]
    fn near_corner_distance_for_a_square_quarter_circle_frustum() {
        let projection = PerspectiveProjection {
            fov_y: FRAC_PI_2,
            aspect: 1.0,
            near: 1.0,
            far: 100.0,
        };
        let distance = projection.near_plane_corner_distance();
        assert!((distance - 3.0f32.sqrt()).abs() < 1e-5);
    }
}
