//! Recursive rendering of portal views.
//!
//! A portal's view is what an observer standing behind its pair would
//! see, so the observing camera is mapped through the pair once per
//! recursion level and the resulting poses are rendered deepest first,
//! each level showing the previous one on the paired screen. The final
//! texture lands on the paired portal's screen material.

use bevy_ecs::prelude::*;
use bevy_math::{Mat4, Quat, Vec3};
use bevy_transform::prelude::*;
use tracing::{debug, warn};

use super::projection::{portal_clip_projection, PerspectiveProjection};
use super::visibility::{bounds_overlap, transformed_bounds, visible_from_camera};
use super::*;

/// The observing camera a portal view is rendered for.
#[derive(Clone, Debug)]
pub struct ViewCamera {
    pub transform: Transform,
    pub projection: PerspectiveProjection,
}

impl ViewCamera {
    pub fn clip_from_world(&self) -> Mat4 {
        self.projection.clip_from_view() * self.transform.compute_matrix().inverse()
    }
}

/// Renders one portal's view texture for the given observer.
///
/// Normally called through [RenderDispatcher](super::RenderDispatcher)
/// once per portal at the start of the observer's own render. Inactive
/// and unlinked portals are skipped, as are portals whose paired screen
/// is outside the observer's frustum.
pub fn render_portal(world: &mut World, portal_entity: Entity, view: &ViewCamera) {
    // Snapshot everything the passes need before touching the backend.
    let Some(portal) = world.get::<Portal>(portal_entity) else {
        warn!("cannot render {portal_entity:?}: not a portal");
        return;
    };
    if !portal.active {
        return;
    }
    let Some(linked_entity) = portal.linked else {
        debug!("skipping unlinked portal {portal_entity:?}");
        return;
    };
    let screen_entity = portal.screen;
    let recursion_limit = portal.recursion_limit.max(1);
    let near_clip_offset = portal.near_clip_offset;
    let near_clip_limit = portal.near_clip_limit;
    let view_texture = portal.view_texture;

    let Some(linked) = world.get::<Portal>(linked_entity) else {
        warn!("portal {portal_entity:?} is linked to {linked_entity:?} which is not a portal");
        return;
    };
    let linked_screen_entity = linked.screen;

    let (Some(portal_transform), Some(linked_transform)) = (
        world.get::<GlobalTransform>(portal_entity).copied(),
        world.get::<GlobalTransform>(linked_entity).copied(),
    ) else {
        return;
    };
    let (Some(screen), Some(linked_screen)) = (
        world.get::<PortalScreen>(screen_entity).cloned(),
        world.get::<PortalScreen>(linked_screen_entity).cloned(),
    ) else {
        warn!("portal pair {portal_entity:?} <-> {linked_entity:?} is missing a screen");
        return;
    };
    let (Some(screen_transform), Some(linked_screen_transform)) = (
        world.get::<GlobalTransform>(screen_entity).copied(),
        world.get::<GlobalTransform>(linked_screen_entity).copied(),
    ) else {
        return;
    };

    let portal_local = portal_transform.compute_transform();
    let linked_local = linked_transform.compute_transform();
    let portal_position = portal_local.translation;
    let portal_forward = *portal_local.forward();
    let screen_scale = screen_transform.compute_transform().scale;
    let linked_screen_scale = linked_screen_transform.compute_transform().scale;

    // Screen entities only re-sync to their portal while that portal
    // renders, so anchor the bounds to the portals' current poses
    // instead of the possibly stale screen transforms.
    let screen_bounds = transformed_bounds(
        &screen.local_bounds,
        &Mat4::from_scale_rotation_translation(
            screen_scale,
            portal_local.rotation,
            portal_local.translation,
        ),
    );
    let linked_screen_bounds = transformed_bounds(
        &linked_screen.local_bounds,
        &Mat4::from_scale_rotation_translation(
            linked_screen_scale,
            linked_local.rotation,
            linked_local.translation,
        ),
    );

    // The observer has to be looking at the paired screen for this view
    // to show up anywhere.
    if !visible_from_camera(&linked_screen_bounds, &view.clip_from_world()) {
        return;
    }

    if !world.contains_resource::<PortalRenderBackend>() {
        warn!("cannot render {portal_entity:?}: no render backend resource");
        return;
    }
    // Maps a pose seen through the paired portal onto this portal's side.
    let world_from_linked_local =
        portal_transform.compute_matrix() * linked_transform.compute_matrix().inverse();

    let mut positions = vec![Vec3::ZERO; recursion_limit];
    let mut rotations = vec![Quat::IDENTITY; recursion_limit];
    let mut texture = ViewTexture {
        id: TextureId(0),
        size: bevy_math::UVec2::ZERO,
    };

    world.resource_scope(|world, mut backend: Mut<PortalRenderBackend>| {
        let backend = backend.backend_mut();

        // (Re)create the view texture when the output resolution changed.
        let resolution = backend.output_resolution();
        texture = match view_texture {
            Some(existing) if existing.size == resolution => existing,
            existing => {
                if let Some(existing) = existing {
                    backend.release_texture(existing.id);
                }
                let id = backend.create_texture(resolution);
                backend.set_material_texture(linked_screen.material, id);
                ViewTexture {
                    id,
                    size: resolution,
                }
            }
        };

        // Walk the observer deeper through the pair; the deepest pose
        // lands at index 0 so the passes can run innermost first. The
        // walk stops early once the paired screen no longer shows
        // through this portal's screen from the previous pose.
        let mut pose_matrix = view.transform.compute_matrix();
        let mut start_index = 0;
        for i in 0..recursion_limit {
            if i > 0 {
                let pose_clip = view.projection.clip_from_view() * pose_matrix.inverse();
                if !bounds_overlap(&screen_bounds, &linked_screen_bounds, &pose_clip) {
                    break;
                }
            }
            pose_matrix = world_from_linked_local * pose_matrix;
            let (_, rotation, position) = pose_matrix.to_scale_rotation_translation();
            let render_order_index = recursion_limit - i - 1;
            positions[render_order_index] = position;
            rotations[render_order_index] = rotation;
            start_index = render_order_index;
        }

        // Thicken the screen quad so the observer's near plane cannot
        // slice through it while passing the surface.
        let protected = protected_screen_transform(
            &view.projection,
            &view.transform,
            &portal_local,
            screen_scale,
        );
        if let Some(mut transform) = world.get_mut::<Transform>(screen_entity) {
            *transform = protected;
        }
        if let Some(mut global) = world.get_mut::<GlobalTransform>(screen_entity) {
            *global = GlobalTransform::from(protected);
        }

        // Hide this portal's own surface and blank the paired screen for
        // the deepest level, which has nothing left to show through it.
        backend.set_surface_shadows_only(screen.surface, true);
        backend.set_material_display_mask(linked_screen.material, 0);

        for i in start_index..recursion_limit {
            let pose = Transform {
                translation: positions[i],
                rotation: rotations[i],
                scale: Vec3::ONE,
            };
            let clip_from_view = portal_clip_projection(
                &view.projection,
                &pose,
                portal_position,
                portal_forward,
                near_clip_offset,
                near_clip_limit,
            );
            backend.render(&PortalRenderPass {
                position: pose.translation,
                rotation: pose.rotation,
                clip_from_view,
                target: texture.id,
            });
            if i == start_index {
                backend.set_material_display_mask(linked_screen.material, 1);
            }
        }

        backend.set_surface_shadows_only(screen.surface, false);
        backend.set_material_texture(linked_screen.material, texture.id);
    });

    if let Some(mut portal) = world.get_mut::<Portal>(portal_entity) {
        portal.view_texture = Some(texture);
        portal.render_positions = positions;
        portal.render_rotations = rotations;
    }
}

/// World transform given to a portal screen while its view renders:
/// pushed along the portal normal away from the observer and thickened
/// to the near-plane corner distance.
pub fn protected_screen_transform(
    projection: &PerspectiveProjection,
    camera: &Transform,
    portal: &Transform,
    screen_scale: Vec3,
) -> Transform {
    let thickness = projection.near_plane_corner_distance();
    let forward = *portal.forward();
    let camera_facing = forward.dot(portal.translation - camera.translation) > 0.0;
    let offset = thickness * if camera_facing { 0.5 } else { -0.5 };
    Transform {
        translation: portal.translation + forward * offset,
        rotation: portal.rotation,
        scale: Vec3::new(screen_scale.x, screen_scale.y, thickness),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bevy_app::prelude::*;
    use bevy_math::UVec2;

    use super::*;

    #[derive(Default)]
    struct Log {
        renders: Vec<PortalRenderPass>,
        created: Vec<(TextureId, UVec2)>,
        released: Vec<TextureId>,
        mask_sets: Vec<(MaterialId, u32)>,
        shadow_sets: Vec<(SurfaceId, bool)>,
        texture_binds: Vec<(MaterialId, TextureId)>,
    }

    #[derive(Clone)]
    struct RecordingBackend {
        log: Arc<Mutex<Log>>,
        resolution: Arc<Mutex<UVec2>>,
        next_texture: Arc<Mutex<u64>>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Log::default())),
                resolution: Arc::new(Mutex::new(UVec2::new(1920, 1080))),
                next_texture: Arc::new(Mutex::new(1)),
            }
        }
    }

    impl RenderBackend for RecordingBackend {
        fn output_resolution(&self) -> UVec2 {
            *self.resolution.lock().unwrap()
        }

        fn create_texture(&mut self, size: UVec2) -> TextureId {
            let mut next = self.next_texture.lock().unwrap();
            let id = TextureId(*next);
            *next += 1;
            self.log.lock().unwrap().created.push((id, size));
            id
        }

        fn release_texture(&mut self, texture: TextureId) {
            self.log.lock().unwrap().released.push(texture);
        }

        fn set_material_texture(&mut self, material: MaterialId, texture: TextureId) {
            self.log.lock().unwrap().texture_binds.push((material, texture));
        }

        fn set_material_display_mask(&mut self, material: MaterialId, mask: u32) {
            self.log.lock().unwrap().mask_sets.push((material, mask));
        }

        fn set_surface_shadows_only(&mut self, surface: SurfaceId, shadows_only: bool) {
            self.log.lock().unwrap().shadow_sets.push((surface, shadows_only));
        }

        fn render(&mut self, pass: &PortalRenderPass) {
            self.log.lock().unwrap().renders.push(pass.clone());
        }
    }

    fn test_app(backend: &RecordingBackend) -> App {
        let mut app = App::new();
        app.add_plugins((bevy_transform::TransformPlugin, PortalsPlugin::default()));
        app.insert_resource(PortalRenderBackend::new(backend.clone()));
        app
    }

    /// A linked pair with distinct materials and surfaces.
    fn spawn_pair(
        app: &mut App,
        a_transform: Transform,
        b_transform: Transform,
        recursion_limit: usize,
    ) -> (Entity, Entity) {
        let a = app
            .world_mut()
            .spawn((
                CreatePortal {
                    recursion_limit,
                    screen: ScreenConfig {
                        material: MaterialId(1),
                        surface: SurfaceId(1),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                a_transform,
            ))
            .id();
        let b = app
            .world_mut()
            .spawn((
                CreatePortal {
                    linked_to: Some(a),
                    recursion_limit,
                    screen: ScreenConfig {
                        material: MaterialId(2),
                        surface: SurfaceId(2),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                b_transform,
            ))
            .id();
        app.update();
        (a, b)
    }

    fn view_from(transform: Transform) -> ViewCamera {
        ViewCamera {
            transform,
            projection: PerspectiveProjection::default(),
        }
    }

    #[test]
    fn looking_away_renders_nothing() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        let (a, _) = spawn_pair(&mut app, Transform::IDENTITY, Transform::IDENTITY, 5);

        // Both portals sit behind this observer.
        let view = view_from(Transform::from_xyz(0.0, 0.0, 5.0).looking_to(Vec3::Z, Vec3::Y));
        render_portal(app.world_mut(), a, &view);

        let log = backend.log.lock().unwrap();
        assert!(log.created.is_empty());
        assert!(log.renders.is_empty());
        drop(log);
        assert!(app.world().get::<Portal>(a).unwrap().view_texture().is_none());
    }

    #[test]
    fn co_located_portals_render_to_the_recursion_limit() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        let (a, _) = spawn_pair(&mut app, Transform::IDENTITY, Transform::IDENTITY, 3);

        let camera = Transform::from_xyz(0.0, 0.0, 5.0);
        render_portal(app.world_mut(), a, &view_from(camera));

        let log = backend.log.lock().unwrap();
        assert_eq!(log.renders.len(), 3);
        // Identity pair step: every level sees the observer's own pose.
        for pass in &log.renders {
            assert!((pass.position - camera.translation).length() < 1e-5);
        }
        // The paired screen is blanked for the deepest level only.
        assert_eq!(log.mask_sets, vec![(MaterialId(2), 0), (MaterialId(2), 1)]);
        // This portal's own surface casts shadows only while rendering.
        assert_eq!(log.shadow_sets, vec![(SurfaceId(1), true), (SurfaceId(1), false)]);
        // Bound once on creation and re-bound after the passes.
        let texture = log.created[0].0;
        assert_eq!(
            log.texture_binds,
            vec![(MaterialId(2), texture), (MaterialId(2), texture)]
        );
    }

    #[test]
    fn recursion_stops_once_the_pair_leaves_the_frame() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        // The pair sits to the side: visible from the observer, but not
        // through the first portal's own screen.
        let (a, _) = spawn_pair(
            &mut app,
            Transform::IDENTITY,
            Transform::from_xyz(5.0, 0.0, 0.0),
            5,
        );

        let camera = Transform::from_xyz(0.0, 0.0, 5.0);
        render_portal(app.world_mut(), a, &view_from(camera));

        assert_eq!(backend.log.lock().unwrap().renders.len(), 1);
    }

    #[test]
    fn zero_recursion_limit_still_renders_and_restores_the_mask() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        let (a, _) = spawn_pair(&mut app, Transform::IDENTITY, Transform::IDENTITY, 1);
        // Bypasses the clamp applied at creation.
        app.world_mut().get_mut::<Portal>(a).unwrap().recursion_limit = 0;

        render_portal(
            app.world_mut(),
            a,
            &view_from(Transform::from_xyz(0.0, 0.0, 5.0)),
        );

        let log = backend.log.lock().unwrap();
        assert_eq!(log.renders.len(), 1);
        // The paired screen must not stay blanked.
        assert_eq!(log.mask_sets, vec![(MaterialId(2), 0), (MaterialId(2), 1)]);
    }

    #[test]
    fn moving_a_culled_portal_does_not_leave_its_screen_behind() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        // The pair starts far below the observer's frustum, so its screen
        // entity is spawned there and never re-synced by a render.
        let (a, b) = spawn_pair(
            &mut app,
            Transform::IDENTITY,
            Transform::from_xyz(0.0, -50.0, 0.0),
            1,
        );
        let view = view_from(Transform::from_xyz(0.0, 0.0, 5.0));
        render_portal(app.world_mut(), a, &view);
        assert!(backend.log.lock().unwrap().renders.is_empty());

        // Move the paired portal into view without rendering it.
        app.world_mut().get_mut::<Transform>(b).unwrap().translation = Vec3::new(2.0, 0.0, 0.0);
        app.update();

        render_portal(app.world_mut(), a, &view);
        assert!(!backend.log.lock().unwrap().renders.is_empty());
    }

    #[test]
    fn resolution_change_recreates_the_view_texture() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        let (a, _) = spawn_pair(&mut app, Transform::IDENTITY, Transform::IDENTITY, 1);

        let view = view_from(Transform::from_xyz(0.0, 0.0, 5.0));
        render_portal(app.world_mut(), a, &view);
        *backend.resolution.lock().unwrap() = UVec2::new(1280, 720);
        render_portal(app.world_mut(), a, &view);

        let log = backend.log.lock().unwrap();
        assert_eq!(log.created.len(), 2);
        assert_eq!(log.released, vec![log.created[0].0]);
        assert_eq!(log.created[1].1, UVec2::new(1280, 720));
        drop(log);

        let texture = app.world().get::<Portal>(a).unwrap().view_texture().unwrap();
        assert_eq!(texture.size, UVec2::new(1280, 720));
    }

    #[test]
    fn observer_pose_is_mapped_through_the_pair() {
        let backend = RecordingBackend::new();
        let mut app = test_app(&backend);
        let (a, _) = spawn_pair(
            &mut app,
            Transform::IDENTITY,
            Transform::from_xyz(100.0, 0.0, 0.0),
            1,
        );

        let camera =
            Transform::from_xyz(0.0, 0.0, 5.0).looking_at(Vec3::new(100.0, 0.0, 0.0), Vec3::Y);
        render_portal(app.world_mut(), a, &view_from(camera));

        let log = backend.log.lock().unwrap();
        assert_eq!(log.renders.len(), 1);
        let pass = &log.renders[0];
        // Identity rotations on both portals: the pose is the observer
        // shifted by the pair's offset.
        assert!((pass.position - Vec3::new(-100.0, 0.0, 5.0)).length() < 1e-3);
        assert!(pass.rotation.dot(camera.rotation).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn screen_is_thickened_and_pushed_away_from_the_observer() {
        let projection = PerspectiveProjection::default();
        let portal = Transform::IDENTITY;
        let thickness = projection.near_plane_corner_distance();

        // Observer on the -Z side: the portal's forward points at it, so
        // the quad is pushed towards +Z.
        let camera = Transform::from_xyz(0.0, 0.0, -5.0);
        let protected =
            protected_screen_transform(&projection, &camera, &portal, Vec3::ONE);
        assert!((protected.translation.z - thickness * 0.5).abs() < 1e-6);
        assert_eq!(protected.scale, Vec3::new(1.0, 1.0, thickness));

        let camera = Transform::from_xyz(0.0, 0.0, 5.0);
        let protected =
            protected_screen_transform(&projection, &camera, &portal, Vec3::ONE);
        assert!((protected.translation.z + thickness * 0.5).abs() < 1e-6);
    }
}
