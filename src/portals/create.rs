//! Components, systems and commands for the creation and linking of portals

use std::collections::HashMap;

use bevy_ecs::{prelude::*, world::Command};
use bevy_math::{bounding::Aabb3d, Quat, UVec2, Vec3};
use bevy_reflect::Reflect;
use bevy_transform::prelude::*;
use tracing::{debug, warn};

use super::*;

/// Half depth given to the screen quad's local bounds.
pub(super) const SCREEN_HALF_DEPTH: f32 = 0.05;

/// A placed portal: a planar screen surface plus the state needed to render
/// the view seen from its linked counterpart and to teleport travellers
/// crossing its plane.
///
/// Will replace [CreatePortal] after [create_portals]. The portal plane
/// passes through the entity's translation and faces the transform's
/// forward direction.
#[derive(Component, Reflect)]
#[require(Transform)]
pub struct Portal {
    /// The paired portal this portal renders from and teleports to.
    ///
    /// Links are mutual: if A is linked to B then B is linked to A.
    /// An unlinked portal is inert.
    pub linked: Option<Entity>,
    /// Entity carrying this portal's [PortalScreen].
    pub screen: Entity,
    /// Upper bound on nested view-through-a-portal render levels; at least 1.
    pub recursion_limit: usize,
    /// Bias added to the oblique near-clip distance.
    pub near_clip_offset: f32,
    /// Distance to the portal plane below which the oblique clip is skipped.
    pub near_clip_limit: f32,
    /// Inactive portals render nothing and track no travellers.
    pub active: bool,
    pub(super) view_texture: Option<ViewTexture>,
    pub(super) tracked_travellers: Vec<Entity>,
    pub(super) render_positions: Vec<Vec3>,
    pub(super) render_rotations: Vec<Quat>,
}

impl Portal {
    /// A freshly created portal: unlinked, active, default clip settings.
    pub fn new(screen: Entity) -> Self {
        Self {
            linked: None,
            screen,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            near_clip_offset: DEFAULT_NEAR_CLIP_OFFSET,
            near_clip_limit: DEFAULT_NEAR_CLIP_LIMIT,
            active: true,
            view_texture: None,
            tracked_travellers: Vec::new(),
            render_positions: Vec::new(),
            render_rotations: Vec::new(),
        }
    }

    /// Travellers currently overlapping this portal, in insertion order.
    pub fn tracked_travellers(&self) -> &[Entity] {
        &self.tracked_travellers
    }

    pub fn is_tracking(&self, traveller: Entity) -> bool {
        self.tracked_travellers.contains(&traveller)
    }

    /// View texture of the last render, if any.
    pub fn view_texture(&self) -> Option<ViewTexture> {
        self.view_texture
    }
}

/// Render target owned by a portal, recreated when the output resolution
/// changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Reflect)]
pub struct ViewTexture {
    pub id: TextureId,
    pub size: UVec2,
}

/// Surface that displays a portal's rendered view.
///
/// Lives on its own entity so render passes can thicken and offset the
/// quad without touching the portal's transform.
#[derive(Component, Clone)]
#[require(Transform)]
pub struct PortalScreen {
    /// Material exposing the display-mask and main-texture properties.
    pub material: MaterialId,
    /// Renderer surface used for the shadow-casting toggle.
    pub surface: SurfaceId,
    /// Bounds of the screen mesh in its local space.
    pub local_bounds: Aabb3d,
}

/// System that finds entities with [CreatePortal] and creates a portal.
///
/// It spawns the screen entity on the portal plane, inserts a [Portal],
/// links it to [CreatePortal::linked_to] and removes the [CreatePortal]
/// component.
pub fn create_portals(
    mut commands: Commands,
    portals_to_create: Query<(Entity, &CreatePortal, &Transform)>,
    mut existing: Query<&mut Portal>,
) {
    for (portal_entity, create, transform) in &portals_to_create {
        let local_bounds = Aabb3d::new(
            Vec3::ZERO,
            create.screen.half_extents.extend(SCREEN_HALF_DEPTH),
        );
        let screen_entity = commands
            .spawn((
                PortalScreen {
                    material: create.screen.material,
                    surface: create.screen.surface,
                    local_bounds,
                },
                *transform,
                GlobalTransform::from(*transform),
            ))
            .id();

        let mut portal = Portal::new(screen_entity);
        portal.recursion_limit = create.recursion_limit.max(1);
        portal.near_clip_offset = create.near_clip_offset;
        portal.near_clip_limit = create.near_clip_limit;
        portal.linked = create.linked_to;

        if let Some(target) = create.linked_to {
            if let Ok(mut other) = existing.get_mut(target) {
                other.linked = Some(portal_entity);
            } else if !portals_to_create.contains(target) {
                // A target created in this same pass is linked back by
                // sync_portal_links right after the commands apply.
                warn!(
                    "portal {portal_entity:?} wants to link to {target:?} which is not a portal"
                );
            }
        }

        commands
            .entity(portal_entity)
            .insert(portal)
            .remove::<CreatePortal>();
    }
}

/// Command to link two existing portals, making the link mutual.
pub struct LinkPortals {
    pub a: Entity,
    pub b: Entity,
}

impl Command for LinkPortals {
    fn apply(self, world: &mut World) {
        let Some(mut portal) = world.get_mut::<Portal>(self.a) else {
            warn!("cannot link {:?}: not a portal", self.a);
            return;
        };
        portal.linked = Some(self.b);
        let Some(mut portal) = world.get_mut::<Portal>(self.b) else {
            warn!("cannot link {:?}: not a portal", self.b);
            return;
        };
        portal.linked = Some(self.a);
    }
}

/// Command to unlink a portal from its pair; clears both sides.
pub struct UnlinkPortals {
    pub portal: Entity,
}

impl Command for UnlinkPortals {
    fn apply(self, world: &mut World) {
        let Some(mut portal) = world.get_mut::<Portal>(self.portal) else {
            return;
        };
        let Some(other) = portal.linked.take() else {
            return;
        };
        if let Some(mut other_portal) = world.get_mut::<Portal>(other) {
            if other_portal.linked == Some(self.portal) {
                other_portal.linked = None;
            }
        }
    }
}

/// Keeps [Portal::linked] references mutual after direct edits.
///
/// One-sided links are mirrored the way the commands do it (the most
/// recent edit wins), then back-references that no longer hold both ways
/// are cleared, so that A is linked to B exactly when B is linked to A.
pub fn sync_portal_links(
    mut portals: ParamSet<(
        Query<(Entity, &Portal), Changed<Portal>>,
        Query<(Entity, &mut Portal)>,
    )>,
) {
    let changed: Vec<(Entity, Option<Entity>)> =
        portals.p0().iter().map(|(e, p)| (e, p.linked)).collect();
    if changed.is_empty() {
        return;
    }

    for &(entity, linked) in &changed {
        let Some(target) = linked else { continue };
        let mut all = portals.p1();
        let Ok((_, mut other)) = all.get_mut(target) else {
            // Dangling references are cleared by the sweep below.
            continue;
        };
        if other.linked != Some(entity) {
            debug!("mirroring portal link {entity:?} <-> {target:?}");
            other.linked = Some(entity);
        }
    }

    let links: HashMap<Entity, Option<Entity>> = portals
        .p1()
        .iter()
        .map(|(entity, portal)| (entity, portal.linked))
        .collect();
    let stale: Vec<Entity> = links
        .iter()
        .filter_map(|(&entity, &linked)| {
            let target = linked?;
            let mutual =
                target != entity && links.get(&target).copied().flatten() == Some(entity);
            (!mutual).then_some(entity)
        })
        .collect();
    let mut all = portals.p1();
    for entity in stale {
        if let Ok((_, mut portal)) = all.get_mut(entity) {
            debug!("clearing stale portal link on {entity:?}");
            portal.linked = None;
        }
    }
}
