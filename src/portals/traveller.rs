//! Traveller tracking, plane-crossing detection and the teleport protocol

use std::marker::PhantomData;

use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use bevy_math::{Quat, Vec3};
use bevy_reflect::Reflect;
use bevy_transform::prelude::*;
use tracing::warn;

use super::*;

/// Capability contract for anything that can be relocated through a portal
/// pair.
///
/// Implementors receive the source and destination portal transforms plus
/// the new world pose, and are expected to:
/// - release any kinematic motion controller around the transform write,
/// - reset non-uniform scale to unit scale,
/// - remap their cached velocity from the source portal's frame into the
///   destination portal's frame.
///
/// The crossing systems take care of updating the tracked sets, refreshing
/// the traveller's [GlobalTransform] and requesting a physics transform
/// sync, see [check_portal_crossings].
pub trait Teleportable: Component {
    fn teleport(&mut self, transform: &mut Transform, teleport: &Teleport);
}

/// Parameters handed to [Teleportable::teleport] when a traveller crosses
/// a portal plane.
#[derive(Clone, Debug)]
pub struct Teleport {
    /// World transform of the portal the traveller crossed.
    pub from_portal: Transform,
    /// World transform of the destination portal.
    pub to_portal: Transform,
    /// New world position: the traveller's pose mapped through the pair.
    pub position: Vec3,
    /// New world rotation.
    pub rotation: Quat,
}

/// Tracking state cached for a traveller while a portal overlaps it.
#[derive(Component, Default, Reflect)]
pub struct PortalTraveller {
    /// The traveller's position minus the tracking portal's position at
    /// the last crossing check.
    pub previous_offset_from_portal: Vec3,
}

/// Overlap event delivered by the host collision system when a collider
/// enters or leaves a portal's (or [PortalDeactivator]'s) trigger volume.
///
/// Colliders without a [PortalTraveller] are silently ignored.
#[derive(Event, Clone, Copy, Debug)]
pub struct PortalOverlap {
    /// The entity owning the trigger volume.
    pub volume: Entity,
    /// The other collider's owning entity.
    pub collider: Entity,
    pub kind: OverlapKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapKind {
    Enter,
    Exit,
}

/// Emitted once per executed teleport, after the traveller has been moved
/// and re-registered with the destination portal.
#[derive(Event, Clone, Copy, Debug)]
pub struct TravellerTeleported {
    pub traveller: Entity,
    pub from_portal: Entity,
    pub to_portal: Entity,
}

/// Request for the host physics to synchronize its internal state with a
/// transform that was just written outside of its own stepping.
#[derive(Event, Clone, Copy, Debug)]
pub struct TransformSyncRequest {
    pub entity: Entity,
}

/// [Plugin] registering crossing detection for one [Teleportable] type.
///
/// Add one instance per concrete traveller type next to [PortalsPlugin].
pub struct PortalTravellerPlugin<T: Teleportable>(PhantomData<T>);

impl<T: Teleportable> Default for PortalTravellerPlugin<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Teleportable> Plugin for PortalTravellerPlugin<T> {
    fn build(&self, app: &mut App) {
        app.add_systems(
            PostUpdate,
            check_portal_crossings::<T>.in_set(PortalSystems::Crossing),
        );
    }
}

/// Applies [PortalOverlap] events to the portals' tracked sets.
///
/// Tracking begins at most once per (portal, traveller) pair: re-entering
/// without an intervening exit is a no-op and keeps the first recorded
/// offset.
pub fn track_overlapping_travellers(
    mut events: EventReader<PortalOverlap>,
    mut portals: Query<(&mut Portal, &GlobalTransform)>,
    mut travellers: Query<(&mut PortalTraveller, &GlobalTransform), Without<Portal>>,
    mut sync_requests: EventWriter<TransformSyncRequest>,
) {
    for event in events.read() {
        let Ok((mut portal, portal_transform)) = portals.get_mut(event.volume) else {
            continue;
        };
        let Ok((mut traveller, traveller_transform)) = travellers.get_mut(event.collider)
        else {
            // Not a traveller, nothing to do.
            continue;
        };
        match event.kind {
            OverlapKind::Enter => {
                if !portal.active {
                    continue;
                }
                if begin_tracking(
                    &mut portal,
                    event.collider,
                    &mut traveller,
                    traveller_transform.translation(),
                    portal_transform.translation(),
                ) {
                    sync_requests.send(TransformSyncRequest {
                        entity: event.collider,
                    });
                }
            }
            OverlapKind::Exit => {
                portal.tracked_travellers.retain(|&e| e != event.collider);
            }
        }
    }
}

/// Registers a traveller with a portal. Returns false when it was already
/// tracked.
fn begin_tracking(
    portal: &mut Portal,
    entity: Entity,
    traveller: &mut PortalTraveller,
    traveller_position: Vec3,
    portal_position: Vec3,
) -> bool {
    if portal.tracked_travellers.contains(&entity) {
        return false;
    }
    traveller.previous_offset_from_portal = traveller_position - portal_position;
    portal.tracked_travellers.push(entity);
    true
}

/// Drops tracked travellers that despawned or lost their capability.
pub fn prune_tracked_travellers(
    mut portals: Query<&mut Portal>,
    travellers: Query<(), With<PortalTraveller>>,
) {
    for mut portal in &mut portals {
        if portal
            .tracked_travellers
            .iter()
            .all(|&e| travellers.contains(e))
        {
            continue;
        }
        portal.tracked_travellers.retain(|&e| travellers.contains(e));
    }
}

/// Teleports tracked travellers of type `T` that crossed their portal's
/// plane since the last check.
///
/// Runs once per late update, after transform propagation, so the sides
/// are computed from this frame's world transforms. A teleported traveller
/// is registered with the linked portal right away instead of waiting for
/// the destination's own overlap events, which may only fire on a later
/// physics tick.
pub fn check_portal_crossings<T: Teleportable>(
    pause: Res<PauseState>,
    mut portals: Query<(Entity, &mut Portal, &GlobalTransform), Without<PortalTraveller>>,
    mut travellers: Query<
        (
            &mut Transform,
            &mut GlobalTransform,
            &mut PortalTraveller,
            &mut T,
        ),
        Without<Portal>,
    >,
    mut teleports: EventWriter<TravellerTeleported>,
    mut sync_requests: EventWriter<TransformSyncRequest>,
) {
    if pause.paused {
        return;
    }

    let portal_entities: Vec<Entity> = portals.iter().map(|(entity, ..)| entity).collect();
    for portal_entity in portal_entities {
        let Ok((_, portal, portal_transform)) = portals.get(portal_entity) else {
            continue;
        };
        if !portal.active {
            continue;
        }
        let Some(linked_entity) = portal.linked else {
            continue;
        };
        if portal.tracked_travellers.is_empty() {
            continue;
        }
        // Snapshot so that removals stay index-stable and travellers
        // teleported into this portal by an earlier pair this frame are
        // not re-visited.
        let tracked = portal.tracked_travellers.clone();
        let portal_local = portal_transform.compute_transform();

        let Ok((_, _, linked_transform)) = portals.get(linked_entity) else {
            warn!("portal {portal_entity:?} is linked to {linked_entity:?} which is not a portal");
            continue;
        };
        let linked_local = linked_transform.compute_transform();
        let world_from_portal_local =
            linked_local.compute_affine() * portal_local.compute_affine().inverse();
        let forward = *portal_local.forward();
        let portal_position = portal_local.translation;

        for traveller_entity in tracked {
            let Ok((mut transform, mut global, mut state, mut traveller)) =
                travellers.get_mut(traveller_entity)
            else {
                // Another traveller type's crossing system handles it.
                continue;
            };

            let offset = global.translation() - portal_position;
            let side = plane_side(offset, forward);
            let previous_side = plane_side(state.previous_offset_from_portal, forward);
            if side == previous_side {
                state.previous_offset_from_portal = offset;
                continue;
            }

            // The traveller crossed the portal plane since the last check.
            let m = world_from_portal_local * global.affine();
            let (_, rotation, position) = m.to_scale_rotation_translation();
            let teleport = Teleport {
                from_portal: portal_local,
                to_portal: linked_local,
                position,
                rotation,
            };
            traveller.teleport(&mut transform, &teleport);
            // Refresh manually so later systems this frame see the new
            // pose instead of a one-frame-stale propagation.
            *global = GlobalTransform::from(*transform);

            // Register with the destination before its own overlap events
            // fire; re-registering an already-tracked traveller is a no-op.
            state.previous_offset_from_portal = global.translation() - linked_local.translation;
            if let Ok((_, mut linked_portal, _)) = portals.get_mut(linked_entity) {
                if !linked_portal.tracked_travellers.contains(&traveller_entity) {
                    linked_portal.tracked_travellers.push(traveller_entity);
                }
            }
            if let Ok((_, mut this_portal, _)) = portals.get_mut(portal_entity) {
                this_portal
                    .tracked_travellers
                    .retain(|&e| e != traveller_entity);
            }

            teleports.send(TravellerTeleported {
                traveller: traveller_entity,
                from_portal: portal_entity,
                to_portal: linked_entity,
            });
            sync_requests.send(TransformSyncRequest {
                entity: traveller_entity,
            });
        }
    }
}

/// Which side of the plane through the origin with the given normal the
/// offset lies on. A point exactly on the plane counts as neither side.
fn plane_side(offset: Vec3, normal: Vec3) -> i8 {
    let distance = offset.dot(normal);
    if distance > 0.0 {
        1
    } else if distance < 0.0 {
        -1
    } else {
        0
    }
}

/// Reference traveller implementing the full teleport side-effect
/// contract: motor release around the transform write, unit-scale reset
/// and velocity remap into the destination portal's frame.
#[derive(Component, Reflect)]
#[require(PortalTraveller)]
pub struct KinematicTraveller {
    /// World-space velocity, remapped on teleport.
    pub velocity: Vec3,
    /// Host motion-controller toggle; released around the transform write
    /// so the controller cannot fold the jump into its internal velocity.
    pub motor_enabled: bool,
}

impl Default for KinematicTraveller {
    fn default() -> Self {
        Self {
            velocity: Vec3::ZERO,
            motor_enabled: true,
        }
    }
}

impl Teleportable for KinematicTraveller {
    fn teleport(&mut self, transform: &mut Transform, teleport: &Teleport) {
        self.motor_enabled = false;
        transform.translation = teleport.position;
        transform.rotation = teleport.rotation;
        transform.scale = Vec3::ONE;
        self.velocity =
            teleport.to_portal.rotation * (teleport.from_portal.rotation.inverse() * self.velocity);
        self.motor_enabled = true;
    }
}
