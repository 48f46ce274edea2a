//! Trigger volumes that switch portals off.

use bevy_ecs::prelude::*;
use bevy_reflect::Reflect;
use tracing::debug;

use super::{OverlapKind, Portal, PortalOverlap};

/// Trigger volume that deactivates a portal when something enters it.
///
/// Used for one-way passages: place it behind the exit so the portal
/// shuts once the traveller has come through. Deactivated portals render
/// nothing and stop tracking; reactivate by setting [Portal::active]
/// back to true.
#[derive(Component, Reflect)]
pub struct PortalDeactivator {
    pub portal: Entity,
}

/// Applies [PortalDeactivator] volumes to their portals.
pub fn deactivate_portals(
    mut events: EventReader<PortalOverlap>,
    deactivators: Query<&PortalDeactivator>,
    mut portals: Query<&mut Portal>,
) {
    for event in events.read() {
        if event.kind != OverlapKind::Enter {
            continue;
        }
        let Ok(deactivator) = deactivators.get(event.volume) else {
            continue;
        };
        let Ok(mut portal) = portals.get_mut(deactivator.portal) else {
            continue;
        };
        if portal.active {
            debug!("deactivating portal {:?}", deactivator.portal);
            portal.active = false;
        }
    }
}
