//! Host-driven dispatch of portal renders.

use bevy_ecs::prelude::*;
use tracing::{debug, warn};

use super::{render_portal, Portal, ViewCamera};

/// Renders every known portal at the start of an observing camera's own
/// render.
///
/// The host engine owns the render loop, so it owns the dispatcher too:
/// call [attach](Self::attach) once the portals exist, then
/// [on_begin_camera_render](Self::on_begin_camera_render) from the
/// begin-camera-render hook of the pipeline, and
/// [detach](Self::detach) when tearing the scene down.
#[derive(Default)]
pub struct RenderDispatcher {
    portals: Vec<Entity>,
    attached: bool,
}

impl RenderDispatcher {
    /// Collects the portals to render for, in discovery order.
    pub fn attach(&mut self, world: &mut World) {
        self.portals = world
            .query_filtered::<Entity, With<Portal>>()
            .iter(world)
            .collect();
        self.attached = true;
        debug!("render dispatcher attached to {} portals", self.portals.len());
    }

    /// Renders each portal's view for the given observer.
    ///
    /// Portals created after [attach](Self::attach) are picked up by
    /// attaching again.
    pub fn on_begin_camera_render(&self, world: &mut World, view: &ViewCamera) {
        if !self.attached {
            warn!("render dispatcher is not attached, skipping portal renders");
            return;
        }
        for &portal in &self.portals {
            render_portal(world, portal, view);
        }
    }

    /// Stops dispatching and forgets the collected portals.
    pub fn detach(&mut self) {
        self.portals.clear();
        self.attached = false;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Portals currently dispatched to, in discovery order.
    pub fn portals(&self) -> &[Entity] {
        &self.portals
    }
}
