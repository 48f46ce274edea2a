//! Plugins, system sets and configuration to use portals without caring about their implementation

use bevy_app::prelude::*;
use bevy_ecs::{prelude::*, reflect::ReflectResource};
use bevy_math::Vec2;
use bevy_reflect::Reflect;
use bevy_transform::TransformSystem;

use super::*;

/// [Plugin] to add support for portals to a bevy App.
///
/// Linking, traveller tracking and crossing detection run in [PostUpdate],
/// after transform propagation, so that side computations always see the
/// world transforms produced by this frame's movement and physics.
///
/// Crossing detection itself is registered per traveller type with
/// [PortalTravellerPlugin].
pub struct PortalsPlugin {
    /// If true, repair one-sided [Portal::linked] references with
    /// [sync_portal_links] whenever a [Portal] changes.
    ///
    /// Linking through [CreatePortal], [LinkPortals] or [UnlinkPortals] is
    /// always mutual; this system additionally covers direct edits of
    /// [Portal::linked].
    pub enforce_link_symmetry: bool,
}

impl Default for PortalsPlugin {
    fn default() -> Self {
        PortalsPlugin {
            enforce_link_symmetry: true,
        }
    }
}

impl PortalsPlugin {
    pub const MINIMAL: Self = Self {
        enforce_link_symmetry: false,
    };
}

impl Plugin for PortalsPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<Portal>()
            .register_type::<PortalTraveller>()
            .register_type::<PortalDeactivator>()
            .register_type::<PauseState>()
            .init_resource::<PauseState>()
            .add_event::<PortalOverlap>()
            .add_event::<TravellerTeleported>()
            .add_event::<TransformSyncRequest>();

        app.configure_sets(
            PostUpdate,
            (
                PortalSystems::Create,
                PortalSystems::Links,
                PortalSystems::Tracking,
                PortalSystems::Crossing,
            )
                .chain()
                .after(TransformSystem::TransformPropagate),
        );

        app.add_systems(
            PostUpdate,
            create_portals.in_set(PortalSystems::Create),
        );
        if self.enforce_link_symmetry {
            app.add_systems(PostUpdate, sync_portal_links.in_set(PortalSystems::Links));
        }
        app.add_systems(
            PostUpdate,
            (
                deactivate_portals,
                track_overlapping_travellers,
                prune_tracked_travellers,
            )
                .chain()
                .in_set(PortalSystems::Tracking),
        );
    }
}

/// [SystemSet]s for everything portals do on the game-logic side.
///
/// All of them run in [PostUpdate] after transform propagation, in the
/// order they are declared here.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum PortalSystems {
    /// Turns [CreatePortal] configs into live [Portal]s.
    Create,
    /// Keeps [Portal::linked] references mutual.
    Links,
    /// Applies overlap events to the tracked-traveller sets.
    Tracking,
    /// Detects plane crossings and teleports travellers.
    Crossing,
}

/// Process-wide pause flag.
///
/// While paused, crossing detection is frozen (nothing moves, nothing
/// teleports); rendering keeps running so a pause menu can sit on top of a
/// live portal view.
#[derive(Resource, Default, Reflect)]
#[reflect(Resource)]
pub struct PauseState {
    pub paused: bool,
}

/// [Component] to create a [Portal] and everything needed to make it work.
///
/// The portal will be created by [create_portals] during the next
/// [PortalSystems::Create] pass. Requires a [Transform](bevy_transform::prelude::Transform)
/// to locate the portal; the portal plane faces the transform's forward
/// direction.
#[derive(Component, Clone)]
pub struct CreatePortal {
    /// Portal to pair with, if it already exists or is created this frame.
    /// The link is made mutual.
    pub linked_to: Option<Entity>,
    /// Screen surface shown for this portal.
    pub screen: ScreenConfig,
    /// Upper bound on nested view-through-a-portal render levels.
    pub recursion_limit: usize,
    /// Bias added to the oblique near-clip distance.
    pub near_clip_offset: f32,
    /// Distance to the portal plane below which the oblique clip is skipped.
    pub near_clip_limit: f32,
}

impl Default for CreatePortal {
    fn default() -> Self {
        Self {
            linked_to: None,
            screen: ScreenConfig::default(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            near_clip_offset: DEFAULT_NEAR_CLIP_OFFSET,
            near_clip_limit: DEFAULT_NEAR_CLIP_LIMIT,
        }
    }
}

/// Screen surface of a portal to be created, see [CreatePortal].
#[derive(Clone)]
pub struct ScreenConfig {
    /// Material whose display-mask and main-texture properties the render
    /// passes will drive.
    pub material: MaterialId,
    /// Renderer surface used for the shadow-casting toggle.
    pub surface: SurfaceId,
    /// Half extents of the screen quad in the portal plane.
    pub half_extents: Vec2,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            material: MaterialId(0),
            surface: SurfaceId(0),
            half_extents: Vec2::splat(0.5),
        }
    }
}

pub const DEFAULT_RECURSION_LIMIT: usize = 5;
pub const DEFAULT_NEAR_CLIP_OFFSET: f32 = 0.05;
pub const DEFAULT_NEAR_CLIP_LIMIT: f32 = 0.2;
