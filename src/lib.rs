//! Recursive, traversable portals for Bevy-style worlds.
//!
//! A portal pair shows each side through the other and teleports anything
//! crossing a portal's plane to the matching pose at its pair. Views are
//! rendered recursively (a portal seen through a portal), innermost level
//! first, with the near clip plane bent onto the portal surface so nothing
//! between the portal camera and the surface leaks into the picture.
//!
//! The crate owns the math and the protocol; the host engine keeps the
//! GPU. Render passes, textures and material properties go through the
//! [RenderBackend] trait, and the host's render loop drives portal renders
//! with a [RenderDispatcher].
//!
//! ## Basic Usage
//! ```rust,no_run
//! use bevy_app::prelude::*;
//! use bevy_math::{UVec2, Vec2, Vec3};
//! use bevy_transform::prelude::Transform;
//! use bevy_recursive_portals::*;
//!
//! let mut app = App::new();
//! app.add_plugins((
//!     bevy_transform::TransformPlugin,
//!     PortalsPlugin::default(),
//!     PortalTravellerPlugin::<KinematicTraveller>::default(),
//! ));
//! app.insert_resource(PortalRenderBackend::new(NoopRenderBackend::new(
//!     UVec2::new(1920, 1080),
//! )));
//!
//! let blue = app
//!     .world_mut()
//!     .spawn((
//!         CreatePortal {
//!             screen: ScreenConfig {
//!                 material: MaterialId(1),
//!                 surface: SurfaceId(1),
//!                 half_extents: Vec2::new(1.0, 2.0),
//!             },
//!             ..Default::default()
//!         },
//!         Transform::IDENTITY,
//!     ))
//!     .id();
//! app.world_mut().spawn((
//!     CreatePortal {
//!         linked_to: Some(blue),
//!         screen: ScreenConfig {
//!             material: MaterialId(2),
//!             surface: SurfaceId(2),
//!             half_extents: Vec2::new(1.0, 2.0),
//!         },
//!         ..Default::default()
//!     },
//!     Transform::from_xyz(10.0, 0.0, 0.0),
//! ));
//! app.update();
//!
//! // In the host's render loop, before rendering the observer's view:
//! let mut dispatcher = RenderDispatcher::default();
//! dispatcher.attach(app.world_mut());
//! let view = ViewCamera {
//!     transform: Transform::from_xyz(0.0, 1.0, 5.0).looking_at(Vec3::ZERO, Vec3::Y),
//!     projection: Default::default(),
//! };
//! dispatcher.on_begin_camera_render(app.world_mut(), &view);
//! ```
//!
//! ## Vocabulary
//! - A Portal is a planar screen surface paired with another portal
//! - A Screen is the surface entity displaying a portal's view texture
//! - A Traveller is an entity that teleports when it crosses a portal plane
//! - A View Camera is the observer whose picture the portal views are for
//! - A Render Pass is one manual camera render issued through the backend
//!
//! ## Known limitations
//! - when both portals of a pair render in one frame, each pair member's
//! view is one frame stale in the other's picture
//! - overlap events have to be fed by the host's collision system, this
//! crate does no collision detection of its own
//! - the screen-protection quad assumes the observer's projection, with a
//! different projection per eye (VR) the thickness has to be recomputed
//! - a traveller exactly on a portal plane counts as having changed side
//! and teleports on its next movement

pub mod portals;
pub use portals::*;
#[doc(inline)]
pub use portals::{CreatePortal, PortalsPlugin, RenderDispatcher};
