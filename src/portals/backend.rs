//! Seam between the portal core and the host engine's render pipeline

use bevy_ecs::prelude::*;
use bevy_math::{Mat4, Quat, UVec2, Vec3};
use bevy_reflect::Reflect;

/// Handle to a render texture owned by the host pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct TextureId(pub u64);

/// Handle to a screen material exposing the display-mask and main-texture
/// properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct MaterialId(pub u64);

/// Handle to a renderer surface whose shadow-casting mode can be toggled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub struct SurfaceId(pub u64);

/// One manual single-camera render pass issued by a portal.
///
/// The camera pose is given in world space; `clip_from_view` already
/// contains the oblique near-clip plane when one applies.
#[derive(Clone, Debug)]
pub struct PortalRenderPass {
    pub position: Vec3,
    pub rotation: Quat,
    pub clip_from_view: Mat4,
    pub target: TextureId,
}

/// Render-pipeline primitives the host engine must provide.
///
/// Portals never talk to the GPU themselves; everything they need from the
/// pipeline goes through this trait. All calls happen on the render-driving
/// thread, from inside [RenderDispatcher::on_begin_camera_render](super::RenderDispatcher::on_begin_camera_render).
pub trait RenderBackend: Send + Sync {
    /// Current output resolution of the viewing camera's target.
    fn output_resolution(&self) -> UVec2;

    /// Creates a render texture of the given size.
    fn create_texture(&mut self, size: UVec2) -> TextureId;

    /// Releases a texture previously returned by [create_texture](RenderBackend::create_texture).
    fn release_texture(&mut self, texture: TextureId);

    /// Binds `texture` as the main texture of `material`.
    fn set_material_texture(&mut self, material: MaterialId, texture: TextureId);

    /// Sets the integer display mask of `material`:
    /// 0 = see-through, 1 = show the bound texture.
    fn set_material_display_mask(&mut self, material: MaterialId, mask: u32);

    /// Shadow-only surfaces are invisible to the colour pass but keep
    /// casting shadows.
    fn set_surface_shadows_only(&mut self, surface: SurfaceId, shadows_only: bool);

    /// Renders a single camera into `pass.target`, bypassing the normal
    /// per-frame camera loop.
    fn render(&mut self, pass: &PortalRenderPass);
}

/// [Resource] wrapping the host's [RenderBackend].
///
/// Without this resource portals silently skip rendering; tracking and
/// teleportation keep working.
#[derive(Resource)]
pub struct PortalRenderBackend(Box<dyn RenderBackend>);

impl PortalRenderBackend {
    pub fn new(backend: impl RenderBackend + 'static) -> Self {
        Self(Box::new(backend))
    }

    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.0.as_mut()
    }
}

/// Backend that allocates texture handles but draws nothing.
///
/// Useful for headless hosts and for exercising the portal systems in
/// tests without a GPU.
#[derive(Debug, Default)]
pub struct NoopRenderBackend {
    resolution: UVec2,
    next_texture: u64,
}

impl NoopRenderBackend {
    pub fn new(resolution: UVec2) -> Self {
        Self {
            resolution,
            next_texture: 0,
        }
    }
}

impl RenderBackend for NoopRenderBackend {
    fn output_resolution(&self) -> UVec2 {
        self.resolution
    }

    fn create_texture(&mut self, _size: UVec2) -> TextureId {
        self.next_texture += 1;
        TextureId(self.next_texture)
    }

    fn release_texture(&mut self, _texture: TextureId) {}

    fn set_material_texture(&mut self, _material: MaterialId, _texture: TextureId) {}

    fn set_material_display_mask(&mut self, _material: MaterialId, _mask: u32) {}

    fn set_surface_shadows_only(&mut self, _surface: SurfaceId, _shadows_only: bool) {}

    fn render(&mut self, _pass: &PortalRenderPass) {}
}
