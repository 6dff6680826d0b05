//! Scheduling primitives of the post-processing pipeline.
//!
//! A [`Pass`] consumes an input surface and may write into the output
//! surface (or the screen). Passes that produce a new "current" image set
//! `needs_swap`, and the composer swaps the two surface labels after them.

mod blur;
mod clear;
mod copy;
mod depth;
mod effect;
mod mask;
mod render;
mod save;
mod shader;

pub use blur::{KawaseBlurPass, KernelSize};
pub use clear::ClearPass;
pub use copy::CopyPass;
pub use depth::DepthPass;
pub use effect::{BudgetWarning, EffectPass, EffectPassConfig};
pub use mask::{ClearMaskPass, MaskPass, MASK_VALUE};
pub use render::RenderPass;
pub use save::SavePass;
pub use shader::ShaderPass;

use crate::backend::{
    Backend, CameraHandle, DepthPacking, FrameBufferType, GeometryHandle, SceneHandle, Surface,
    TextureHandle,
};
use crate::error::Result;

/// Scheduling flags shared by every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassFlags {
    /// Disabled passes are skipped entirely.
    pub enabled: bool,
    /// A successful render changed which surface holds the current image.
    pub needs_swap: bool,
    /// The pass wants the composer's shared depth texture.
    pub needs_depth_texture: bool,
    /// Output goes to the visible framebuffer.
    pub render_to_screen: bool,
    disposed: bool,
}

impl Default for PassFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            needs_swap: true,
            needs_depth_texture: false,
            render_to_screen: false,
            disposed: false,
        }
    }
}

impl PassFlags {
    /// Flags of a pass that never swaps.
    pub fn without_swap() -> Self {
        Self {
            needs_swap: false,
            ..Self::default()
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn mark_disposed(&mut self) {
        self.disposed = true;
    }
}

/// Role of a pass in the stencil mask state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Regular,
    /// Enables stencil testing for the passes after it.
    Mask,
    /// Disables stencil testing again.
    ClearMask,
}

/// What a pass learns when it joins a composer.
#[derive(Debug, Clone, Copy)]
pub struct PassInit {
    pub alpha: bool,
    pub frame_buffer_type: FrameBufferType,
    /// Shared fullscreen triangle owned by the composer.
    pub fullscreen: GeometryHandle,
    pub width: u32,
    pub height: u32,
}

/// A unit of work in the pipeline.
///
/// Only `name`, the flag accessors and `render` are required.
pub trait Pass {
    fn name(&self) -> &str;

    fn flags(&self) -> &PassFlags;

    fn flags_mut(&mut self) -> &mut PassFlags;

    fn kind(&self) -> PassKind {
        PassKind::Regular
    }

    /// Called once when the pass is added to a composer.
    fn initialize(&mut self, _backend: &mut dyn Backend, _init: &PassInit) -> Result<()> {
        Ok(())
    }

    /// Called on every composer resize with the drawing buffer size.
    fn set_size(&mut self, _backend: &mut dyn Backend, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    fn set_depth_texture(&mut self, _texture: Option<TextureHandle>, _packing: DepthPacking) {}

    fn set_main_scene(&mut self, _scene: SceneHandle) {}

    fn set_main_camera(&mut self, _camera: CameraHandle) {}

    /// Render one frame. `input` holds the current image; surfaces are lent
    /// for the duration of the call only.
    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        output: &Surface,
        delta: f32,
        stencil_test: bool,
    ) -> Result<()>;

    /// Release backend resources. The default only marks the pass disposed.
    fn dispose(&mut self, _backend: &mut dyn Backend) {
        self.flags_mut().mark_disposed();
    }
}
