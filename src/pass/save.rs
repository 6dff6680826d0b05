use super::mask::MASK_VALUE;
use super::{CopyPass, Pass, PassFlags, PassInit};
use crate::backend::{Backend, StencilFunc, StencilState, Surface, SurfaceDesc, TextureHandle};
use crate::error::{Error, Result};

/// Saves the current image into an owned surface.
///
/// Later passes (or effects) can sample [`texture`](SavePass::texture). The
/// pass never swaps and never touches the ping-pong surfaces.
#[derive(Debug)]
pub struct SavePass {
    copy: CopyPass,
    surface: Option<Surface>,
    resize: bool,
}

impl Default for SavePass {
    fn default() -> Self {
        Self::new()
    }
}

impl SavePass {
    pub fn new() -> Self {
        let mut copy = CopyPass::new();
        copy.flags_mut().needs_swap = false;
        Self {
            copy,
            surface: None,
            resize: true,
        }
    }

    /// Keep the saved surface at its initial size on resize.
    pub fn with_fixed_size(mut self) -> Self {
        self.resize = false;
        self
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.surface.as_ref().map(Surface::color)
    }
}

impl Pass for SavePass {
    fn name(&self) -> &str {
        "SavePass"
    }

    fn flags(&self) -> &PassFlags {
        self.copy.flags()
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        self.copy.flags_mut()
    }

    fn initialize(&mut self, backend: &mut dyn Backend, init: &PassInit) -> Result<()> {
        self.copy.initialize(backend, init)?;
        if self.surface.is_none() {
            let mut desc = SurfaceDesc::new("SavePass.target", init.width, init.height);
            desc.frame_buffer_type = init.frame_buffer_type;
            self.surface = Some(backend.create_surface(&desc)?);
        }
        Ok(())
    }

    fn set_size(&mut self, backend: &mut dyn Backend, width: u32, height: u32) -> Result<()> {
        if let (true, Some(surface)) = (self.resize, self.surface.as_mut()) {
            backend.resize_surface(surface, width, height)?;
        }
        Ok(())
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        _output: &Surface,
        _delta: f32,
        stencil_test: bool,
    ) -> Result<()> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| Error::config("SavePass rendered before initialize"))?;

        // The saved surface has no stencil attachment, so a masked copy
        // would test against nothing. Copy unmasked, then restore the mask
        // scope for the passes that follow.
        if stencil_test {
            backend.set_stencil(StencilState::DISABLED);
        }
        let result = self.copy.copy_into(backend, input, surface);
        if stencil_test {
            backend.set_stencil(StencilState::compare(StencilFunc::Equal, MASK_VALUE));
        }
        result
    }

    fn dispose(&mut self, backend: &mut dyn Backend) {
        if let Some(surface) = self.surface.take() {
            backend.dispose_surface(&surface);
        }
        self.copy.dispose(backend);
    }
}
