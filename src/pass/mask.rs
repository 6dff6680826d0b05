use super::{Pass, PassFlags, PassKind};
use crate::backend::{
    Backend, CameraHandle, ClearFlags, ClearValues, SceneHandle, StencilFunc, StencilState,
    Surface, WriteMask,
};
use crate::error::Result;

/// Stencil value that passes the mask test.
pub const MASK_VALUE: u32 = 1;

/// Writes a scene's silhouette into the stencil buffer.
///
/// Colour and depth writes are masked off while the silhouette is drawn into
/// both ping-pong surfaces (or the screen). Afterwards stencil testing stays
/// enabled with `EQUAL 1`, locked, until a [`ClearMaskPass`] runs.
#[derive(Debug, Clone)]
pub struct MaskPass {
    flags: PassFlags,
    scene: SceneHandle,
    camera: CameraHandle,
    inverse: bool,
    clear: bool,
}

impl MaskPass {
    pub fn new(scene: SceneHandle, camera: CameraHandle) -> Self {
        Self {
            flags: PassFlags::without_swap(),
            scene,
            camera,
            inverse: false,
            clear: true,
        }
    }

    /// Mask everything except the silhouette.
    pub fn inverted(mut self) -> Self {
        self.inverse = true;
        self
    }

    pub fn is_inverted(&self) -> bool {
        self.inverse
    }

    pub fn set_inverted(&mut self, inverse: bool) {
        self.inverse = inverse;
    }

    /// Whether the stencil buffer is cleared before the silhouette is drawn.
    pub fn set_clear(&mut self, clear: bool) {
        self.clear = clear;
    }

    fn fill(&self, backend: &mut dyn Backend, clear_value: u32) -> Result<()> {
        if self.clear {
            backend.clear(
                ClearFlags {
                    stencil: true,
                    ..ClearFlags::default()
                },
                ClearValues {
                    stencil: clear_value,
                    ..ClearValues::default()
                },
            );
        }
        backend.render(self.scene, self.camera, None)?;
        Ok(())
    }
}

impl Pass for MaskPass {
    fn name(&self) -> &str {
        "MaskPass"
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn kind(&self) -> PassKind {
        PassKind::Mask
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        output: &Surface,
        _delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        let write_value = if self.inverse { 0 } else { MASK_VALUE };
        let clear_value = MASK_VALUE - write_value;

        backend.set_write_mask(WriteMask::NONE);
        backend.set_stencil(StencilState::write(write_value));

        let result = if self.flags.render_to_screen {
            backend.set_render_target(None);
            self.fill(backend, clear_value)
        } else {
            backend.set_render_target(Some(input.id()));
            self.fill(backend, clear_value).and_then(|_| {
                backend.set_render_target(Some(output.id()));
                self.fill(backend, clear_value)
            })
        };

        backend.set_write_mask(WriteMask::ALL);
        backend.set_stencil(StencilState::compare(StencilFunc::Equal, MASK_VALUE));
        result
    }
}

/// Disables stencil testing set up by a [`MaskPass`].
#[derive(Debug, Clone)]
pub struct ClearMaskPass {
    flags: PassFlags,
}

impl Default for ClearMaskPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ClearMaskPass {
    pub fn new() -> Self {
        Self {
            flags: PassFlags::without_swap(),
        }
    }
}

impl Pass for ClearMaskPass {
    fn name(&self) -> &str {
        "ClearMaskPass"
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn kind(&self) -> PassKind {
        PassKind::ClearMask
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        _input: &Surface,
        _output: &Surface,
        _delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        backend.set_stencil(StencilState::DISABLED);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use crate::backend::SurfaceDesc;

    fn surfaces(backend: &mut HeadlessBackend) -> (Surface, Surface) {
        let mut desc = SurfaceDesc::new("in", 4, 4);
        desc.stencil_buffer = true;
        let a = backend.create_surface(&desc).unwrap();
        desc.label = "out".to_string();
        let b = backend.create_surface(&desc).unwrap();
        (a, b)
    }

    #[test]
    fn test_mask_fills_both_surfaces_without_color_writes() {
        let mut backend = HeadlessBackend::default();
        let (input, output) = surfaces(&mut backend);
        backend.take_commands();

        let mut pass = MaskPass::new(SceneHandle(3), CameraHandle(1));
        pass.render(&mut backend, &input, &output, 0.0, false).unwrap();

        let renders: Vec<_> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Render {
                    target,
                    stencil,
                    write_mask,
                    ..
                } => Some((*target, *stencil, *write_mask)),
                _ => None,
            })
            .collect();
        assert_eq!(renders.len(), 2);
        assert_eq!(renders[0].0, Some(input.id()));
        assert_eq!(renders[1].0, Some(output.id()));
        for (_, stencil, mask) in &renders {
            assert_eq!(*mask, WriteMask::NONE);
            assert_eq!(stencil.reference, MASK_VALUE);
        }

        let stencil = backend.stencil();
        assert!(stencil.test && stencil.locked);
        assert_eq!(stencil.func, StencilFunc::Equal);
        assert_eq!(backend.write_mask(), WriteMask::ALL);
    }

    #[test]
    fn test_inverted_mask_writes_zero_over_one() {
        let mut backend = HeadlessBackend::default();
        let (input, output) = surfaces(&mut backend);
        backend.take_commands();

        let mut pass = MaskPass::new(SceneHandle(3), CameraHandle(1)).inverted();
        pass.flags_mut().render_to_screen = true;
        pass.render(&mut backend, &input, &output, 0.0, false).unwrap();

        let commands = backend.take_commands();
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::SetStencil(s) if s.reference == 0 && !s.locked)));
        let renders = commands
            .iter()
            .filter(|c| matches!(c, Command::Render { target: None, .. }))
            .count();
        assert_eq!(renders, 1);
    }

    #[test]
    fn test_clear_mask_disables_stencil() {
        let mut backend = HeadlessBackend::default();
        let (input, output) = surfaces(&mut backend);
        backend.set_stencil(StencilState::compare(StencilFunc::Equal, 1));

        let mut pass = ClearMaskPass::new();
        assert_eq!(pass.kind(), PassKind::ClearMask);
        pass.render(&mut backend, &input, &output, 0.0, true).unwrap();
        assert_eq!(backend.stencil(), StencilState::DISABLED);
    }
}
