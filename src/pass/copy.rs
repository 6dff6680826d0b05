use super::{Pass, PassFlags, PassInit, ShaderPass};
use crate::backend::{Backend, ShaderProgram, Surface};
use crate::error::Result;
use crate::shader::templates;
use crate::uniform::Uniform;

/// Copies the input image into the output surface (or onto the screen).
///
/// The composer keeps one of these to carry masked-out pixels across a swap.
#[derive(Debug)]
pub struct CopyPass {
    shader: ShaderPass,
    opacity: Uniform,
}

impl Default for CopyPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyPass {
    pub fn new() -> Self {
        let opacity = Uniform::float(1.0);
        let mut program =
            ShaderProgram::new("CopyPass", templates::COMMON_VERTEX, templates::COPY_FRAGMENT);
        program.uniforms.insert("inputBuffer", Uniform::texture(None));
        program.uniforms.insert("opacity", opacity.clone());
        Self {
            shader: ShaderPass::new(program, "inputBuffer"),
            opacity,
        }
    }

    pub fn set_opacity(&self, opacity: f32) {
        self.opacity.set(opacity);
    }

    /// Copy `input` into `target` regardless of the pass flags.
    pub(crate) fn copy_into(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        target: &Surface,
    ) -> Result<()> {
        self.shader.draw(backend, input, target, false)
    }
}

impl Pass for CopyPass {
    fn name(&self) -> &str {
        self.shader.name()
    }

    fn flags(&self) -> &PassFlags {
        self.shader.flags()
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        self.shader.flags_mut()
    }

    fn initialize(&mut self, backend: &mut dyn Backend, init: &PassInit) -> Result<()> {
        self.shader.initialize(backend, init)
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        output: &Surface,
        delta: f32,
        stencil_test: bool,
    ) -> Result<()> {
        self.shader
            .render(backend, input, output, delta, stencil_test)
    }

    fn dispose(&mut self, backend: &mut dyn Backend) {
        self.shader.dispose(backend);
    }
}
