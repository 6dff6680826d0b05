use super::{Pass, PassFlags, PassInit};
use crate::backend::{bind_target, Backend, FrameBufferType, GeometryHandle, ShaderProgram, Surface};
use crate::error::{Error, Result};
use crate::uniform::UniformValue;

/// Runs an arbitrary program over the fullscreen triangle.
///
/// The input image is bound to the uniform named by `input_name` when the
/// program declares it.
#[derive(Debug)]
pub struct ShaderPass {
    name: String,
    flags: PassFlags,
    program: ShaderProgram,
    input_name: String,
    geometry: Option<GeometryHandle>,
}

impl ShaderPass {
    pub fn new(program: ShaderProgram, input_name: impl Into<String>) -> Self {
        Self {
            name: if program.label.is_empty() {
                "ShaderPass".to_string()
            } else {
                program.label.clone()
            },
            flags: PassFlags::default(),
            program,
            input_name: input_name.into(),
            geometry: None,
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }

    /// Draw `input` into `target`, or onto the screen.
    pub(crate) fn draw(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        target: &Surface,
        render_to_screen: bool,
    ) -> Result<()> {
        let geometry = self
            .geometry
            .ok_or_else(|| Error::config(format!("'{}' rendered before initialize", self.name)))?;

        if let Some(uniform) = self.program.uniforms.get(&self.input_name) {
            uniform.set(UniformValue::Texture(Some(input.color())));
        }

        bind_target(backend, target, render_to_screen);
        backend.draw_fullscreen(geometry, &self.program)?;
        Ok(())
    }
}

impl Pass for ShaderPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn initialize(&mut self, _backend: &mut dyn Backend, init: &PassInit) -> Result<()> {
        self.geometry = Some(init.fullscreen);
        if init.frame_buffer_type == FrameBufferType::HalfFloat {
            self.program
                .defines
                .insert("FRAMEBUFFER_PRECISION_HIGH", "1".to_string());
        }
        if !self.program.uniforms.contains_key(&self.input_name) {
            log::debug!("'{}' has no '{}' uniform", self.name, self.input_name);
        }
        Ok(())
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        output: &Surface,
        _delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        let to_screen = self.flags.render_to_screen;
        self.draw(backend, input, output, to_screen)
    }
}
