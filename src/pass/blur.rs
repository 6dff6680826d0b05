use glam::Vec2;
use serde::Deserialize;

use super::{Pass, PassFlags, PassInit};
use crate::backend::{
    Backend, FrameBufferType, GeometryHandle, ShaderProgram, Surface, SurfaceDesc,
};
use crate::error::{Error, Result};
use crate::resolution::Resolution;
use crate::shader::templates;
use crate::uniform::{Uniform, UniformValue};

/// Blur strength as a sequence of per-iteration sample offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KernelSize {
    VerySmall,
    Small,
    #[default]
    Medium,
    Large,
    VeryLarge,
    Huge,
}

impl KernelSize {
    /// Offsets in texels, one draw per entry.
    pub fn kernel(self) -> &'static [f32] {
        match self {
            KernelSize::VerySmall => &[0.0, 0.0],
            KernelSize::Small => &[0.0, 1.0, 1.0],
            KernelSize::Medium => &[0.0, 1.0, 1.0, 2.0],
            KernelSize::Large => &[0.0, 1.0, 2.0, 2.0, 3.0],
            KernelSize::VeryLarge => &[0.0, 1.0, 2.0, 3.0, 4.0, 4.0, 5.0],
            KernelSize::Huge => &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 8.0, 9.0, 10.0],
        }
    }
}

/// Kawase blur over a private ping-pong pair at reduced resolution.
///
/// Every kernel entry is one fullscreen draw; the last one writes into the
/// output surface.
#[derive(Debug)]
pub struct KawaseBlurPass {
    flags: PassFlags,
    kernel_size: KernelSize,
    resolution: Resolution,
    program: ShaderProgram,
    input_buffer: Uniform,
    texel_size: Uniform,
    kernel: Uniform,
    surfaces: Option<[Surface; 2]>,
    geometry: Option<GeometryHandle>,
}

impl Default for KawaseBlurPass {
    fn default() -> Self {
        Self::new(KernelSize::default())
    }
}

impl KawaseBlurPass {
    pub fn new(kernel_size: KernelSize) -> Self {
        let input_buffer = Uniform::texture(None);
        let texel_size = Uniform::new(Vec2::ONE);
        let kernel = Uniform::float(0.0);

        let mut program = ShaderProgram::new(
            "KawaseBlurPass",
            templates::COMMON_VERTEX,
            templates::KAWASE_FRAGMENT,
        );
        program.uniforms.insert("inputBuffer", input_buffer.clone());
        program.uniforms.insert("texelSize", texel_size.clone());
        program.uniforms.insert("kernel", kernel.clone());

        Self {
            flags: PassFlags::default(),
            kernel_size,
            resolution: Resolution::new(0.5),
            program,
            input_buffer,
            texel_size,
            kernel,
            surfaces: None,
            geometry: None,
        }
    }

    pub fn kernel_size(&self) -> KernelSize {
        self.kernel_size
    }

    pub fn set_kernel_size(&mut self, kernel_size: KernelSize) {
        self.kernel_size = kernel_size;
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Change the blur resolution. Takes effect on the next `set_size`.
    pub fn resolution_mut(&mut self) -> &mut Resolution {
        &mut self.resolution
    }

    pub fn surfaces(&self) -> Option<&[Surface; 2]> {
        self.surfaces.as_ref()
    }

    fn texel(width: u32, height: u32) -> Vec2 {
        Vec2::new(1.0 / width as f32, 1.0 / height as f32)
    }
}

impl Pass for KawaseBlurPass {
    fn name(&self) -> &str {
        "KawaseBlurPass"
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn initialize(&mut self, backend: &mut dyn Backend, init: &PassInit) -> Result<()> {
        self.geometry = Some(init.fullscreen);
        if init.frame_buffer_type == FrameBufferType::HalfFloat {
            self.program
                .defines
                .insert("FRAMEBUFFER_PRECISION_HIGH", "1".to_string());
        }

        self.resolution.set_base_size(init.width, init.height);
        if self.surfaces.is_none() {
            let (width, height) = self.resolution.size();
            let mut desc = SurfaceDesc::new("KawaseBlurPass.a", width, height);
            desc.frame_buffer_type = init.frame_buffer_type;
            let a = backend.create_surface(&desc)?;
            desc.label = "KawaseBlurPass.b".to_string();
            let b = backend.create_surface(&desc)?;
            self.surfaces = Some([a, b]);
        }
        Ok(())
    }

    fn set_size(&mut self, backend: &mut dyn Backend, width: u32, height: u32) -> Result<()> {
        self.resolution.set_base_size(width, height);
        let (w, h) = self.resolution.size();
        if let Some(surfaces) = self.surfaces.as_mut() {
            for surface in surfaces.iter_mut() {
                backend.resize_surface(surface, w, h)?;
            }
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
        let (geometry, surfaces) = match (self.geometry, self.surfaces.as_ref()) {
            (Some(g), Some(s)) => (g, s),
            _ => return Err(Error::config("KawaseBlurPass rendered before initialize")),
        };

        let kernel = self.kernel_size.kernel();
        let last = kernel.len() - 1;
        let mut source = input;

        for (i, offset) in kernel.iter().enumerate() {
            self.input_buffer
                .set(UniformValue::Texture(Some(source.color())));
            self.texel_size
                .set(Self::texel(source.width(), source.height()));
            self.kernel.set(*offset);

            if i == last {
                if self.flags.render_to_screen {
                    backend.set_render_target(None);
                } else {
                    backend.set_render_target(Some(output.id()));
                }
            } else {
                backend.set_render_target(Some(surfaces[i % 2].id()));
            }
            backend.draw_fullscreen(geometry, &self.program)?;
            source = &surfaces[i % 2];
        }
        Ok(())
    }

    fn dispose(&mut self, backend: &mut dyn Backend) {
        if let Some(surfaces) = self.surfaces.take() {
            for surface in &surfaces {
                backend.dispose_surface(surface);
            }
        }
        self.flags.mark_disposed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};

    fn setup(kernel: KernelSize) -> (HeadlessBackend, KawaseBlurPass, Surface, Surface) {
        let mut backend = HeadlessBackend::default();
        let init = PassInit {
            alpha: true,
            frame_buffer_type: FrameBufferType::UnsignedByte,
            fullscreen: backend.create_fullscreen_geometry().unwrap(),
            width: 640,
            height: 480,
        };
        let input = backend.create_surface(&SurfaceDesc::new("in", 640, 480)).unwrap();
        let output = backend.create_surface(&SurfaceDesc::new("out", 640, 480)).unwrap();
        let mut pass = KawaseBlurPass::new(kernel);
        pass.initialize(&mut backend, &init).unwrap();
        (backend, pass, input, output)
    }

    #[test]
    fn test_kernel_lengths() {
        let lens: Vec<usize> = [
            KernelSize::VerySmall,
            KernelSize::Small,
            KernelSize::Medium,
            KernelSize::Large,
            KernelSize::VeryLarge,
            KernelSize::Huge,
        ]
        .iter()
        .map(|k| k.kernel().len())
        .collect();
        assert_eq!(lens, vec![2, 3, 4, 5, 7, 10]);
    }

    #[test]
    fn test_one_draw_per_kernel_entry_ending_in_output() {
        let (mut backend, mut pass, input, output) = setup(KernelSize::Large);
        let [a, b] = pass.surfaces().unwrap().clone();
        assert_eq!(a.size(), (320, 240));

        pass.render(&mut backend, &input, &output, 0.0, false).unwrap();
        let targets: Vec<_> = backend
            .draws()
            .map(|c| match c {
                Command::DrawFullscreen { target, .. } => *target,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            targets,
            vec![
                Some(a.id()),
                Some(b.id()),
                Some(a.id()),
                Some(b.id()),
                Some(output.id())
            ]
        );
    }

    #[test]
    fn test_resize_follows_resolution_scale() {
        let (mut backend, mut pass, _, _) = setup(KernelSize::Small);
        pass.resolution_mut().set_scale(0.25);
        pass.set_size(&mut backend, 800, 400).unwrap();
        for surface in pass.surfaces().unwrap() {
            assert_eq!(surface.size(), (200, 100));
        }
    }
}
