use super::{Pass, PassFlags, PassInit, RenderPass};
use crate::backend::{
    Backend, CameraHandle, DepthPacking, OverrideMaterial, SceneHandle, Surface, SurfaceDesc,
    TextureHandle,
};
use crate::error::{Error, Result};
use crate::resolution::Resolution;

/// Renders scene depth into an owned surface.
///
/// Wraps a [`RenderPass`] whose objects are drawn with a depth override
/// material. The surface follows its own [`Resolution`].
#[derive(Debug)]
pub struct DepthPass {
    render_pass: RenderPass,
    packing: DepthPacking,
    resolution: Resolution,
    surface: Option<Surface>,
}

impl DepthPass {
    pub fn new(scene: SceneHandle, camera: CameraHandle) -> Self {
        let packing = DepthPacking::Rgba;
        let mut render_pass = RenderPass::new(scene, camera)
            .with_name("DepthPass")
            .with_override_material(OverrideMaterial::Depth(packing));
        render_pass.flags_mut().needs_swap = false;
        Self {
            render_pass,
            packing,
            resolution: Resolution::default(),
            surface: None,
        }
    }

    pub fn with_resolution_scale(mut self, scale: f32) -> Self {
        self.resolution.set_scale(scale);
        self
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn depth_packing(&self) -> DepthPacking {
        self.packing
    }

    /// Colour texture holding the packed depth.
    pub fn texture(&self) -> Option<TextureHandle> {
        self.surface.as_ref().map(Surface::color)
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }
}

impl Pass for DepthPass {
    fn name(&self) -> &str {
        self.render_pass.name()
    }

    fn flags(&self) -> &PassFlags {
        self.render_pass.flags()
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        self.render_pass.flags_mut()
    }

    fn initialize(&mut self, backend: &mut dyn Backend, init: &PassInit) -> Result<()> {
        self.resolution.set_base_size(init.width, init.height);
        if self.surface.is_none() {
            let (width, height) = self.resolution.size();
            let mut desc = SurfaceDesc::new("DepthPass.target", width, height);
            desc.depth_buffer = true;
            self.surface = Some(backend.create_surface(&desc)?);
        }
        Ok(())
    }

    fn set_size(&mut self, backend: &mut dyn Backend, width: u32, height: u32) -> Result<()> {
        self.resolution.set_base_size(width, height);
        if let Some(surface) = self.surface.as_mut() {
            let (w, h) = self.resolution.size();
            backend.resize_surface(surface, w, h)?;
        }
        Ok(())
    }

    fn set_main_scene(&mut self, scene: SceneHandle) {
        self.render_pass.set_main_scene(scene);
    }

    fn set_main_camera(&mut self, camera: CameraHandle) {
        self.render_pass.set_main_camera(camera);
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        _input: &Surface,
        _output: &Surface,
        _delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        let target = if self.render_pass.flags().render_to_screen {
            None
        } else {
            let surface = self
                .surface
                .as_ref()
                .ok_or_else(|| Error::config("DepthPass rendered before initialize"))?;
            Some(surface.id())
        };
        self.render_pass.render_into(backend, target)
    }

    fn dispose(&mut self, backend: &mut dyn Backend) {
        if let Some(surface) = self.surface.take() {
            backend.dispose_surface(&surface);
        }
        self.render_pass.dispose(backend);
    }
}
