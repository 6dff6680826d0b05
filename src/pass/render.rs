use super::{ClearPass, Pass, PassFlags};
use crate::backend::{
    Backend, CameraHandle, OverrideMaterial, SceneHandle, Surface, SurfaceId,
};
use crate::error::Result;

/// Renders a scene into the input surface.
///
/// This is normally the first pass of a pipeline. It does not swap: later
/// passes read the image it rendered from the same surface.
#[derive(Debug, Clone)]
pub struct RenderPass {
    name: String,
    flags: PassFlags,
    scene: SceneHandle,
    camera: CameraHandle,
    override_material: Option<OverrideMaterial>,
    clear_pass: ClearPass,
    clear: bool,
}

impl RenderPass {
    pub fn new(scene: SceneHandle, camera: CameraHandle) -> Self {
        Self {
            name: "RenderPass".to_string(),
            flags: PassFlags::without_swap(),
            scene,
            camera,
            override_material: None,
            clear_pass: ClearPass::default(),
            clear: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_override_material(mut self, material: OverrideMaterial) -> Self {
        self.override_material = Some(material);
        self
    }

    pub fn scene(&self) -> SceneHandle {
        self.scene
    }

    pub fn camera(&self) -> CameraHandle {
        self.camera
    }

    /// Whether the target is cleared before rendering.
    pub fn set_clear(&mut self, clear: bool) {
        self.clear = clear;
    }

    pub fn clear_pass_mut(&mut self) -> &mut ClearPass {
        &mut self.clear_pass
    }

    /// Render into an explicit target; `None` is the screen.
    pub fn render_into(&mut self, backend: &mut dyn Backend, target: Option<SurfaceId>) -> Result<()> {
        backend.set_render_target(target);
        if self.clear {
            self.clear_pass.clear_bound(backend);
        }
        backend.render(self.scene, self.camera, self.override_material)?;
        Ok(())
    }
}

impl Pass for RenderPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn set_main_scene(&mut self, scene: SceneHandle) {
        self.scene = scene;
    }

    fn set_main_camera(&mut self, camera: CameraHandle) {
        self.camera = camera;
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        _output: &Surface,
        _delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        let target = if self.flags.render_to_screen {
            None
        } else {
            Some(input.id())
        };
        self.render_into(backend, target)
    }
}
