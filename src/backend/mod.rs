//! Opaque rendering backend interface.
//!
//! The composer and passes never touch GPU objects directly. They talk to a
//! [`Backend`] through plain handles: surfaces (colour + optional depth
//! render targets), textures, scenes, cameras and the shared fullscreen
//! geometry. A backend is expected to compose the final shader source from a
//! [`ShaderProgram`] (extensions, defines, body) and bind its uniforms.

pub mod headless;

use std::collections::BTreeSet;

use glam::Vec4;
use serde::Deserialize;

use crate::effect::Extension;
use crate::error::BackendError;
use crate::uniform::{DefineMap, UniformMap};

/// Texture owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub struct TextureHandle(pub u64);

/// Render target owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(pub u64);

/// Scene to render. Scene graph traversal is the backend's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryHandle(pub u64);

/// Scene object, used for render-layer bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

/// Colour buffer precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameBufferType {
    #[default]
    UnsignedByte,
    HalfFloat,
}

/// How depth is stored in a depth texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DepthPacking {
    #[default]
    Basic,
    Rgba,
}

impl DepthPacking {
    /// Value of the `DEPTH_PACKING` define.
    pub fn define_value(self) -> u32 {
        match self {
            DepthPacking::Basic => 3200,
            DepthPacking::Rgba => 3201,
        }
    }
}

/// Backend limits used for non-fatal budget warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub max_fragment_uniforms: usize,
    pub max_varyings: usize,
}

impl Default for Capabilities {
    fn default() -> Self {
        // WebGL 1 minimums.
        Self {
            max_fragment_uniforms: 16,
            max_varyings: 8,
        }
    }
}

/// Description of a surface to allocate.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub depth_buffer: bool,
    pub stencil_buffer: bool,
    pub frame_buffer_type: FrameBufferType,
    pub multisampling: u32,
}

impl SurfaceDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width: width.max(1),
            height: height.max(1),
            depth_buffer: false,
            stencil_buffer: false,
            frame_buffer_type: FrameBufferType::UnsignedByte,
            multisampling: 0,
        }
    }
}

/// A colour render target with optional depth/stencil attachments.
///
/// Surfaces are plain descriptions of backend allocations; swapping two
/// `Surface` values relabels them without touching the allocations.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    id: SurfaceId,
    label: String,
    width: u32,
    height: u32,
    color: TextureHandle,
    depth_texture: Option<TextureHandle>,
    depth_buffer: bool,
    stencil_buffer: bool,
}

impl Surface {
    /// Construct the description of a freshly allocated surface.
    pub fn new(id: SurfaceId, color: TextureHandle, desc: &SurfaceDesc) -> Self {
        Self {
            id,
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
            color,
            depth_texture: None,
            depth_buffer: desc.depth_buffer,
            stencil_buffer: desc.stencil_buffer,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color(&self) -> TextureHandle {
        self.color
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth_texture
    }

    pub fn has_depth_buffer(&self) -> bool {
        self.depth_buffer
    }

    pub fn has_stencil_buffer(&self) -> bool {
        self.stencil_buffer
    }

    /// Record new dimensions. Called by backends from `resize_surface`.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Record the attached depth texture. Called by backends.
    pub fn set_depth_attachment(&mut self, texture: Option<TextureHandle>) {
        self.depth_texture = texture;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilFunc {
    Always,
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilOp {
    Keep,
    Replace,
}

/// Complete stencil configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub test: bool,
    pub func: StencilFunc,
    pub reference: u32,
    pub mask: u32,
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    /// A locked stencil buffer ignores writes.
    pub locked: bool,
}

impl StencilState {
    pub const DISABLED: StencilState = StencilState {
        test: false,
        func: StencilFunc::Always,
        reference: 0,
        mask: 0xffff_ffff,
        fail: StencilOp::Keep,
        depth_fail: StencilOp::Keep,
        pass: StencilOp::Keep,
        locked: false,
    };

    /// Stencil fill: every fragment writes `value`.
    pub fn write(value: u32) -> Self {
        Self {
            test: true,
            func: StencilFunc::Always,
            reference: value,
            fail: StencilOp::Replace,
            depth_fail: StencilOp::Replace,
            pass: StencilOp::Replace,
            ..Self::DISABLED
        }
    }

    /// Read-only comparison against `value`.
    pub fn compare(func: StencilFunc, value: u32) -> Self {
        Self {
            test: true,
            func,
            reference: value,
            locked: true,
            ..Self::DISABLED
        }
    }
}

impl Default for StencilState {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Which buffers accept writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMask {
    pub color: bool,
    pub depth: bool,
}

impl WriteMask {
    pub const ALL: WriteMask = WriteMask {
        color: true,
        depth: true,
    };
    pub const NONE: WriteMask = WriteMask {
        color: false,
        depth: false,
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearFlags {
    pub color: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl ClearFlags {
    pub const ALL: ClearFlags = ClearFlags {
        color: true,
        depth: true,
        stencil: true,
    };

    pub fn any(&self) -> bool {
        self.color || self.depth || self.stencil
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: Vec4,
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: Vec4::ZERO,
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// Material substituted for every object while rendering a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideMaterial {
    /// Write packed or raw depth into the colour target.
    Depth(DepthPacking),
}

/// Everything a backend needs to build and bind a fullscreen program.
#[derive(Debug, Clone, Default)]
pub struct ShaderProgram {
    pub label: String,
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub defines: DefineMap,
    pub uniforms: UniformMap,
    pub extensions: BTreeSet<Extension>,
}

impl ShaderProgram {
    pub fn new(label: impl Into<String>, vertex_shader: &str, fragment_shader: &str) -> Self {
        Self {
            label: label.into(),
            vertex_shader: vertex_shader.to_string(),
            fragment_shader: fragment_shader.to_string(),
            ..Default::default()
        }
    }

    fn preamble(&self, with_extensions: bool) -> String {
        let mut out = String::new();
        if with_extensions {
            for ext in &self.extensions {
                out.push_str(&format!("#extension {} : enable\n", ext.glsl_name()));
            }
        }
        for (name, value) in self.defines.iter() {
            out.push_str(&format!("#define {} {}\n", name, value));
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Fragment source with extension directives and defines prepended.
    pub fn full_fragment_source(&self) -> String {
        format!("{}{}", self.preamble(true), self.fragment_shader)
    }

    /// Vertex source with defines prepended.
    pub fn full_vertex_source(&self) -> String {
        format!("{}{}", self.preamble(false), self.vertex_shader)
    }
}

/// The opaque renderer every pass is written against.
pub trait Backend {
    fn capabilities(&self) -> Capabilities;

    /// Size of the drawing buffer in pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    /// Resize the visible framebuffer.
    fn set_size(&mut self, width: u32, height: u32);

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Surface, BackendError>;

    /// Resize a surface and any attachment it carries, keeping its identity.
    fn resize_surface(
        &mut self,
        surface: &mut Surface,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError>;

    fn dispose_surface(&mut self, surface: &Surface);

    fn create_depth_texture(&mut self, width: u32, height: u32)
        -> Result<TextureHandle, BackendError>;

    /// Attach (or detach, with `None`) a depth texture to a surface.
    fn attach_depth_texture(&mut self, surface: &mut Surface, texture: Option<TextureHandle>);

    fn dispose_texture(&mut self, texture: TextureHandle);

    fn create_fullscreen_geometry(&mut self) -> Result<GeometryHandle, BackendError>;

    fn dispose_geometry(&mut self, geometry: GeometryHandle);

    /// Bind a render target; `None` is the visible framebuffer.
    fn set_render_target(&mut self, target: Option<SurfaceId>);

    fn clear(&mut self, flags: ClearFlags, values: ClearValues);

    fn set_write_mask(&mut self, mask: WriteMask);

    fn set_stencil(&mut self, state: StencilState);

    /// Render a scene into the bound target.
    fn render(
        &mut self,
        scene: SceneHandle,
        camera: CameraHandle,
        override_material: Option<OverrideMaterial>,
    ) -> Result<(), BackendError>;

    /// Draw the fullscreen geometry with a program into the bound target.
    fn draw_fullscreen(
        &mut self,
        geometry: GeometryHandle,
        program: &ShaderProgram,
    ) -> Result<(), BackendError>;

    /// Near and far clip distances of a camera.
    fn camera_clip_range(&self, camera: CameraHandle) -> (f32, f32);
}

/// Fullscreen triangle shared by every fullscreen pass of a composer.
///
/// Created once by the composer, lent to passes through
/// [`PassInit`](crate::pass::PassInit) and disposed once by the composer.
#[derive(Debug)]
pub struct FullscreenTriangle {
    geometry: GeometryHandle,
}

impl FullscreenTriangle {
    pub fn create(backend: &mut dyn Backend) -> Result<Self, BackendError> {
        Ok(Self {
            geometry: backend.create_fullscreen_geometry()?,
        })
    }

    pub fn geometry(&self) -> GeometryHandle {
        self.geometry
    }

    pub fn dispose(&self, backend: &mut dyn Backend) {
        backend.dispose_geometry(self.geometry);
    }
}

/// Bind either the visible framebuffer or `surface`.
pub(crate) fn bind_target(backend: &mut dyn Backend, surface: &Surface, render_to_screen: bool) {
    if render_to_screen {
        backend.set_render_target(None);
    } else {
        backend.set_render_target(Some(surface.id()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniform::Uniform;

    #[test]
    fn test_program_preamble_lists_extensions_then_defines() {
        let mut program = ShaderProgram::new("test", "void main() {}", "void main() {}");
        program.extensions.insert(Extension::Derivatives);
        program.defines.insert("UV", "vUv".to_string());
        program.uniforms.insert("time", Uniform::float(0.0));

        let frag = program.full_fragment_source();
        let ext = frag.find("#extension GL_OES_standard_derivatives").unwrap();
        let def = frag.find("#define UV vUv").unwrap();
        assert!(ext < def);
        assert!(!program.full_vertex_source().contains("#extension"));
    }

    #[test]
    fn test_stencil_presets() {
        let fill = StencilState::write(1);
        assert!(fill.test && !fill.locked);
        assert_eq!(fill.pass, StencilOp::Replace);

        let cmp = StencilState::compare(StencilFunc::NotEqual, 1);
        assert!(cmp.locked);
        assert_eq!(cmp.func, StencilFunc::NotEqual);
    }
}
