//! Effect descriptors.
//!
//! An [`Effect`] is a plain record: shader text, macros, uniforms, required
//! extensions, attribute flags and a blend mode. Effects that need per-frame
//! work (time-varying uniforms, nested sub-renders) attach an
//! [`EffectHooks`] implementation instead of subclassing anything.
//!
//! Editing anything that changes the compiled shader marks the effect dirty;
//! the owning effect pass recompiles before its next render.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::Deserialize;

use crate::backend::{Backend, DepthPacking, FrameBufferType, Surface, TextureHandle};
use crate::blend::{BlendFunction, BlendMode};
use crate::error::Result;
use crate::uniform::{DefineMap, Uniform, UniformMap};

/// Bitmask of special effect requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EffectAttributes(u8);

impl EffectAttributes {
    pub const NONE: EffectAttributes = EffectAttributes(0);
    /// The effect reads scene depth.
    pub const DEPTH: EffectAttributes = EffectAttributes(1);
    /// The effect samples neighbouring texels of the original input.
    pub const CONVOLUTION: EffectAttributes = EffectAttributes(2);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: EffectAttributes) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EffectAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        EffectAttributes(self.0 | rhs.0)
    }
}

impl BitOrAssign for EffectAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EffectAttributes {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        EffectAttributes(self.0 & rhs.0)
    }
}

/// Attribute names accepted in JSON descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeName {
    Depth,
    Convolution,
}

impl From<AttributeName> for EffectAttributes {
    fn from(name: AttributeName) -> Self {
        match name {
            AttributeName::Depth => EffectAttributes::DEPTH,
            AttributeName::Convolution => EffectAttributes::CONVOLUTION,
        }
    }
}

/// Backend capability an effect may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Extension {
    #[serde(rename = "derivatives")]
    Derivatives,
    #[serde(rename = "fragment-depth-write")]
    FragDepth,
    #[serde(rename = "multiple-render-targets")]
    DrawBuffers,
    #[serde(rename = "explicit-texture-lod")]
    ShaderTextureLod,
}

impl Extension {
    pub fn name(self) -> &'static str {
        match self {
            Extension::Derivatives => "derivatives",
            Extension::FragDepth => "fragment-depth-write",
            Extension::DrawBuffers => "multiple-render-targets",
            Extension::ShaderTextureLod => "explicit-texture-lod",
        }
    }

    /// GLSL ES extension directive name.
    pub fn glsl_name(self) -> &'static str {
        match self {
            Extension::Derivatives => "GL_OES_standard_derivatives",
            Extension::FragDepth => "GL_EXT_frag_depth",
            Extension::DrawBuffers => "GL_EXT_draw_buffers",
            Extension::ShaderTextureLod => "GL_EXT_shader_texture_lod",
        }
    }
}

/// Per-frame capability of an effect.
///
/// All methods default to doing nothing.
pub trait EffectHooks {
    fn initialize(&mut self, _backend: &mut dyn Backend, _alpha: bool, _frame_buffer_type: FrameBufferType) {}

    /// Called once per frame before the merged program is drawn, in effect
    /// list order. `uniforms` are the effect's own (unprefixed) uniforms.
    fn update(
        &mut self,
        _backend: &mut dyn Backend,
        _input: &Surface,
        _delta: f32,
        _uniforms: &UniformMap,
    ) -> Result<()> {
        Ok(())
    }

    fn set_size(&mut self, _width: u32, _height: u32) {}

    fn set_depth_texture(&mut self, _texture: Option<TextureHandle>, _packing: DepthPacking) {}

    fn dispose(&mut self, _backend: &mut dyn Backend) {}
}

/// A screen-space shader contribution.
pub struct Effect {
    name: String,
    fragment_shader: String,
    vertex_shader: Option<String>,
    defines: DefineMap,
    uniforms: UniformMap,
    extensions: BTreeSet<Extension>,
    attributes: EffectAttributes,
    blend_mode: BlendMode,
    hooks: Option<Box<dyn EffectHooks>>,
    dirty: bool,
    initialized: bool,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("blend_mode", &self.blend_mode)
            .field("defines", &self.defines)
            .field("uniforms", &self.uniforms.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions)
            .field("hooks", &self.hooks.is_some())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Effect {
    /// Start building an effect from its fragment body.
    pub fn builder(name: impl Into<String>, fragment_shader: impl Into<String>) -> EffectBuilder {
        EffectBuilder::new(name, fragment_shader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fragment_shader(&self) -> &str {
        &self.fragment_shader
    }

    pub fn vertex_shader(&self) -> Option<&str> {
        self.vertex_shader.as_deref()
    }

    pub fn defines(&self) -> &DefineMap {
        &self.defines
    }

    pub fn uniforms(&self) -> &UniformMap {
        &self.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    pub fn extensions(&self) -> &BTreeSet<Extension> {
        &self.extensions
    }

    pub fn attributes(&self) -> EffectAttributes {
        self.attributes
    }

    pub fn blend_mode(&self) -> &BlendMode {
        &self.blend_mode
    }

    /// Whether a shader-affecting field changed since the last merge.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn set_fragment_shader(&mut self, source: impl Into<String>) {
        self.fragment_shader = source.into();
        self.dirty = true;
    }

    pub fn set_vertex_shader(&mut self, source: Option<String>) {
        self.vertex_shader = source;
        self.dirty = true;
    }

    pub fn set_define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name, value.into());
        self.dirty = true;
    }

    pub fn remove_define(&mut self, name: &str) -> Option<String> {
        let removed = self.defines.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Add or replace a uniform binding. Changing a uniform's value does not
    /// require this; use the [`Uniform`] handle directly.
    pub fn add_uniform(&mut self, name: impl Into<String>, uniform: Uniform) {
        self.uniforms.insert(name, uniform);
        self.dirty = true;
    }

    pub fn remove_uniform(&mut self, name: &str) -> Option<Uniform> {
        let removed = self.uniforms.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn set_extensions(&mut self, extensions: BTreeSet<Extension>) {
        self.extensions = extensions;
        self.dirty = true;
    }

    pub fn set_attributes(&mut self, attributes: EffectAttributes) {
        if self.attributes != attributes {
            self.attributes = attributes;
            self.dirty = true;
        }
    }

    pub fn set_blend_function(&mut self, function: BlendFunction) {
        if self.blend_mode.set_function(function) {
            self.dirty = true;
        }
    }

    pub fn has_hooks(&self) -> bool {
        self.hooks.is_some()
    }

    /// Runs the hooks' `initialize` once; later calls do nothing.
    pub(crate) fn initialize(&mut self, backend: &mut dyn Backend, alpha: bool, frame_buffer_type: FrameBufferType) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.initialize(backend, alpha, frame_buffer_type);
        }
    }

    pub(crate) fn update(&mut self, backend: &mut dyn Backend, input: &Surface, delta: f32) -> Result<()> {
        match self.hooks.as_mut() {
            Some(hooks) => hooks.update(backend, input, delta, &self.uniforms),
            None => Ok(()),
        }
    }

    pub(crate) fn set_size(&mut self, width: u32, height: u32) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.set_size(width, height);
        }
    }

    pub(crate) fn set_depth_texture(&mut self, texture: Option<TextureHandle>, packing: DepthPacking) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.set_depth_texture(texture, packing);
        }
    }

    pub(crate) fn dispose(&mut self, backend: &mut dyn Backend) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.dispose(backend);
        }
    }

    /// Build an effect from a JSON descriptor.
    pub fn from_spec(spec: EffectSpec) -> Self {
        let attributes = spec
            .attributes
            .iter()
            .fold(EffectAttributes::NONE, |acc, a| acc | EffectAttributes::from(*a));

        let mut builder = Effect::builder(spec.name, spec.fragment_shader)
            .attributes(attributes)
            .blend_function(spec.blend_function)
            .opacity(spec.opacity);
        if let Some(vertex) = spec.vertex_shader {
            builder = builder.vertex_shader(vertex);
        }
        for (name, value) in spec.defines.iter() {
            builder = builder.define(name, value.clone());
        }
        for (name, uniform) in spec.uniforms.iter() {
            builder = builder.uniform(name, uniform.clone());
        }
        for ext in spec.extensions {
            builder = builder.extension(ext);
        }
        builder.build()
    }
}

/// Builder for [`Effect`].
pub struct EffectBuilder {
    name: String,
    fragment_shader: String,
    vertex_shader: Option<String>,
    defines: DefineMap,
    uniforms: UniformMap,
    extensions: BTreeSet<Extension>,
    attributes: EffectAttributes,
    blend_function: BlendFunction,
    opacity: f32,
    hooks: Option<Box<dyn EffectHooks>>,
}

impl EffectBuilder {
    pub fn new(name: impl Into<String>, fragment_shader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fragment_shader: fragment_shader.into(),
            vertex_shader: None,
            defines: DefineMap::new(),
            uniforms: UniformMap::new(),
            extensions: BTreeSet::new(),
            attributes: EffectAttributes::NONE,
            blend_function: BlendFunction::Normal,
            opacity: 1.0,
            hooks: None,
        }
    }

    pub fn vertex_shader(mut self, source: impl Into<String>) -> Self {
        self.vertex_shader = Some(source.into());
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name, value.into());
        self
    }

    pub fn uniform(mut self, name: impl Into<String>, uniform: Uniform) -> Self {
        self.uniforms.insert(name, uniform);
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.extensions.insert(extension);
        self
    }

    pub fn attributes(mut self, attributes: EffectAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn blend_function(mut self, function: BlendFunction) -> Self {
        self.blend_function = function;
        self
    }

    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn hooks(mut self, hooks: Box<dyn EffectHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Effect {
        Effect {
            name: self.name,
            fragment_shader: self.fragment_shader,
            vertex_shader: self.vertex_shader,
            defines: self.defines,
            uniforms: self.uniforms,
            extensions: self.extensions,
            attributes: self.attributes,
            blend_mode: BlendMode::new(self.blend_function).with_opacity(self.opacity),
            hooks: self.hooks,
            dirty: false,
            initialized: false,
        }
    }
}

fn default_opacity() -> f32 {
    1.0
}

/// JSON descriptor of an effect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSpec {
    pub name: String,
    pub fragment_shader: String,
    #[serde(default)]
    pub vertex_shader: Option<String>,
    #[serde(default)]
    pub defines: DefineMap,
    #[serde(default)]
    pub uniforms: UniformMap,
    #[serde(default)]
    pub extensions: BTreeSet<Extension>,
    #[serde(default)]
    pub attributes: Vec<AttributeName>,
    #[serde(default)]
    pub blend_function: BlendFunction,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}
