//! The pass that hosts merged effects.

use glam::Vec2;
use log::{debug, error, warn};
use serde::Deserialize;

use super::{Pass, PassFlags, PassInit};
use crate::backend::{
    bind_target, Backend, CameraHandle, Capabilities, DepthPacking, FrameBufferType,
    GeometryHandle, ShaderProgram, Surface, TextureHandle,
};
use crate::effect::Effect;
use crate::error::{Error, Result};
use crate::shader::{compile, MergeResult};
use crate::uniform::{DefineMap, Uniform, UniformMap, UniformValue};

fn default_min_time() -> f32 {
    1.0 / 1000.0
}

fn default_max_time() -> f32 {
    1.0
}

/// Effect pass settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectPassConfig {
    #[serde(default)]
    pub dithering: bool,
    /// Lower clamp for the frame delta, in seconds.
    #[serde(default = "default_min_time")]
    pub min_time: f32,
    /// Upper clamp for the frame delta, in seconds.
    #[serde(default = "default_max_time")]
    pub max_time: f32,
}

impl Default for EffectPassConfig {
    fn default() -> Self {
        Self {
            dithering: false,
            min_time: default_min_time(),
            max_time: default_max_time(),
        }
    }
}

impl EffectPassConfig {
    fn clamp_delta(&self, delta: f32) -> f32 {
        delta.max(self.min_time).min(self.max_time)
    }
}

/// Merged program exceeds a backend limit. Rendering still proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetWarning {
    Uniforms { count: usize, max: usize },
    Varyings { count: usize, max: usize },
}

/// Uniforms every merged program reads, owned by the pass.
#[derive(Debug)]
struct RuntimeUniforms {
    input_buffer: Uniform,
    depth_buffer: Uniform,
    resolution: Uniform,
    texel_size: Uniform,
    camera_near: Uniform,
    camera_far: Uniform,
    aspect: Uniform,
    time: Uniform,
}

impl RuntimeUniforms {
    fn new() -> Self {
        Self {
            input_buffer: Uniform::texture(None),
            depth_buffer: Uniform::texture(None),
            resolution: Uniform::new(Vec2::ONE),
            texel_size: Uniform::new(Vec2::ONE),
            camera_near: Uniform::float(0.3),
            camera_far: Uniform::float(1000.0),
            aspect: Uniform::float(1.0),
            time: Uniform::float(0.0),
        }
    }

    fn map(&self) -> UniformMap {
        [
            ("inputBuffer", &self.input_buffer),
            ("depthBuffer", &self.depth_buffer),
            ("resolution", &self.resolution),
            ("texelSize", &self.texel_size),
            ("cameraNear", &self.camera_near),
            ("cameraFar", &self.camera_far),
            ("aspect", &self.aspect),
            ("time", &self.time),
        ]
        .into_iter()
        .map(|(name, uniform)| (name, uniform.clone()))
        .collect()
    }
}

/// Renders a list of effects with a single merged program.
///
/// Structural edits (effect list changes, or edits that mark an effect
/// dirty) are compiled lazily before the next render. A failed compilation
/// keeps the previously installed program.
#[derive(Debug)]
pub struct EffectPass {
    name: String,
    flags: PassFlags,
    config: EffectPassConfig,
    effects: Vec<Effect>,
    camera: Option<CameraHandle>,
    program: ShaderProgram,
    merge: MergeResult,
    runtime: RuntimeUniforms,
    depth_texture: Option<TextureHandle>,
    depth_packing: DepthPacking,
    frame_buffer_type: FrameBufferType,
    capabilities: Option<Capabilities>,
    budget_warnings: Vec<BudgetWarning>,
    geometry: Option<GeometryHandle>,
    alpha: bool,
    size: Option<(u32, u32)>,
    needs_recompile: bool,
    needs_effect_sync: bool,
    initialized: bool,
}

impl EffectPass {
    /// Create a pass and merge `effects` right away.
    pub fn new(camera: Option<CameraHandle>, effects: Vec<Effect>) -> Result<Self> {
        Self::with_config(camera, effects, EffectPassConfig::default())
    }

    pub fn with_config(
        camera: Option<CameraHandle>,
        effects: Vec<Effect>,
        config: EffectPassConfig,
    ) -> Result<Self> {
        let merge = compile(&effects)?;
        let name = if effects.is_empty() {
            "EffectPass".to_string()
        } else {
            let names: Vec<&str> = effects.iter().map(Effect::name).collect();
            format!("EffectPass({})", names.join(", "))
        };

        let mut pass = Self {
            name,
            flags: PassFlags::default(),
            config,
            effects,
            camera,
            program: ShaderProgram::default(),
            merge,
            runtime: RuntimeUniforms::new(),
            depth_texture: None,
            depth_packing: DepthPacking::Basic,
            frame_buffer_type: FrameBufferType::UnsignedByte,
            capabilities: None,
            budget_warnings: Vec::new(),
            geometry: None,
            alpha: true,
            size: None,
            needs_recompile: false,
            needs_effect_sync: false,
            initialized: false,
        };
        pass.install();
        for effect in &mut pass.effects {
            effect.clear_dirty();
        }
        Ok(pass)
    }

    pub fn config(&self) -> &EffectPassConfig {
        &self.config
    }

    pub fn set_dithering(&mut self, dithering: bool) {
        if self.config.dithering != dithering {
            self.config.dithering = dithering;
            self.program.defines = self.defines();
        }
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Mutable access to an effect. Shader-affecting edits are picked up
    /// before the next render.
    pub fn effect_mut(&mut self, index: usize) -> Option<&mut Effect> {
        self.effects.get_mut(index)
    }

    /// Replace the effect list. On failure the previous list and program
    /// stay installed and the rejected list is dropped.
    ///
    /// The replaced effects are handed back undisposed.
    pub fn set_effects(&mut self, effects: Vec<Effect>) -> Result<Vec<Effect>> {
        let merge = compile(&effects)?;
        let old = std::mem::replace(&mut self.effects, effects);
        self.merge = merge;
        self.after_structural_change();
        Ok(old)
    }

    pub fn add_effect(&mut self, effect: Effect) -> Result<()> {
        self.effects.push(effect);
        match compile(&self.effects) {
            Ok(merge) => {
                self.merge = merge;
                self.after_structural_change();
                Ok(())
            }
            Err(e) => {
                let rejected = self.effects.pop();
                warn!(
                    "rejected effect '{}': {}",
                    rejected.as_ref().map_or("?", Effect::name),
                    e
                );
                Err(e.into())
            }
        }
    }

    pub fn remove_effect(&mut self, index: usize) -> Result<Effect> {
        if index >= self.effects.len() {
            return Err(Error::InvalidPassIndex {
                index,
                len: self.effects.len(),
            });
        }
        let removed = self.effects.remove(index);
        match compile(&self.effects) {
            Ok(merge) => {
                self.merge = merge;
                self.after_structural_change();
                Ok(removed)
            }
            Err(e) => {
                self.effects.insert(index, removed);
                Err(e.into())
            }
        }
    }

    fn after_structural_change(&mut self) {
        self.install();
        for effect in &mut self.effects {
            effect.clear_dirty();
        }
        self.needs_recompile = false;
        self.needs_effect_sync = self.initialized;
    }

    /// Bring effects added after `initialize` up to date.
    fn sync_effects(&mut self, backend: &mut dyn Backend) {
        for effect in &mut self.effects {
            effect.initialize(backend, self.alpha, self.frame_buffer_type);
            if let Some((width, height)) = self.size {
                effect.set_size(width, height);
            }
            effect.set_depth_texture(self.depth_texture, self.depth_packing);
        }
        self.needs_effect_sync = false;
    }

    /// Whether the next render will recompile.
    pub fn is_dirty(&self) -> bool {
        self.needs_recompile || self.effects.iter().any(Effect::is_dirty)
    }

    /// Force a recompilation before the next render.
    pub fn mark_dirty(&mut self) {
        self.needs_recompile = true;
    }

    /// Diagnostics of the installed program.
    pub fn merge_result(&self) -> &MergeResult {
        &self.merge
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn budget_warnings(&self) -> &[BudgetWarning] {
        &self.budget_warnings
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth_texture
    }

    pub fn camera(&self) -> Option<CameraHandle> {
        self.camera
    }

    /// Accumulated, clamped time in seconds.
    pub fn time(&self) -> f32 {
        self.runtime.time.as_float()
    }

    /// Recompile now if anything changed.
    pub fn recompile(&mut self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        match compile(&self.effects) {
            Ok(merge) => {
                self.merge = merge;
                self.after_structural_change();
                debug!("{}: recompiled", self.name);
                Ok(())
            }
            Err(e) => {
                error!("{}: recompilation failed, keeping last program: {}", self.name, e);
                Err(e.into())
            }
        }
    }

    fn defines(&self) -> DefineMap {
        let mut defines = DefineMap::new();
        defines.insert(
            "DEPTH_PACKING",
            self.depth_packing.define_value().to_string(),
        );
        if self.config.dithering {
            defines.insert("DITHERING", "1".to_string());
        }
        if self.frame_buffer_type == FrameBufferType::HalfFloat {
            defines.insert("FRAMEBUFFER_PRECISION_HIGH", "1".to_string());
        }
        defines.extend_from(&self.merge.defines);
        defines
    }

    /// Install the current merge result as the program.
    fn install(&mut self) {
        let mut uniforms = self.runtime.map();
        uniforms.extend_from(&self.merge.uniforms);

        self.program = ShaderProgram {
            label: self.name.clone(),
            vertex_shader: self.merge.vertex_shader.clone(),
            fragment_shader: self.merge.fragment_shader.clone(),
            defines: self.defines(),
            uniforms,
            extensions: self.merge.extensions.clone(),
        };

        self.flags.needs_swap = self.merge.needs_swap();
        self.flags.needs_depth_texture = self.merge.needs_depth_texture();
        self.check_budget();
    }

    fn check_budget(&mut self) {
        self.budget_warnings.clear();
        let Some(caps) = self.capabilities else {
            return;
        };
        if self.merge.uniform_count > caps.max_fragment_uniforms {
            warn!(
                "{}: {} uniforms exceed the backend limit of {}",
                self.name, self.merge.uniform_count, caps.max_fragment_uniforms
            );
            self.budget_warnings.push(BudgetWarning::Uniforms {
                count: self.merge.uniform_count,
                max: caps.max_fragment_uniforms,
            });
        }
        if self.merge.varying_count > caps.max_varyings {
            warn!(
                "{}: {} varyings exceed the backend limit of {}",
                self.name, self.merge.varying_count, caps.max_varyings
            );
            self.budget_warnings.push(BudgetWarning::Varyings {
                count: self.merge.varying_count,
                max: caps.max_varyings,
            });
        }
    }
}

impl Pass for EffectPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> &PassFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut PassFlags {
        &mut self.flags
    }

    fn initialize(&mut self, backend: &mut dyn Backend, init: &PassInit) -> Result<()> {
        self.geometry = Some(init.fullscreen);
        self.alpha = init.alpha;
        self.frame_buffer_type = init.frame_buffer_type;
        self.capabilities = Some(backend.capabilities());
        for effect in &mut self.effects {
            effect.initialize(backend, init.alpha, init.frame_buffer_type);
        }
        self.program.defines = self.defines();
        self.check_budget();
        self.initialized = true;
        Ok(())
    }

    fn set_size(&mut self, _backend: &mut dyn Backend, width: u32, height: u32) -> Result<()> {
        self.size = Some((width, height));
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        self.runtime.resolution.set(Vec2::new(w, h));
        self.runtime.texel_size.set(Vec2::new(1.0 / w, 1.0 / h));
        self.runtime.aspect.set(w / h);
        for effect in &mut self.effects {
            effect.set_size(width, height);
        }
        Ok(())
    }

    fn set_depth_texture(&mut self, texture: Option<TextureHandle>, packing: DepthPacking) {
        self.depth_texture = texture;
        self.depth_packing = packing;
        self.runtime
            .depth_buffer
            .set(UniformValue::Texture(texture));
        for effect in &mut self.effects {
            effect.set_depth_texture(texture, packing);
        }
        self.program.defines = self.defines();
    }

    fn set_main_camera(&mut self, camera: CameraHandle) {
        self.camera = Some(camera);
    }

    fn render(
        &mut self,
        backend: &mut dyn Backend,
        input: &Surface,
        output: &Surface,
        delta: f32,
        _stencil_test: bool,
    ) -> Result<()> {
        if self.is_dirty() {
            self.recompile()?;
        }
        if self.needs_effect_sync {
            self.sync_effects(backend);
        }
        let delta = self.config.clamp_delta(delta);
        self.runtime
            .input_buffer
            .set(UniformValue::Texture(Some(input.color())));
        self.runtime.time.set(self.runtime.time.as_float() + delta);
        if let Some(camera) = self.camera {
            let (near, far) = backend.camera_clip_range(camera);
            self.runtime.camera_near.set(near);
            self.runtime.camera_far.set(far);
        }

        for effect in &mut self.effects {
            effect.update(backend, input, delta)?;
        }

        // Without active effects the program is a plain copy, which only
        // matters when this pass presents to the screen.
        if self.merge.skip_rendering && !self.flags.render_to_screen {
            return Ok(());
        }
        let geometry = self
            .geometry
            .ok_or_else(|| Error::config(format!("'{}' rendered before initialize", self.name)))?;

        bind_target(backend, output, self.flags.render_to_screen);
        backend.draw_fullscreen(geometry, &self.program)?;
        Ok(())
    }

    fn dispose(&mut self, backend: &mut dyn Backend) {
        for effect in &mut self.effects {
            effect.dispose(backend);
        }
        self.flags.mark_disposed();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use crate::backend::SurfaceDesc;
    use crate::blend::BlendFunction;
    use crate::effect::{EffectAttributes, EffectHooks};

    const INVERT: &str = "void mainImage(const in vec4 inputColor, const in vec2 uv, out vec4 outputColor) {\n\toutputColor = vec4(1.0 - inputColor.rgb, inputColor.a);\n}";

    const SAMPLE: &str = "void mainImage(const in vec4 inputColor, const in vec2 uv, out vec4 outputColor) {\n\toutputColor = texture2D(inputBuffer, uv + texelSize);\n}";

    fn init(backend: &mut HeadlessBackend) -> PassInit {
        PassInit {
            alpha: true,
            frame_buffer_type: FrameBufferType::UnsignedByte,
            fullscreen: backend.create_fullscreen_geometry().unwrap(),
            width: 64,
            height: 32,
        }
    }

    #[test]
    fn test_program_carries_runtime_uniforms_and_defines() {
        let pass = EffectPass::new(None, vec![Effect::builder("invert", INVERT).build()]).unwrap();
        let program = pass.program();
        for name in ["inputBuffer", "depthBuffer", "resolution", "texelSize", "time", "e0BlendOpacity"] {
            assert!(program.uniforms.contains_key(name), "missing {}", name);
        }
        assert_eq!(program.defines.get("DEPTH_PACKING").map(String::as_str), Some("3200"));
        assert_eq!(program.defines.get("UV").map(String::as_str), Some("vUv"));
        assert!(pass.flags().needs_swap);
        assert_eq!(pass.name(), "EffectPass(invert)");
    }

    #[test]
    fn test_all_skipped_effects_disable_swap() {
        let pass = EffectPass::new(
            None,
            vec![Effect::builder("off", INVERT)
                .blend_function(BlendFunction::Skip)
                .attributes(EffectAttributes::DEPTH)
                .build()],
        )
        .unwrap();
        assert!(!pass.flags().needs_swap);
        assert!(pass.flags().needs_depth_texture);
        assert!(pass.merge_result().skip_rendering);
    }

    struct CountingHooks(Rc<Cell<u32>>);

    impl EffectHooks for CountingHooks {
        fn update(
            &mut self,
            _backend: &mut dyn Backend,
            _input: &Surface,
            _delta: f32,
            _uniforms: &UniformMap,
        ) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    fn skipped(updates: &Rc<Cell<u32>>) -> Effect {
        Effect::builder("off", INVERT)
            .blend_function(BlendFunction::Skip)
            .hooks(Box::new(CountingHooks(updates.clone())))
            .build()
    }

    #[test]
    fn test_skipped_effects_still_update() {
        let mut backend = HeadlessBackend::default();
        let init = init(&mut backend);
        let input = backend.create_surface(&SurfaceDesc::new("in", 64, 32)).unwrap();
        let output = backend.create_surface(&SurfaceDesc::new("out", 64, 32)).unwrap();

        let updates = Rc::new(Cell::new(0));
        let mut pass = EffectPass::new(None, vec![skipped(&updates)]).unwrap();
        pass.initialize(&mut backend, &init).unwrap();
        backend.take_commands();

        pass.render(&mut backend, &input, &output, 0.016, false).unwrap();
        pass.render(&mut backend, &input, &output, 0.016, false).unwrap();
        assert_eq!(updates.get(), 2);
        assert_eq!(backend.draws().count(), 0);
    }

    #[test]
    fn test_skipped_pass_still_presents_to_screen() {
        let mut backend = HeadlessBackend::default();
        let init = init(&mut backend);
        let input = backend.create_surface(&SurfaceDesc::new("in", 64, 32)).unwrap();
        let output = backend.create_surface(&SurfaceDesc::new("out", 64, 32)).unwrap();

        let updates = Rc::new(Cell::new(0));
        let mut pass = EffectPass::new(None, vec![skipped(&updates)]).unwrap();
        pass.initialize(&mut backend, &init).unwrap();
        pass.flags_mut().render_to_screen = true;
        backend.take_commands();

        pass.render(&mut backend, &input, &output, 0.016, false).unwrap();
        assert_eq!(updates.get(), 1);
        assert!(!pass.flags().needs_swap);
        let targets: Vec<_> = backend
            .draws()
            .map(|c| match c {
                Command::DrawFullscreen { target, .. } => *target,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(targets, vec![None]);
    }

    #[test]
    fn test_failed_add_keeps_last_good_program() {
        let conv = || {
            Effect::builder("conv", SAMPLE)
                .attributes(EffectAttributes::CONVOLUTION)
                .build()
        };
        let mut pass = EffectPass::new(None, vec![conv()]).unwrap();
        let before = pass.program().fragment_shader.clone();

        let err = pass.add_effect(conv()).unwrap_err();
        assert!(matches!(err, Error::Merge(_)));
        assert_eq!(pass.effects().len(), 1);
        assert_eq!(pass.program().fragment_shader, before);
    }

    #[test]
    fn test_lazy_recompile_on_dirty_effect() {
        let mut backend = HeadlessBackend::default();
        let init = init(&mut backend);
        let input = backend.create_surface(&SurfaceDesc::new("in", 64, 32)).unwrap();
        let output = backend.create_surface(&SurfaceDesc::new("out", 64, 32)).unwrap();

        let mut pass = EffectPass::new(None, vec![Effect::builder("invert", INVERT).build()]).unwrap();
        pass.initialize(&mut backend, &init).unwrap();
        pass.effect_mut(0).unwrap().set_blend_function(BlendFunction::Screen);
        assert!(pass.is_dirty());

        pass.render(&mut backend, &input, &output, 0.016, false).unwrap();
        assert!(!pass.is_dirty());
        assert!(pass.program().fragment_shader.contains("blend16(color0, color1, e0BlendOpacity)"));
    }

    #[test]
    fn test_failed_lazy_recompile_keeps_program_and_dirty_flag() {
        let mut backend = HeadlessBackend::default();
        let init = init(&mut backend);
        let input = backend.create_surface(&SurfaceDesc::new("in", 64, 32)).unwrap();

        let mut pass = EffectPass::new(None, vec![Effect::builder("invert", INVERT).build()]).unwrap();
        pass.initialize(&mut backend, &init).unwrap();
        let before = pass.program().fragment_shader.clone();

        pass.effect_mut(0).unwrap().set_fragment_shader("void nothing() {}");
        assert!(pass.render(&mut backend, &input, &input, 0.016, false).is_err());
        assert_eq!(pass.program().fragment_shader, before);
        assert!(pass.is_dirty());
    }

    #[test]
    fn test_delta_is_clamped() {
        let mut backend = HeadlessBackend::default();
        let init = init(&mut backend);
        let input = backend.create_surface(&SurfaceDesc::new("in", 64, 32)).unwrap();

        let mut pass = EffectPass::new(None, vec![Effect::builder("invert", INVERT).build()]).unwrap();
        pass.initialize(&mut backend, &init).unwrap();
        pass.render(&mut backend, &input, &input, 5.0, false).unwrap();
        pass.render(&mut backend, &input, &input, 0.0, false).unwrap();
        assert!((pass.time() - 1.001).abs() < 1e-5);
    }

    #[test]
    fn test_budget_warning_is_not_fatal() {
        let mut backend = HeadlessBackend::default().with_capabilities(Capabilities {
            max_fragment_uniforms: 1,
            max_varyings: 8,
        });
        let init = init(&mut backend);
        let mut pass = EffectPass::new(None, vec![Effect::builder("invert", INVERT).build()]).unwrap();
        pass.initialize(&mut backend, &init).unwrap();
        assert!(pass.budget_warnings().is_empty());

        pass.add_effect(Effect::builder("again", INVERT).build()).unwrap();
        assert_eq!(
            pass.budget_warnings(),
            &[BudgetWarning::Uniforms { count: 2, max: 1 }]
        );
    }

    #[test]
    fn test_size_updates_runtime_uniforms() {
        let mut backend = HeadlessBackend::default();
        let mut pass = EffectPass::new(None, vec![Effect::builder("invert", INVERT).build()]).unwrap();
        pass.set_size(&mut backend, 200, 100).unwrap();
        let program = pass.program();
        assert_eq!(
            program.uniforms.get("resolution").unwrap().get(),
            UniformValue::Vec2(Vec2::new(200.0, 100.0))
        );
        assert_eq!(program.uniforms.get("aspect").unwrap().as_float(), 2.0);
    }
}
