//! The effect merge compiler.
//!
//! Active effects are integrated in list order, each under its own symbol
//! prefix (`e0`, `e1`, ...). Every `mainImage` call is followed by a blend
//! line, so the composite colour is a left fold over the effect list:
//!
//! ```text
//! e0MainImage(color0, UV, color1);
//! color0 = blend13(color0, color1, e0BlendOpacity);
//! e1MainImage(color0, UV, color1);
//! color0 = blend1(color0, color1, e1BlendOpacity);
//! ```
//!
//! Compilation is pure and deterministic: the same ordered list always
//! yields byte-identical sources and identical map keys.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use super::symbols::SymbolTable;
use super::templates::{self, fill};
use super::tokenizer::{prefixed, references, rename};
use crate::blend::BlendFunction;
use crate::effect::{Effect, EffectAttributes, Extension};
use crate::error::{MergeError, MergeErrorKind};
use crate::uniform::{DefineMap, UniformMap};

/// Output of [`compile`].
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub fragment_shader: String,
    pub vertex_shader: String,
    /// Prefixed effect macros followed by `UV`.
    pub defines: DefineMap,
    /// Prefixed effect uniforms and blend opacities. Values are the effects'
    /// own uniform handles.
    pub uniforms: UniformMap,
    /// Union of the active effects' extensions.
    pub extensions: BTreeSet<Extension>,
    /// Aggregate attributes, including DEPTH from skipped effects.
    pub attributes: EffectAttributes,
    /// Distinct blend functions with an injected snippet, in id order.
    pub blend_functions: Vec<BlendFunction>,
    pub uv_transformed: bool,
    pub read_depth: bool,
    pub varying_count: usize,
    pub uniform_count: usize,
    /// Indices of the integrated effects in the input list.
    pub active_effects: Vec<usize>,
    /// No effect contributes; the owning pass must not draw or swap.
    pub skip_rendering: bool,
}

impl MergeResult {
    pub fn needs_swap(&self) -> bool {
        !self.skip_rendering
    }

    pub fn needs_depth_texture(&self) -> bool {
        self.attributes.contains(EffectAttributes::DEPTH)
    }
}

#[derive(Debug, Default)]
struct Sections {
    fragment_head: String,
    fragment_main_uv: String,
    fragment_main_image: String,
    vertex_head: String,
    vertex_main_support: String,
}

/// A section is trimmed; one that starts with a preprocessor directive is
/// pushed onto its own line.
fn finish_section(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('#') {
        format!("\n{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Running state while integrating effects.
#[derive(Default)]
struct Merger {
    sections: Sections,
    defines: DefineMap,
    uniforms: UniformMap,
    extensions: BTreeSet<Extension>,
    blend_functions: BTreeSet<BlendFunction>,
    attributes: EffectAttributes,
    uv_transformed: bool,
    read_depth: bool,
    varying_count: usize,
    active_effects: Vec<usize>,
    next_id: usize,
}

impl Merger {
    fn integrate(&mut self, index: usize, effect: &Effect) -> Result<(), MergeError> {
        let error = |kind| MergeError::new(effect.name(), index, kind);
        let symbols = SymbolTable::scan(effect.fragment_shader(), effect.vertex_shader());

        match (symbols.has_main_image, symbols.has_main_uv) {
            (false, false) => return Err(error(MergeErrorKind::MissingEntryPoint)),
            (true, true) => return Err(error(MergeErrorKind::AmbiguousEntryPoint)),
            _ => {}
        }

        let own = effect.attributes();
        let aggregate = self.attributes | own;
        if symbols.has_main_uv && aggregate.contains(EffectAttributes::CONVOLUTION) {
            return Err(error(MergeErrorKind::UvTransformWithConvolution));
        }
        if own.contains(EffectAttributes::CONVOLUTION) && self.uv_transformed {
            return Err(error(MergeErrorKind::UvTransformWithConvolution));
        }
        self.attributes = aggregate;

        let prefix = format!("e{}", self.next_id);
        self.next_id += 1;

        let mut renames: HashMap<String, String> = symbols
            .names()
            .map(|name| (name.to_string(), prefixed(&prefix, name)))
            .collect();
        for name in effect.uniforms().keys() {
            renames.insert(name.to_string(), prefixed(&prefix, name));
        }
        for key in effect.defines().keys() {
            // Function-like macros are keyed by their full signature.
            let name = key.split('(').next().unwrap_or(key).trim();
            renames.insert(name.to_string(), prefixed(&prefix, name));
        }

        for (name, uniform) in effect.uniforms().iter() {
            self.uniforms.insert(prefixed(&prefix, name), uniform.clone());
        }
        for (key, value) in effect.defines().iter() {
            self.defines
                .insert(rename(key, &renames), rename(value, &renames));
        }

        if symbols.has_main_support {
            let arg = if symbols.main_support_uses_uv { "vUv" } else { "" };
            self.sections
                .vertex_main_support
                .push_str(&format!("\t{}MainSupport({});\n", prefix, arg));
            self.varying_count += symbols.varyings.len();
        }

        if symbols.has_main_uv {
            self.sections
                .fragment_main_uv
                .push_str(&format!("\t{}MainUv(UV);\n", prefix));
            self.uv_transformed = true;
        }

        let blend = effect.blend_mode();
        self.blend_functions.insert(blend.function());

        if symbols.has_main_image {
            let reads_depth = own.contains(EffectAttributes::DEPTH)
                && self.attributes.contains(EffectAttributes::DEPTH)
                && references(effect.fragment_shader(), "depth");
            let depth_arg = if reads_depth {
                self.read_depth = true;
                "depth, "
            } else {
                ""
            };

            let opacity = prefixed(&prefix, "blendOpacity");
            self.uniforms.insert(opacity.clone(), blend.opacity().clone());
            self.sections.fragment_main_image.push_str(&format!(
                "\t{p}MainImage(color0, UV, {depth}color1);\n\tcolor0 = {blend}(color0, color1, {opacity});\n\n",
                p = prefix,
                depth = depth_arg,
                blend = blend.function().symbol(),
                opacity = opacity,
            ));
            self.sections
                .fragment_head
                .push_str(&format!("uniform float {};\n\n", opacity));
        }

        self.sections
            .fragment_head
            .push_str(&rename(effect.fragment_shader(), &renames));
        self.sections.fragment_head.push('\n');

        if symbols.has_main_support {
            if let Some(vertex) = effect.vertex_shader() {
                self.sections.vertex_head.push_str(&rename(vertex, &renames));
                self.sections.vertex_head.push('\n');
            }
        }

        self.extensions.extend(effect.extensions().iter().copied());
        self.active_effects.push(index);
        Ok(())
    }

    fn finish(mut self) -> MergeResult {
        for function in &self.blend_functions {
            if let Some(code) = function.shader_code() {
                let renames = HashMap::from([("blend".to_string(), function.symbol())]);
                self.sections.fragment_head.push_str(&rename(&code, &renames));
                self.sections.fragment_head.push('\n');
            }
        }

        if self.attributes.contains(EffectAttributes::DEPTH) && self.read_depth {
            self.sections.fragment_main_image.insert_str(0, "float depth = readDepth(UV);\n\n");
        }

        if self.uv_transformed {
            self.sections
                .fragment_main_uv
                .insert_str(0, "vec2 transformedUv = vUv;\n");
            self.defines.insert("UV", "transformedUv".to_string());
        } else {
            self.defines.insert("UV", "vUv".to_string());
        }

        let fragment_head = finish_section(&self.sections.fragment_head);
        let fragment_main_uv = finish_section(&self.sections.fragment_main_uv);
        let fragment_main_image = finish_section(&self.sections.fragment_main_image);
        let vertex_head = finish_section(&self.sections.vertex_head);
        let vertex_main_support = finish_section(&self.sections.vertex_main_support);

        let fragment_shader = fill(
            templates::EFFECT_FRAGMENT,
            &[
                (templates::FRAGMENT_HEAD, fragment_head.as_str()),
                (templates::FRAGMENT_MAIN_UV, fragment_main_uv.as_str()),
                (templates::FRAGMENT_MAIN_IMAGE, fragment_main_image.as_str()),
            ],
        );
        let vertex_shader = fill(
            templates::EFFECT_VERTEX,
            &[
                (templates::VERTEX_HEAD, vertex_head.as_str()),
                (templates::VERTEX_MAIN_SUPPORT, vertex_main_support.as_str()),
            ],
        );

        let skip_rendering = self.next_id == 0;
        MergeResult {
            fragment_shader,
            vertex_shader,
            uniform_count: self.uniforms.len(),
            defines: self.defines,
            uniforms: self.uniforms,
            extensions: self.extensions,
            attributes: self.attributes,
            blend_functions: self.blend_functions.into_iter().collect(),
            uv_transformed: self.uv_transformed,
            read_depth: self.read_depth,
            varying_count: self.varying_count,
            active_effects: self.active_effects,
            skip_rendering,
        }
    }
}

/// Merge `effects` into a single program.
///
/// Effects blended with [`BlendFunction::Skip`] contribute no code; only
/// their DEPTH attribute is kept so a depth texture is still requested. A
/// skipped convolution effect does not reserve the convolution slot.
pub fn compile(effects: &[Effect]) -> Result<MergeResult, MergeError> {
    let mut merger = Merger::default();

    for (index, effect) in effects.iter().enumerate() {
        let own = effect.attributes();
        if effect.blend_mode().function() == BlendFunction::Skip {
            merger.attributes |= own & EffectAttributes::DEPTH;
            continue;
        }

        if merger.attributes.contains(EffectAttributes::CONVOLUTION)
            && own.contains(EffectAttributes::CONVOLUTION)
        {
            return Err(MergeError::new(
                effect.name(),
                index,
                MergeErrorKind::MultipleConvolutions,
            ));
        }

        merger.integrate(index, effect)?;
    }

    let result = merger.finish();
    debug!(
        "merged {} of {} effects ({} uniforms, {} varyings)",
        result.active_effects.len(),
        effects.len(),
        result.uniform_count,
        result.varying_count
    );
    Ok(result)
}
