//! Blend function catalogue.
//!
//! Every effect contributes to the composite colour through a blend function:
//! `color0 = blend(color0, color1, opacity)`, where `x` is the accumulated
//! colour and `y` the effect's output. Each catalogue entry exposes the GLSL
//! snippet injected into merged shaders and a CPU reference implementation
//! with identical semantics.
//!
//! Two-argument functions are defined on scalars and extended component-wise
//! to all four channels, alpha included. `Alpha` is the exception: it computes
//! the combined alpha explicitly.

use std::fmt;
use std::str::FromStr;

use glam::Vec4;
use serde::Deserialize;

use crate::error::Error;
use crate::uniform::Uniform;

/// Blend function identifier. The discriminant is the stable id used in
/// generated symbol names (`blend1`, `blend13`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum BlendFunction {
    /// Identity: the effect contributes nothing and is left out of the merge.
    Skip = 0,
    Add = 1,
    Alpha = 2,
    Average = 3,
    ColorBurn = 4,
    ColorDodge = 5,
    Darken = 6,
    Difference = 7,
    Exclusion = 8,
    Lighten = 9,
    Multiply = 10,
    Divide = 11,
    Negation = 12,
    #[default]
    Normal = 13,
    Overlay = 14,
    Reflect = 15,
    Screen = 16,
    SoftLight = 17,
    Subtract = 18,
    LinearBurn = 19,
    LinearDodge = 20,
    HardLight = 21,
    PinLight = 22,
    VividLight = 23,
}

impl BlendFunction {
    /// All blend functions in id order.
    pub const ALL: [BlendFunction; 24] = [
        Self::Skip,
        Self::Add,
        Self::Alpha,
        Self::Average,
        Self::ColorBurn,
        Self::ColorDodge,
        Self::Darken,
        Self::Difference,
        Self::Exclusion,
        Self::Lighten,
        Self::Multiply,
        Self::Divide,
        Self::Negation,
        Self::Normal,
        Self::Overlay,
        Self::Reflect,
        Self::Screen,
        Self::SoftLight,
        Self::Subtract,
        Self::LinearBurn,
        Self::LinearDodge,
        Self::HardLight,
        Self::PinLight,
        Self::VividLight,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            BlendFunction::Skip => "skip",
            BlendFunction::Add => "add",
            BlendFunction::Alpha => "alpha",
            BlendFunction::Average => "average",
            BlendFunction::ColorBurn => "color-burn",
            BlendFunction::ColorDodge => "color-dodge",
            BlendFunction::Darken => "darken",
            BlendFunction::Difference => "difference",
            BlendFunction::Exclusion => "exclusion",
            BlendFunction::Lighten => "lighten",
            BlendFunction::Multiply => "multiply",
            BlendFunction::Divide => "divide",
            BlendFunction::Negation => "negation",
            BlendFunction::Normal => "normal",
            BlendFunction::Overlay => "overlay",
            BlendFunction::Reflect => "reflect",
            BlendFunction::Screen => "screen",
            BlendFunction::SoftLight => "soft-light",
            BlendFunction::Subtract => "subtract",
            BlendFunction::LinearBurn => "linear-burn",
            BlendFunction::LinearDodge => "linear-dodge",
            BlendFunction::HardLight => "hard-light",
            BlendFunction::PinLight => "pin-light",
            BlendFunction::VividLight => "vivid-light",
        }
    }

    /// Name of the renamed blend symbol in merged shaders.
    pub fn symbol(self) -> String {
        format!("blend{}", self.id())
    }

    /// Whether the function behaves sensibly on unclamped (HDR) input.
    ///
    /// Other functions assume `[0, 1]` components; clamping upstream is the
    /// caller's job.
    pub fn is_hdr_safe(self) -> bool {
        matches!(
            self,
            BlendFunction::Skip
                | BlendFunction::Add
                | BlendFunction::Alpha
                | BlendFunction::Average
                | BlendFunction::Darken
                | BlendFunction::Difference
                | BlendFunction::Lighten
                | BlendFunction::Multiply
                | BlendFunction::Normal
        )
    }

    /// Scalar GLSL expression over `x` and `y`.
    fn scalar_glsl(self) -> Option<&'static str> {
        let expr = match self {
            BlendFunction::Skip | BlendFunction::Alpha => return None,
            BlendFunction::Add => "x + y",
            BlendFunction::Average => "(x + y) * 0.5",
            BlendFunction::ColorBurn => "(y == 0.0) ? y : max(1.0 - (1.0 - x) / y, 0.0)",
            BlendFunction::ColorDodge => "(y == 1.0) ? y : min(x / (1.0 - y), 1.0)",
            BlendFunction::Darken => "min(x, y)",
            BlendFunction::Difference => "abs(x - y)",
            BlendFunction::Exclusion => "x + y - 2.0 * x * y",
            BlendFunction::Lighten => "max(x, y)",
            BlendFunction::Multiply => "x * y",
            BlendFunction::Divide => "(y > 0.0) ? min(x / y, 1.0) : 1.0",
            BlendFunction::Negation => "1.0 - abs(1.0 - x - y)",
            BlendFunction::Normal => "y",
            BlendFunction::Overlay => {
                "(x < 0.5) ? (2.0 * x * y) : (1.0 - 2.0 * (1.0 - x) * (1.0 - y))"
            }
            BlendFunction::Reflect => "(y == 1.0) ? y : min(x * x / (1.0 - y), 1.0)",
            BlendFunction::Screen => "x + y - x * y",
            BlendFunction::SoftLight => {
                "(y < 0.5) ? (2.0 * x * y + x * x * (1.0 - 2.0 * y)) : (sqrt(x) * (2.0 * y - 1.0) + 2.0 * x * (1.0 - y))"
            }
            BlendFunction::Subtract => "max(x - y, 0.0)",
            BlendFunction::LinearBurn => "max(x + y - 1.0, 0.0)",
            BlendFunction::LinearDodge => "min(x + y, 1.0)",
            BlendFunction::HardLight => {
                "(y < 0.5) ? (2.0 * x * y) : (1.0 - 2.0 * (1.0 - x) * (1.0 - y))"
            }
            BlendFunction::PinLight => "(y < 0.5) ? min(x, 2.0 * y) : max(x, 2.0 * (y - 0.5))",
            BlendFunction::VividLight => {
                "(y < 0.5) ? ((y <= 0.0) ? 0.0 : max(1.0 - (1.0 - x) / (2.0 * y), 0.0)) : ((y >= 1.0) ? 1.0 : min(x / (2.0 * (1.0 - y)), 1.0))"
            }
        };
        Some(expr)
    }

    /// GLSL snippet defining `blend(x, y, opacity)`, or `None` for `Skip`.
    ///
    /// The generic symbol `blend` is renamed per function when merged.
    pub fn shader_code(self) -> Option<String> {
        if self == BlendFunction::Skip {
            return None;
        }

        if self == BlendFunction::Alpha {
            return Some(
                "vec4 blend(const in vec4 x, const in vec4 y, const in float opacity) {\n\
                 \tfloat a = y.a * opacity;\n\
                 \treturn vec4(mix(x.rgb, y.rgb, a), a + x.a * (1.0 - a));\n\
                 }\n"
                    .to_string(),
            );
        }

        let expr = self.scalar_glsl()?;
        Some(format!(
            "float blend(const in float x, const in float y) {{\n\
             \treturn {expr};\n\
             }}\n\
             \n\
             vec4 blend(const in vec4 x, const in vec4 y, const in float opacity) {{\n\
             \tvec4 z = vec4(blend(x.r, y.r), blend(x.g, y.g), blend(x.b, y.b), blend(x.a, y.a));\n\
             \treturn z * opacity + x * (1.0 - opacity);\n\
             }}\n"
        ))
    }

    /// Scalar reference implementation matching [`shader_code`](Self::shader_code).
    pub fn blend_scalar(self, x: f32, y: f32) -> f32 {
        match self {
            BlendFunction::Skip => x,
            BlendFunction::Alpha | BlendFunction::Normal => y,
            BlendFunction::Add => x + y,
            BlendFunction::Average => (x + y) * 0.5,
            BlendFunction::ColorBurn => {
                if y == 0.0 {
                    y
                } else {
                    (1.0 - (1.0 - x) / y).max(0.0)
                }
            }
            BlendFunction::ColorDodge => {
                if y == 1.0 {
                    y
                } else {
                    (x / (1.0 - y)).min(1.0)
                }
            }
            BlendFunction::Darken => x.min(y),
            BlendFunction::Difference => (x - y).abs(),
            BlendFunction::Exclusion => x + y - 2.0 * x * y,
            BlendFunction::Lighten => x.max(y),
            BlendFunction::Multiply => x * y,
            BlendFunction::Divide => {
                if y > 0.0 {
                    (x / y).min(1.0)
                } else {
                    1.0
                }
            }
            BlendFunction::Negation => 1.0 - (1.0 - x - y).abs(),
            BlendFunction::Overlay => {
                if x < 0.5 {
                    2.0 * x * y
                } else {
                    1.0 - 2.0 * (1.0 - x) * (1.0 - y)
                }
            }
            BlendFunction::Reflect => {
                if y == 1.0 {
                    y
                } else {
                    (x * x / (1.0 - y)).min(1.0)
                }
            }
            BlendFunction::Screen => x + y - x * y,
            BlendFunction::SoftLight => {
                if y < 0.5 {
                    2.0 * x * y + x * x * (1.0 - 2.0 * y)
                } else {
                    x.sqrt() * (2.0 * y - 1.0) + 2.0 * x * (1.0 - y)
                }
            }
            BlendFunction::Subtract => (x - y).max(0.0),
            BlendFunction::LinearBurn => (x + y - 1.0).max(0.0),
            BlendFunction::LinearDodge => (x + y).min(1.0),
            BlendFunction::HardLight => {
                if y < 0.5 {
                    2.0 * x * y
                } else {
                    1.0 - 2.0 * (1.0 - x) * (1.0 - y)
                }
            }
            BlendFunction::PinLight => {
                if y < 0.5 {
                    x.min(2.0 * y)
                } else {
                    x.max(2.0 * (y - 0.5))
                }
            }
            BlendFunction::VividLight => {
                if y < 0.5 {
                    if y <= 0.0 {
                        0.0
                    } else {
                        (1.0 - (1.0 - x) / (2.0 * y)).max(0.0)
                    }
                } else if y >= 1.0 {
                    1.0
                } else {
                    (x / (2.0 * (1.0 - y))).min(1.0)
                }
            }
        }
    }

    /// Blend `y` onto `x` with the given opacity.
    pub fn apply(self, x: Vec4, y: Vec4, opacity: f32) -> Vec4 {
        match self {
            BlendFunction::Skip => x,
            BlendFunction::Alpha => {
                let a = y.w * opacity;
                let rgb = x.truncate().lerp(y.truncate(), a);
                rgb.extend(a + x.w * (1.0 - a))
            }
            _ => {
                let z = Vec4::new(
                    self.blend_scalar(x.x, y.x),
                    self.blend_scalar(x.y, y.y),
                    self.blend_scalar(x.z, y.z),
                    self.blend_scalar(x.w, y.w),
                );
                z * opacity + x * (1.0 - opacity)
            }
        }
    }
}

impl fmt::Display for BlendFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        BlendFunction::ALL
            .iter()
            .copied()
            .find(|f| f.name() == normalized)
            .ok_or_else(|| Error::config(format!("unknown blend function '{}'", s)))
    }
}

/// A blend function together with its opacity.
///
/// The opacity lives in a shared [`Uniform`] so that it can be animated
/// without recompiling the merged shader.
#[derive(Clone, Debug)]
pub struct BlendMode {
    function: BlendFunction,
    opacity: Uniform,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::new(BlendFunction::Normal)
    }
}

impl BlendMode {
    pub fn new(function: BlendFunction) -> Self {
        Self {
            function,
            opacity: Uniform::float(1.0),
        }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = Uniform::float(opacity);
        self
    }

    pub fn function(&self) -> BlendFunction {
        self.function
    }

    /// Change the blend function. Returns whether it actually changed.
    pub(crate) fn set_function(&mut self, function: BlendFunction) -> bool {
        let changed = self.function != function;
        self.function = function;
        changed
    }

    /// Shared opacity uniform.
    pub fn opacity(&self) -> &Uniform {
        &self.opacity
    }

    pub fn opacity_value(&self) -> f32 {
        self.opacity.as_float()
    }

    pub fn set_opacity(&self, opacity: f32) {
        self.opacity.set(opacity);
    }

    pub fn shader_code(&self) -> Option<String> {
        self.function.shader_code()
    }
}
