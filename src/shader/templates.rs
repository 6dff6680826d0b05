//! Fixed program templates filled by the merge compiler.

/// Placeholder names, in the order the sections are assembled.
pub const FRAGMENT_HEAD: &str = "FRAGMENT_HEAD";
pub const FRAGMENT_MAIN_UV: &str = "FRAGMENT_MAIN_UV";
pub const FRAGMENT_MAIN_IMAGE: &str = "FRAGMENT_MAIN_IMAGE";
pub const VERTEX_HEAD: &str = "VERTEX_HEAD";
pub const VERTEX_MAIN_SUPPORT: &str = "VERTEX_MAIN_SUPPORT";

pub const EFFECT_FRAGMENT: &str = r#"#ifdef FRAMEBUFFER_PRECISION_HIGH
	uniform mediump sampler2D inputBuffer;
#else
	uniform lowp sampler2D inputBuffer;
#endif

#if DEPTH_PACKING == 3201
	uniform lowp sampler2D depthBuffer;
#elif defined(GL_FRAGMENT_PRECISION_HIGH)
	uniform highp sampler2D depthBuffer;
#else
	uniform mediump sampler2D depthBuffer;
#endif

uniform vec2 resolution;
uniform vec2 texelSize;
uniform float cameraNear;
uniform float cameraFar;
uniform float aspect;
uniform float time;

varying vec2 vUv;

float unpackRGBAToDepth(const in vec4 v) {
	return dot(v, vec4(1.0, 1.0 / 255.0, 1.0 / 65025.0, 1.0 / 16581375.0));
}

float readDepth(const in vec2 uv) {
#if DEPTH_PACKING == 3201
	return unpackRGBAToDepth(texture2D(depthBuffer, uv));
#else
	return texture2D(depthBuffer, uv).r;
#endif
}

#ifdef DITHERING
vec3 ditherNoise(const in vec3 color) {
	float grid = fract(dot(vec2(171.0, 231.0), gl_FragCoord.xy) / 103.0);
	vec3 dither = vec3(grid, 1.0 - grid, grid * 0.5) / 255.0;
	return color + dither - 0.5 / 255.0;
}
#endif

FRAGMENT_HEAD

void main() {
	FRAGMENT_MAIN_UV

	vec4 color0 = texture2D(inputBuffer, UV);
	vec4 color1 = vec4(0.0);

	FRAGMENT_MAIN_IMAGE

	gl_FragColor = color0;

#ifdef DITHERING
	gl_FragColor.rgb = ditherNoise(gl_FragColor.rgb);
#endif
}
"#;

pub const EFFECT_VERTEX: &str = r#"uniform vec2 resolution;
uniform vec2 texelSize;
uniform float cameraNear;
uniform float cameraFar;
uniform float aspect;
uniform float time;

attribute vec3 position;

varying vec2 vUv;

VERTEX_HEAD

void main() {
	vUv = position.xy * 0.5 + 0.5;

	VERTEX_MAIN_SUPPORT

	gl_Position = vec4(position.xy, 1.0, 1.0);
}
"#;

/// Plain blit used by copy and save passes.
pub const COPY_FRAGMENT: &str = r#"#ifdef FRAMEBUFFER_PRECISION_HIGH
	uniform mediump sampler2D inputBuffer;
#else
	uniform lowp sampler2D inputBuffer;
#endif

uniform float opacity;

varying vec2 vUv;

void main() {
	vec4 texel = texture2D(inputBuffer, vUv);
	gl_FragColor = opacity * texel;
}
"#;

pub const COMMON_VERTEX: &str = r#"attribute vec3 position;

varying vec2 vUv;

void main() {
	vUv = position.xy * 0.5 + 0.5;
	gl_Position = vec4(position.xy, 1.0, 1.0);
}
"#;

/// Dual-filter (Kawase) blur step; `kernel` is the sample offset in texels.
pub const KAWASE_FRAGMENT: &str = r#"#ifdef FRAMEBUFFER_PRECISION_HIGH
	uniform mediump sampler2D inputBuffer;
#else
	uniform lowp sampler2D inputBuffer;
#endif

uniform vec2 texelSize;
uniform float kernel;

varying vec2 vUv;

void main() {
	vec2 h = texelSize * 0.5;
	vec2 d = texelSize * kernel + h;
	vec4 sum = texture2D(inputBuffer, vUv + vec2(-d.x, d.y));
	sum += texture2D(inputBuffer, vUv + d);
	sum += texture2D(inputBuffer, vUv - d);
	sum += texture2D(inputBuffer, vUv + vec2(d.x, -d.y));
	gl_FragColor = sum * 0.25;
}
"#;

/// Substitute every `(placeholder, section)` pair into `template`.
pub fn fill(template: &str, sections: &[(&str, &str)]) -> String {
    sections
        .iter()
        .fold(template.to_string(), |acc, (placeholder, text)| {
            acc.replace(placeholder, text)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_carry_placeholders() {
        for p in [FRAGMENT_HEAD, FRAGMENT_MAIN_UV, FRAGMENT_MAIN_IMAGE] {
            assert!(EFFECT_FRAGMENT.contains(p));
        }
        for p in [VERTEX_HEAD, VERTEX_MAIN_SUPPORT] {
            assert!(EFFECT_VERTEX.contains(p));
        }
    }

    #[test]
    fn test_fill_replaces_sections() {
        let out = fill(EFFECT_VERTEX, &[(VERTEX_HEAD, "// head"), (VERTEX_MAIN_SUPPORT, "")]);
        assert!(out.contains("// head"));
        assert!(!out.contains(VERTEX_MAIN_SUPPORT));
    }
}
