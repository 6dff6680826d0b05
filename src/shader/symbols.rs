//! Declaration scan of effect shader bodies.

use std::sync::OnceLock;

use regex::Regex;

const KEYWORDS: [&str; 7] = ["if", "for", "while", "switch", "return", "else", "do"];

fn function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\w+\s+(\w+)\s*\([\w\s,\[\]]*\)\s*\{").expect("function pattern is valid")
    })
}

fn varying_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bvarying\s+(?:(?:lowp|mediump|highp)\s+)?\w+\s+([^;]+);")
            .expect("varying pattern is valid")
    })
}

fn support_uv_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bmainSupport\s*\([\w\s]*?\buv\s*\)").expect("mainSupport pattern is valid")
    })
}

fn block_comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("comment pattern is valid"))
}

fn line_comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//[^\n]*").expect("comment pattern is valid"))
}

/// Remove `/* */` and `//` comments.
pub fn strip_comments(source: &str) -> String {
    let no_block = block_comment_regex().replace_all(source, " ");
    line_comment_regex().replace_all(&no_block, "").into_owned()
}

/// Names of functions declared (defined with a body) in `source`.
pub fn find_functions(source: &str) -> Vec<String> {
    let stripped = strip_comments(source);
    let mut names: Vec<String> = Vec::new();
    for caps in function_regex().captures_iter(&stripped) {
        let name = &caps[1];
        if KEYWORDS.contains(&name) || names.iter().any(|n| n == name) {
            continue;
        }
        names.push(name.to_string());
    }
    names
}

/// Names of varyings declared in `source`. Array suffixes are dropped.
pub fn find_varyings(source: &str) -> Vec<String> {
    let stripped = strip_comments(source);
    let mut names = Vec::new();
    for caps in varying_regex().captures_iter(&stripped) {
        for decl in caps[1].split(',') {
            let name = decl.split('[').next().unwrap_or("").trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Declarations of one effect that receive the effect prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    /// Functions defined by the fragment body.
    pub functions: Vec<String>,
    /// Functions defined by the vertex body.
    pub vertex_functions: Vec<String>,
    /// Varyings declared by the vertex body.
    pub varyings: Vec<String>,
    pub has_main_image: bool,
    pub has_main_uv: bool,
    pub has_main_support: bool,
    /// Whether `mainSupport` takes the `uv` argument.
    pub main_support_uses_uv: bool,
}

impl SymbolTable {
    pub fn scan(fragment: &str, vertex: Option<&str>) -> Self {
        let functions = find_functions(fragment);
        let has_main_image = functions.iter().any(|f| f == "mainImage");
        let has_main_uv = functions.iter().any(|f| f == "mainUv");

        let mut table = SymbolTable {
            functions,
            has_main_image,
            has_main_uv,
            ..Default::default()
        };

        if let Some(vertex) = vertex {
            let vertex_functions = find_functions(vertex);
            if vertex_functions.iter().any(|f| f == "mainSupport") {
                table.has_main_support = true;
                table.main_support_uses_uv = support_uv_regex().is_match(&strip_comments(vertex));
                table.varyings = find_varyings(vertex);
                table.vertex_functions = vertex_functions;
            }
        }

        table
    }

    /// Every shader-level name declared by the effect bodies.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.varyings
            .iter()
            .chain(&self.vertex_functions)
            .chain(&self.functions)
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAG: &str = "
uniform float intensity;

float luma(const in vec3 c) {
    return dot(c, vec3(0.299, 0.587, 0.114));
}

// void fake() {}
void mainImage(const in vec4 inputColor, const in vec2 uv, out vec4 outputColor) {
    if (intensity > 0.0) {
        outputColor = vec4(vec3(luma(inputColor.rgb)), inputColor.a);
    } else if (intensity < 0.0) {
        outputColor = inputColor;
    }
}
";

    #[test]
    fn test_finds_functions_and_skips_keywords() {
        let functions = find_functions(FRAG);
        assert_eq!(functions, vec!["luma".to_string(), "mainImage".to_string()]);
    }

    #[test]
    fn test_varyings_split_lists() {
        let vs = "varying vec2 vUv0, vUv1;\nvarying highp vec4 vOffsets[3];\n";
        assert_eq!(find_varyings(vs), vec!["vUv0", "vUv1", "vOffsets"]);
    }

    #[test]
    fn test_main_support_uv_detection() {
        let with_uv = "varying vec2 vOff;\nvoid mainSupport(const in vec2 uv) { vOff = uv; }";
        let table = SymbolTable::scan("void mainUv(inout vec2 uv) {}", Some(with_uv));
        assert!(table.has_main_uv && !table.has_main_image);
        assert!(table.has_main_support && table.main_support_uses_uv);
        assert_eq!(table.varyings, vec!["vOff"]);

        let without_uv = "void mainSupport() { gl_PointSize = 1.0; }";
        let table = SymbolTable::scan("void mainUv(inout vec2 uv) {}", Some(without_uv));
        assert!(table.has_main_support && !table.main_support_uses_uv);
    }

    #[test]
    fn test_vertex_without_main_support_is_ignored() {
        let table = SymbolTable::scan(FRAG, Some("varying vec2 vX;\nvoid helper() {}"));
        assert!(!table.has_main_support);
        assert!(table.varyings.is_empty());
        assert!(table.vertex_functions.is_empty());
    }
}
