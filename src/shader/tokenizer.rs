//! Single-pass identifier tokenizer for GLSL-like text.
//!
//! The tokenizer only distinguishes what renaming needs: identifiers,
//! numeric literals, comments and everything else. Identifiers directly
//! after a `.` are member accesses and never renamed.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Identifier { text: &'a str, member: bool },
    Number(&'a str),
    Comment(&'a str),
    Other(&'a str),
}

impl<'a> Token<'a> {
    pub fn text(&self) -> &'a str {
        match *self {
            Token::Identifier { text, .. } => text,
            Token::Number(text) | Token::Comment(text) | Token::Other(text) => text,
        }
    }
}

/// Iterator over the tokens of a source string.
pub struct Tokens<'a> {
    source: &'a str,
    pos: usize,
    prev: Option<u8>,
}

pub fn tokenize(source: &str) -> Tokens<'_> {
    Tokens {
        source,
        pos: 0,
        prev: None,
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Tokens<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.source.as_bytes()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes().get(self.pos + offset).copied()
    }

    fn take_while(&mut self, start: usize, mut pred: impl FnMut(u8, Option<u8>) -> bool) -> &'a str {
        let bytes = self.bytes();
        let mut end = self.pos;
        let mut last = None;
        while end < bytes.len() && pred(bytes[end], last) {
            last = Some(bytes[end]);
            end += 1;
        }
        self.pos = end;
        &self.source[start..end]
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let start = self.pos;
        let b = self.peek(0)?;

        let token = if b == b'/' && self.peek(1) == Some(b'/') {
            Token::Comment(self.take_while(start, |c, _| c != b'\n'))
        } else if b == b'/' && self.peek(1) == Some(b'*') {
            let end = self.source[start + 2..]
                .find("*/")
                .map(|i| start + 2 + i + 2)
                .unwrap_or(self.source.len());
            self.pos = end;
            Token::Comment(&self.source[start..end])
        } else if b.is_ascii_digit()
            || (b == b'.' && self.peek(1).is_some_and(|c| c.is_ascii_digit()))
        {
            let hex = b == b'0' && matches!(self.peek(1), Some(b'x') | Some(b'X'));
            Token::Number(self.take_while(start, |c, last| {
                c.is_ascii_alphanumeric()
                    || c == b'.'
                    || (!hex && (c == b'+' || c == b'-') && matches!(last, Some(b'e') | Some(b'E')))
            }))
        } else if is_ident_start(b) {
            let member = self.prev == Some(b'.');
            let text = self.take_while(start, |c, _| is_ident_continue(c));
            Token::Identifier { text, member }
        } else {
            // Single character, kept whole for multi-byte UTF-8.
            let len = self.source[start..].chars().next().map_or(1, char::len_utf8);
            self.pos = start + len;
            Token::Other(&self.source[start..self.pos])
        };

        self.prev = self.source.as_bytes().get(self.pos.wrapping_sub(1)).copied();
        Some(token)
    }
}

/// Rewrite every non-member identifier found in `renames`.
pub fn rename(source: &str, renames: &HashMap<String, String>) -> String {
    if renames.is_empty() {
        return source.to_string();
    }
    let mut out = String::with_capacity(source.len() + renames.len() * 4);
    for token in tokenize(source) {
        match token {
            Token::Identifier {
                text,
                member: false,
            } => match renames.get(text) {
                Some(new_name) => out.push_str(new_name),
                None => out.push_str(text),
            },
            other => out.push_str(other.text()),
        }
    }
    out
}

/// Whether `name` appears as a non-member identifier outside comments.
pub fn references(source: &str, name: &str) -> bool {
    tokenize(source).any(|t| {
        matches!(t, Token::Identifier { text, member: false } if text == name)
    })
}

/// `prefix` followed by `name` with its first letter upper-cased.
pub fn prefixed(prefix: &str, name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", prefix, first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_prefixed_capitalizes() {
        assert_eq!(prefixed("e0", "intensity"), "e0Intensity");
        assert_eq!(prefixed("e12", "mainImage"), "e12MainImage");
        assert_eq!(prefixed("e1", "_tmp"), "e1_tmp");
    }

    #[test]
    fn test_rename_respects_word_boundaries() {
        let renames = table(&[("scale", "e0Scale")]);
        let src = "float scale2 = scale * rescale + scale;";
        assert_eq!(
            rename(src, &renames),
            "float scale2 = e0Scale * rescale + e0Scale;"
        );
    }

    #[test]
    fn test_rename_skips_member_access() {
        let renames = table(&[("x", "e0X"), ("rgb", "e0Rgb")]);
        let src = "vec3 c = v.rgb * x + v.x;";
        assert_eq!(rename(src, &renames), "vec3 c = v.rgb * e0X + v.x;");
    }

    #[test]
    fn test_rename_skips_numbers_and_comments() {
        let renames = table(&[("e5", "bad"), ("f", "bad"), ("depth", "e0Depth")]);
        let src = "float a = 1e5 + 2.0f + 0x1F; // depth here\n/* depth */ depth";
        assert_eq!(
            rename(src, &renames),
            "float a = 1e5 + 2.0f + 0x1F; // depth here\n/* depth */ e0Depth"
        );
    }

    #[test]
    fn test_exponent_sign_is_part_of_number() {
        let tokens: Vec<_> = tokenize("1.5e-3-x").collect();
        assert_eq!(tokens[0], Token::Number("1.5e-3"));
        assert_eq!(tokens[1], Token::Other("-"));
    }

    #[test]
    fn test_references() {
        assert!(references("float d = depth * 2.0;", "depth"));
        assert!(!references("float d = s.depth; // depth", "depth"));
        assert!(!references("float depthValue;", "depth"));
    }

    #[test]
    fn test_non_ascii_passes_through() {
        let renames = table(&[("a", "e0A")]);
        assert_eq!(rename("a // é\nä a", &renames), "e0A // é\nä e0A");
    }
}
