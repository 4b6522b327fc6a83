//! Call-signature and literal matchers for C/C++ sources.
//!
//! # Matcher Forms
//!
//! - `Literal` - a numeric token, matched only at token boundaries, so
//!   `1e-9` never matches inside `1e-90` or `x1e-9`. A trailing float suffix
//!   (`1e-9f`) is allowed and left in place.
//! - `Call` - `NAME(...)` at an identifier boundary. The argument list is
//!   consumed with balanced-parenthesis scanning, so the whole call expression
//!   is matched regardless of its arguments. An optional regex filters on the
//!   argument text. `#define NAME(...)` lines are never matched.
//! - `CallPrefix` - like `Call` but for every identifier starting with the
//!   prefix; used to hunt for residual members of a call family.
//!
//! Occurrences inside comments and string/char literals are ignored.

use crate::cache;
use crate::lexer::{is_ident_byte, LexicalMap};
use regex::Regex;

/// Byte span of one match, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Call(CallForm),
}

#[derive(Debug, Clone)]
pub struct CallForm {
    name: String,
    prefix: bool,
    arguments: Option<Regex>,
}

impl Matcher {
    pub fn literal(text: impl Into<String>) -> Self {
        Matcher::Literal(text.into())
    }

    pub fn call(name: impl Into<String>) -> Self {
        Matcher::Call(CallForm {
            name: name.into(),
            prefix: false,
            arguments: None,
        })
    }

    pub fn call_prefix(prefix: impl Into<String>) -> Self {
        Matcher::Call(CallForm {
            name: prefix.into(),
            prefix: true,
            arguments: None,
        })
    }

    /// Restrict a call matcher to argument lists matching `pattern`.
    ///
    /// Has no effect on literal matchers.
    pub fn with_arguments(self, pattern: &str) -> Result<Self, regex::Error> {
        match self {
            Matcher::Call(mut form) => {
                form.arguments = Some(cache::get_or_compile(pattern)?);
                Ok(Matcher::Call(form))
            }
            literal => Ok(literal),
        }
    }

    /// Find every match in `source`, in ascending order, non-overlapping.
    pub fn find_all(&self, source: &str) -> Vec<Span> {
        let map = LexicalMap::new(source);
        self.find_all_in(source, &map)
    }

    /// Like [`Matcher::find_all`] with a precomputed lexical map.
    pub fn find_all_in(&self, source: &str, map: &LexicalMap) -> Vec<Span> {
        match self {
            Matcher::Literal(text) => find_literals(source, map, text),
            Matcher::Call(form) => find_calls(source, map, form),
        }
    }

    pub fn is_match(&self, source: &str) -> bool {
        !self.find_all(source).is_empty()
    }

    /// The identifier or literal this matcher is anchored on.
    pub fn anchor(&self) -> &str {
        match self {
            Matcher::Literal(text) => text,
            Matcher::Call(form) => &form.name,
        }
    }
}

fn find_literals(source: &str, map: &LexicalMap, text: &str) -> Vec<Span> {
    if text.is_empty() {
        return Vec::new();
    }
    let bytes = source.as_bytes();

    source
        .match_indices(text)
        .map(|(start, _)| Span {
            start,
            end: start + text.len(),
        })
        .filter(|span| !map.is_masked(span.start))
        .filter(|span| {
            let before_ok = span.start == 0 || !is_number_byte(bytes[span.start - 1]);
            before_ok && literal_ends_cleanly(bytes, span.end)
        })
        .collect()
}

fn is_number_byte(byte: u8) -> bool {
    is_ident_byte(byte) || byte == b'.'
}

fn literal_ends_cleanly(bytes: &[u8], end: usize) -> bool {
    match bytes.get(end) {
        None => true,
        Some(b'f' | b'F' | b'l' | b'L') => bytes.get(end + 1).map_or(true, |&b| !is_number_byte(b)),
        Some(&b) => !is_number_byte(b),
    }
}

fn find_calls(source: &str, map: &LexicalMap, form: &CallForm) -> Vec<Span> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    if form.name.is_empty() {
        return spans;
    }

    let mut from = 0;
    while let Some(offset) = source[from..].find(&form.name) {
        let start = from + offset;
        from = start + form.name.len();

        if map.is_masked(start) || (start > 0 && is_ident_byte(bytes[start - 1])) {
            continue;
        }

        let mut name_end = start + form.name.len();
        if form.prefix {
            while name_end < bytes.len() && is_ident_byte(bytes[name_end]) {
                name_end += 1;
            }
        } else if name_end < bytes.len() && is_ident_byte(bytes[name_end]) {
            continue;
        }

        let mut open = name_end;
        while open < bytes.len() && bytes[open].is_ascii_whitespace() {
            open += 1;
        }
        if bytes.get(open) != Some(&b'(') || is_macro_definition(source, start) {
            continue;
        }

        let Some(close) = matching_paren(bytes, map, open) else {
            continue;
        };

        if let Some(filter) = &form.arguments {
            if !filter.is_match(&source[open + 1..close]) {
                continue;
            }
        }

        spans.push(Span {
            start,
            end: close + 1,
        });
        from = close + 1;
    }

    spans
}

fn is_macro_definition(source: &str, start: usize) -> bool {
    let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let head = source[line_start..start].trim();
    head.strip_prefix('#')
        .is_some_and(|rest| rest.trim_start() == "define")
}

fn matching_paren(bytes: &[u8], map: &LexicalMap, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (pos, &byte) in bytes.iter().enumerate().skip(open) {
        if map.is_masked(pos) {
            continue;
        }
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}
