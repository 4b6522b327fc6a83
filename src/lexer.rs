//! Minimal C/C++ lexical view of a source file.
//!
//! Rule matching only needs to know which byte ranges are comments or
//! string/char literals (never rewritten, never counted as code), the
//! delimiter balance of the code, and line lookup for diagnostics. Raw string
//! literals are not recognised.

use std::ops::Range;

/// Byte ranges of a source text that are not code (comments and literals).
#[derive(Debug, Clone, Default)]
pub struct LexicalMap {
    masked: Vec<Range<usize>>,
}

impl LexicalMap {
    /// Scan `source` once and record every comment and quoted literal.
    pub fn new(source: &str) -> Self {
        let bytes = source.as_bytes();
        let mut masked = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    let end = find_byte(bytes, i + 2, b'\n').unwrap_or(bytes.len());
                    masked.push(i..end);
                    i = end;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    let end = find_seq(bytes, i + 2, b"*/")
                        .map(|pos| pos + 2)
                        .unwrap_or(bytes.len());
                    masked.push(i..end);
                    i = end;
                }
                // C++14 digit separators: 1'000'000, but not u8'a'
                b'\'' if is_digit_separator(bytes, i) => i += 1,
                quote @ (b'"' | b'\'') => {
                    let end = skip_quoted(bytes, i, quote);
                    masked.push(i..end);
                    i = end;
                }
                _ => i += 1,
            }
        }

        Self { masked }
    }

    /// True if the byte at `pos` lies inside a comment or literal.
    pub fn is_masked(&self, pos: usize) -> bool {
        let idx = self.masked.partition_point(|range| range.end <= pos);
        self.masked
            .get(idx)
            .is_some_and(|range| range.contains(&pos))
    }

    /// Net `()`, `{}`, `[]` balance of the code portion of `source`.
    pub fn delimiter_balance(&self, source: &str) -> DelimiterBalance {
        let mut balance = DelimiterBalance::default();
        for (pos, byte) in source.bytes().enumerate() {
            if !matches!(byte, b'(' | b')' | b'{' | b'}' | b'[' | b']') || self.is_masked(pos) {
                continue;
            }
            match byte {
                b'(' => balance.parens += 1,
                b')' => balance.parens -= 1,
                b'{' => balance.braces += 1,
                b'}' => balance.braces -= 1,
                b'[' => balance.brackets += 1,
                _ => balance.brackets -= 1,
            }
        }
        balance
    }
}

/// Delimiter counts (open minus close) for a source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelimiterBalance {
    pub parens: isize,
    pub braces: isize,
    pub brackets: isize,
}

/// 1-based line number and trimmed line text containing byte `pos`.
pub fn line_context(source: &str, pos: usize) -> (usize, String) {
    let pos = pos.min(source.len());
    let line_start = source[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = source[pos..]
        .find('\n')
        .map(|i| pos + i)
        .unwrap_or(source.len());
    let line = source[..pos].matches('\n').count() + 1;
    (line, source[line_start..line_end].trim().to_string())
}

/// True if the quote at `pos` follows a number token rather than an
/// identifier such as a character-literal encoding prefix.
fn is_digit_separator(bytes: &[u8], pos: usize) -> bool {
    if pos == 0 || !is_ident_byte(bytes[pos - 1]) {
        return false;
    }
    let start = bytes[..pos]
        .iter()
        .rposition(|&b| !is_ident_byte(b) && b != b'\'')
        .map(|i| i + 1)
        .unwrap_or(0);
    bytes[start].is_ascii_digit()
}

pub(crate) fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

fn find_seq(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| from + i)
}

/// End (exclusive) of a quoted literal starting at `start`. Unterminated
/// literals stop at the end of the line.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            b if b == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}
