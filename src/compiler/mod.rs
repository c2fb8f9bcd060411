//! Template → token stream (spec.md §4.3). A single hand-rolled scanning
//! pass recognises the four delimiter families in priority order (comment,
//! raw variable, variable, directive); everything else becomes `Text`.
//! Grounded on the teacher's scanner style (`lexer::scanner`: byte-index
//! walk, no external regex-crate dependency for the hot loop) but directive
//! argument extraction is balanced-delimiter aware rather than regex-based,
//! since Blade directive arguments may themselves contain parens/quotes.

use crate::error::{Result, TemplateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Variable,
    RawVariable,
    Directive,
    Comment,
}

/// One lexeme. For `Directive`, `content` is `"name:args"` (args is the
/// literal text between the directive's balanced parens, or empty for a
/// bare directive like `@else`). `start`/`end` are byte offsets into the
/// source this token was produced from, so callers can splice replacement
/// text back in without re-scanning.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub content: String,
    pub line: u32,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// For a `Directive` token, the part before the first `:`.
    pub fn directive_name(&self) -> &str {
        self.content.split(':').next().unwrap_or("")
    }

    /// For a `Directive` token, the part after the first `:`.
    pub fn directive_args(&self) -> &str {
        match self.content.split_once(':') {
            Some((_, args)) => args,
            None => "",
        }
    }
}

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let mut text_start = 0usize;
    let len = src.len();

    while pos < len {
        let rest = &src[pos..];
        if rest.starts_with("{{--") {
            if let Some(rel) = rest[4..].find("--}}") {
                flush_text(&mut tokens, src, text_start, pos);
                let inner = &rest[4..4 + rel];
                push(&mut tokens, src, TokenKind::Comment, inner.trim(), pos, pos + 4 + rel + 4);
                pos += 4 + rel + 4;
                text_start = pos;
                continue;
            }
        } else if rest.starts_with("{!!") {
            if let Some(rel) = rest[3..].find("!!}") {
                flush_text(&mut tokens, src, text_start, pos);
                let inner = &rest[3..3 + rel];
                push(&mut tokens, src, TokenKind::RawVariable, inner.trim(), pos, pos + 3 + rel + 3);
                pos += 3 + rel + 3;
                text_start = pos;
                continue;
            }
        } else if rest.starts_with("{{") {
            if let Some(rel) = rest[2..].find("}}") {
                flush_text(&mut tokens, src, text_start, pos);
                let inner = &rest[2..2 + rel];
                push(&mut tokens, src, TokenKind::Variable, inner.trim(), pos, pos + 2 + rel + 2);
                pos += 2 + rel + 2;
                text_start = pos;
                continue;
            }
        } else if rest.as_bytes()[0] == b'@' {
            if let Some((name, args, end)) = scan_directive(src, pos) {
                flush_text(&mut tokens, src, text_start, pos);
                push(&mut tokens, src, TokenKind::Directive, &format!("{name}:{args}"), pos, end);
                pos = end;
                text_start = pos;
                continue;
            }
        }
        pos += next_char_len(src, pos);
    }
    flush_text(&mut tokens, src, text_start, len);
    Ok(tokens)
}

fn next_char_len(src: &str, pos: usize) -> usize {
    src[pos..].chars().next().map(char::len_utf8).unwrap_or(1)
}

fn push(tokens: &mut Vec<Token>, src: &str, kind: TokenKind, content: &str, start: usize, end: usize) {
    tokens.push(Token {
        kind,
        content: content.to_string(),
        line: line_at(src, start),
        start,
        end,
    });
}

fn flush_text(tokens: &mut Vec<Token>, src: &str, start: usize, end: usize) {
    if start < end {
        push(tokens, src, TokenKind::Text, &src[start..end], start, end);
    }
}

fn line_at(src: &str, pos: usize) -> u32 {
    1 + src[..pos].bytes().filter(|&b| b == b'\n').count() as u32
}

/// Scan `@name` (and, if present, a balanced `(...)` argument list)
/// starting at `src[at]` (which must be `@`). Returns `(name, args, end)`.
fn scan_directive(src: &str, at: usize) -> Option<(String, String, usize)> {
    let bytes = src.as_bytes();
    let mut i = at + 1;
    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = src[name_start..i].to_string();
    if bytes.get(i) == Some(&b'(') {
        let close = match_parens(src, i)?;
        let args = src[i + 1..close].to_string();
        Some((name, args, close + 1))
    } else {
        Some((name, String::new(), i))
    }
}

/// Find the index of the `)` matching the `(` at `src[open]`, respecting
/// nested parens and quoted strings.
fn match_parens(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0i32;
    let mut i = open;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 1;
            } else if c == q {
                quote = None;
            }
        } else {
            match c {
                b'\'' | b'"' => quote = Some(c),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Depth-aware search for the directive token that closes the one at
/// `tokens[start]` (spec.md §4.3: `find_matching_end`). `open_name` and
/// `close_name` are directive names without the leading `@`.
pub fn find_matching_end(
    tokens: &[Token],
    start: usize,
    open_name: &str,
    close_name: &str,
) -> Result<usize> {
    let mut depth = 1i32;
    for (i, tok) in tokens.iter().enumerate().skip(start + 1) {
        if tok.kind != TokenKind::Directive {
            continue;
        }
        let name = tok.directive_name();
        if name == open_name {
            depth += 1;
        } else if name == close_name {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(TemplateError::compilation(
        format!("unbalanced @{open_name} / @{close_name}"),
        Some(tokens[start].line),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_all_four_delimiter_kinds() {
        let toks = tokenize("a{{-- c --}}b{{ x }}c{!! y !!}d@if(x > 1)e").unwrap();
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Text,
                TokenKind::Comment,
                TokenKind::Text,
                TokenKind::Variable,
                TokenKind::Text,
                TokenKind::RawVariable,
                TokenKind::Text,
                TokenKind::Directive,
                TokenKind::Text,
            ]
        );
    }

    #[test]
    fn directive_args_handle_nested_parens_and_quotes() {
        let toks = tokenize("@if(fn(a, \"b)\") == 1)").unwrap();
        assert_eq!(toks[0].directive_name(), "if");
        assert_eq!(toks[0].directive_args(), "fn(a, \"b)\") == 1");
    }

    #[test]
    fn bare_directive_has_empty_args() {
        let toks = tokenize("@else").unwrap();
        assert_eq!(toks[0].directive_name(), "else");
        assert_eq!(toks[0].directive_args(), "");
    }

    #[test]
    fn find_matching_end_skips_nested_same_name_directive() {
        let toks = tokenize("@if(a)@if(b)@endif@endif").unwrap();
        let start = toks.iter().position(|t| t.directive_name() == "if").unwrap();
        let end = find_matching_end(&toks, start, "if", "endif").unwrap();
        assert_eq!(toks[end].directive_name(), "endif");
        assert_eq!(end, toks.len() - 1);
    }

    #[test]
    fn unbalanced_directive_is_a_compilation_error() {
        let toks = tokenize("@if(a)no end").unwrap();
        let start = toks.iter().position(|t| t.directive_name() == "if").unwrap();
        assert!(find_matching_end(&toks, start, "if", "endif").is_err());
    }
}
