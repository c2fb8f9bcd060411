//! Hand-rolled tokenizer for the expression/statement sandbox grammar.
//!
//! Same shape as the teacher's `lexer::scanner` (char-by-char scan with a
//! peekable iterator, one `Token` per lexeme) but sized for the much
//! smaller grammar the evaluator whitelists.

use crate::error::{Result, TemplateError};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,

    Eq2,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    SlashSlashEq,
    PercentEq,
    StarStarEq,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Newline,

    Eof,
}

pub fn tokenize(src: &str) -> Result<Vec<Tok>> {
    let mut out = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '\n' => {
                chars.next();
                out.push(Tok::Newline);
            }
            '#' => {
                // Line comment, permitted inside `@python` bodies.
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('r') => s.push('\r'),
                            Some('\\') => s.push('\\'),
                            Some(q) if q == quote => s.push(q),
                            Some(other) => {
                                s.push('\\');
                                s.push(other);
                            }
                            None => return Err(TemplateError::syntax("unterminated string literal")),
                        },
                        Some(q) if q == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err(TemplateError::syntax("unterminated string literal")),
                    }
                }
                out.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_float {
                    let n = num
                        .parse::<f64>()
                        .map_err(|_| TemplateError::syntax(format!("invalid number literal '{num}'")))?;
                    out.push(Tok::Float(n));
                } else {
                    let n = num
                        .parse::<i64>()
                        .map_err(|_| TemplateError::syntax(format!("invalid number literal '{num}'")))?;
                    out.push(Tok::Int(n));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Tok::Ident(ident));
            }
            _ => {
                chars.next();
                let tok = match c {
                    '+' => two_char(&mut chars, '=', Tok::PlusEq, Tok::Plus),
                    '-' => two_char(&mut chars, '=', Tok::MinusEq, Tok::Minus),
                    '*' => {
                        if chars.peek() == Some(&'*') {
                            chars.next();
                            two_char(&mut chars, '=', Tok::StarStarEq, Tok::StarStar)
                        } else {
                            two_char(&mut chars, '=', Tok::StarEq, Tok::Star)
                        }
                    }
                    '/' => {
                        if chars.peek() == Some(&'/') {
                            chars.next();
                            two_char(&mut chars, '=', Tok::SlashSlashEq, Tok::SlashSlash)
                        } else {
                            two_char(&mut chars, '=', Tok::SlashEq, Tok::Slash)
                        }
                    }
                    '%' => two_char(&mut chars, '=', Tok::PercentEq, Tok::Percent),
                    '=' => two_char(&mut chars, '=', Tok::Eq2, Tok::Assign),
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Tok::NotEq
                        } else {
                            return Err(TemplateError::syntax("unexpected '!'"));
                        }
                    }
                    '<' => two_char(&mut chars, '=', Tok::Le, Tok::Lt),
                    '>' => two_char(&mut chars, '=', Tok::Ge, Tok::Gt),
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    ',' => Tok::Comma,
                    ':' => Tok::Colon,
                    '.' => Tok::Dot,
                    other => return Err(TemplateError::syntax(format!("unexpected character '{other}'"))),
                };
                out.push(tok);
            }
        }
    }
    out.push(Tok::Eof);
    Ok(out)
}

fn two_char(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    next: char,
    if_match: Tok,
    otherwise: Tok,
) -> Tok {
    if chars.peek() == Some(&next) {
        chars.next();
        if_match
    } else {
        otherwise
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_call_with_kwargs() {
        let toks = tokenize("first(items, default=1)").unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Ident("first".into()),
                Tok::LParen,
                Tok::Ident("items".into()),
                Tok::Comma,
                Tok::Ident("default".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::RParen,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        let toks = tokenize(r#"'a\nb'"#).unwrap();
        assert_eq!(toks, vec![Tok::Str("a\nb".into()), Tok::Eof]);
    }

    #[test]
    fn rejects_bang_without_equals() {
        assert!(tokenize("!x").is_err());
    }
}
