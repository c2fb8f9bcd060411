//! Variable interpolation (spec.md §4.10), the last pass in
//! `process_template`: every `{{ expr }}` and `{!! expr !!}` token left in
//! the text after every other pass has run is resolved against the
//! context and spliced in.

use crate::compiler::{tokenize, TokenKind};
use crate::error::Result;
use crate::evaluator;
use crate::value::{Context, Value};

use super::escape;

/// Evaluate `content`, applying the two error policies spec.md §4.2/§7
/// describe for variable interpolation: a name that is not bound at all
/// is a `VariableLookup` error in `strict_mode`, and swallowed (renders as
/// empty) otherwise; any other non-security evaluation error follows the
/// same swallow-or-propagate rule. Security errors always propagate.
fn resolve(content: &str, ctx: &Context, strict_mode: bool) -> Result<Option<Value>> {
    match evaluator::is_defined(content, ctx) {
        Ok(false) if strict_mode => {
            return Err(crate::error::TemplateError::VariableLookup {
                name: content.trim().to_string(),
            })
        }
        Ok(false) => return Ok(None),
        Ok(true) => {}
        Err(e) if e.is_security() => return Err(e),
        Err(_) if !strict_mode => return Ok(None),
        Err(e) => return Err(e),
    }
    match evaluator::eval_expression(content, ctx) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_security() => Err(e),
        Err(_) if !strict_mode => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn process(text: &str, ctx: &Context, strict_mode: bool) -> Result<String> {
    let tokens = tokenize(text)?;
    let mut out = String::with_capacity(text.len());
    for tok in &tokens {
        match tok.kind {
            TokenKind::Text | TokenKind::Directive => out.push_str(&text[tok.start..tok.end]),
            TokenKind::Comment => {}
            TokenKind::Variable => match resolve(&tok.content, ctx, strict_mode)? {
                Some(v) if !v.is_null() => {
                    let rendered = v.to_display_string();
                    if matches!(v, Value::SafeString(_)) {
                        out.push_str(&rendered);
                    } else {
                        out.push_str(&escape(&rendered));
                    }
                }
                _ => {}
            },
            TokenKind::RawVariable => match resolve(&tok.content, ctx, strict_mode)? {
                Some(v) if !v.is_null() => out.push_str(&v.to_display_string()),
                _ => {}
            },
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_plain_variables_but_not_raw() {
        let ctx = Context::new();
        ctx.set("x", Value::String("<i>".into()));
        assert_eq!(process("{{ x }} / {!! x !!}", &ctx, true).unwrap(), "&lt;i&gt; / <i>");
    }

    #[test]
    fn null_renders_as_empty_string() {
        let ctx = Context::new();
        ctx.set("x", Value::Null);
        assert_eq!(process("[{{ x }}]", &ctx, true).unwrap(), "[]");
    }

    #[test]
    fn safe_string_is_not_escaped() {
        let ctx = Context::new();
        ctx.set("x", Value::SafeString("<b>ok</b>".into()));
        assert_eq!(process("{{ x }}", &ctx, true).unwrap(), "<b>ok</b>");
    }

    #[test]
    fn missing_name_is_error_in_strict_mode_only() {
        let ctx = Context::new();
        assert!(process("{{ missing }}", &ctx, true).is_err());
        assert_eq!(process("[{{ missing }}]", &ctx, false).unwrap(), "[]");
    }
}
