//! The sandboxed expression/statement evaluator (spec.md §4.2).
//!
//! Grounded on the teacher's own recursive-descent parser
//! (`src/parser/{core,precedence,expressions}.rs`) and tree-walking
//! interpreter, but rewritten against a much smaller grammar: the
//! expression-mode whitelist plus, in statement mode, a handful of
//! module-level statements. Nothing here calls into a general-purpose
//! host `eval` — every construct is a hand-written AST node and the
//! walker in `eval` rejects anything it does not recognise.

pub mod ast;
pub mod builtins;
pub mod eval;
pub mod lexer;
pub mod parser;

use crate::error::{Result, TemplateError};
use crate::value::{Context, Value};
use ast::{Expr, Stmt};

/// Rewrite `$name` references to `name` and map host-reserved words used as
/// identifiers to `ctx.get("name","")`, except the operator/literal keyword
/// set spec.md §4.2 preserves (`and or not in is if else True False None for
/// lambda`). Applied once, textually, before tokenizing (spec.md §4.2:
/// "Dollar-prefix tolerance").
pub fn prepare_source(src: &str) -> String {
    const PRESERVED: &[&str] = &[
        "and", "or", "not", "in", "is", "if", "else", "True", "False", "None", "for", "lambda",
    ];
    let mut out = String::with_capacity(src.len());
    let mut chars = src.char_indices().peekable();
    let bytes = src.as_bytes();
    while let Some((i, c)) = chars.next() {
        if c == '$' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
            // Drop the `$`; the identifier that follows is copied verbatim
            // by the normal scan below on the next loop iterations.
            continue;
        }
        if (c.is_alphabetic() || c == '_')
            && (i == 0 || !is_ident_continue(bytes[i - 1] as char))
        {
            let start = i;
            let mut end = i + c.len_utf8();
            while let Some(&(j, nc)) = chars.peek() {
                if is_ident_continue(nc) {
                    end = j + nc.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let word = &src[start..end];
            if PRESERVED.contains(&word) || !is_reserved_word(word) {
                out.push_str(word);
            } else {
                out.push_str(&format!("ctx.get(\"{word}\",\"\")"));
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Host reserved words that are transparently mapped to a context lookup
/// when used as a bare name (spec.md §4.2). This is deliberately a small,
/// explicit list rather than every keyword of some host language: Blade
/// expressions only ever collide with a handful of common words.
fn is_reserved_word(word: &str) -> bool {
    const RESERVED: &[&str] = &[
        "class", "def", "return", "import", "from", "as", "with", "try", "except", "finally",
        "raise", "yield", "global", "nonlocal", "del", "assert", "async", "await", "elif",
        "while", "break", "continue", "pass",
    ];
    RESERVED.contains(&word)
}

/// Parse and evaluate an expression-mode source string.
pub fn eval_expression(src: &str, ctx: &Context) -> Result<crate::value::Value> {
    let prepared = prepare_source(src);
    let tokens = lexer::tokenize(&prepared)?;
    let expr = parser::parse_expression(&tokens)?;
    eval::eval_expr(&expr, ctx)
}

/// Parse an expression-mode source string without evaluating it (used by
/// callers, like `@includeIf`, that need the AST or want to parse once).
pub fn parse_expression(src: &str) -> Result<Expr> {
    let prepared = prepare_source(src);
    let tokens = lexer::tokenize(&prepared)?;
    parser::parse_expression(&tokens)
}

/// Whether `src` denotes a bound name/attribute/index path, as opposed to a
/// path that would silently resolve to `Null` (spec.md §4.8 `@isset`/`@empty`
/// and §7 "missing name in `{{ }}`"). Non-lookup expressions (calls,
/// literals, arithmetic) are treated as defined unless they evaluate to
/// `Null`.
pub fn is_defined(src: &str, ctx: &Context) -> Result<bool> {
    let expr = parse_expression(src)?;
    eval::path_exists(&expr, ctx)
}

/// Expand a value into the sequence `@foreach`/`@for` walk (spec.md §4.6):
/// lists in order, map keys, or a string's characters.
pub fn iterate(v: &Value) -> Result<Vec<Value>> {
    eval::iterable_items(v)
}

/// Parse and evaluate a statement-mode block (`@python`), mutating `ctx`.
/// Only reachable when `Config::allow_python_blocks` is set (spec.md §4.1,
/// §4.8 "Misc").
pub fn eval_statements(src: &str, ctx: &Context) -> Result<()> {
    let dedented = dedent(src);
    let stmts: Vec<Stmt> = parser::parse_program(&dedented)?;
    for stmt in &stmts {
        eval::exec_stmt(stmt, ctx)?;
    }
    Ok(())
}

/// Dedent a `@python` block body by its minimum nonempty-line indentation,
/// measured in raw character count (spec.md §9, Open Question (c): no
/// attempt is made to reconcile mixed tab/space indentation).
fn dedent(src: &str) -> String {
    let lines: Vec<&str> = src.lines().collect();
    let min_indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| {
            if l.len() >= min_indent {
                &l[min_indent..]
            } else {
                l.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Blocks any attribute/name access starting with `_`, per spec.md §4.2
/// ("Hardening"): this stops both dunder and single-underscore sandbox
/// escapes regardless of which AST node tried to reach them.
pub fn reject_underscore_name(name: &str) -> Result<()> {
    if name.starts_with('_') {
        return Err(TemplateError::security_with_context(
            format!("access to '{name}' is not permitted in sandboxed expressions"),
            name,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn dollar_prefix_is_tolerated() {
        let ctx = Context::new();
        ctx.set("user", Value::String("ada".into()));
        assert_eq!(
            eval_expression("$user", &ctx).unwrap().as_str(),
            Some("ada")
        );
        assert_eq!(eval_expression("user", &ctx).unwrap().as_str(), Some("ada"));
    }

    #[test]
    fn dedent_uses_minimum_indentation() {
        let src = "    x = 1\n    y = 2\n";
        assert_eq!(dedent(src), "x = 1\ny = 2");
    }
}
