//! User-registered directive handlers (spec.md §4.10 "Custom directives").
//! Runs after `@include` and before the control-structure pass, so a
//! custom directive's output may itself contain `@if`/`@foreach`/etc.
//! Handler failures are logged and the original directive text is left
//! untouched rather than failing the whole render.

use crate::compiler::{tokenize, TokenKind};
use crate::directives::registry::DirectiveArg;
use crate::engine::Logger;
use crate::error::Result;
use crate::evaluator;
use crate::state::RenderState;
use crate::value::Context;

use super::split_top_level_commas;

/// Split a directive's parenthesised argument list into individual
/// expression-mode arguments, each evaluated if possible and otherwise
/// passed through as raw source text (spec.md §4.10).
fn parse_args(raw: &str, ctx: &Context) -> Vec<DirectiveArg> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    split_top_level_commas(raw)
        .into_iter()
        .map(|part| match evaluator::eval_expression(&part, ctx) {
            Ok(v) => DirectiveArg::Value(v),
            Err(_) => DirectiveArg::Raw(part),
        })
        .collect()
}

pub fn process(text: &str, ctx: &Context, state: &RenderState, logger: &dyn Logger) -> Result<String> {
    let names = state.registry.names();
    if names.is_empty() {
        return Ok(text.to_string());
    }

    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let found = tokens.iter().enumerate().find(|(_, t)| {
            t.kind == TokenKind::Directive && names.iter().any(|n| n == t.directive_name())
        });
        let Some((i, tok)) = found else {
            break;
        };
        let name = tok.directive_name().to_string();
        let handler = state.registry.get(&name).expect("name came from registry.names()");
        let args = parse_args(tok.directive_args(), ctx);
        let (start, end) = (tok.start, tok.end);
        let replacement = match handler(&args, ctx) {
            Ok(v) => v.to_display_string(),
            Err(e) => {
                logger.log_directive_error(&name, &e);
                text[start..end].to_string()
            }
        };
        text = super::splice(&text, start, end, &replacement);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CompiledCache;
    use crate::directives::registry::Registry;
    use crate::engine::StderrLogger;
    use crate::loader::FsLoader;
    use crate::state::RawStorage;
    use crate::value::Value;
    use std::cell::{Cell, RefCell};

    fn state<'a>(loader: &'a FsLoader, compiled: &'a CompiledCache, registry: &'a Registry, raw: &'a RawStorage) -> RenderState<'a> {
        RenderState {
            loader,
            template_dir: std::path::PathBuf::from("."),
            file_extension: ".html".into(),
            strict_mode: true,
            allow_python_blocks: false,
            max_loop_iterations: 100,
            max_recursion_depth: 10,
            max_template_size: 1_000_000,
            raw_cache: raw,
            compiled_cache: compiled,
            registry,
            recursion_depth: Cell::new(0),
            stacks: RefCell::new(indexmap::IndexMap::new()),
            track_mtime: false,
            logger: &StderrLogger,
        }
    }

    #[test]
    fn custom_directive_receives_evaluated_and_raw_args() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        registry
            .register(
                "upper",
                std::rc::Rc::new(|args: &[DirectiveArg], _ctx: &Context| {
                    let DirectiveArg::Value(v) = &args[0] else {
                        panic!("expected evaluated value");
                    };
                    Ok(Value::String(v.to_display_string().to_uppercase()))
                }),
            )
            .unwrap();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        ctx.set("name", Value::String("ada".into()));
        let out = process("@upper(name)", &ctx, &st, &StderrLogger).unwrap();
        assert_eq!(out, "ADA");
    }

    #[test]
    fn failing_handler_leaves_original_text() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        registry
            .register(
                "boom",
                std::rc::Rc::new(|_args: &[DirectiveArg], _ctx: &Context| {
                    Err(crate::error::TemplateError::directive("boom", "nope"))
                }),
            )
            .unwrap();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        let out = process("@boom()", &ctx, &st, &StderrLogger).unwrap();
        assert_eq!(out, "@boom()");
    }
}
