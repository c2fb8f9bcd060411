//! `@include` / `@includeIf` (spec.md §4.6): resolve, load, and recursively
//! run the included template back through `process_template`, honouring
//! the shared recursion counter.

use crate::compiler::tokenize;
use crate::error::Result;
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::Context;

use super::{find_directive, splice, split_top_level_commas};

fn string_literal(src: &str, ctx: &Context, directive: &str) -> Result<String> {
    evaluator::eval_expression(src, ctx)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| crate::error::TemplateError::directive(directive, "expected a string template name"))
}

fn render_included(name: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    state.enter_recursion()?;
    let result = (|| {
        let path = state.resolve_path(name)?;
        let source = state.load_source(&path)?;
        parser::process_template(&source, ctx, state)
    })();
    state.exit_recursion();
    result
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(i) = tokens.iter().position(|t| {
            t.kind == crate::compiler::TokenKind::Directive
                && (t.directive_name() == "include" || t.directive_name() == "includeIf")
        }) else {
            break;
        };
        let tok = &tokens[i];
        let replacement = if tok.directive_name() == "include" {
            let name = string_literal(tok.directive_args(), ctx, "include")?;
            render_included(&name, ctx, state)?
        } else {
            let parts = split_top_level_commas(tok.directive_args());
            if parts.len() != 2 {
                return Err(crate::error::TemplateError::directive(
                    "includeIf",
                    "expects a template name and a condition expression",
                ));
            }
            let name = string_literal(&parts[0], ctx, "includeIf")?;
            if evaluator::eval_expression(&parts[1], ctx)?.is_truthy() {
                render_included(&name, ctx, state)?
            } else {
                String::new()
            }
        };
        text = splice(&text, tok.start, tok.end, &replacement);
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

    #[test]
    fn include_resolves_and_renders_nested_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting.html"), "Hi {{ name }}").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = RenderState {
            loader: &loader,
            template_dir: dir.path().to_path_buf(),
            file_extension: ".html".into(),
            strict_mode: true,
            allow_python_blocks: false,
            max_loop_iterations: 100,
            max_recursion_depth: 10,
            max_template_size: 1_000_000,
            raw_cache: &raw,
            compiled_cache: &compiled,
            registry: &registry,
            recursion_depth: Cell::new(0),
            stacks: RefCell::new(indexmap::IndexMap::new()),
            track_mtime: false,
            logger: &StderrLogger,
        };
        let ctx = Context::new();
        ctx.set("name", Value::String("ada".into()));
        let out = process("[@include('greeting')]", &ctx, &st).unwrap();
        assert_eq!(out, "[Hi ada]");
        assert_eq!(st.recursion_depth.get(), 0);
    }

    #[test]
    fn include_if_skips_on_falsy_condition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.html"), "shown").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = RenderState {
            loader: &loader,
            template_dir: dir.path().to_path_buf(),
            file_extension: ".html".into(),
            strict_mode: true,
            allow_python_blocks: false,
            max_loop_iterations: 100,
            max_recursion_depth: 10,
            max_template_size: 1_000_000,
            raw_cache: &raw,
            compiled_cache: &compiled,
            registry: &registry,
            recursion_depth: Cell::new(0),
            stacks: RefCell::new(indexmap::IndexMap::new()),
            track_mtime: false,
            logger: &StderrLogger,
        };
        let ctx = Context::new();
        let out = process("[@includeIf('x', False)]", &ctx, &st).unwrap();
        assert_eq!(out, "[]");
    }
}
