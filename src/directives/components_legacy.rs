//! Legacy component dialect: `@component('name', data?) … @slot('s') … @endslot
//! … @endcomponent` (spec.md §4.7). Resolved innermost-first (a component
//! whose body contains no further `@component`) so that a nested component
//! gets its own context before the parent assembles its slots, up to a
//! fixed iteration bound.

use lazy_static::lazy_static;
use regex::Regex;

use crate::compiler::{find_matching_end, tokenize, TokenKind};
use crate::error::{Result, TemplateError};
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::{Context, Map, Value};

use super::{splice, split_top_level_commas};

const MAX_ITERATIONS: u32 = 20;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9.\-]+$").unwrap();
    static ref SLOT_RE: Regex =
        Regex::new(r#"(?s)@slot\(\s*['"]([A-Za-z0-9_\-]+)['"]\s*\)(.*?)@endslot"#).unwrap();
}

fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(TemplateError::security(format!("invalid component name: {name}")))
    }
}

fn string_literal(src: &str, ctx: &Context, directive: &str) -> Result<String> {
    evaluator::eval_expression(src, ctx)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TemplateError::directive(directive, "expected a string name"))
}

/// Pull every `@slot('name') … @endslot` out of `body`, leaving the rest as
/// the default slot content.
fn extract_slots(body: &str, ctx: &Context, state: &RenderState) -> Result<Map> {
    let mut named = Map::new();
    let mut remainder = String::with_capacity(body.len());
    let mut last = 0usize;
    for caps in SLOT_RE.captures_iter(body) {
        let whole = caps.get(0).unwrap();
        remainder.push_str(&body[last..whole.start()]);
        last = whole.end();
        let name = caps.get(1).unwrap().as_str().to_string();
        let rendered = parser::process_template(caps.get(2).unwrap().as_str(), ctx, state)?;
        named.insert(name, Value::SafeString(rendered));
    }
    remainder.push_str(&body[last..]);
    let default_slot = parser::process_template(&remainder, ctx, state)?;
    named.insert("slot".to_string(), Value::SafeString(default_slot));
    Ok(named)
}

fn render_component(name: &str, data_src: Option<&str>, body: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    validate_name(name)?;
    let slots = extract_slots(body, ctx, state)?;

    let mut overlay = ctx.to_flat_map();
    overlay.extend(slots);
    if let Some(src) = data_src {
        let data = evaluator::eval_expression(src, ctx)?;
        let Value::Map(m) = data else {
            return Err(TemplateError::directive("component", "data expression must yield a mapping"));
        };
        overlay.extend(m.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    let component_ctx = Context::from_map(overlay);

    state.enter_recursion()?;
    let result = (|| {
        let path = state.resolve_path(name)?;
        let source = state.load_source(&path)?;
        parser::process_template(&source, &component_ctx, state)
    })();
    state.exit_recursion();
    result
}

/// Whether the `@component` block starting at `tokens[start]` (matched end
/// at `end`) contains no further nested `@component`.
fn is_innermost(tokens: &[crate::compiler::Token], start: usize, end: usize) -> bool {
    tokens[start + 1..end]
        .iter()
        .all(|t| !(t.kind == TokenKind::Directive && t.directive_name() == "component"))
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    for _ in 0..MAX_ITERATIONS {
        let tokens = tokenize(&text)?;
        let mut blocks = Vec::new();
        for (i, tok) in tokens.iter().enumerate() {
            if tok.kind == TokenKind::Directive && tok.directive_name() == "component" {
                let end = find_matching_end(&tokens, i, "component", "endcomponent")?;
                if is_innermost(&tokens, i, end) {
                    blocks.push((i, end));
                }
            }
        }
        if blocks.is_empty() {
            break;
        }
        for (i, end) in blocks.into_iter().rev() {
            let args = split_top_level_commas(tokens[i].directive_args());
            let name = string_literal(&args[0], ctx, "component")?;
            let data_src = if args.len() >= 2 && !args[1].trim().is_empty() {
                Some(args[1].as_str())
            } else {
                None
            };
            let body = &text[tokens[i].end..tokens[end].start];
            let replacement = render_component(&name, data_src, body, ctx, state)?;
            text = splice(&text, tokens[i].start, tokens[end].end, &replacement);
        }
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
    use std::cell::{Cell, RefCell};

    fn state<'a>(dir: std::path::PathBuf, loader: &'a FsLoader, compiled: &'a CompiledCache, registry: &'a Registry, raw: &'a RawStorage) -> RenderState<'a> {
        RenderState {
            loader,
            template_dir: dir,
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
    fn named_and_default_slots_bind_into_component_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alert.html"), "[{{ title }}] {{ slot }}").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw);
        let ctx = Context::new();

        let src = "@component('alert')@slot('title')Warning@endslotbody text@endcomponent";
        let out = process(src, &ctx, &st).unwrap();
        assert_eq!(out, "[Warning] body text");
    }

    #[test]
    fn data_expression_merges_into_component_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("card.html"), "{{ k }}:{{ slot }}").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw);
        let ctx = Context::new();

        let src = "@component('card', {'k': 'v'})hi@endcomponent";
        let out = process(src, &ctx, &st).unwrap();
        assert_eq!(out, "v:hi");
    }
}
