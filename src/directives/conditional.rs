//! `@if` / `@elseif` / `@else` / `@endif` (spec.md §4.8). The body between
//! a matched `@if`/`@endif` pair is split into branches by a depth-aware
//! scan that skips `@elseif`/`@else` belonging to a nested `@if`; only the
//! first truthy branch's body is recursively run back through the full
//! control-structure pass.

use crate::compiler::{find_matching_end, tokenize, TokenKind};
use crate::error::Result;
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::Context;

use super::{find_directive, splice};

struct Separator {
    start: usize,
    end: usize,
    condition: Option<String>,
}

/// Top-level (not nested in another `@if`) `@elseif`/`@else` markers in
/// `body`, in source order.
fn find_separators(body: &str) -> Result<Vec<Separator>> {
    let tokens = tokenize(body)?;
    let mut depth = 0i32;
    let mut seps = Vec::new();
    for tok in &tokens {
        if tok.kind != TokenKind::Directive {
            continue;
        }
        match tok.directive_name() {
            "if" => depth += 1,
            "endif" => depth -= 1,
            "elseif" if depth == 0 => seps.push(Separator {
                start: tok.start,
                end: tok.end,
                condition: Some(tok.directive_args().to_string()),
            }),
            "else" if depth == 0 => seps.push(Separator {
                start: tok.start,
                end: tok.end,
                condition: None,
            }),
            _ => {}
        }
    }
    Ok(seps)
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(start_idx) = find_directive(&tokens, "if") else {
            break;
        };
        let end_idx = find_matching_end(&tokens, start_idx, "if", "endif")?;
        let first_condition = tokens[start_idx].directive_args().to_string();
        let body = text[tokens[start_idx].end..tokens[end_idx].start].to_string();

        let seps = find_separators(&body)?;
        let mut branch_starts = vec![0usize];
        let mut conditions = vec![Some(first_condition)];
        for sep in &seps {
            branch_starts.push(sep.end);
            conditions.push(sep.condition.clone());
        }

        let mut replacement = String::new();
        for (i, condition) in conditions.iter().enumerate() {
            let branch_start = branch_starts[i];
            let branch_end = seps.get(i).map(|s| s.start).unwrap_or(body.len());
            let matched = match condition {
                Some(src) => evaluator::eval_expression(src, ctx)?.is_truthy(),
                None => true,
            };
            if matched {
                replacement = parser::control_structures_pass(&body[branch_start..branch_end], ctx, state)?;
                break;
            }
        }

        text = splice(&text, tokens[start_idx].start, tokens[end_idx].end, &replacement);
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
    fn picks_first_truthy_branch() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        ctx.set("n", Value::Int(2));
        let out = process("@if(n == 1)one@elseif(n == 2)two@else(three)@endif", &ctx, &st).unwrap();
        assert_eq!(out, "two");
    }

    #[test]
    fn nested_if_elseif_is_not_confused_with_outer() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        ctx.set("outer", Value::Bool(true));
        ctx.set("inner", Value::Bool(false));
        let src = "@if(outer)@if(inner)A@else B@endif@else C@endif";
        let out = process(src, &ctx, &st).unwrap();
        assert_eq!(out, " B");
    }

    #[test]
    fn undefined_name_in_condition_is_falsy() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        let out = process("@if(missing)yes@else no@endif", &ctx, &st).unwrap();
        assert_eq!(out, " no");
    }
}
