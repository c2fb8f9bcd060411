//! `@foreach(item in expr)` / `@for(var in expr)` (spec.md §4.8). Each
//! iteration overlays a one-binding child scope on the enclosing context
//! (no full-context copy) and processes its body through a loop-specific
//! micro-pipeline: recurse into any nested loop, then the conditional
//! pass, then variable interpolation. `@break`/`@continue` are not
//! consumed by either of those passes, so a literal leftover directive
//! token in the processed output is the loop driver's control-flow
//! signal.

use crate::compiler::{find_matching_end, tokenize, Token, TokenKind};
use crate::error::{ControlFlow, Result, TemplateError};
use crate::evaluator;
use crate::state::RenderState;
use crate::value::Context;

use super::{conditional, find_directive, interpolate, splice, split_in_clause};

fn find_loop_start(tokens: &[Token]) -> Option<(usize, &'static str, &'static str)> {
    tokens.iter().enumerate().find_map(|(i, t)| {
        if t.kind != TokenKind::Directive {
            return None;
        }
        match t.directive_name() {
            "foreach" => Some((i, "foreach", "endforeach")),
            "for" => Some((i, "for", "endfor")),
            _ => None,
        }
    })
}

/// Run one iteration's body through the loop/conditional/variable
/// micro-pipeline, returning the emitted text truncated at the first
/// `@break`/`@continue` marker left over, plus which one (if any).
fn run_iteration(body: &str, ctx: &Context, state: &RenderState) -> Result<(String, Option<ControlFlow>)> {
    let after_loops = process(body, ctx, state)?;
    let after_cond = conditional::process(&after_loops, ctx, state)?;
    let after_vars = interpolate::process(&after_cond, ctx, state.strict_mode)?;

    let tokens = tokenize(&after_vars)?;
    let marker = tokens.iter().find(|t| {
        t.kind == TokenKind::Directive && (t.directive_name() == "break" || t.directive_name() == "continue")
    });
    match marker {
        Some(tok) if tok.directive_name() == "break" => {
            Ok((after_vars[..tok.start].to_string(), Some(ControlFlow::Break)))
        }
        Some(tok) => Ok((after_vars[..tok.start].to_string(), Some(ControlFlow::Continue))),
        None => Ok((after_vars, None)),
    }
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some((start_idx, open_name, close_name)) = find_loop_start(&tokens) else {
            break;
        };
        let end_idx = find_matching_end(&tokens, start_idx, open_name, close_name)?;
        let (var, iter_src) = split_in_clause(tokens[start_idx].directive_args())
            .ok_or_else(|| TemplateError::directive(open_name, "expected 'name in expression'"))?;
        let body = text[tokens[start_idx].end..tokens[end_idx].start].to_string();
        let iter_val = evaluator::eval_expression(&iter_src, ctx)?;
        let items = evaluator::iterate(&iter_val)?;

        let mut out = String::new();
        for (count, item) in items.into_iter().enumerate() {
            if count as u32 >= state.max_loop_iterations {
                return Err(TemplateError::security(format!(
                    "max_loop_iterations exceeded in @{open_name}"
                )));
            }
            let child = ctx.child_with(&var, item);
            let (rendered, cf) = run_iteration(&body, &child, state)?;
            out.push_str(&rendered);
            if cf == Some(ControlFlow::Break) {
                break;
            }
        }
        text = splice(&text, tokens[start_idx].start, tokens[end_idx].end, &out);
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

    fn state<'a>(loader: &'a FsLoader, compiled: &'a CompiledCache, registry: &'a Registry, raw: &'a RawStorage) -> RenderState<'a> {
        RenderState {
            loader,
            template_dir: std::path::PathBuf::from("."),
            file_extension: ".html".into(),
            strict_mode: true,
            allow_python_blocks: false,
            max_loop_iterations: 1_000,
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
    fn foreach_with_break_stops_at_matching_value() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        let out = process(
            "@foreach(i in range(5))@if(i == 3)@break @endif{{ i }}@endforeach",
            &ctx,
            &st,
        )
        .unwrap();
        assert_eq!(out, "012");
    }

    #[test]
    fn max_loop_iterations_raises_security_error() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let mut st = state(&loader, &compiled, &registry, &raw);
        st.max_loop_iterations = 2;
        let ctx = Context::new();
        let err = process("@foreach(i in range(5)){{ i }}@endforeach", &ctx, &st).unwrap_err();
        assert!(err.is_security());
    }
}
