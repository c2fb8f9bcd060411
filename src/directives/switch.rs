//! `@switch` / `@case` / `@default` (spec.md §4.8): evaluate the
//! discriminant once, compare against each `@case` expression in source
//! order by value equality, and process the first match (with its
//! trailing `@break` stripped) or the `@default` body if none match.

use crate::compiler::{find_matching_end, tokenize, TokenKind};
use crate::error::Result;
use crate::parser;
use crate::state::RenderState;
use crate::value::Context;

use super::{find_directive, splice};

struct CaseSep {
    start: usize,
    end: usize,
    /// `Some(expr)` for `@case(expr)`, `None` for `@default`.
    condition: Option<String>,
}

fn find_case_separators(body: &str) -> Result<Vec<CaseSep>> {
    let tokens = tokenize(body)?;
    let mut depth = 0i32;
    let mut seps = Vec::new();
    for tok in &tokens {
        if tok.kind != TokenKind::Directive {
            continue;
        }
        match tok.directive_name() {
            "switch" => depth += 1,
            "endswitch" => depth -= 1,
            "case" if depth == 0 => seps.push(CaseSep {
                start: tok.start,
                end: tok.end,
                condition: Some(tok.directive_args().to_string()),
            }),
            "default" if depth == 0 => seps.push(CaseSep {
                start: tok.start,
                end: tok.end,
                condition: None,
            }),
            _ => {}
        }
    }
    Ok(seps)
}

fn strip_break(body: &str) -> Result<String> {
    let tokens = tokenize(body)?;
    let mut out = String::new();
    for tok in &tokens {
        if tok.kind == TokenKind::Directive && tok.directive_name() == "break" {
            continue;
        }
        out.push_str(&body[tok.start..tok.end]);
    }
    Ok(out)
}

fn process_case_body(body: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let stripped = strip_break(body)?;
    parser::control_structures_pass(&stripped, ctx, state)
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(start_idx) = find_directive(&tokens, "switch") else {
            break;
        };
        let end_idx = find_matching_end(&tokens, start_idx, "switch", "endswitch")?;
        let discriminant = crate::evaluator::eval_expression(tokens[start_idx].directive_args(), ctx)?;
        let body = text[tokens[start_idx].end..tokens[end_idx].start].to_string();

        let seps = find_case_separators(&body)?;
        let mut replacement = String::new();
        let mut default_body: Option<String> = None;
        let mut matched = false;
        for (i, sep) in seps.iter().enumerate() {
            let case_end = seps.get(i + 1).map(|s| s.start).unwrap_or(body.len());
            let case_body = &body[sep.end..case_end];
            match &sep.condition {
                Some(case_src) => {
                    let case_val = crate::evaluator::eval_expression(case_src, ctx)?;
                    if discriminant.equals(&case_val) {
                        replacement = process_case_body(case_body, ctx, state)?;
                        matched = true;
                        break;
                    }
                }
                None => default_body = Some(case_body.to_string()),
            }
        }
        if !matched {
            if let Some(db) = default_body {
                replacement = process_case_body(&db, ctx, state)?;
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
    fn matches_first_equal_case_and_falls_back_to_default() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();

        ctx.set("n", Value::Int(2));
        let src = "@switch(n)@case(1)one@break@case(2)two@break@default other@endswitch";
        assert_eq!(process(src, &ctx, &st).unwrap(), "two");

        ctx.set("n", Value::Int(9));
        assert_eq!(process(src, &ctx, &st).unwrap(), " other");
    }
}
