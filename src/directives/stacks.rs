//! `@push` / `@prepend` / `@stack` (spec.md §4.9): a process-per-render
//! stack store keyed by name. Push/prepend store the raw, unprocessed
//! body; `@stack` is the only point where the accumulated body is run
//! back through `process_template`.

use crate::compiler::{find_matching_end, tokenize};
use crate::error::Result;
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::Context;

use super::{find_directive, splice};

fn string_arg(args: &str, ctx: &Context, directive: &str) -> Result<String> {
    evaluator::eval_expression(args, ctx)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| crate::error::TemplateError::directive(directive, "expected a string name"))
}

/// Collect every `@push('name') … @endpush`, appending each body to the
/// named stack and removing the directive from the text.
pub fn process_push(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(start) = find_directive(&tokens, "push") else {
            break;
        };
        let end = find_matching_end(&tokens, start, "push", "endpush")?;
        let name = string_arg(tokens[start].directive_args(), ctx, "push")?;
        let body = text[tokens[start].end..tokens[end].start].to_string();
        state.stacks.borrow_mut().entry(name).or_default().push(body);
        text = splice(&text, tokens[start].start, tokens[end].end, "");
    }
    Ok(text)
}

/// Collect every `@prepend('name') … @endprepend`, inserting each body at
/// the front of the named stack.
pub fn process_prepend(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(start) = find_directive(&tokens, "prepend") else {
            break;
        };
        let end = find_matching_end(&tokens, start, "prepend", "endprepend")?;
        let name = string_arg(tokens[start].directive_args(), ctx, "prepend")?;
        let body = text[tokens[start].end..tokens[end].start].to_string();
        state.stacks.borrow_mut().entry(name).or_default().insert(0, body);
        text = splice(&text, tokens[start].start, tokens[end].end, "");
    }
    Ok(text)
}

/// Replace every `@stack('name')` with the processed, newline-joined
/// contents of that stack.
pub fn process_stack(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(i) = find_directive(&tokens, "stack") else {
            break;
        };
        let name = string_arg(tokens[i].directive_args(), ctx, "stack")?;
        let joined = state
            .stacks
            .borrow()
            .get(&name)
            .map(|entries| entries.join("\n"))
            .unwrap_or_default();
        let rendered = parser::process_template(&joined, ctx, state)?;
        text = splice(&text, tokens[i].start, tokens[i].end, &rendered);
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
    use std::path::PathBuf;

    fn state<'a>(loader: &'a FsLoader, compiled: &'a CompiledCache, registry: &'a Registry, raw: &'a RawStorage) -> RenderState<'a> {
        RenderState {
            loader,
            template_dir: PathBuf::from("."),
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
    fn push_then_prepend_preserve_order() {
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        let after_push = process_push("@push('scripts')a@endpush@push('scripts')b@endpush", &ctx, &st).unwrap();
        assert_eq!(after_push, "");
        assert_eq!(st.stacks.borrow().get("scripts").unwrap(), &vec!["a".to_string(), "b".to_string()]);

        let after_prepend = process_prepend("@prepend('scripts')z@endprepend", &ctx, &st).unwrap();
        assert_eq!(after_prepend, "");
        assert_eq!(
            st.stacks.borrow().get("scripts").unwrap(),
            &vec!["z".to_string(), "a".to_string(), "b".to_string()]
        );

        let emitted = process_stack("[@stack('scripts')]", &ctx, &st).unwrap();
        assert_eq!(emitted, "[z\na\nb]");
    }
}
