//! `@extends` / `@section` / `@yield` (spec.md §4.5): layout composition.
//! Only the outermost `@extends` in a render is honoured directly; a
//! parent that itself extends a grandparent is handled by recursing on
//! the already-merged text, so the same recursion counter that bounds
//! `@include` also bounds the depth of an extends chain.

use indexmap::IndexMap;

use crate::compiler::{find_matching_end, tokenize};
use crate::error::{Result, TemplateError};
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::Context;

use super::{find_directive, splice, split_top_level_commas};

fn string_literal(src: &str, ctx: &Context, directive: &str) -> Result<String> {
    evaluator::eval_expression(src, ctx)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TemplateError::directive(directive, "expected a string argument"))
}

/// Resolve `@extends` in `text`, if present, merging child sections into
/// the parent and recursing until no `@extends` remains.
pub fn resolve(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let tokens = tokenize(text)?;
    let Some(i) = find_directive(&tokens, "extends") else {
        return Ok(text.to_string());
    };
    let parent_name = string_literal(tokens[i].directive_args(), ctx, "extends")?;
    let without_extends = splice(text, tokens[i].start, tokens[i].end, "");
    let sections = extract_sections(&without_extends, ctx)?;

    state.enter_recursion()?;
    let result = (|| {
        let path = state.resolve_path(&parent_name)?;
        let parent_source = state.load_source(&path)?;
        let merged = replace_yields(&parent_source, &sections, ctx, state)?;
        resolve(&merged, ctx, state)
    })();
    state.exit_recursion();
    result
}

/// Pull every `@section` out of `text`: the inline form
/// `@section('name', 'value')` and the block form
/// `@section('name') … @endsection`. Everything left over is joined into
/// the virtual `content` section.
fn extract_sections(text: &str, ctx: &Context) -> Result<IndexMap<String, String>> {
    let mut sections = IndexMap::new();
    let mut content_fragments = Vec::new();
    let mut cursor = text;
    loop {
        let tokens = tokenize(cursor)?;
        let Some(i) = find_directive(&tokens, "section") else {
            content_fragments.push(cursor.to_string());
            break;
        };
        content_fragments.push(cursor[..tokens[i].start].to_string());
        let args = split_top_level_commas(tokens[i].directive_args());
        let name = string_literal(&args[0], ctx, "section")?;
        if args.len() >= 2 {
            let inline = string_literal(&args[1], ctx, "section")?;
            sections.insert(name, inline);
            cursor = &cursor[tokens[i].end..];
        } else {
            let end = find_matching_end(&tokens, i, "section", "endsection")?;
            let body = cursor[tokens[i].end..tokens[end].start].to_string();
            sections.insert(name, body);
            cursor = &cursor[tokens[end].end..];
        }
    }
    sections.insert("content".to_string(), content_fragments.join("\n"));
    Ok(sections)
}

fn replace_yields(
    parent_source: &str,
    sections: &IndexMap<String, String>,
    ctx: &Context,
    state: &RenderState,
) -> Result<String> {
    let mut text = parent_source.to_string();
    loop {
        let tokens = tokenize(&text)?;
        let Some(i) = find_directive(&tokens, "yield") else {
            break;
        };
        let args = split_top_level_commas(tokens[i].directive_args());
        let name = string_literal(&args[0], ctx, "yield")?;
        let default = if args.len() >= 2 {
            evaluator::eval_expression(&args[1], ctx)?.to_display_string()
        } else {
            String::new()
        };
        let replacement = match sections.get(&name) {
            Some(body) => parser::process_template(body, ctx, state)?,
            None => default,
        };
        text = splice(&text, tokens[i].start, tokens[i].end, &replacement);
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
    fn yield_with_section_and_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.html"), "A@yield('body','D')B").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw);
        let ctx = Context::new();

        let filled = resolve("@extends('base')@section('body')X@endsection", &ctx, &st).unwrap();
        assert_eq!(filled, "AXB");

        let defaulted = resolve("@extends('base')", &ctx, &st).unwrap();
        assert_eq!(defaulted, "ADB");
    }
}
