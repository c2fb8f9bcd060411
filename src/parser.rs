//! The render orchestrator (spec.md §4.4): sequences every directive
//! family into the two passes `render_text` (resolve `@extends`, then run
//! the full pipeline once) and `control_structures_pass` (the
//! misc→switch→loop→conditional sub-chain, reused both at the top level
//! and recursively inside `@if`/`@switch`/`@isset`/`@empty` bodies).

use crate::directives::{components_x, conditional, custom, extends, include, interpolate, loops, misc, stacks, switch};
use crate::engine::Logger;
use crate::error::Result;
use crate::state::RenderState;
use crate::value::Context;

/// `misc → switch → loop → conditional` (spec.md §4.4 step f): misc first
/// so comments/`@python` run before anything else sees the text; loops
/// before conditionals so a loop nested in an `@if` branch finishes before
/// the branch's own variable pass would otherwise have fired.
pub fn control_structures_pass(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let after_misc = misc::process(text, ctx, state)?;
    let after_switch = switch::process(&after_misc, ctx, state)?;
    let after_loops = loops::process(&after_switch, ctx, state)?;
    conditional::process(&after_loops, ctx, state)
}

/// One full pass over `text` (spec.md §4.4 steps a–h), not including the
/// top-level `@extends` resolution.
pub fn process_template(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let after_push = stacks::process_push(text, ctx, state)?;
    let after_prepend = stacks::process_prepend(&after_push, ctx, state)?;
    let after_x = components_x::process(&after_prepend, ctx, state)?;
    let after_legacy = crate::directives::components_legacy::process(&after_x, ctx, state)?;
    let after_include = include::process(&after_legacy, ctx, state)?;
    let after_custom = custom::process(&after_include, ctx, state, state.logger)?;
    let after_control = control_structures_pass(&after_custom, ctx, state)?;
    let after_stack = stacks::process_stack(&after_control, ctx, state)?;
    interpolate::process(&after_stack, ctx, state.strict_mode)
}

/// The top-level entry point: resolve `@extends` (at most once per
/// render, transitively bounded by the shared recursion counter), then
/// run the full pipeline on the result.
pub fn render_text(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let resolved = extends::resolve(text, ctx, state)?;
    process_template(&resolved, ctx, state)
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

    fn state<'a>(dir: std::path::PathBuf, loader: &'a FsLoader, compiled: &'a CompiledCache, registry: &'a Registry, raw: &'a RawStorage, logger: &'a dyn Logger) -> RenderState<'a> {
        RenderState {
            loader,
            template_dir: dir,
            file_extension: ".html".into(),
            strict_mode: true,
            allow_python_blocks: false,
            max_loop_iterations: 1_000,
            max_recursion_depth: 50,
            max_template_size: 1_000_000,
            raw_cache: raw,
            compiled_cache: compiled,
            registry,
            recursion_depth: Cell::new(0),
            stacks: RefCell::new(indexmap::IndexMap::new()),
            track_mtime: false,
            logger,
        }
    }

    #[test]
    fn full_pipeline_renders_loop_and_interpolation() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let logger = StderrLogger;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw, &logger);
        let ctx = Context::new();
        let out = render_text("@foreach(i in range(3)){{ i }}@endforeach", &ctx, &st).unwrap();
        assert_eq!(out, "012");
    }

    #[test]
    fn push_then_stack_emits_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let logger = StderrLogger;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw, &logger);
        let ctx = Context::new();
        let out = render_text("@push('s')a@endpush@push('s')b@endpush[@stack('s')]", &ctx, &st).unwrap();
        assert_eq!(out, "[a\nb]");
    }

    #[test]
    fn extends_with_loop_in_section() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.html"), "<@yield('body')>").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let logger = StderrLogger;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw, &logger);
        let ctx = Context::new();
        ctx.set("items", Value::list([Value::Int(1), Value::Int(2)]));
        let out = render_text(
            "@extends('base')@section('body')@foreach(i in items){{ i }}@endforeach@endsection",
            &ctx,
            &st,
        )
        .unwrap();
        assert_eq!(out, "<12>");
    }
}
