//! Modern component dialect: `<x-name …/>` / `<x-name …>…</x-name>`
//! (spec.md §4.7). Unlike directive families this syntax is not part of
//! the `@`-based grammar the tokenizer recognises, so it needs its own
//! tag-balanced scanning (spec.md §9: "pure regex cannot recognise nested
//! delimiters" for `<x-name>`/`</x-name>`).

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Result, TemplateError};
use crate::evaluator;
use crate::parser;
use crate::state::RenderState;
use crate::value::{Context, Map, Value};

use super::{escape, split_top_level_commas};

const MAX_ITERATIONS: u32 = 20;

lazy_static! {
    static ref OPEN_TAG_RE: Regex =
        Regex::new(r#"<x-([A-Za-z0-9.\-]+)((?:\s+[^<>]*?)?)\s*(/)?>"#).unwrap();
    static ref DYNAMIC_ATTR_RE: Regex = Regex::new(r#":([A-Za-z0-9_-]+)="([^"]*)""#).unwrap();
    static ref STATIC_ATTR_RE: Regex = Regex::new(r#"(?:^|\s)([A-Za-z0-9_-]+)="([^"]*)""#).unwrap();
    static ref BARE_ATTR_RE: Regex = Regex::new(r#"(?:^|\s)([A-Za-z0-9_-]+)(?:\s|$)"#).unwrap();
    static ref NAMED_SLOT_RE: Regex =
        Regex::new(r#"(?s)<x-slot(?::([A-Za-z0-9_-]+)|\s+name="([A-Za-z0-9_-]+)")\s*>(.*?)</x-slot(?::[A-Za-z0-9_-]+)?>"#)
            .unwrap();
    static ref PROPS_RE: Regex = Regex::new(r#"(?s)@props\(\s*\[(.*?)\]\s*\)"#).unwrap();
}

fn underscore(key: &str) -> String {
    key.replace('-', "_")
}

fn component_path(name: &str) -> Result<String> {
    if name.contains("..") || name.starts_with('/') {
        return Err(TemplateError::security(format!("invalid component name: {name}")));
    }
    Ok(format!("components/{}", name.replace('.', "/")))
}

struct OpenTag {
    name: String,
    attrs_src: String,
    start: usize,
    tag_end: usize,
    self_closing: bool,
}

fn find_open_tag(text: &str, from: usize) -> Option<OpenTag> {
    let caps = OPEN_TAG_RE.captures_at(text, from)?;
    let whole = caps.get(0).unwrap();
    Some(OpenTag {
        name: caps.get(1).unwrap().as_str().to_string(),
        attrs_src: caps.get(2).unwrap().as_str().to_string(),
        start: whole.start(),
        tag_end: whole.end(),
        self_closing: caps.get(3).is_some(),
    })
}

/// Depth-aware search for `</x-name>` matching the tag opened just before
/// `after`, tolerating further same-named nested instances.
fn find_closing_tag(text: &str, name: &str, after: usize) -> Option<usize> {
    let open_needle = format!("<x-{name}");
    let close_needle = format!("</x-{name}>");
    let mut depth = 1i32;
    let mut i = after;
    loop {
        let next_open = text[i..].find(&open_needle).map(|p| i + p);
        let next_close = text[i..].find(&close_needle).map(|p| i + p);
        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                i = o + open_needle.len();
            }
            (_, Some(c)) => {
                depth -= 1;
                if depth == 0 {
                    return Some(c);
                }
                i = c + close_needle.len();
            }
            (Some(o), None) => {
                depth += 1;
                i = o + open_needle.len();
            }
            (None, None) => return None,
        }
    }
}

/// Whether `body` contains any further `<x-` tag (used to pick the
/// innermost, resolvable-now instances on each pass).
fn contains_nested(body: &str) -> bool {
    body.contains("<x-")
}

enum AttrValue {
    Dynamic(Value),
    Static(String),
    Bare,
}

/// Parse the three attribute classes, in priority order: dynamic
/// `:attr="expr"`, then static `attr="value"`, then bare `attr`, each
/// first-write-wins against keys already seen in an earlier class.
fn parse_attrs(attrs_src: &str, ctx: &Context) -> Result<Vec<(String, AttrValue)>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for caps in DYNAMIC_ATTR_RE.captures_iter(attrs_src) {
        let key = caps.get(1).unwrap().as_str().to_string();
        if seen.insert(key.clone()) {
            let value = evaluator::eval_expression(caps.get(2).unwrap().as_str(), ctx)?;
            out.push((key, AttrValue::Dynamic(value)));
        }
    }
    for caps in STATIC_ATTR_RE.captures_iter(attrs_src) {
        let key = caps.get(1).unwrap().as_str().to_string();
        if seen.insert(key.clone()) {
            out.push((key, AttrValue::Static(caps.get(2).unwrap().as_str().to_string())));
        }
    }
    for caps in BARE_ATTR_RE.captures_iter(attrs_src) {
        let key = caps.get(1).unwrap().as_str().to_string();
        if seen.insert(key.clone()) {
            out.push((key, AttrValue::Bare));
        }
    }
    Ok(out)
}

/// Parse `@props(['k' => default, …])` entries. Each default is a string,
/// boolean, null, integer, float literal, or — if none of those match — a
/// bare word treated as a plain string.
fn parse_props(source: &str) -> Result<Map> {
    let mut defaults = Map::new();
    let Some(caps) = PROPS_RE.captures(source) else {
        return Ok(defaults);
    };
    let body = caps.get(1).unwrap().as_str();
    for entry in split_top_level_commas(body) {
        if entry.trim().is_empty() {
            continue;
        }
        let Some((key_src, val_src)) = entry.split_once("=>") else {
            continue;
        };
        let key = key_src.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
        defaults.insert(key, parse_prop_default(val_src.trim()));
    }
    Ok(defaults)
}

fn parse_prop_default(src: &str) -> Value {
    if (src.starts_with('\'') && src.ends_with('\'')) || (src.starts_with('"') && src.ends_with('"')) {
        return Value::String(src[1..src.len() - 1].to_string());
    }
    match src {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        "null" | "None" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = src.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = src.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(src.to_string())
}

fn format_attributes(passthrough: &[(String, Value)]) -> String {
    let mut parts = Vec::new();
    for (key, value) in passthrough {
        let hyphenated = key.replace('_', "-");
        match value {
            Value::Bool(true) => parts.push(hyphenated),
            Value::Bool(false) | Value::Null => {}
            other => parts.push(format!("{hyphenated}=\"{}\"", escape(&other.to_display_string()))),
        }
    }
    parts.join(" ")
}

fn extract_named_slots(body: &str, ctx: &Context, state: &RenderState) -> Result<(Map, String)> {
    let mut named = Map::new();
    let mut remainder = String::with_capacity(body.len());
    let mut last = 0usize;
    for caps in NAMED_SLOT_RE.captures_iter(body) {
        let whole = caps.get(0).unwrap();
        remainder.push_str(&body[last..whole.start()]);
        last = whole.end();
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let rendered = parser::process_template(caps.get(3).unwrap().as_str(), ctx, state)?;
        named.insert(name, Value::SafeString(rendered));
    }
    remainder.push_str(&body[last..]);
    Ok((named, remainder))
}

fn render_instance(tag: &OpenTag, body: Option<&str>, ctx: &Context, state: &RenderState) -> Result<String> {
    let path_name = component_path(&tag.name)?;
    state.enter_recursion()?;
    let result = (|| {
        let path = state.resolve_path(&path_name)?;
        let source = state.load_source(&path)?;
        let defaults = parse_props(&source)?;

        let attrs = parse_attrs(&tag.attrs_src, ctx)?;
        let mut bound = Map::new();
        let mut passthrough = Vec::new();
        for (key, value) in &attrs {
            let norm_key = underscore(key);
            let v = match value {
                AttrValue::Dynamic(v) => v.clone(),
                AttrValue::Static(s) => Value::String(s.clone()),
                AttrValue::Bare => Value::Bool(true),
            };
            if !defaults.contains_key(&norm_key) {
                passthrough.push((norm_key.clone(), v.clone()));
            }
            bound.insert(norm_key, v);
        }

        let (named_slots, remainder) = match body {
            Some(b) => extract_named_slots(b, ctx, state)?,
            None => (Map::new(), String::new()),
        };
        let default_slot = if remainder.trim().is_empty() {
            String::new()
        } else {
            parser::process_template(&remainder, ctx, state)?
        };

        let mut merged = defaults;
        merged.extend(bound);
        merged.extend(named_slots);
        merged.insert("slot".to_string(), Value::SafeString(default_slot));
        merged.insert("attributes".to_string(), Value::SafeString(format_attributes(&passthrough)));

        let component_ctx = Context::from_map(merged);
        let source = PROPS_RE.replace(&source, "");
        parser::process_template(&source, &component_ctx, state)
    })();
    state.exit_recursion();
    result
}

/// Find the next instance resolvable *now*: a self-closing tag, or a
/// paired tag whose body holds no further `<x-` (innermost-first).
fn find_next_instance(text: &str) -> Option<(OpenTag, Option<String>, usize)> {
    let mut cursor = 0usize;
    while let Some(tag) = find_open_tag(text, cursor) {
        if tag.self_closing {
            let tag_end = tag.tag_end;
            return Some((tag, None, tag_end));
        }
        match find_closing_tag(text, &tag.name, tag.tag_end) {
            Some(close_start) if !contains_nested(&text[tag.tag_end..close_start]) => {
                let close_end = close_start + format!("</x-{}>", tag.name).len();
                let body = text[tag.tag_end..close_start].to_string();
                return Some((tag, Some(body), close_end));
            }
            _ => cursor = tag.tag_end,
        }
    }
    None
}

pub fn process(text: &str, ctx: &Context, state: &RenderState) -> Result<String> {
    let mut text = text.to_string();
    for _ in 0..MAX_ITERATIONS {
        let Some((tag, body, full_end)) = find_next_instance(&text) else {
            break;
        };
        let replacement = render_instance(&tag, body.as_deref(), ctx, state)?;
        text = super::splice(&text, tag.start, full_end, &replacement);
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
    fn props_and_default_slot_render() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("components")).unwrap();
        std::fs::write(
            dir.path().join("components/btn.html"),
            "@props(['k' => 'v'])<b class=\"{{ k }}\">{{ slot }}</b>",
        )
        .unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw);
        let ctx = Context::new();

        let out = process("<x-btn k=\"q\">hi</x-btn>", &ctx, &st).unwrap();
        assert_eq!(out, "<b class=\"q\">hi</b>");
    }

    #[test]
    fn self_closing_tag_with_dynamic_attr() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("components")).unwrap();
        std::fs::write(dir.path().join("components/icon.html"), "[{{ name }}]").unwrap();
        let loader = FsLoader;
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(dir.path().to_path_buf(), &loader, &compiled, &registry, &raw);
        let ctx = Context::new();
        ctx.set("kind", Value::String("star".into()));

        let out = process("<x-icon :name=\"kind\" />", &ctx, &st).unwrap();
        assert_eq!(out, "[star]");
    }
}
