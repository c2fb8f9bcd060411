//! The embedder-facing entry point (spec.md §4.1): owns the caches, the
//! directive registry, the loader and the render-time globals, and wires
//! them into a fresh `RenderState` for every call. Grounded on the
//! teacher's `template::Renderer` (the struct that owned its cache and
//! loader and exposed `render`/`clear_cache`), narrowed to the operations
//! spec.md §4.1/§6 name.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::cache::disk::DiskCache;
use crate::cache::CompiledCache;
use crate::directives::registry::{validate_identifier, DirectiveFn, Registry};
use crate::error::{Result, TemplateError};
use crate::loader::{FsLoader, TemplateLoader};
use crate::parser;
use crate::state::{RawStorage, RenderState, VALID_EXTENSIONS};
use crate::value::{Context, Map, Value};
use std::cell::{Cell, RefCell};

/// Sink for directive failures the engine policy-swallows rather than
/// propagates (spec.md §7 "Custom-directive failure"). The teacher's
/// template layer has no tracing dependency of its own and logs straight
/// to stderr (`src/template/helpers.rs`); this mirrors that rather than
/// pulling in a logging framework the original module never used.
pub trait Logger {
    fn log_directive_error(&self, name: &str, err: &TemplateError);
}

/// Default `Logger`: one line per failure, written directly to stderr.
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log_directive_error(&self, name: &str, err: &TemplateError) {
        eprintln!("bladesmith: custom directive '@{name}' failed: {err}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStorageType {
    Memory,
    Disk,
}

/// Builder-validated engine configuration (spec.md §4.1). Every field has a
/// sensible default via `Config::new`; invalid combinations are only
/// caught in `Config::validate`/`Engine::new`, never by panicking on a
/// setter.
#[derive(Debug, Clone)]
pub struct Config {
    pub template_dir: PathBuf,
    pub cache_enabled: bool,
    pub cache_storage_type: CacheStorageType,
    pub cache_dir: Option<PathBuf>,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    pub track_mtime: bool,
    pub strict_mode: bool,
    pub file_extension: String,
    pub allow_python_blocks: bool,
    pub max_loop_iterations: u32,
    pub max_recursion_depth: u32,
    pub max_template_size: u64,
    pub encoding: String,
}

impl Config {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Config {
            template_dir: template_dir.into(),
            cache_enabled: true,
            cache_storage_type: CacheStorageType::Memory,
            cache_dir: None,
            cache_max_size: 200,
            cache_ttl: Duration::ZERO,
            track_mtime: true,
            strict_mode: true,
            file_extension: ".html".to_string(),
            allow_python_blocks: false,
            max_loop_iterations: 10_000,
            max_recursion_depth: 50,
            max_template_size: 2 * 1024 * 1024,
            encoding: "utf-8".to_string(),
        }
    }

    pub fn cache_enabled(mut self, v: bool) -> Self {
        self.cache_enabled = v;
        self
    }

    pub fn cache_storage_type(mut self, v: CacheStorageType) -> Self {
        self.cache_storage_type = v;
        self
    }

    pub fn cache_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(v.into());
        self
    }

    pub fn cache_max_size(mut self, v: usize) -> Self {
        self.cache_max_size = v;
        self
    }

    pub fn cache_ttl(mut self, v: Duration) -> Self {
        self.cache_ttl = v;
        self
    }

    pub fn track_mtime(mut self, v: bool) -> Self {
        self.track_mtime = v;
        self
    }

    pub fn strict_mode(mut self, v: bool) -> Self {
        self.strict_mode = v;
        self
    }

    pub fn file_extension(mut self, v: impl Into<String>) -> Self {
        self.file_extension = v.into();
        self
    }

    pub fn allow_python_blocks(mut self, v: bool) -> Self {
        self.allow_python_blocks = v;
        self
    }

    pub fn max_loop_iterations(mut self, v: u32) -> Self {
        self.max_loop_iterations = v;
        self
    }

    pub fn max_recursion_depth(mut self, v: u32) -> Self {
        self.max_recursion_depth = v;
        self
    }

    pub fn max_template_size(mut self, v: u64) -> Self {
        self.max_template_size = v;
        self
    }

    pub fn encoding(mut self, v: impl Into<String>) -> Self {
        self.encoding = v.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.file_extension.starts_with('.') {
            return Err(TemplateError::syntax(format!(
                "file_extension must start with '.': {}",
                self.file_extension
            )));
        }
        if !VALID_EXTENSIONS.contains(&self.file_extension.as_str()) {
            return Err(TemplateError::syntax(format!(
                "unsupported file_extension: {}",
                self.file_extension
            )));
        }
        if self.cache_enabled && self.cache_max_size == 0 {
            return Err(TemplateError::syntax("cache_max_size must be > 0"));
        }
        if self.cache_enabled
            && self.cache_storage_type == CacheStorageType::Disk
            && self.cache_dir.is_none()
        {
            return Err(TemplateError::syntax("cache_storage_type=disk requires cache_dir"));
        }
        if self.max_loop_iterations == 0 {
            return Err(TemplateError::syntax("max_loop_iterations must be > 0"));
        }
        if self.max_recursion_depth == 0 {
            return Err(TemplateError::syntax("max_recursion_depth must be > 0"));
        }
        if self.max_template_size == 0 {
            return Err(TemplateError::syntax("max_template_size must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CacheStats {
    Disabled {
        enabled: bool,
    },
    Enabled {
        size: usize,
        max_size: usize,
        hits: u64,
        misses: u64,
        hit_rate: f64,
        total_requests: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_dir: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CompilerStats {
    pub cached_templates: usize,
    pub memory_usage: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub template_dir: String,
    pub strict_mode: bool,
    pub cache: CacheStats,
    pub compiler: CompilerStats,
}

/// Owns every piece of per-process state a render needs and hands out a
/// fresh `RenderState` (recursion counter, stack store) per call, matching
/// the non-reentrant single-render contract (spec.md §5).
pub struct Engine {
    config: Config,
    loader: Box<dyn TemplateLoader>,
    logger: Box<dyn Logger>,
    raw_storage: RawStorage,
    compiled_cache: CompiledCache,
    registry: Registry,
    globals: RefCell<Map>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let raw_storage = if !config.cache_enabled {
            RawStorage::Disabled
        } else {
            let ttl = (!config.cache_ttl.is_zero()).then_some(config.cache_ttl);
            match config.cache_storage_type {
                CacheStorageType::Memory => {
                    RawStorage::Memory(crate::cache::RawCache::new(config.cache_max_size, ttl, config.track_mtime))
                }
                CacheStorageType::Disk => {
                    let dir = config.cache_dir.clone().expect("validated above");
                    RawStorage::Disk(DiskCache::new(dir, config.cache_max_size, ttl)?)
                }
            }
        };
        Ok(Engine {
            compiled_cache: CompiledCache::new(config.cache_max_size),
            raw_storage,
            registry: Registry::new(),
            globals: RefCell::new(Map::new()),
            loader: Box::new(FsLoader),
            logger: Box::new(StderrLogger),
            config,
        })
    }

    /// Swap in a non-filesystem loader (tests, embedders serving templates
    /// from memory or a packed archive).
    pub fn with_loader(mut self, loader: Box<dyn TemplateLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    fn merged_context(&self, ctx: &Context) -> Context {
        let mut merged = self.globals.borrow().clone();
        merged.extend(ctx.to_flat_map());
        Context::from_map(merged)
    }

    fn fresh_state(&self) -> RenderState<'_> {
        RenderState {
            loader: self.loader.as_ref(),
            template_dir: self.config.template_dir.clone(),
            file_extension: self.config.file_extension.clone(),
            strict_mode: self.config.strict_mode,
            allow_python_blocks: self.config.allow_python_blocks,
            max_loop_iterations: self.config.max_loop_iterations,
            max_recursion_depth: self.config.max_recursion_depth,
            max_template_size: self.config.max_template_size,
            raw_cache: &self.raw_storage,
            compiled_cache: &self.compiled_cache,
            registry: &self.registry,
            recursion_depth: Cell::new(0),
            stacks: RefCell::new(indexmap::IndexMap::new()),
            track_mtime: self.config.track_mtime,
            logger: self.logger.as_ref(),
        }
    }

    /// Resolve, load, and render a named template (spec.md §2 pipeline).
    pub fn render(&self, name: &str, ctx: &Context) -> Result<String> {
        let state = self.fresh_state();
        let merged = self.merged_context(ctx);
        let path = state.resolve_path(name).map_err(|e| e.with_template_name(name))?;
        let source = state.load_source(&path).map_err(|e| e.with_template_name(name))?;
        parser::render_text(&source, &merged, &state).map_err(|e| e.with_template_name(name))
    }

    /// Render `src` directly, bypassing file lookup and the raw-source
    /// cache; the size bound still applies (spec.md §4.1).
    pub fn render_string(&self, src: &str, ctx: &Context) -> Result<String> {
        if src.len() as u64 > self.config.max_template_size {
            return Err(TemplateError::security("template exceeds max_template_size"));
        }
        let state = self.fresh_state();
        let merged = self.merged_context(ctx);
        parser::render_text(src, &merged, &state)
    }

    pub fn register_directive(&self, name: &str, handler: DirectiveFn) -> Result<()> {
        self.registry.register(name, handler)
    }

    pub fn add_global(&self, name: &str, value: Value) -> Result<()> {
        validate_identifier(name)?;
        self.globals.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    pub fn add_globals(&self, values: Map) -> Result<()> {
        for (name, value) in values {
            self.add_global(&name, value)?;
        }
        Ok(())
    }

    pub fn clear_cache(&self) -> Result<()> {
        match &self.raw_storage {
            RawStorage::Disabled => {}
            RawStorage::Memory(cache) => cache.clear(),
            RawStorage::Disk(cache) => cache.clear()?,
        }
        self.compiled_cache.clear();
        Ok(())
    }

    /// Drop `name`'s raw-source entry so the next render re-reads it from
    /// disk. The compiled cache needs no matching call: it is keyed by
    /// `SHA-256(source)`, so a changed file naturally misses on its next
    /// lookup and the stale entry ages out under normal LRU pressure.
    pub fn invalidate_template(&self, name: &str) -> Result<()> {
        let state = self.fresh_state();
        let path = state.resolve_path(name)?;
        match &self.raw_storage {
            RawStorage::Disabled => {}
            RawStorage::Memory(cache) => cache.invalidate(&path),
            RawStorage::Disk(cache) => cache.invalidate(&path)?,
        }
        Ok(())
    }

    pub fn get_stats(&self) -> Stats {
        let cache = match &self.raw_storage {
            RawStorage::Disabled => CacheStats::Disabled { enabled: false },
            RawStorage::Memory(c) => {
                let (hits, misses) = (c.hits(), c.misses());
                CacheStats::Enabled {
                    size: c.len(),
                    max_size: self.config.cache_max_size,
                    hits,
                    misses,
                    hit_rate: hit_rate(hits, misses),
                    total_requests: hits + misses,
                    cache_dir: None,
                }
            }
            RawStorage::Disk(c) => {
                let (hits, misses) = c.stats();
                CacheStats::Enabled {
                    size: c.len(),
                    max_size: self.config.cache_max_size,
                    hits,
                    misses,
                    hit_rate: hit_rate(hits, misses),
                    total_requests: hits + misses,
                    cache_dir: Some(c.dir().display().to_string()),
                }
            }
        };
        Stats {
            template_dir: self.config.template_dir.display().to_string(),
            strict_mode: self.config.strict_mode,
            cache,
            compiler: CompilerStats {
                cached_templates: self.compiled_cache.len(),
                memory_usage: self.compiled_cache.memory_usage(),
            },
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_template_with_globals_and_user_context_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "{{ greeting }}, {{ name }}!").unwrap();
        let engine = Engine::new(Config::new(dir.path())).unwrap();
        engine.add_global("greeting", Value::String("Hi".into())).unwrap();
        let ctx = Context::new();
        ctx.set("name", Value::String("Ada".into()));
        assert_eq!(engine.render("hello", &ctx).unwrap(), "Hi, Ada!");
    }

    #[test]
    fn user_context_wins_over_same_named_global() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.html"), "{{ name }}").unwrap();
        let engine = Engine::new(Config::new(dir.path())).unwrap();
        engine.add_global("name", Value::String("global".into())).unwrap();
        let ctx = Context::new();
        ctx.set("name", Value::String("user".into()));
        assert_eq!(engine.render("t", &ctx).unwrap(), "user");
    }

    #[test]
    fn render_string_skips_file_lookup_but_enforces_size_bound() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(Config::new(dir.path()).max_template_size(4)).unwrap();
        let ctx = Context::new();
        assert!(engine.render_string("way too long", &ctx).is_err());
        let engine = Engine::new(Config::new(dir.path())).unwrap();
        assert_eq!(engine.render_string("{{ 1 + 1 }}", &ctx).unwrap(), "2");
    }

    #[test]
    fn rejects_disk_cache_without_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).cache_storage_type(CacheStorageType::Disk);
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn stats_report_disabled_cache_shape() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(Config::new(dir.path()).cache_enabled(false)).unwrap();
        let stats = engine.get_stats();
        assert!(matches!(stats.cache, CacheStats::Disabled { enabled: false }));
    }

    #[test]
    fn clear_cache_resets_hit_counters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.html"), "hi").unwrap();
        let engine = Engine::new(Config::new(dir.path())).unwrap();
        let ctx = Context::new();
        engine.render("t", &ctx).unwrap();
        engine.render("t", &ctx).unwrap();
        let stats_before = engine.get_stats();
        assert!(matches!(stats_before.cache, CacheStats::Enabled { hits: 1, .. }));
        engine.clear_cache().unwrap();
        let stats_after = engine.get_stats();
        assert!(matches!(stats_after.cache, CacheStats::Enabled { hits: 0, misses: 0, .. }));
    }
}
