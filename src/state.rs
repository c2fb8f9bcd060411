//! Per-render transient state shared by the parser and every directive
//! handler (spec.md §9 "Mutable render state": stack store, recursion
//! counter, and cache handles live here, passed explicitly — no global
//! singletons). One `RenderState` is built per `Engine::render` call and is
//! not `Send`/`Sync`, matching the single-threaded render contract
//! (spec.md §5).

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::cache::disk::DiskCache;
use crate::cache::{CompiledCache, RawCache};
use crate::directives::registry::Registry;
use crate::engine::Logger;
use crate::error::{Result, TemplateError};
use crate::loader::TemplateLoader;

pub const VALID_EXTENSIONS: &[&str] = &[".html", ".blade", ".tpl", ".txt"];

pub enum RawStorage {
    Disabled,
    Memory(RawCache),
    Disk(DiskCache),
}

pub struct RenderState<'a> {
    pub loader: &'a dyn TemplateLoader,
    pub template_dir: PathBuf,
    pub file_extension: String,
    pub strict_mode: bool,
    pub allow_python_blocks: bool,
    pub max_loop_iterations: u32,
    pub max_recursion_depth: u32,
    pub max_template_size: u64,
    pub raw_cache: &'a RawStorage,
    pub compiled_cache: &'a CompiledCache,
    pub registry: &'a Registry,
    pub recursion_depth: Cell<u32>,
    pub stacks: RefCell<IndexMap<String, Vec<String>>>,
    pub track_mtime: bool,
    pub logger: &'a dyn Logger,
}

impl<'a> RenderState<'a> {
    /// Resolve `name` under `template_dir` (spec.md §4.1 "Path
    /// resolution"): no absolute path, no `..` segment, canonicalised,
    /// verified to remain a descendant of the root.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        if name.starts_with('/') || name.starts_with('\\') || Path::new(name).is_absolute() {
            return Err(TemplateError::security(format!("absolute template path rejected: {name}")));
        }
        if name.split(['/', '\\']).any(|seg| seg == "..") {
            return Err(TemplateError::security(format!("path traversal rejected: {name}")));
        }
        let with_ext = if VALID_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            name.to_string()
        } else {
            format!("{name}{}", self.file_extension)
        };
        let candidate = self.template_dir.join(&with_ext);
        let root = self
            .template_dir
            .canonicalize()
            .map_err(|e| TemplateError::not_found(format!("{}: {e}", self.template_dir.display())))?;
        let resolved = if self.loader.exists(&candidate) {
            candidate
                .canonicalize()
                .map_err(|e| TemplateError::not_found(format!("{name}: {e}")))?
        } else {
            return Err(TemplateError::not_found(name));
        };
        if !resolved.starts_with(&root) {
            return Err(TemplateError::security(format!("template escapes root: {name}")));
        }
        Ok(resolved)
    }

    /// Load source for an already-resolved path, through whichever cache
    /// tier is configured, enforcing the size bound (spec.md §2 step 2).
    pub fn load_source(&self, path: &Path) -> Result<String> {
        let content = match self.raw_cache {
            RawStorage::Disabled => self.loader.read_text(path)?,
            RawStorage::Memory(cache) => cache.get_or_load(path, self.loader)?,
            RawStorage::Disk(cache) => cache.get_or_load(path, self.loader, self.track_mtime)?,
        };
        if content.len() as u64 > self.max_template_size {
            return Err(TemplateError::security(format!(
                "template exceeds max_template_size: {}",
                path.display()
            )));
        }
        Ok(content)
    }

    pub fn enter_recursion(&self) -> Result<()> {
        let depth = self.recursion_depth.get() + 1;
        if depth > self.max_recursion_depth {
            return Err(TemplateError::security("max_recursion_depth exceeded"));
        }
        self.recursion_depth.set(depth);
        Ok(())
    }

    pub fn exit_recursion(&self) {
        self.recursion_depth.set(self.recursion_depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CompiledCache;
    use crate::directives::registry::Registry;
    use crate::loader::FsLoader;

    fn state<'a>(
        loader: &'a FsLoader,
        dir: PathBuf,
        compiled: &'a CompiledCache,
        registry: &'a Registry,
        raw: &'a RawStorage,
    ) -> RenderState<'a> {
        RenderState {
            loader,
            template_dir: dir,
            file_extension: ".html".into(),
            strict_mode: true,
            allow_python_blocks: false,
            max_loop_iterations: 10_000,
            max_recursion_depth: 50,
            max_template_size: 1_000_000,
            raw_cache: raw,
            compiled_cache: compiled,
            registry,
            recursion_depth: Cell::new(0),
            stacks: RefCell::new(IndexMap::new()),
            track_mtime: false,
            logger: &crate::engine::StderrLogger,
        }
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        let loader = FsLoader;
        let dir = tempfile::tempdir().unwrap();
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, dir.path().to_path_buf(), &compiled, &registry, &raw);
        assert!(st.resolve_path("../escape").is_err());
        assert!(st.resolve_path("/etc/passwd").is_err());
    }

    #[test]
    fn resolves_existing_template_and_appends_extension() {
        let loader = FsLoader;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "hi").unwrap();
        let compiled = CompiledCache::new(4);
        let registry = Registry::new();
        let raw = RawStorage::Disabled;
        let st = state(&loader, dir.path().to_path_buf(), &compiled, &registry, &raw);
        let resolved = st.resolve_path("hello").unwrap();
        assert_eq!(st.load_source(&resolved).unwrap(), "hi");
    }
}
