//! Two-tier cache (spec.md §4.3/§5): a path-keyed raw-source cache with
//! mtime/TTL/LRU invalidation, and a `SHA-256(source)`-keyed compiled-token
//! cache bounded by `lru`. Both are single-threaded (`RefCell`/`Cell`),
//! consistent with the engine's non-reentrant render contract (spec.md §5).
//! Grounded on the teacher's cache shape (hash-keyed LRU over compiled
//! artifacts) but split into the two tiers spec.md names separately.

pub mod disk;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::compiler::{self, Token};
use crate::error::Result;
use crate::loader::TemplateLoader;

struct RawEntry {
    content: String,
    mtime_at_store: SystemTime,
    last_access: Instant,
    access_count: u64,
}

/// Path-keyed raw-source cache (spec.md §3 "Cache entry (raw source)").
pub struct RawCache {
    entries: RefCell<HashMap<PathBuf, RawEntry>>,
    max_size: usize,
    ttl: Option<Duration>,
    track_mtime: bool,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl RawCache {
    pub fn new(max_size: usize, ttl: Option<Duration>, track_mtime: bool) -> Self {
        RawCache {
            entries: RefCell::new(HashMap::new()),
            max_size,
            ttl,
            track_mtime,
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    /// Fetch `path`'s source, consulting the cache first; reads through
    /// `loader` on miss/invalidation and stores the result.
    pub fn get_or_load(&self, path: &Path, loader: &dyn TemplateLoader) -> Result<String> {
        if let Some(content) = self.try_get(path, loader) {
            self.hits.set(self.hits.get() + 1);
            return Ok(content);
        }
        self.misses.set(self.misses.get() + 1);
        let content = loader.read_text(path)?;
        let mtime = loader.stat_mtime(path)?;
        self.store(path, content.clone(), mtime);
        Ok(content)
    }

    fn try_get(&self, path: &Path, loader: &dyn TemplateLoader) -> Option<String> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(path)?;
        if let Some(ttl) = self.ttl {
            if !ttl.is_zero() && entry.last_access.elapsed() > ttl {
                entries.remove(path);
                return None;
            }
        }
        if self.track_mtime {
            if let Ok(current) = loader.stat_mtime(path) {
                if current != entry.mtime_at_store {
                    entries.remove(path);
                    return None;
                }
            }
        }
        entry.last_access = Instant::now();
        entry.access_count += 1;
        Some(entry.content.clone())
    }

    fn store(&self, path: &Path, content: String, mtime: SystemTime) {
        let mut entries = self.entries.borrow_mut();
        if entries.len() >= self.max_size && !entries.contains_key(path) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(p, _)| p.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            path.to_path_buf(),
            RawEntry {
                content,
                mtime_at_store: mtime,
                last_access: Instant::now(),
                access_count: 1,
            },
        );
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.borrow_mut().remove(path);
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.hits.set(0);
        self.misses.set(0);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }
}

/// `SHA-256(source) -> token_stream` cache (spec.md §3 "Cache entry
/// (compiled)"), bounded by simple LRU eviction on insert.
pub struct CompiledCache {
    lru: RefCell<LruCache<String, Rc<Vec<Token>>>>,
}

impl CompiledCache {
    pub fn new(max_size: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(max_size.max(1)).unwrap();
        CompiledCache {
            lru: RefCell::new(LruCache::new(cap)),
        }
    }

    pub fn get_or_compile(&self, source: &str) -> Result<Rc<Vec<Token>>> {
        let key = hash_source(source);
        if let Some(hit) = self.lru.borrow_mut().get(&key) {
            return Ok(hit.clone());
        }
        let tokens = Rc::new(compiler::tokenize(source)?);
        self.lru.borrow_mut().put(key, tokens.clone());
        Ok(tokens)
    }

    pub fn len(&self) -> usize {
        self.lru.borrow().len()
    }

    pub fn clear(&self) {
        self.lru.borrow_mut().clear();
    }

    /// Approximate resident size (spec.md §6 `compiler.memory_usage`):
    /// each cached token stream's length times `size_of::<Token>()`,
    /// summed across every entry currently held.
    pub fn memory_usage(&self) -> usize {
        self.lru
            .borrow()
            .iter()
            .map(|(_, tokens)| tokens.len() * std::mem::size_of::<Token>())
            .sum()
    }
}

fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::FsLoader;

    #[test]
    fn raw_cache_hits_on_second_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.html");
        std::fs::write(&file, "hello").unwrap();
        let cache = RawCache::new(10, None, false);
        let loader = FsLoader;
        assert_eq!(cache.get_or_load(&file, &loader).unwrap(), "hello");
        assert_eq!(cache.get_or_load(&file, &loader).unwrap(), "hello");
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn raw_cache_invalidates_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.html");
        std::fs::write(&file, "v1").unwrap();
        let cache = RawCache::new(10, None, true);
        let loader = FsLoader;
        assert_eq!(cache.get_or_load(&file, &loader).unwrap(), "v1");
        std::thread::sleep(Duration::from_millis(10));
        std::fs::write(&file, "v2").unwrap();
        assert_eq!(cache.get_or_load(&file, &loader).unwrap(), "v2");
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn compiled_cache_reuses_tokens_for_identical_source() {
        let cache = CompiledCache::new(4);
        let a = cache.get_or_compile("{{ x }}").unwrap();
        let b = cache.get_or_compile("{{ x }}").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
