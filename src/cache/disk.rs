//! Disk-backed raw-source cache (spec.md §4.1 `cache_storage_type =
//! disk`/§5 "Disk cache"): a directory of per-entry files plus an index
//! file holding aggregate hit/miss counters. Eviction uses each entry
//! file's mtime as a stand-in for filesystem access time (std gives no
//! portable atime without an extra crate); TTL is by the same mtime's age.
//!
//! Per spec.md §9 Open Question (b), `invalidate` is deliberately
//! conservative: it drops every entry, not just the one named, mirroring
//! the behaviour the spec asks this implementation to preserve.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TemplateError};
use crate::loader::TemplateLoader;

#[derive(Default, Serialize, Deserialize)]
struct DiskIndex {
    hits: u64,
    misses: u64,
}

pub struct DiskCache {
    dir: PathBuf,
    max_size: usize,
    ttl: Option<Duration>,
}

impl DiskCache {
    pub fn new(dir: PathBuf, max_size: usize, ttl: Option<Duration>) -> Result<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| TemplateError::compilation(format!("cache_dir: {e}"), None))?;
        Ok(DiskCache { dir, max_size, ttl })
    }

    pub fn get_or_load(
        &self,
        path: &Path,
        loader: &dyn TemplateLoader,
        track_mtime: bool,
    ) -> Result<String> {
        if let Some(content) = self.try_read(path, loader, track_mtime)? {
            self.record(true)?;
            return Ok(content);
        }
        self.record(false)?;
        let content = loader.read_text(path)?;
        let mtime = loader.stat_mtime(path)?;
        self.store(path, &content, mtime)?;
        self.evict_if_needed()?;
        Ok(content)
    }

    fn try_read(
        &self,
        path: &Path,
        loader: &dyn TemplateLoader,
        track_mtime: bool,
    ) -> Result<Option<String>> {
        let entry_path = self.entry_path(path);
        let Ok(meta) = fs::metadata(&entry_path) else {
            return Ok(None);
        };
        if let Some(ttl) = self.ttl {
            if !ttl.is_zero() {
                if let Ok(age) = meta.modified().and_then(|m| m.elapsed().map_err(to_io_err)) {
                    if age > ttl {
                        let _ = fs::remove_file(&entry_path);
                        return Ok(None);
                    }
                }
            }
        }
        let Ok(raw) = fs::read_to_string(&entry_path) else {
            return Ok(None);
        };
        let Some((header, content)) = raw.split_once('\n') else {
            return Ok(None);
        };
        if track_mtime {
            let stored_secs: u64 = header.parse().unwrap_or(0);
            let current_secs = loader
                .stat_mtime(path)
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs());
            if current_secs != Some(stored_secs) {
                let _ = fs::remove_file(&entry_path);
                return Ok(None);
            }
        }
        Ok(Some(content.to_string()))
    }

    fn store(&self, path: &Path, content: &str, mtime: SystemTime) -> Result<()> {
        let secs = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        fs::write(self.entry_path(path), format!("{secs}\n{content}"))
            .map_err(|e| TemplateError::compilation(format!("cache write failed: {e}"), None))
    }

    fn entry_path(&self, path: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        self.dir.join(format!("{:x}.cache", hasher.finalize()))
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "cache"))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn evict_if_needed(&self) -> Result<()> {
        let mut files = self.entry_files();
        if files.len() <= self.max_size {
            return Ok(());
        }
        files.sort_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok());
        let excess = files.len() - self.max_size;
        for f in files.into_iter().take(excess) {
            let _ = fs::remove_file(f);
        }
        Ok(())
    }

    /// Conservative by spec: wipes every entry, regardless of which
    /// template's invalidation triggered the call.
    pub fn invalidate(&self, _path: &Path) -> Result<()> {
        for f in self.entry_files() {
            let _ = fs::remove_file(f);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.invalidate(&self.dir)?;
        self.reset_index()
    }

    pub fn len(&self) -> usize {
        self.entry_files().len()
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn load_index(&self) -> DiskIndex {
        fs::read_to_string(self.index_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_index(&self, index: &DiskIndex) -> Result<()> {
        let serialized = serde_json::to_string(index)
            .map_err(|e| TemplateError::compilation(format!("cache index: {e}"), None))?;
        fs::write(self.index_path(), serialized)
            .map_err(|e| TemplateError::compilation(format!("cache index write failed: {e}"), None))
    }

    fn reset_index(&self) -> Result<()> {
        self.save_index(&DiskIndex::default())
    }

    fn record(&self, hit: bool) -> Result<()> {
        let mut index = self.load_index();
        if hit {
            index.hits += 1;
        } else {
            index.misses += 1;
        }
        self.save_index(&index)
    }

    pub fn stats(&self) -> (u64, u64) {
        let index = self.load_index();
        (index.hits, index.misses)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn to_io_err(_: std::time::SystemTimeError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "system time went backwards")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::FsLoader;

    #[test]
    fn disk_cache_stores_and_hits() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let file = src_dir.path().join("t.html");
        std::fs::write(&file, "hello").unwrap();
        let cache = DiskCache::new(tmp.path().to_path_buf(), 10, None).unwrap();
        let loader = FsLoader;
        assert_eq!(cache.get_or_load(&file, &loader, false).unwrap(), "hello");
        assert_eq!(cache.get_or_load(&file, &loader, false).unwrap(), "hello");
        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn invalidate_clears_every_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let a = src_dir.path().join("a.html");
        let b = src_dir.path().join("b.html");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        let cache = DiskCache::new(tmp.path().to_path_buf(), 10, None).unwrap();
        let loader = FsLoader;
        cache.get_or_load(&a, &loader, false).unwrap();
        cache.get_or_load(&b, &loader, false).unwrap();
        assert_eq!(cache.len(), 2);
        cache.invalidate(&a).unwrap();
        assert_eq!(cache.len(), 0);
    }
}
