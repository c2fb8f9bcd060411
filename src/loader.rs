//! Filesystem contract (spec.md §6: "collaborator"). The engine only ever
//! talks to templates through this trait, so a test or embedder can swap in
//! an in-memory loader without touching `engine`/`parser`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{Result, TemplateError};

pub trait TemplateLoader {
    fn read_text(&self, path: &Path) -> Result<String>;
    fn stat_mtime(&self, path: &Path) -> Result<SystemTime>;
    fn stat_size(&self, path: &Path) -> Result<u64>;
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    fn mkdir_p(&self, dir: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

/// Default loader backed directly by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl TemplateLoader for FsLoader {
    fn read_text(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| {
            TemplateError::not_found(format!("{}: {e}", path.display()))
        })
    }

    fn stat_mtime(&self, path: &Path) -> Result<SystemTime> {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| TemplateError::not_found(format!("{}: {e}", path.display())))
    }

    fn stat_size(&self, path: &Path) -> Result<u64> {
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| TemplateError::not_found(format!("{}: {e}", path.display())))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect())
    }

    fn mkdir_p(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .map_err(|e| TemplateError::compilation(format!("could not create {}: {e}", dir.display()), None))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_loader_round_trips_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("t.html");
        std::fs::write(&file, "hello").unwrap();
        let loader = FsLoader;
        assert_eq!(loader.read_text(&file).unwrap(), "hello");
        assert_eq!(loader.stat_size(&file).unwrap(), 5);
        assert!(loader.exists(&file));
    }
}
